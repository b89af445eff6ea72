// src/listener.rs
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ethers::abi::{AbiParser, Event, RawLog, Token};
use ethers::prelude::*;
use tracing::{debug, error, info, warn};

use crate::error::ListenerError;

fn provider_error(e: impl fmt::Display) -> ListenerError {
    ListenerError::EthereumProviderError(e.to_string())
}

/// Parses `event Foo(address indexed a, uint256 b)`. The leading `event`
/// keyword is optional.
pub fn parse_event(signature: &str) -> Result<Event, ListenerError> {
    let signature = signature.trim();
    let full = if signature.starts_with("event ") {
        signature.to_string()
    } else {
        format!("event {signature}")
    };
    AbiParser::default()
        .parse_event(&full)
        .map_err(|e| ListenerError::InvalidEvent {
            signature: signature.to_string(),
            reason: e.to_string(),
        })
}

fn format_token(token: &Token) -> String {
    match token {
        Token::Uint(v) | Token::Int(v) => v.to_string(),
        Token::Address(a) => format!("{a:?}"),
        Token::Bool(b) => b.to_string(),
        Token::String(s) => s.clone(),
        Token::Bytes(b) | Token::FixedBytes(b) => format!("0x{}", hex::encode(b)),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct DecodedLog {
    pub event: String,
    pub params: Vec<(String, Token)>,
    pub transaction_hash: Option<H256>,
    pub block_number: Option<U64>,
}

impl fmt::Display for DecodedLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.event)?;
        for (i, (name, value)) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={}", format_token(value))?;
        }
        write!(f, ")")?;
        if let Some(hash) = self.transaction_hash {
            write!(f, " tx={hash:?}")?;
        }
        if let Some(block) = self.block_number {
            write!(f, " block={block}")?;
        }
        Ok(())
    }
}

/// An installed log filter on the node. Call [`LogSubscription::unsubscribe`]
/// to release it; [`EventListener::watch`] does so on every exit path. A
/// subscription dropped without `unsubscribe` uninstalls the filter from a
/// spawned task when a tokio runtime is available.
pub struct LogSubscription<M: Middleware + 'static> {
    client: Arc<M>,
    id: U256,
    released: bool,
}

impl<M: Middleware + 'static> LogSubscription<M> {
    pub async fn install(client: Arc<M>, filter: &Filter) -> Result<Self, ListenerError> {
        let id = client
            .new_filter(FilterKind::Logs(filter))
            .await
            .map_err(provider_error)?;
        debug!("Installed log filter {}", id);
        Ok(Self {
            client,
            id,
            released: false,
        })
    }

    pub fn id(&self) -> U256 {
        self.id
    }

    pub async fn poll(&self) -> Result<Vec<Log>, ListenerError> {
        self.client
            .get_filter_changes::<_, Log>(self.id)
            .await
            .map_err(provider_error)
    }

    pub async fn unsubscribe(mut self) -> Result<bool, ListenerError> {
        self.released = true;
        let removed = self
            .client
            .uninstall_filter(self.id)
            .await
            .map_err(provider_error)?;
        debug!("Uninstalled log filter {} ({})", self.id, removed);
        Ok(removed)
    }
}

impl<M: Middleware + 'static> Drop for LogSubscription<M> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let client = self.client.clone();
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match client.uninstall_filter(id).await {
                        Ok(removed) => debug!("Uninstalled dropped log filter {} ({})", id, removed),
                        Err(e) => warn!("Failed to uninstall dropped log filter {}: {}", id, e),
                    }
                });
            }
            Err(_) => warn!("Log filter {} dropped outside a runtime and left installed", id),
        }
    }
}

/// Replays and watches the logs of a set of events on one contract.
pub struct EventListener<M> {
    client: Arc<M>,
    address: Address,
    events: Vec<Event>,
    poll_interval: Duration,
}

impl<M: Middleware + 'static> EventListener<M> {
    pub fn new(
        client: Arc<M>,
        address: Address,
        events: Vec<Event>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            address,
            events,
            poll_interval,
        }
    }

    pub fn filter(&self) -> Filter {
        let signatures: Vec<H256> = self.events.iter().map(|e| e.signature()).collect();
        Filter::new()
            .address(self.address)
            .topic0(ValueOrArray::Array(signatures))
    }

    pub fn decode(&self, log: &Log) -> Result<DecodedLog, ListenerError> {
        let topic0 = log.topics.first().ok_or(ListenerError::UnknownEvent)?;
        let event = self
            .events
            .iter()
            .find(|e| e.signature() == *topic0)
            .ok_or(ListenerError::UnknownEvent)?;
        let parsed = event
            .parse_log(RawLog {
                topics: log.topics.clone(),
                data: log.data.to_vec(),
            })
            .map_err(|e| ListenerError::Decode(e.to_string()))?;

        Ok(DecodedLog {
            event: event.name.clone(),
            params: parsed
                .params
                .into_iter()
                .map(|p| (p.name, p.value))
                .collect(),
            transaction_hash: log.transaction_hash,
            block_number: log.block_number,
        })
    }

    /// Matching logs from `from_block` up to the latest block.
    pub async fn past_events(&self, from_block: u64) -> Result<Vec<DecodedLog>, ListenerError> {
        let filter = self
            .filter()
            .from_block(from_block)
            .to_block(BlockNumber::Latest);
        let logs = self
            .client
            .get_logs(&filter)
            .await
            .map_err(provider_error)?;

        let mut decoded = Vec::with_capacity(logs.len());
        for log in &logs {
            match self.decode(log) {
                Ok(d) => decoded.push(d),
                Err(e) => warn!("Skipping past log: {}", e),
            }
        }
        Ok(decoded)
    }

    /// Watches for new logs until `shutdown` resolves, then releases the
    /// filter. Poll errors are logged and the watch keeps going.
    pub async fn watch<F>(&self, shutdown: F) -> Result<(), ListenerError>
    where
        F: Future<Output = ()>,
    {
        let subscription = LogSubscription::install(self.client.clone(), &self.filter()).await?;
        info!(
            "Watching {} event(s) on {:?} with filter {}",
            self.events.len(),
            self.address,
            subscription.id()
        );

        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Stopping event listener");
                    break;
                }
                _ = ticker.tick() => match subscription.poll().await {
                    Ok(logs) => {
                        for log in &logs {
                            match self.decode(log) {
                                Ok(decoded) => info!("New event: {}", decoded),
                                Err(e) => warn!("Undecodable log: {}", e),
                            }
                        }
                    }
                    Err(e) => error!("Event watching error: {}", e),
                },
            }
        }

        subscription.unsubscribe().await?;
        Ok(())
    }
}
