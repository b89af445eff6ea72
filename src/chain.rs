// src/chain.rs
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use tracing::debug;

use crate::error::SubmitterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// Read-only chain queries used by the submission pipeline.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn chain_id(&self) -> Result<u64, SubmitterError>;

    async fn get_balance(&self, address: Address) -> Result<U256, SubmitterError>;

    /// `None` when no contract is deployed at `address`.
    async fn get_code(&self, address: Address) -> Result<Option<Bytes>, SubmitterError>;

    async fn estimate_gas(
        &self,
        from: Address,
        to: Address,
        data: Bytes,
        value: U256,
    ) -> Result<U256, SubmitterError>;

    async fn estimate_fees_per_gas(&self) -> Result<FeeEstimate, SubmitterError>;

    async fn get_transaction_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<TransactionReceipt>, SubmitterError>;
}

/// Plain transactions signed by the owner key. Only used to fund the account.
#[async_trait]
pub trait ChainWriter: Send + Sync {
    fn address(&self) -> Address;

    async fn send_transaction(&self, to: Address, value: U256) -> Result<H256, SubmitterError>;

    /// Blocks until the transaction is mined. Errors if it was dropped.
    async fn wait_for_transaction_receipt(
        &self,
        hash: H256,
    ) -> Result<TransactionReceipt, SubmitterError>;
}

fn provider_error(e: impl std::fmt::Display) -> SubmitterError {
    SubmitterError::EthereumProviderError(e.to_string())
}

pub struct EthersChain<M> {
    client: Arc<M>,
}

impl<M: Middleware> EthersChain<M> {
    pub fn new(client: Arc<M>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<M> ChainReader for EthersChain<M>
where
    M: Middleware + 'static,
{
    async fn chain_id(&self) -> Result<u64, SubmitterError> {
        let id = self.client.get_chainid().await.map_err(provider_error)?;
        Ok(id.as_u64())
    }

    async fn get_balance(&self, address: Address) -> Result<U256, SubmitterError> {
        self.client
            .get_balance(address, None)
            .await
            .map_err(provider_error)
    }

    async fn get_code(&self, address: Address) -> Result<Option<Bytes>, SubmitterError> {
        let code = self
            .client
            .get_code(address, None)
            .await
            .map_err(provider_error)?;
        Ok(if code.is_empty() { None } else { Some(code) })
    }

    async fn estimate_gas(
        &self,
        from: Address,
        to: Address,
        data: Bytes,
        value: U256,
    ) -> Result<U256, SubmitterError> {
        let tx: TypedTransaction = TransactionRequest::new()
            .from(from)
            .to(to)
            .data(data)
            .value(value)
            .into();
        self.client
            .estimate_gas(&tx, None)
            .await
            .map_err(provider_error)
    }

    async fn estimate_fees_per_gas(&self) -> Result<FeeEstimate, SubmitterError> {
        let (max_fee_per_gas, max_priority_fee_per_gas) = self
            .client
            .estimate_eip1559_fees(None)
            .await
            .map_err(provider_error)?;
        Ok(FeeEstimate {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        })
    }

    async fn get_transaction_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<TransactionReceipt>, SubmitterError> {
        self.client
            .get_transaction_receipt(hash)
            .await
            .map_err(provider_error)
    }
}

/// Owner-signed writer over any ethers provider stack.
pub struct EthersWriter<M> {
    client: SignerMiddleware<Arc<M>, LocalWallet>,
    poll_interval: Duration,
}

impl<M: Middleware> EthersWriter<M> {
    pub fn new(provider: Arc<M>, wallet: LocalWallet, poll_interval: Duration) -> Self {
        Self {
            client: SignerMiddleware::new(provider, wallet),
            poll_interval,
        }
    }
}

#[async_trait]
impl<M> ChainWriter for EthersWriter<M>
where
    M: Middleware + 'static,
{
    fn address(&self) -> Address {
        self.client.address()
    }

    async fn send_transaction(&self, to: Address, value: U256) -> Result<H256, SubmitterError> {
        let tx = TransactionRequest::new()
            .from(self.client.address())
            .to(to)
            .value(value);
        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(provider_error)?;
        let hash = pending.tx_hash();
        debug!("Broadcast transaction {:?} to {:?}", hash, to);
        Ok(hash)
    }

    async fn wait_for_transaction_receipt(
        &self,
        hash: H256,
    ) -> Result<TransactionReceipt, SubmitterError> {
        PendingTransaction::new(hash, self.client.provider())
            .interval(self.poll_interval)
            .await
            .map_err(provider_error)?
            .ok_or(SubmitterError::FundingUnconfirmed(hash))
    }
}
