// src/main.rs
use std::sync::Arc;

use anyhow::bail;
use clap::Parser;
use dotenv::dotenv;
use ethers::providers::{Http, Provider};
use tracing::{error, info, warn};
use tracing_subscriber::FmtSubscriber;

use userop_operator::config::{parse_address, Cli, Command, ListenArgs, SendArgs};
use userop_operator::listener::parse_event;
use userop_operator::{
    ChainReader, EthersChain, EthersWriter, EventListener, JsonRpcBundler, OwnerCredential,
    ReceiptOutcome, SimpleAccount, UserOperationSubmitter,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let cli = Cli::parse();

    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Command::Send(args) => send(args).await,
        Command::Listen(args) => listen(args).await,
    }
}

async fn send(args: SendArgs) -> anyhow::Result<()> {
    let provider = Provider::<Http>::try_from(args.chain.eth_rpc_url.as_str())?
        .interval(args.chain.poll_interval());
    let provider = Arc::new(provider);

    let reader = EthersChain::new(provider.clone());
    let chain_id = reader.chain_id().await?;
    info!("Connected to chain {} at {}", chain_id, args.chain.eth_rpc_url);

    let owner = OwnerCredential::from_private_key(&args.private_key, chain_id)?;
    let config = args.submitter_config()?;
    let calls = args.calls()?;

    let writer = EthersWriter::new(
        provider.clone(),
        owner.wallet().clone(),
        args.chain.poll_interval(),
    );
    let account = SimpleAccount::new(
        provider.clone(),
        &owner,
        args.factory()?,
        config.entry_point,
        chain_id,
    );
    let bundler = JsonRpcBundler::new(&args.bundler_url)?;

    let submitter = UserOperationSubmitter::new(reader, writer, account, bundler, config);
    let result = submitter.submit(&owner, calls).await?;

    match result.outcome {
        ReceiptOutcome::Included { receipt, .. } => {
            if receipt.success {
                info!("User operation {:?} succeeded", result.user_op_hash);
            } else {
                bail!(
                    "User operation {:?} was included but reverted",
                    result.user_op_hash
                );
            }
        }
        ReceiptOutcome::Pending => {
            warn!(
                "User operation {:?} is still pending; query the bundler later with this hash",
                result.user_op_hash
            );
        }
        ReceiptOutcome::PollFailed { kind, message } => {
            error!("Could not confirm {:?}: {}", result.user_op_hash, message);
            bail!("receipt polling failed ({})", kind);
        }
    }

    Ok(())
}

async fn listen(args: ListenArgs) -> anyhow::Result<()> {
    let provider = Provider::<Http>::try_from(args.chain.eth_rpc_url.as_str())?
        .interval(args.chain.poll_interval());
    let address = parse_address(&args.address)?;
    let events = args
        .events
        .iter()
        .map(|e| parse_event(e))
        .collect::<Result<Vec<_>, _>>()?;

    info!("Listening for {} event(s) on {:?}", events.len(), address);
    let listener = EventListener::new(
        Arc::new(provider),
        address,
        events,
        args.chain.poll_interval(),
    );

    if let Some(from_block) = args.from_block {
        match listener.past_events(from_block).await {
            Ok(past) if past.is_empty() => info!("No past events found"),
            Ok(past) => {
                info!("Found {} past event(s)", past.len());
                for (i, event) in past.iter().enumerate() {
                    info!("Past event #{}: {}", i + 1, event);
                }
            }
            Err(e) => error!("Error fetching past events: {}", e),
        }
    }

    // Keep watching until Ctrl+C is pressed
    listener
        .watch(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;
    info!("Listener stopped");

    Ok(())
}
