// src/config.rs
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ethers::abi::token::{LenientTokenizer, Tokenizer};
use ethers::abi::AbiParser;
use ethers::types::{Address, Bytes, U256};
use ethers::utils::parse_ether;
use tracing::Level;

use crate::account::SIMPLE_ACCOUNT_FACTORY_V06;
use crate::submitter::SubmitterConfig;
use crate::types::{Call, EntryPointVersion};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Send ERC-4337 user operations and watch contract events", long_about = None)]
pub struct Cli {
    #[clap(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: Level,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Submit a call through the owner's smart account.
    Send(SendArgs),
    /// Print past events of a contract and watch for new ones.
    Listen(ListenArgs),
}

#[derive(Args, Debug)]
pub struct ChainArgs {
    #[clap(long, env = "ETH_RPC_URL", default_value = "http://127.0.0.1:8545")]
    pub eth_rpc_url: String,

    /// How often the node is polled for receipts and filter changes.
    #[clap(long, env = "RPC_POLL_INTERVAL_MS", default_value_t = 500)]
    pub rpc_poll_interval_ms: u64,
}

impl ChainArgs {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.rpc_poll_interval_ms)
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[clap(flatten)]
    pub chain: ChainArgs,

    #[clap(long, env = "BUNDLER_URL", default_value = "http://localhost:4337")]
    pub bundler_url: String,

    /// Owner key of the smart account; also pays the top-up.
    #[clap(long, env = "PRIVATE_KEY", hide_env_values = true)]
    pub private_key: String,

    #[clap(long, env = "ENTRY_POINT_VERSION", default_value = "0.6")]
    pub entry_point_version: String,

    #[clap(long, env = "ACCOUNT_FACTORY", default_value = SIMPLE_ACCOUNT_FACTORY_V06)]
    pub factory: String,

    #[clap(long, default_value_t = 0)]
    pub account_index: u64,

    #[clap(long, default_value_t = 0)]
    pub nonce_key: u64,

    /// Contract the smart account calls.
    #[clap(long, env = "TARGET_ADDRESS")]
    pub target: String,

    /// Raw call data for the target, hex encoded.
    #[clap(long, conflicts_with = "function")]
    pub calldata: Option<String>,

    /// Function to call, e.g. "increment()" or "setNumber(uint256)".
    #[clap(long)]
    pub function: Option<String>,

    /// Argument for --function, repeated in order.
    #[clap(long = "arg", requires = "function")]
    pub args: Vec<String>,

    /// Ether sent with the call.
    #[clap(long, default_value = "0")]
    pub value: String,

    /// Extra call batched after the main one, as <address>:<hex calldata>.
    #[clap(long = "batch-call")]
    pub batch_calls: Vec<String>,

    /// Ether sent to the smart account when its balance is zero.
    #[clap(long, env = "FUNDING_AMOUNT", default_value = "1")]
    pub funding_amount: String,

    #[clap(long, default_value_t = 60_000)]
    pub funding_timeout_ms: u64,

    #[clap(long, env = "GAS_SAFETY_MARGIN", default_value_t = 2,
        value_parser = clap::value_parser!(u64).range(1..))]
    pub safety_margin: u64,

    #[clap(long, default_value_t = 3_000_000)]
    pub fallback_call_gas: u64,

    #[clap(long, default_value_t = 10_000_000_000)]
    pub fallback_max_fee_per_gas: u64,

    #[clap(long, default_value_t = 5_000_000_000)]
    pub fallback_max_priority_fee_per_gas: u64,

    #[clap(long, default_value_t = 1_000_000)]
    pub fallback_verification_gas: u64,

    #[clap(long, default_value_t = 100_000)]
    pub fallback_pre_verification_gas: u64,

    #[clap(long, env = "RECEIPT_TIMEOUT_MS", default_value_t = 60_000)]
    pub receipt_timeout_ms: u64,

    #[clap(long, env = "RECEIPT_POLL_INTERVAL_MS", default_value_t = 1_500)]
    pub receipt_poll_interval_ms: u64,
}

impl SendArgs {
    pub fn submitter_config(&self) -> Result<SubmitterConfig> {
        let entry_point = self
            .entry_point_version
            .parse::<EntryPointVersion>()
            .map_err(|e| anyhow!(e))?;
        let funding_amount = parse_ether(&self.funding_amount)
            .with_context(|| format!("invalid funding amount {:?}", self.funding_amount))?;

        Ok(SubmitterConfig {
            entry_point,
            account_index: U256::from(self.account_index),
            nonce_key: U256::from(self.nonce_key),
            funding_amount,
            funding_timeout: Duration::from_millis(self.funding_timeout_ms),
            safety_margin: self.safety_margin,
            fallback_call_gas: U256::from(self.fallback_call_gas),
            fallback_max_fee_per_gas: U256::from(self.fallback_max_fee_per_gas),
            fallback_max_priority_fee_per_gas: U256::from(self.fallback_max_priority_fee_per_gas),
            fallback_verification_gas: U256::from(self.fallback_verification_gas),
            fallback_pre_verification_gas: U256::from(self.fallback_pre_verification_gas),
            receipt_timeout: Duration::from_millis(self.receipt_timeout_ms),
            receipt_poll_interval: Duration::from_millis(self.receipt_poll_interval_ms),
        })
    }

    pub fn factory(&self) -> Result<Address> {
        parse_address(&self.factory)
    }

    pub fn calls(&self) -> Result<Vec<Call>> {
        let data = match (&self.calldata, &self.function) {
            (Some(hex), None) => parse_hex(hex)?,
            (None, Some(function)) => encode_function_call(function, &self.args)?,
            (None, None) => Bytes::default(),
            (Some(_), Some(_)) => bail!("--calldata and --function are mutually exclusive"),
        };
        let mut calls = vec![Call {
            to: parse_address(&self.target)?,
            data,
            value: parse_ether(&self.value)
                .with_context(|| format!("invalid value {:?}", self.value))?,
        }];

        for entry in &self.batch_calls {
            let (to, data) = entry
                .split_once(':')
                .ok_or_else(|| anyhow!("batch call {entry:?} is not <address>:<calldata>"))?;
            calls.push(Call {
                to: parse_address(to)?,
                data: parse_hex(data)?,
                value: U256::zero(),
            });
        }
        Ok(calls)
    }
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    #[clap(flatten)]
    pub chain: ChainArgs,

    #[clap(long, env = "CONTRACT_ADDRESS")]
    pub address: String,

    /// Event signature to watch, e.g.
    /// "SpaceCreated(address indexed owner, uint256 indexed tokenId, address indexed space)".
    #[clap(long = "event", required = true)]
    pub events: Vec<String>,

    /// Replay matching logs from this block before watching.
    #[clap(long)]
    pub from_block: Option<u64>,
}

pub fn parse_address(s: &str) -> Result<Address> {
    s.trim()
        .parse::<Address>()
        .with_context(|| format!("invalid address {s:?}"))
}

pub fn parse_hex(s: &str) -> Result<Bytes> {
    let s = s.trim();
    let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))
        .with_context(|| format!("invalid hex {s:?}"))?;
    Ok(bytes.into())
}

/// Encodes a call from a human-readable signature and string arguments.
pub fn encode_function_call(signature: &str, args: &[String]) -> Result<Bytes> {
    let signature = signature.trim();
    let full = if signature.starts_with("function ") {
        signature.to_string()
    } else {
        format!("function {signature}")
    };
    let function = AbiParser::default()
        .parse_function(&full)
        .map_err(|e| anyhow!("invalid function signature {signature:?}: {e}"))?;

    if function.inputs.len() != args.len() {
        bail!(
            "{} expects {} argument(s), got {}",
            function.name,
            function.inputs.len(),
            args.len()
        );
    }
    let tokens = function
        .inputs
        .iter()
        .zip(args)
        .map(|(param, arg)| {
            LenientTokenizer::tokenize(&param.kind, arg)
                .map_err(|e| anyhow!("argument {:?} for {}: {e}", arg, param.name))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(function.encode_input(&tokens)?.into())
}

#[cfg(test)]
mod tests {
    use ethers::utils::id;

    use super::*;

    const ANVIL_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn send_args(extra: &[&str]) -> SendArgs {
        let mut argv = vec![
            "userop-operator",
            "send",
            "--private-key",
            ANVIL_KEY,
            "--target",
            "0x5081a39b8A5f0E35a8D959395a630b68B74Dd30f",
        ];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Send(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn defaults_match_local_devnet() {
        let args = send_args(&[]);
        let config = args.submitter_config().unwrap();
        assert_eq!(args.chain.eth_rpc_url, "http://127.0.0.1:8545");
        assert_eq!(args.bundler_url, "http://localhost:4337");
        assert_eq!(config.entry_point, EntryPointVersion::V06);
        assert_eq!(config.safety_margin, 2);
        assert_eq!(config.fallback_call_gas, U256::from(3_000_000));
        assert_eq!(config.funding_amount, parse_ether(1).unwrap());
        assert_eq!(config.receipt_timeout, Duration::from_secs(60));
        assert_eq!(config.receipt_poll_interval, Duration::from_millis(1500));
        assert_eq!(
            args.factory().unwrap(),
            SIMPLE_ACCOUNT_FACTORY_V06.parse::<Address>().unwrap()
        );
    }

    #[test]
    fn zero_safety_margin_is_rejected() {
        let argv = [
            "userop-operator",
            "send",
            "--private-key",
            ANVIL_KEY,
            "--target",
            "0x5081a39b8A5f0E35a8D959395a630b68B74Dd30f",
            "--safety-margin",
            "0",
        ];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn encodes_function_without_arguments() {
        let data = encode_function_call("increment()", &[]).unwrap();
        assert_eq!(data.to_vec(), id("increment()").to_vec());
    }

    #[test]
    fn encodes_function_arguments() {
        let data = encode_function_call("function setNumber(uint256 newNumber)", &["42".to_string()])
            .unwrap();
        assert_eq!(&data[..4], &id("setNumber(uint256)")[..]);
        assert_eq!(U256::from_big_endian(&data[4..36]), U256::from(42));
    }

    #[test]
    fn argument_count_must_match() {
        assert!(encode_function_call("setNumber(uint256)", &[]).is_err());
    }

    #[test]
    fn builds_batched_calls() {
        let args = send_args(&[
            "--function",
            "increment()",
            "--batch-call",
            "0x0000000000000000000000000000000000000042:0xd09de08a",
        ]);
        let calls = args.calls().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].data.to_vec(), id("increment()").to_vec());
        assert_eq!(calls[1].to, Address::from_low_u64_be(0x42));
        assert_eq!(calls[1].data.to_vec(), vec![0xd0, 0x9d, 0xe0, 0x8a]);
    }

    #[test]
    fn raw_calldata_is_decoded() {
        let args = send_args(&["--calldata", "0xd09de08a", "--value", "0.5"]);
        let calls = args.calls().unwrap();
        assert_eq!(calls[0].data.to_vec(), vec![0xd0, 0x9d, 0xe0, 0x8a]);
        assert_eq!(calls[0].value, parse_ether("0.5").unwrap());
    }

    #[test]
    fn listen_requires_an_event() {
        let argv = ["userop-operator", "listen", "--address", "0x5081a39b8A5f0E35a8D959395a630b68B74Dd30f"];
        assert!(Cli::try_parse_from(argv).is_err());
    }
}
