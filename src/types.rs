// src/types.rs
use std::fmt;
use std::str::FromStr;

use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, Log, TransactionReceipt, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

use crate::error::RejectionKind;

/// Canonical v0.6 entry point, deployed at the same address on every chain.
pub const ENTRY_POINT_V06: &str = "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPointVersion {
    V06,
}

impl EntryPointVersion {
    pub fn address(&self) -> Address {
        match self {
            EntryPointVersion::V06 => ENTRY_POINT_V06
                .parse()
                .expect("entry point constant is a valid address"),
        }
    }
}

impl FromStr for EntryPointVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('v') {
            "0.6" | "0.6.0" => Ok(EntryPointVersion::V06),
            other => Err(format!("unsupported entry point version {other}")),
        }
    }
}

impl fmt::Display for EntryPointVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryPointVersion::V06 => write!(f, "0.6"),
        }
    }
}

/// ERC-4337 v0.6 user operation, serialized the way bundlers expect it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// Packs every field except the signature, hashing the dynamic ones.
    fn pack_for_hash(&self) -> Vec<u8> {
        encode(&[
            Token::Address(self.sender),
            Token::Uint(self.nonce),
            Token::FixedBytes(keccak256(&self.init_code).to_vec()),
            Token::FixedBytes(keccak256(&self.call_data).to_vec()),
            Token::Uint(self.call_gas_limit),
            Token::Uint(self.verification_gas_limit),
            Token::Uint(self.pre_verification_gas),
            Token::Uint(self.max_fee_per_gas),
            Token::Uint(self.max_priority_fee_per_gas),
            Token::FixedBytes(keccak256(&self.paymaster_and_data).to_vec()),
        ])
    }

    /// The hash the account owner signs: binds the operation to one entry
    /// point and one chain.
    pub fn hash(&self, entry_point: Address, chain_id: u64) -> H256 {
        let encoded = encode(&[
            Token::FixedBytes(keccak256(self.pack_for_hash()).to_vec()),
            Token::Address(entry_point),
            Token::Uint(U256::from(chain_id)),
        ]);
        H256::from(keccak256(encoded))
    }
}

/// One call the smart account should make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimateSource {
    Estimated,
    Fallback,
}

/// Gas and fee parameters chosen for a single submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasPlan {
    pub call_gas_limit: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub gas_source: EstimateSource,
    pub fee_source: EstimateSource,
}

#[derive(Debug, Clone)]
pub struct UserOperationRequest {
    pub calls: Vec<Call>,
    pub gas_plan: GasPlan,
}

/// Result of `eth_estimateUserOperationGas`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasEstimate {
    pub pre_verification_gas: U256,
    pub verification_gas_limit: U256,
    pub call_gas_limit: U256,
}

/// Result of `eth_getUserOperationReceipt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationReceipt {
    pub user_op_hash: H256,
    pub sender: Address,
    pub nonce: U256,
    #[serde(default)]
    pub paymaster: Option<Address>,
    pub actual_gas_cost: U256,
    pub actual_gas_used: U256,
    pub success: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub logs: Vec<Log>,
    pub receipt: TransactionReceipt,
}

#[derive(Debug, Clone)]
pub enum ReceiptOutcome {
    /// Mined. The transaction receipt is absent only if the chain lookup failed.
    Included {
        receipt: Box<UserOperationReceipt>,
        transaction_receipt: Option<TransactionReceipt>,
    },
    /// No receipt within the polling window. The operation may still land.
    Pending,
    PollFailed { kind: RejectionKind, message: String },
}

#[derive(Debug, Clone)]
pub struct SubmissionResult {
    pub user_op_hash: H256,
    pub sender: Address,
    pub gas_plan: GasPlan,
    pub outcome: ReceiptOutcome,
}

impl SubmissionResult {
    pub fn is_pending(&self) -> bool {
        matches!(self.outcome, ReceiptOutcome::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_op() -> UserOperation {
        UserOperation {
            sender: Address::repeat_byte(0x11),
            nonce: U256::from(3),
            call_data: Bytes::from(vec![0xb6, 0x1d, 0x27, 0xf6]),
            call_gas_limit: U256::from(100_000),
            verification_gas_limit: U256::from(1_000_000),
            pre_verification_gas: U256::from(100_000),
            max_fee_per_gas: U256::from(10_000_000_000u64),
            max_priority_fee_per_gas: U256::from(5_000_000_000u64),
            ..Default::default()
        }
    }

    #[test]
    fn hash_ignores_signature() {
        let op = sample_op();
        let signed = UserOperation {
            signature: Bytes::from(vec![1u8; 65]),
            ..op.clone()
        };
        let ep = EntryPointVersion::V06.address();
        assert_eq!(op.hash(ep, 31337), signed.hash(ep, 31337));
    }

    #[test]
    fn hash_binds_chain_and_entry_point() {
        let op = sample_op();
        let ep = EntryPointVersion::V06.address();
        assert_ne!(op.hash(ep, 31337), op.hash(ep, 1));
        assert_ne!(op.hash(ep, 31337), op.hash(Address::repeat_byte(0x22), 31337));
    }

    #[test]
    fn hash_covers_gas_fields() {
        let op = sample_op();
        let bumped = UserOperation {
            call_gas_limit: U256::from(200_000),
            ..op.clone()
        };
        let ep = EntryPointVersion::V06.address();
        assert_ne!(op.hash(ep, 31337), bumped.hash(ep, 31337));
    }

    #[test]
    fn serializes_in_camel_case() {
        let value = serde_json::to_value(sample_op()).unwrap();
        assert!(value.get("callGasLimit").is_some());
        assert!(value.get("paymasterAndData").is_some());
        assert!(value.get("call_gas_limit").is_none());
    }

    #[test]
    fn parses_entry_point_versions() {
        assert_eq!("0.6".parse::<EntryPointVersion>().unwrap(), EntryPointVersion::V06);
        assert_eq!("v0.6".parse::<EntryPointVersion>().unwrap(), EntryPointVersion::V06);
        assert!("0.7".parse::<EntryPointVersion>().is_err());
    }
}
