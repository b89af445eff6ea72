// src/error.rs
use std::fmt;

use ethers::types::{Address, H256, U256};
use jsonrpsee::core::Error as RpcError;
use thiserror::Error;

/// ERC-4337 bundler error codes that signal a rejection by the entry point
/// or one of its validation rules (-32500 ..= -32507).
const AA_ERROR_CODES: std::ops::RangeInclusive<i32> = -32507..=-32500;

/// Coarse category of a bundler rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// Rejected by the entry point or account validation (`AAxx` errors).
    AccountAbstraction,
    /// The bundler refused the gas limits or fees.
    Gas,
    Unclassified,
}

impl RejectionKind {
    /// Falls back to substring matching on the message. Only used when the
    /// bundler did not hand back a recognised error code.
    pub fn from_message(message: &str) -> Self {
        if message.contains("AA") {
            RejectionKind::AccountAbstraction
        } else if message.contains("gas") {
            RejectionKind::Gas
        } else {
            RejectionKind::Unclassified
        }
    }

    pub fn from_code(code: i32, message: &str) -> Self {
        if AA_ERROR_CODES.contains(&code) {
            RejectionKind::AccountAbstraction
        } else {
            Self::from_message(message)
        }
    }
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionKind::AccountAbstraction => write!(f, "account abstraction protocol error"),
            RejectionKind::Gas => write!(f, "gas related error"),
            RejectionKind::Unclassified => write!(f, "unclassified error"),
        }
    }
}

#[derive(Error, Debug)]
pub enum BundlerError {
    #[error("Bundler returned error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("Bundler transport error: {0}")]
    Transport(String),

    #[error("Timed out waiting for user operation {0:?}")]
    Timeout(H256),
}

impl BundlerError {
    pub fn kind(&self) -> RejectionKind {
        match self {
            BundlerError::Rpc { code, message } => RejectionKind::from_code(*code, message),
            BundlerError::Transport(message) => RejectionKind::from_message(message),
            BundlerError::Timeout(_) => RejectionKind::Unclassified,
        }
    }
}

impl From<RpcError> for BundlerError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Call(obj) => BundlerError::Rpc {
                code: obj.code(),
                message: obj.message().to_string(),
            },
            other => BundlerError::Transport(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum SubmitterError {
    #[error("Invalid owner credential: {0}")]
    InvalidCredential(String),

    #[error("Smart account address derivation failed: {0}")]
    Derivation(String),

    #[error("Funding {amount} wei to {account:?} failed: {reason}")]
    Funding {
        account: Address,
        amount: U256,
        reason: String,
    },

    #[error("Funding transaction {0:?} was not confirmed")]
    FundingUnconfirmed(H256),

    #[error("User operation rejected ({kind}): {message}")]
    Rejected { kind: RejectionKind, message: String },

    #[error("Invalid user operation request: {0}")]
    InvalidRequest(String),

    #[error("Signing user operation failed: {0}")]
    Signing(String),

    #[error("Ethereum provider error: {0}")]
    EthereumProviderError(String),
}

#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("Invalid event signature {signature:?}: {reason}")]
    InvalidEvent { signature: String, reason: String },

    #[error("Log does not match any watched event")]
    UnknownEvent,

    #[error("Failed to decode log: {0}")]
    Decode(String),

    #[error("Ethereum provider error: {0}")]
    EthereumProviderError(String),
}

impl From<BundlerError> for SubmitterError {
    fn from(err: BundlerError) -> Self {
        SubmitterError::Rejected {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_account_abstraction_messages() {
        let kind = RejectionKind::from_message("AA21 didn't pay prefund");
        assert_eq!(kind, RejectionKind::AccountAbstraction);
    }

    #[test]
    fn aa_prefix_wins_over_gas() {
        let kind = RejectionKind::from_message("AA40 over verificationGasLimit, gas too low");
        assert_eq!(kind, RejectionKind::AccountAbstraction);
    }

    #[test]
    fn classifies_gas_messages() {
        let kind = RejectionKind::from_message("preVerificationGas too low: expected gas 45000");
        assert_eq!(kind, RejectionKind::Gas);
    }

    #[test]
    fn other_messages_are_unclassified() {
        let kind = RejectionKind::from_message("connection refused");
        assert_eq!(kind, RejectionKind::Unclassified);
    }

    #[test]
    fn entry_point_codes_are_account_abstraction() {
        let err = BundlerError::Rpc {
            code: -32500,
            message: "transaction rejected by entry point".to_string(),
        };
        assert_eq!(err.kind(), RejectionKind::AccountAbstraction);
    }

    #[test]
    fn unknown_codes_fall_back_to_message() {
        let err = BundlerError::Rpc {
            code: -32602,
            message: "maxFeePerGas below gas price floor".to_string(),
        };
        assert_eq!(err.kind(), RejectionKind::Gas);

        let err = BundlerError::Rpc {
            code: -32603,
            message: "internal error".to_string(),
        };
        assert_eq!(err.kind(), RejectionKind::Unclassified);
    }

    #[test]
    fn rpc_call_errors_keep_code_and_message() {
        let obj = jsonrpsee::types::ErrorObject::owned(-32506, "AA24 signature error", None::<()>);
        let err = BundlerError::from(RpcError::Call(obj));
        match &err {
            BundlerError::Rpc { code, message } => {
                assert_eq!(*code, -32506);
                assert_eq!(message, "AA24 signature error");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(err.kind(), RejectionKind::AccountAbstraction);
    }

    #[test]
    fn non_call_errors_are_transport() {
        let err = BundlerError::from(RpcError::RequestTimeout);
        assert!(matches!(err, BundlerError::Transport(_)));
    }

    #[test]
    fn timeout_is_unclassified() {
        assert_eq!(BundlerError::Timeout(H256::zero()).kind(), RejectionKind::Unclassified);
    }
}
