// src/lib.rs
//! Operator tooling for ERC-4337 smart accounts: submit user operations
//! through a bundler and watch contract events on a development chain.

pub mod account;
pub mod bundler;
pub mod chain;
pub mod config;
pub mod error;
pub mod listener;
pub mod submitter;
pub mod types;

pub use account::{OwnerCredential, SimpleAccount, SmartAccountFacade, SmartAccountHandle};
pub use bundler::{Bundler, JsonRpcBundler};
pub use chain::{ChainReader, ChainWriter, EthersChain, EthersWriter};
pub use error::{BundlerError, ListenerError, RejectionKind, SubmitterError};
pub use listener::{EventListener, LogSubscription};
pub use submitter::{SubmitterConfig, UserOperationSubmitter};
pub use types::{Call, GasPlan, ReceiptOutcome, SubmissionResult, UserOperation};
