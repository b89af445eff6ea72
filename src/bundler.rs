// src/bundler.rs
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::{Address, H256};
use jsonrpsee::core::RpcResult;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::proc_macros::rpc;
use tracing::{debug, info};

use crate::error::BundlerError;
use crate::types::{GasEstimate, UserOperation, UserOperationReceipt};

/// The ERC-4337 `eth` namespace methods this tool calls on a bundler.
#[rpc(client, namespace = "eth")]
pub trait BundlerApi {
    #[method(name = "estimateUserOperationGas")]
    async fn estimate_user_operation_gas(
        &self,
        user_operation: UserOperation,
        entry_point: Address,
    ) -> RpcResult<GasEstimate>;

    #[method(name = "sendUserOperation")]
    async fn send_user_operation(
        &self,
        user_operation: UserOperation,
        entry_point: Address,
    ) -> RpcResult<H256>;

    #[method(name = "getUserOperationReceipt")]
    async fn get_user_operation_receipt(
        &self,
        user_operation_hash: H256,
    ) -> RpcResult<Option<UserOperationReceipt>>;
}

#[async_trait]
pub trait Bundler: Send + Sync {
    async fn estimate_user_operation_gas(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<GasEstimate, BundlerError>;

    /// Returns the operation hash once the bundler accepts it. Acceptance is
    /// not inclusion.
    async fn send_user_operation(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<H256, BundlerError>;

    async fn get_user_operation_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<UserOperationReceipt>, BundlerError>;

    /// Polls every `interval` until a receipt shows up. The whole wait,
    /// including any slow request, is bounded by `timeout`.
    async fn wait_for_user_operation_receipt(
        &self,
        hash: H256,
        timeout: Duration,
        interval: Duration,
    ) -> Result<UserOperationReceipt, BundlerError> {
        let poll = async {
            loop {
                match self.get_user_operation_receipt(hash).await {
                    Ok(Some(receipt)) => return Ok(receipt),
                    Ok(None) => {
                        debug!("No receipt yet for {:?}, retrying in {:?}", hash, interval);
                        tokio::time::sleep(interval).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(BundlerError::Timeout(hash)),
        }
    }
}

/// Bundler reached over JSON-RPC/HTTP.
pub struct JsonRpcBundler {
    client: HttpClient,
}

impl JsonRpcBundler {
    pub fn new(url: &str) -> Result<Self, BundlerError> {
        let client = HttpClientBuilder::default().build(url)?;
        info!("Using bundler at {}", url);
        Ok(Self { client })
    }
}

#[async_trait]
impl Bundler for JsonRpcBundler {
    async fn estimate_user_operation_gas(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<GasEstimate, BundlerError> {
        Ok(BundlerApiClient::estimate_user_operation_gas(&self.client, op.clone(), entry_point)
            .await?)
    }

    async fn send_user_operation(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<H256, BundlerError> {
        Ok(BundlerApiClient::send_user_operation(&self.client, op.clone(), entry_point).await?)
    }

    async fn get_user_operation_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<UserOperationReceipt>, BundlerError> {
        Ok(BundlerApiClient::get_user_operation_receipt(&self.client, hash).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ethers::types::{TransactionReceipt, U256};

    use super::*;

    /// Answers `None` until `ready_after` polls have been made.
    struct SlowBundler {
        polls: AtomicUsize,
        ready_after: Option<usize>,
    }

    impl SlowBundler {
        fn new(ready_after: Option<usize>) -> Self {
            Self {
                polls: AtomicUsize::new(0),
                ready_after,
            }
        }
    }

    fn receipt(hash: H256) -> UserOperationReceipt {
        UserOperationReceipt {
            user_op_hash: hash,
            sender: Address::repeat_byte(0xab),
            nonce: U256::zero(),
            paymaster: None,
            actual_gas_cost: U256::from(1),
            actual_gas_used: U256::from(1),
            success: true,
            reason: None,
            logs: vec![],
            receipt: TransactionReceipt::default(),
        }
    }

    #[async_trait]
    impl Bundler for SlowBundler {
        async fn estimate_user_operation_gas(
            &self,
            _op: &UserOperation,
            _entry_point: Address,
        ) -> Result<GasEstimate, BundlerError> {
            unimplemented!()
        }

        async fn send_user_operation(
            &self,
            _op: &UserOperation,
            _entry_point: Address,
        ) -> Result<H256, BundlerError> {
            unimplemented!()
        }

        async fn get_user_operation_receipt(
            &self,
            hash: H256,
        ) -> Result<Option<UserOperationReceipt>, BundlerError> {
            let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.ready_after {
                Some(n) if polls >= n => Ok(Some(receipt(hash))),
                _ => Ok(None),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn returns_receipt_once_available() {
        let bundler = SlowBundler::new(Some(3));
        let hash = H256::repeat_byte(0x01);
        let receipt = bundler
            .wait_for_user_operation_receipt(hash, Duration::from_secs(60), Duration::from_millis(1500))
            .await
            .unwrap();
        assert_eq!(receipt.user_op_hash, hash);
        assert_eq!(bundler.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_without_receipt() {
        let bundler = SlowBundler::new(None);
        let hash = H256::repeat_byte(0x02);
        let started = tokio::time::Instant::now();
        let err = bundler
            .wait_for_user_operation_receipt(hash, Duration::from_secs(60), Duration::from_millis(1500))
            .await
            .unwrap_err();

        assert!(matches!(err, BundlerError::Timeout(h) if h == hash));
        assert!(started.elapsed() >= Duration::from_secs(60));
        let polls = bundler.polls.load(Ordering::SeqCst);
        assert!((40..=41).contains(&polls), "unexpected poll count {polls}");
    }
}
