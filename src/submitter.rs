// src/submitter.rs
use std::time::Duration;

use ethers::types::{Address, Bytes, H256, U256, U64};
use ethers::utils::parse_ether;
use tracing::{debug, error, info, warn};

use crate::account::{OwnerCredential, SmartAccountFacade, SmartAccountHandle};
use crate::bundler::Bundler;
use crate::chain::{ChainReader, ChainWriter};
use crate::error::{BundlerError, SubmitterError};
use crate::types::{
    Call, EntryPointVersion, EstimateSource, GasPlan, ReceiptOutcome, SubmissionResult,
    UserOperationRequest,
};

/// Knobs of the submission pipeline.
#[derive(Debug, Clone)]
pub struct SubmitterConfig {
    pub entry_point: EntryPointVersion,
    /// Factory salt; selects which of the owner's accounts is used.
    pub account_index: U256,
    pub nonce_key: U256,
    /// Sent to the account when, and only when, its balance is zero.
    pub funding_amount: U256,
    pub funding_timeout: Duration,
    /// Multiplier applied to the direct-call gas estimate.
    pub safety_margin: u64,
    pub fallback_call_gas: U256,
    pub fallback_max_fee_per_gas: U256,
    pub fallback_max_priority_fee_per_gas: U256,
    pub fallback_verification_gas: U256,
    pub fallback_pre_verification_gas: U256,
    pub receipt_timeout: Duration,
    pub receipt_poll_interval: Duration,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            entry_point: EntryPointVersion::V06,
            account_index: U256::zero(),
            nonce_key: U256::zero(),
            funding_amount: parse_ether(1).unwrap_or_default(),
            funding_timeout: Duration::from_secs(60),
            safety_margin: 2,
            fallback_call_gas: U256::from(3_000_000u64),
            fallback_max_fee_per_gas: U256::from(10_000_000_000u64),
            fallback_max_priority_fee_per_gas: U256::from(5_000_000_000u64),
            fallback_verification_gas: U256::from(1_000_000u64),
            fallback_pre_verification_gas: U256::from(100_000u64),
            receipt_timeout: Duration::from_secs(60),
            receipt_poll_interval: Duration::from_millis(1500),
        }
    }
}

/// Drives one user operation from an owner key to an inclusion receipt.
pub struct UserOperationSubmitter<R, W, A, B> {
    reader: R,
    writer: W,
    account: A,
    bundler: B,
    config: SubmitterConfig,
}

impl<R, W, A, B> UserOperationSubmitter<R, W, A, B>
where
    R: ChainReader,
    W: ChainWriter,
    A: SmartAccountFacade,
    B: Bundler,
{
    pub fn new(reader: R, writer: W, account: A, bundler: B, config: SubmitterConfig) -> Self {
        Self {
            reader,
            writer,
            account,
            bundler,
            config,
        }
    }

    /// Full pipeline: derive, fund if empty, plan gas, submit, poll.
    pub async fn submit(
        &self,
        owner: &OwnerCredential,
        calls: Vec<Call>,
    ) -> Result<SubmissionResult, SubmitterError> {
        if self.writer.address() != owner.address() {
            return Err(SubmitterError::InvalidCredential(format!(
                "funding wallet {:?} is not the account owner {:?}",
                self.writer.address(),
                owner.address()
            )));
        }
        if self.account.signer() != owner.address() {
            return Err(SubmitterError::InvalidCredential(format!(
                "account signer {:?} is not the account owner {:?}",
                self.account.signer(),
                owner.address()
            )));
        }
        info!("Owner address: {:?}", owner.address());

        let account = self.derive_account(owner.address()).await?;
        self.ensure_funded(&account).await?;

        let call_data = self.account.encode_calls(&calls)?;
        let gas_plan = self.plan_gas(owner.address(), &account, &call_data).await;
        let request = UserOperationRequest { calls, gas_plan };

        let user_op_hash = self.send(&account, call_data, &request).await?;
        let outcome = self.await_receipt(user_op_hash).await;

        Ok(SubmissionResult {
            user_op_hash,
            sender: account.address,
            gas_plan: request.gas_plan,
            outcome,
        })
    }

    /// Derives the counterfactual account and records whether it has code.
    pub async fn derive_account(&self, owner: Address) -> Result<SmartAccountHandle, SubmitterError> {
        let address = self
            .account
            .derive_address(owner, self.config.entry_point, self.config.account_index)
            .await?;
        info!("Smart account address: {:?}", address);

        let deployed = self.reader.get_code(address).await?.is_some();
        if !deployed {
            info!("Smart account {:?} not deployed yet, it will be deployed with the first operation", address);
        }

        Ok(SmartAccountHandle {
            address,
            owner,
            entry_point: self.config.entry_point,
            index: self.config.account_index,
            nonce_key: self.config.nonce_key,
            deployed,
        })
    }

    /// Tops up an empty account and waits for the transfer to be mined.
    /// Returns the funding transaction hash when one was sent.
    pub async fn ensure_funded(
        &self,
        account: &SmartAccountHandle,
    ) -> Result<Option<H256>, SubmitterError> {
        let balance = self.reader.get_balance(account.address).await?;
        info!("Smart account {:?} balance: {} wei", account.address, balance);
        if !balance.is_zero() {
            debug!("Smart account already has funds, skipping top-up");
            return Ok(None);
        }

        let amount = self.config.funding_amount;
        info!("Funding smart account {:?} with {} wei", account.address, amount);
        let tx_hash = self
            .writer
            .send_transaction(account.address, amount)
            .await
            .map_err(|e| SubmitterError::Funding {
                account: account.address,
                amount,
                reason: e.to_string(),
            })?;

        let receipt = tokio::time::timeout(
            self.config.funding_timeout,
            self.writer.wait_for_transaction_receipt(tx_hash),
        )
        .await
        .map_err(|_| SubmitterError::FundingUnconfirmed(tx_hash))??;

        if receipt.status != Some(U64::one()) {
            error!("Funding transaction {:?} reverted", tx_hash);
            return Err(SubmitterError::FundingUnconfirmed(tx_hash));
        }
        info!("Smart account funded in transaction {:?}", tx_hash);
        Ok(Some(tx_hash))
    }

    /// Never fails: each estimate independently degrades to its fallback.
    pub async fn plan_gas(
        &self,
        owner: Address,
        account: &SmartAccountHandle,
        call_data: &Bytes,
    ) -> GasPlan {
        let (base_gas, gas_source) = match self
            .reader
            .estimate_gas(owner, account.address, call_data.clone(), U256::zero())
            .await
        {
            Ok(gas) if !gas.is_zero() => {
                info!("Estimated gas for direct call: {}", gas);
                (gas, EstimateSource::Estimated)
            }
            Ok(_) => {
                warn!(
                    "Gas estimation returned zero, using fallback of {}",
                    self.config.fallback_call_gas
                );
                (self.config.fallback_call_gas, EstimateSource::Fallback)
            }
            Err(e) => {
                warn!(
                    "Gas estimation failed: {}. Using fallback of {}",
                    e, self.config.fallback_call_gas
                );
                (self.config.fallback_call_gas, EstimateSource::Fallback)
            }
        };

        let (max_fee_per_gas, max_priority_fee_per_gas, fee_source) =
            match self.reader.estimate_fees_per_gas().await {
                Ok(fees) => {
                    info!(
                        "Max fee per gas: {} wei, max priority fee per gas: {} wei",
                        fees.max_fee_per_gas, fees.max_priority_fee_per_gas
                    );
                    (
                        fees.max_fee_per_gas,
                        fees.max_priority_fee_per_gas,
                        EstimateSource::Estimated,
                    )
                }
                Err(e) => {
                    warn!("Fee estimation failed: {}. Using fallback fees", e);
                    (
                        self.config.fallback_max_fee_per_gas,
                        self.config.fallback_max_priority_fee_per_gas,
                        EstimateSource::Fallback,
                    )
                }
            };

        let margin = U256::from(self.config.safety_margin.max(1));
        GasPlan {
            call_gas_limit: base_gas.saturating_mul(margin),
            max_fee_per_gas,
            max_priority_fee_per_gas,
            gas_source,
            fee_source,
        }
    }

    async fn send(
        &self,
        account: &SmartAccountHandle,
        call_data: Bytes,
        request: &UserOperationRequest,
    ) -> Result<H256, SubmitterError> {
        let entry_point = account.entry_point.address();
        let mut op = self
            .account
            .build_user_operation(account, call_data, &request.gas_plan)
            .await?;

        match self.bundler.estimate_user_operation_gas(&op, entry_point).await {
            Ok(estimate) => {
                debug!(
                    "Bundler estimate: verification gas {}, pre-verification gas {}",
                    estimate.verification_gas_limit, estimate.pre_verification_gas
                );
                op.verification_gas_limit = estimate.verification_gas_limit;
                op.pre_verification_gas = estimate.pre_verification_gas;
            }
            Err(e) => {
                warn!("Bundler gas estimation failed ({}): {}. Using fallbacks", e.kind(), e);
                op.verification_gas_limit = self.config.fallback_verification_gas;
                op.pre_verification_gas = self.config.fallback_pre_verification_gas;
            }
        }

        let op = self.account.sign_user_operation(op).await?;
        info!(
            "Submitting user operation from {:?} with {} call(s), call gas limit {}",
            op.sender,
            request.calls.len(),
            op.call_gas_limit
        );

        match self.bundler.send_user_operation(&op, entry_point).await {
            Ok(hash) => {
                info!("User operation submitted with hash {:?}", hash);
                Ok(hash)
            }
            Err(e) => {
                error!("Bundler rejected user operation ({}): {}", e.kind(), e);
                Err(e.into())
            }
        }
    }

    /// Waits for inclusion. A timeout is reported as pending, not as failure.
    pub async fn await_receipt(&self, hash: H256) -> ReceiptOutcome {
        info!("Waiting for user operation {:?} to be included", hash);
        let receipt = match self
            .bundler
            .wait_for_user_operation_receipt(
                hash,
                self.config.receipt_timeout,
                self.config.receipt_poll_interval,
            )
            .await
        {
            Ok(receipt) => receipt,
            Err(BundlerError::Timeout(_)) => {
                warn!(
                    "No receipt for {:?} after {:?}, outcome unknown",
                    hash, self.config.receipt_timeout
                );
                return ReceiptOutcome::Pending;
            }
            Err(e) => {
                let kind = e.kind();
                error!("Error waiting for receipt of {:?} ({}): {}", hash, kind, e);
                return ReceiptOutcome::PollFailed {
                    kind,
                    message: e.to_string(),
                };
            }
        };

        let tx_hash = receipt.receipt.transaction_hash;
        info!(
            "User operation included in block {:?}, transaction {:?}",
            receipt.receipt.block_number, tx_hash
        );
        if !receipt.success {
            warn!(
                "User operation reverted: {}",
                receipt.reason.as_deref().unwrap_or("no reason given")
            );
        }

        let transaction_receipt = match self.reader.get_transaction_receipt(tx_hash).await {
            Ok(Some(tx_receipt)) => {
                let status = if tx_receipt.status == Some(U64::one()) {
                    "success"
                } else {
                    "failed"
                };
                info!(
                    "Transaction status: {}, gas used: {:?}, {} log(s)",
                    status,
                    tx_receipt.gas_used,
                    tx_receipt.logs.len()
                );
                for (i, log) in tx_receipt.logs.iter().enumerate() {
                    debug!(
                        "Log #{}: address {:?}, topics {:?}, data {}",
                        i + 1,
                        log.address,
                        log.topics,
                        log.data
                    );
                }
                Some(tx_receipt)
            }
            Ok(None) => {
                warn!("Transaction receipt {:?} not found", tx_hash);
                None
            }
            Err(e) => {
                warn!("Fetching transaction receipt {:?} failed: {}", tx_hash, e);
                None
            }
        };

        ReceiptOutcome::Included {
            receipt: Box::new(receipt),
            transaction_receipt,
        }
    }
}
