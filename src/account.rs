// src/account.rs
use std::sync::Arc;

use async_trait::async_trait;
use ethers::abi::AbiEncode;
use ethers::prelude::*;
use tracing::{debug, info};

use crate::error::SubmitterError;
use crate::types::{Call, EntryPointVersion, GasPlan, UserOperation};

/// Stackup SimpleAccountFactory for the v0.6 entry point.
pub const SIMPLE_ACCOUNT_FACTORY_V06: &str = "0x9406Cc6185a346906296840746125a0E44976454";

/// Signature shaped like a real ECDSA signature so that bundler gas
/// estimation runs the full validation path.
pub const DUMMY_SIGNATURE: &str = "0xfffffffffffffffffffffffffffffff0000000000000000000000000000000007aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1c";

mod bindings {
    use ethers::prelude::abigen;

    abigen!(
        SimpleAccountFactory,
        r#"[
            function getAddress(address owner, uint256 salt) external view returns (address)
            function createAccount(address owner, uint256 salt) external returns (address)
        ]"#
    );

    abigen!(
        EntryPoint,
        r#"[
            function getNonce(address sender, uint192 key) external view returns (uint256)
        ]"#
    );

    abigen!(
        SimpleAccountContract,
        r#"[
            function execute(address dest, uint256 value, bytes func) external
            function executeBatch(address[] dest, bytes[] func) external
        ]"#
    );
}

pub use bindings::{CreateAccountCall, ExecuteBatchCall, ExecuteCall};

/// The externally owned key that controls a smart account.
#[derive(Debug, Clone)]
pub struct OwnerCredential {
    wallet: LocalWallet,
}

impl OwnerCredential {
    pub fn from_private_key(private_key: &str, chain_id: u64) -> Result<Self, SubmitterError> {
        let wallet = private_key
            .parse::<LocalWallet>()
            .map_err(|e| SubmitterError::InvalidCredential(e.to_string()))?
            .with_chain_id(chain_id);
        Ok(Self { wallet })
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    pub fn wallet(&self) -> &LocalWallet {
        &self.wallet
    }
}

/// A counterfactual smart account. `deployed` reflects the code check made
/// when the handle was derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmartAccountHandle {
    pub address: Address,
    pub owner: Address,
    pub entry_point: EntryPointVersion,
    pub index: U256,
    pub nonce_key: U256,
    pub deployed: bool,
}

#[async_trait]
pub trait SmartAccountFacade: Send + Sync {
    /// Address of the key that signs this account's operations.
    fn signer(&self) -> Address;

    /// Must return the same address for the same inputs on every call.
    async fn derive_address(
        &self,
        owner: Address,
        entry_point: EntryPointVersion,
        index: U256,
    ) -> Result<Address, SubmitterError>;

    /// Encodes the account's own call data for `calls`.
    fn encode_calls(&self, calls: &[Call]) -> Result<Bytes, SubmitterError> {
        encode_execute(calls)
    }

    /// Builds an unsigned operation carrying `gas_plan`, the account nonce and,
    /// for an undeployed account, its init code. Verification gas fields are
    /// left at zero.
    async fn build_user_operation(
        &self,
        account: &SmartAccountHandle,
        call_data: Bytes,
        gas_plan: &GasPlan,
    ) -> Result<UserOperation, SubmitterError>;

    async fn sign_user_operation(&self, op: UserOperation)
        -> Result<UserOperation, SubmitterError>;
}

/// SimpleAccount call data: `execute` for one call, `executeBatch` for more.
pub fn encode_execute(calls: &[Call]) -> Result<Bytes, SubmitterError> {
    match calls {
        [] => Err(SubmitterError::InvalidRequest(
            "user operation needs at least one call".to_string(),
        )),
        [call] => Ok(ExecuteCall {
            dest: call.to,
            value: call.value,
            func: call.data.clone(),
        }
        .encode()
        .into()),
        calls => {
            if calls.iter().any(|c| !c.value.is_zero()) {
                return Err(SubmitterError::InvalidRequest(
                    "batched calls cannot transfer value".to_string(),
                ));
            }
            Ok(ExecuteBatchCall {
                dest: calls.iter().map(|c| c.to).collect(),
                func: calls.iter().map(|c| c.data.clone()).collect(),
            }
            .encode()
            .into())
        }
    }
}

/// Facade over a SimpleAccount deployed through the stock factory.
pub struct SimpleAccount<M> {
    client: Arc<M>,
    wallet: LocalWallet,
    factory: Address,
    entry_point: EntryPointVersion,
    chain_id: u64,
}

impl<M: Middleware + 'static> SimpleAccount<M> {
    pub fn new(
        client: Arc<M>,
        owner: &OwnerCredential,
        factory: Address,
        entry_point: EntryPointVersion,
        chain_id: u64,
    ) -> Self {
        info!(
            "Using SimpleAccount factory {:?} with entry point v{}",
            factory, entry_point
        );
        Self {
            client,
            wallet: owner.wallet().clone(),
            factory,
            entry_point,
            chain_id,
        }
    }

    fn init_code(&self, owner: Address, index: U256) -> Bytes {
        let mut init_code = self.factory.as_bytes().to_vec();
        init_code.extend(CreateAccountCall { owner, salt: index }.encode());
        init_code.into()
    }
}

#[async_trait]
impl<M> SmartAccountFacade for SimpleAccount<M>
where
    M: Middleware + 'static,
{
    fn signer(&self) -> Address {
        self.wallet.address()
    }

    async fn derive_address(
        &self,
        owner: Address,
        entry_point: EntryPointVersion,
        index: U256,
    ) -> Result<Address, SubmitterError> {
        if entry_point != self.entry_point {
            return Err(SubmitterError::Derivation(format!(
                "factory {:?} serves entry point v{}, not v{}",
                self.factory, self.entry_point, entry_point
            )));
        }
        let factory = bindings::SimpleAccountFactory::new(self.factory, self.client.clone());
        factory
            .get_address(owner, index)
            .call()
            .await
            .map_err(|e| SubmitterError::Derivation(e.to_string()))
    }

    async fn build_user_operation(
        &self,
        account: &SmartAccountHandle,
        call_data: Bytes,
        gas_plan: &GasPlan,
    ) -> Result<UserOperation, SubmitterError> {
        let entry_point =
            bindings::EntryPoint::new(self.entry_point.address(), self.client.clone());
        let nonce = entry_point
            .get_nonce(account.address, account.nonce_key)
            .call()
            .await
            .map_err(|e| SubmitterError::EthereumProviderError(e.to_string()))?;
        debug!("Account {:?} nonce {}", account.address, nonce);

        let init_code = if account.deployed {
            Bytes::default()
        } else {
            self.init_code(account.owner, account.index)
        };

        Ok(UserOperation {
            sender: account.address,
            nonce,
            init_code,
            call_data,
            call_gas_limit: gas_plan.call_gas_limit,
            verification_gas_limit: U256::zero(),
            pre_verification_gas: U256::zero(),
            max_fee_per_gas: gas_plan.max_fee_per_gas,
            max_priority_fee_per_gas: gas_plan.max_priority_fee_per_gas,
            paymaster_and_data: Bytes::default(),
            signature: DUMMY_SIGNATURE
                .parse()
                .map_err(|e: ParseBytesError| SubmitterError::Signing(e.to_string()))?,
        })
    }

    async fn sign_user_operation(
        &self,
        mut op: UserOperation,
    ) -> Result<UserOperation, SubmitterError> {
        let hash = op.hash(self.entry_point.address(), self.chain_id);
        let signature = self
            .wallet
            .sign_message(hash.as_bytes())
            .await
            .map_err(|e| SubmitterError::Signing(e.to_string()))?;
        op.signature = signature.to_vec().into();
        Ok(op)
    }
}
