//! ERC20-like token contract reached through JSON-RPC and a remote signer.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument};

use super::abi::{self, AbiArg};
use super::ethereum::RpcChainClient;
use super::signer::{TransactionSigner, UnsignedTransaction};
use crate::domain::{
    AppError, BlockchainError, ChainClient, ContractCall, TokenContract, TransactionDetail,
    ValidationError, from_base_units, normalize_address, to_base_units,
};

/// Gas limit used for token calls when none is configured
pub const DEFAULT_TOKEN_GAS_LIMIT: u64 = 200_000;

pub struct RpcTokenContract {
    client: Arc<RpcChainClient>,
    signer: Arc<dyn TransactionSigner>,
    contract_address: String,
    decimals: u32,
    chain_id: i64,
    gas_limit: u64,
    /// Serializes administrative builds against the single admin key
    admin_lock: Mutex<()>,
}

impl RpcTokenContract {
    pub fn new(
        client: Arc<RpcChainClient>,
        signer: Arc<dyn TransactionSigner>,
        contract_address: &str,
        decimals: u32,
        chain_id: i64,
    ) -> Result<Self, AppError> {
        let contract_address = normalize_address(contract_address).ok_or_else(|| {
            AppError::invalid_field(
                "token_address",
                format!("malformed contract address {}", contract_address),
            )
        })?;
        Ok(Self {
            client,
            signer,
            contract_address,
            decimals,
            chain_id,
            gas_limit: DEFAULT_TOKEN_GAS_LIMIT,
            admin_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    async fn read(&self, signature: &str, address: &str) -> Result<String, AppError> {
        let data = abi::encode_call(signature, &[AbiArg::Address(address)])?;
        self.client.call(&self.contract_address, &data).await
    }

    fn receiver(tx: &TransactionDetail) -> Result<String, AppError> {
        let to = tx.to_address.as_deref().ok_or_else(|| {
            AppError::Validation(ValidationError::MissingField("to_address".to_string()))
        })?;
        normalize_address(to)
            .ok_or_else(|| AppError::invalid_field("to_address", format!("malformed address {}", to)))
    }

    fn token_units(&self, tx: &TransactionDetail) -> Result<u128, AppError> {
        let units = to_base_units(tx.contract_amount, self.decimals)?;
        if units == 0 {
            return Err(AppError::invalid_field(
                "contract_amount",
                "amount must be positive",
            ));
        }
        Ok(units)
    }

    async fn ensure_approved(&self, address: &str) -> Result<(), AppError> {
        if self.is_approved_account(address).await? {
            Ok(())
        } else {
            Err(AppError::Blockchain(BlockchainError::AccountNotApproved(
                address.to_string(),
            )))
        }
    }

    /// Signs `data` against the contract with the transaction's reserved nonce.
    async fn sign_call(
        &self,
        mut tx: TransactionDetail,
        method: &str,
        data: String,
    ) -> Result<TransactionDetail, AppError> {
        let nonce = tx.nonce.ok_or_else(|| {
            AppError::Validation(ValidationError::MissingField("nonce".to_string()))
        })?;
        let nonce =
            u64::try_from(nonce).map_err(|_| AppError::invalid_field("nonce", "negative nonce"))?;

        let _guard = self.admin_lock.lock().await;
        let gas_price = match u128::try_from(tx.gas_price) {
            Ok(price) if price > 0 => price,
            _ => self.client.gas_price().await?,
        };
        let signed = self
            .signer
            .sign(&UnsignedTransaction {
                chain_id: self.chain_id,
                from: tx.from_address.clone(),
                to: self.contract_address.clone(),
                nonce,
                gas_price: gas_price.to_string(),
                gas_limit: self.gas_limit,
                value: "0".to_string(),
                data,
            })
            .await?;

        info!(hash = %signed.hash, method = %method, nonce = nonce, "Token call signed");
        tx.hash = Some(signed.hash);
        tx.raw_transaction = Some(signed.raw);
        tx.contract_address = Some(self.contract_address.clone());
        tx.contract_method = Some(method.to_string());
        tx.gas_price = i64::try_from(gas_price).unwrap_or(i64::MAX);
        tx.pending = true;
        tx.sent_at = None;
        Ok(tx)
    }
}

#[async_trait]
impl TokenContract for RpcTokenContract {
    fn contract_address(&self) -> &str {
        &self.contract_address
    }

    fn decimals(&self) -> u32 {
        self.decimals
    }

    fn decode_call(&self, input: &str) -> Option<ContractCall> {
        abi::decode_call(input)
    }

    #[instrument(skip(self))]
    async fn balance_of(&self, address: &str) -> Result<Decimal, AppError> {
        let result = self.read("balanceOf(address)", address).await?;
        from_base_units(abi::decode_uint(&result)?, self.decimals)
    }

    #[instrument(skip(self))]
    async fn admin_level(&self, address: &str) -> Result<u8, AppError> {
        let result = self.read("getAdminLevel(address)", address).await?;
        Ok(u8::try_from(abi::decode_uint(&result)?).unwrap_or(u8::MAX))
    }

    #[instrument(skip(self))]
    async fn is_approved_account(&self, address: &str) -> Result<bool, AppError> {
        let result = self.read("isApprovedAccount(address)", address).await?;
        abi::decode_bool(&result)
    }

    #[instrument(skip(self))]
    async fn is_initialized_account(&self, address: &str) -> Result<bool, AppError> {
        let result = self.read("isInitializedAccount(address)", address).await?;
        abi::decode_bool(&result)
    }

    #[instrument(skip(self, tx), fields(to = ?tx.to_address, amount = %tx.contract_amount))]
    async fn reward(&self, tx: TransactionDetail) -> Result<TransactionDetail, AppError> {
        let to = Self::receiver(&tx)?;
        let units = self.token_units(&tx)?;
        self.ensure_approved(&to).await?;
        let data = abi::encode_call(
            "reward(address,uint256)",
            &[AbiArg::Address(&to), AbiArg::Uint(units)],
        )?;
        self.sign_call(tx, "reward", data).await
    }

    #[instrument(skip(self, tx), fields(to = ?tx.to_address, amount = %tx.contract_amount))]
    async fn transfer(&self, tx: TransactionDetail) -> Result<TransactionDetail, AppError> {
        let to = Self::receiver(&tx)?;
        let units = self.token_units(&tx)?;
        self.ensure_approved(&to).await?;
        let data = abi::encode_call(
            "transfer(address,uint256)",
            &[AbiArg::Address(&to), AbiArg::Uint(units)],
        )?;
        self.sign_call(tx, "transfer", data).await
    }

    #[instrument(skip(self, tx), fields(to = ?tx.to_address))]
    async fn initialize(&self, mut tx: TransactionDetail) -> Result<TransactionDetail, AppError> {
        let to = Self::receiver(&tx)?;
        let units = to_base_units(tx.contract_amount, self.decimals)?;
        let data = abi::encode_call(
            "initializeAccount(address,uint256)",
            &[AbiArg::Address(&to), AbiArg::Uint(units)],
        )?;
        tx.admin_operation = true;
        self.sign_call(tx, "initializeAccount", data).await
    }

    #[instrument(skip(self, tx), fields(to = ?tx.to_address))]
    async fn approve_account(
        &self,
        mut tx: TransactionDetail,
    ) -> Result<TransactionDetail, AppError> {
        let to = Self::receiver(&tx)?;
        let data = abi::encode_call("approveAccount(address)", &[AbiArg::Address(&to)])?;
        tx.admin_operation = true;
        self.sign_call(tx, "approveAccount", data).await
    }

    #[instrument(skip(self, tx), fields(to = ?tx.to_address))]
    async fn disapprove_account(
        &self,
        mut tx: TransactionDetail,
    ) -> Result<TransactionDetail, AppError> {
        let to = Self::receiver(&tx)?;
        let data = abi::encode_call("disapproveAccount(address)", &[AbiArg::Address(&to)])?;
        tx.admin_operation = true;
        self.sign_call(tx, "disapproveAccount", data).await
    }
}
