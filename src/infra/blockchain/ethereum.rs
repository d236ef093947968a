//! Ethereum JSON-RPC chain reader.
//!
//! Requests go through an [`EthRpcProvider`] so tests can stub the transport.
//! Transient failures are retried with exponential backoff; semantic node
//! errors (reverts, nonce reuse, missing funds) are returned at once.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use std::env;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::domain::{
    AppError, BlockchainError, ChainBlock, ChainClient, ChainTransaction, TransactionReceipt,
    normalize_address, normalize_hash,
};

/// Configuration for the RPC client
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub max_backoff: Duration,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RpcClientConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            timeout: env::var("RPC_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_retries: env::var("RPC_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_retries),
            retry_delay: env::var("RPC_RETRY_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            max_backoff: env::var("RPC_MAX_BACKOFF_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_backoff),
        }
    }

    /// Delay before retry `attempt` (1-based), doubling up to `max_backoff`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.retry_delay.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Abstract JSON-RPC transport to enable testing
#[async_trait]
pub trait EthRpcProvider: Send + Sync {
    /// Send a JSON-RPC request. A `null` result is returned as `Value::Null`.
    async fn send_request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, AppError>;
}

/// HTTP JSON-RPC provider
pub struct HttpEthRpcProvider {
    http_client: Client,
    rpc_url: String,
}

impl HttpEthRpcProvider {
    pub fn new(rpc_url: &str, timeout: Duration) -> Result<Self, AppError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Blockchain(BlockchainError::Connection(e.to_string())))?;

        Ok(Self {
            http_client,
            rpc_url: rpc_url.to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<T: Serialize> {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    params: T,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Maps a node error to the domain taxonomy.
fn classify_rpc_error(code: i64, message: &str) -> BlockchainError {
    let lower = message.to_lowercase();
    if lower.contains("insufficient funds") || code == -32002 {
        BlockchainError::InsufficientFunds
    } else if lower.contains("nonce too low")
        || lower.contains("already known")
        || lower.contains("replacement transaction underpriced")
    {
        BlockchainError::NonceTooLow(message.to_string())
    } else if lower.contains("execution reverted") || lower.contains("revert") {
        BlockchainError::TransactionFailed(message.to_string())
    } else {
        BlockchainError::RpcError(format!("{}: {}", code, message))
    }
}

#[async_trait]
impl EthRpcProvider for HttpEthRpcProvider {
    async fn send_request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, AppError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: method.to_string(),
            params,
        };

        let response = self
            .http_client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Blockchain(BlockchainError::Timeout(e.to_string()))
                } else if e.is_connect() {
                    AppError::Blockchain(BlockchainError::Connection(e.to_string()))
                } else {
                    AppError::Blockchain(BlockchainError::RpcError(e.to_string()))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(AppError::Blockchain(BlockchainError::RpcError(format!(
                "HTTP {}",
                status
            ))));
        }

        let rpc_response: JsonRpcResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| AppError::Blockchain(BlockchainError::RpcError(e.to_string())))?;

        if let Some(error) = rpc_response.error {
            return Err(AppError::Blockchain(classify_rpc_error(
                error.code,
                &error.message,
            )));
        }

        Ok(rpc_response.result.unwrap_or(serde_json::Value::Null))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBlock {
    number: String,
    hash: String,
    #[serde(default)]
    transactions: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransaction {
    hash: String,
    from: String,
    to: Option<String>,
    nonce: String,
    value: String,
    #[serde(default)]
    gas_price: Option<String>,
    #[serde(default)]
    input: String,
    block_number: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: String,
    block_number: String,
    status: Option<String>,
    gas_used: String,
    effective_gas_price: Option<String>,
}

/// Parses a hex quantity such as `0x1b4`.
pub fn parse_quantity(value: &str) -> Result<u128, AppError> {
    let digits = value
        .trim()
        .strip_prefix("0x")
        .ok_or_else(|| AppError::Blockchain(BlockchainError::RpcError(format!(
            "not a hex quantity: {}",
            value
        ))))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16).map_err(|e| {
        AppError::Blockchain(BlockchainError::RpcError(format!(
            "invalid quantity {}: {}",
            value, e
        )))
    })
}

fn parse_u64(value: &str) -> Result<u64, AppError> {
    let quantity = parse_quantity(value)?;
    u64::try_from(quantity).map_err(|_| {
        AppError::Blockchain(BlockchainError::RpcError(format!(
            "quantity out of range: {}",
            value
        )))
    })
}

fn hex_quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

impl RawTransaction {
    fn into_domain(self) -> Result<ChainTransaction, AppError> {
        Ok(ChainTransaction {
            hash: normalize_hash(&self.hash).unwrap_or(self.hash),
            from: normalize_address(&self.from).unwrap_or(self.from),
            to: self.to.map(|to| normalize_address(&to).unwrap_or(to)),
            nonce: parse_u64(&self.nonce)?,
            value: parse_quantity(&self.value)?,
            gas_price: match self.gas_price.as_deref() {
                Some(price) => parse_quantity(price)?,
                None => 0,
            },
            input: self.input,
            block_number: match self.block_number.as_deref() {
                Some(number) => Some(parse_u64(number)?),
                None => None,
            },
        })
    }
}

impl RawReceipt {
    fn into_domain(self) -> Result<TransactionReceipt, AppError> {
        Ok(TransactionReceipt {
            transaction_hash: normalize_hash(&self.transaction_hash)
                .unwrap_or(self.transaction_hash),
            block_number: parse_u64(&self.block_number)?,
            // Pre-Byzantium receipts carry no status; treat them as successful
            status: match self.status.as_deref() {
                Some(status) => parse_quantity(status)? == 1,
                None => true,
            },
            gas_used: parse_u64(&self.gas_used)?,
            effective_gas_price: match self.effective_gas_price.as_deref() {
                Some(price) => Some(parse_quantity(price)?),
                None => None,
            },
        })
    }
}

/// JSON-RPC chain client for one network
pub struct RpcChainClient {
    provider: Box<dyn EthRpcProvider>,
    config: RpcClientConfig,
}

impl RpcChainClient {
    pub fn new(rpc_url: &str, config: RpcClientConfig) -> Result<Self, AppError> {
        let provider = HttpEthRpcProvider::new(rpc_url, config.timeout)?;
        Ok(Self {
            provider: Box::new(provider),
            config,
        })
    }

    pub fn with_defaults(rpc_url: &str) -> Result<Self, AppError> {
        Self::new(rpc_url, RpcClientConfig::default())
    }

    pub fn with_provider(provider: Box<dyn EthRpcProvider>, config: RpcClientConfig) -> Self {
        Self { provider, config }
    }

    async fn rpc_call<P: Serialize + Send + Sync, R: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, AppError> {
        let params_value = serde_json::to_value(params).map_err(|e| {
            AppError::Blockchain(BlockchainError::RpcError(format!(
                "Serialization error: {}",
                e
            )))
        })?;

        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.backoff(attempt)).await;
            }
            match self
                .provider
                .send_request(method, params_value.clone())
                .await
            {
                Ok(result_value) => {
                    return serde_json::from_value(result_value).map_err(|e| {
                        AppError::Blockchain(BlockchainError::RpcError(format!(
                            "Deserialization error: {}",
                            e
                        )))
                    });
                }
                Err(e) if e.is_transient() => {
                    warn!(attempt = attempt, error = ?e, method = %method, "RPC call failed");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            AppError::Blockchain(BlockchainError::RpcError("Unknown error".to_string()))
        }))
    }

    /// Read-only contract call at the latest block. Returns the hex result.
    #[instrument(skip(self, data))]
    pub async fn call(&self, to: &str, data: &str) -> Result<String, AppError> {
        self.rpc_call("eth_call", json!([{ "to": to, "data": data }, "latest"]))
            .await
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let _: String = self.rpc_call("eth_chainId", json!([])).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn block_number(&self) -> Result<u64, AppError> {
        let number: String = self.rpc_call("eth_blockNumber", json!([])).await?;
        parse_u64(&number)
    }

    #[instrument(skip(self))]
    async fn block(&self, number: u64) -> Result<Option<ChainBlock>, AppError> {
        let raw: Option<RawBlock> = self
            .rpc_call("eth_getBlockByNumber", json!([hex_quantity(number), false]))
            .await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        debug!(block = number, count = raw.transactions.len(), "Fetched block");
        Ok(Some(ChainBlock {
            number: parse_u64(&raw.number)?,
            hash: raw.hash,
            transaction_hashes: raw
                .transactions
                .into_iter()
                .map(|h| normalize_hash(&h).unwrap_or(h))
                .collect(),
        }))
    }

    #[instrument(skip(self))]
    async fn transaction(&self, hash: &str) -> Result<Option<ChainTransaction>, AppError> {
        let raw: Option<RawTransaction> = self
            .rpc_call("eth_getTransactionByHash", json!([hash]))
            .await?;
        raw.map(RawTransaction::into_domain).transpose()
    }

    #[instrument(skip(self))]
    async fn receipt(&self, hash: &str) -> Result<Option<TransactionReceipt>, AppError> {
        let raw: Option<RawReceipt> = self
            .rpc_call("eth_getTransactionReceipt", json!([hash]))
            .await?;
        raw.map(RawReceipt::into_domain).transpose()
    }

    #[instrument(skip(self))]
    async fn transaction_count(&self, address: &str) -> Result<u64, AppError> {
        let count: String = self
            .rpc_call("eth_getTransactionCount", json!([address, "latest"]))
            .await?;
        parse_u64(&count)
    }

    #[instrument(skip(self, raw))]
    async fn send_raw_transaction(&self, raw: &str) -> Result<String, AppError> {
        let hash: String = self.rpc_call("eth_sendRawTransaction", json!([raw])).await?;
        Ok(normalize_hash(&hash).unwrap_or(hash))
    }

    #[instrument(skip(self))]
    async fn gas_price(&self) -> Result<u128, AppError> {
        let price: String = self.rpc_call("eth_gasPrice", json!([])).await?;
        parse_quantity(&price)
    }
}
