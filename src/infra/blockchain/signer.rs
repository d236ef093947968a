//! Remote transaction signing.
//!
//! Private keys never live in this process. Unsigned transactions are posted
//! to a signing service that holds the admin key and answers with the raw
//! payload and its hash.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument};

use crate::domain::{AppError, ExternalServiceError, normalize_hash};

/// Legacy transaction to be signed
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedTransaction {
    pub chain_id: i64,
    pub from: String,
    pub to: String,
    pub nonce: u64,
    /// Decimal string, wei
    pub gas_price: String,
    pub gas_limit: u64,
    /// Decimal string, wei
    pub value: String,
    pub data: String,
}

/// Signed payload ready for broadcast
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SignedTransaction {
    pub raw: String,
    pub hash: String,
}

#[async_trait]
pub trait TransactionSigner: Send + Sync {
    async fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction, AppError>;
}

/// Signing service reached over HTTP with a bearer token
pub struct HttpTransactionSigner {
    http_client: Client,
    base_url: String,
    api_token: SecretString,
}

impl HttpTransactionSigner {
    pub fn new(base_url: &str, api_token: SecretString) -> Result<Self, AppError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                AppError::ExternalService(ExternalServiceError::Unavailable(e.to_string()))
            })?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        })
    }
}

#[async_trait]
impl TransactionSigner for HttpTransactionSigner {
    #[instrument(skip(self, tx), fields(from = %tx.from, nonce = tx.nonce))]
    async fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction, AppError> {
        let url = format!("{}/sign", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(self.api_token.expose_secret())
            .json(tx)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Signing service request failed");
                if e.is_timeout() {
                    AppError::ExternalService(ExternalServiceError::Timeout(e.to_string()))
                } else {
                    AppError::ExternalService(ExternalServiceError::Unavailable(e.to_string()))
                }
            })?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(AppError::Authorization(format!(
                    "signing refused for {}",
                    tx.from
                )));
            }
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(AppError::ExternalService(ExternalServiceError::RateLimited(
                    "signing service".to_string(),
                )));
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                error!(status = %status, body = %body, "Signing service returned error");
                return Err(AppError::ExternalService(ExternalServiceError::Unavailable(
                    format!("HTTP {}: {}", status, body),
                )));
            }
        }

        let signed: SignedTransaction = response.json().await.map_err(|e| {
            AppError::ExternalService(ExternalServiceError::InvalidResponse(e.to_string()))
        })?;
        let hash = normalize_hash(&signed.hash).ok_or_else(|| {
            AppError::ExternalService(ExternalServiceError::InvalidResponse(format!(
                "malformed hash {}",
                signed.hash
            )))
        })?;
        debug!(hash = %hash, "Transaction signed");
        Ok(SignedTransaction {
            raw: signed.raw,
            hash,
        })
    }
}
