//! Platform identity directory reached over HTTP.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error, instrument};

use crate::domain::{AppError, ExternalServiceError, Identity, IdentityDirectory, WalletType};

#[derive(Debug, Deserialize)]
struct MembershipResponse {
    member: bool,
}

/// Identity directory of the collaboration platform.
///
/// Unknown or purged identities answer `404` and resolve to `None`.
pub struct HttpIdentityDirectory {
    http_client: Client,
    base_url: String,
    api_token: Option<SecretString>,
}

impl HttpIdentityDirectory {
    pub fn new(base_url: &str, api_token: Option<SecretString>) -> Result<Self, AppError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
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

    async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, AppError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Querying identity directory");

        let mut request = self.http_client.get(&url).query(query);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token.expose_secret());
        }
        let response = request.send().await.map_err(|e| {
            error!(error = %e, "Identity directory request failed");
            if e.is_timeout() {
                AppError::ExternalService(ExternalServiceError::Timeout(e.to_string()))
            } else {
                AppError::ExternalService(ExternalServiceError::Unavailable(e.to_string()))
            }
        })?;

        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(AppError::ExternalService(ExternalServiceError::RateLimited(
                    "identity directory".to_string(),
                )));
            }
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                error!(status = %status, body = %body, "Identity directory returned error");
                return Err(AppError::ExternalService(ExternalServiceError::Unavailable(
                    format!("HTTP {}: {}", status, body),
                )));
            }
            _ => {}
        }

        response.json::<T>().await.map(Some).map_err(|e| {
            AppError::ExternalService(ExternalServiceError::InvalidResponse(e.to_string()))
        })
    }
}

#[async_trait]
impl IdentityDirectory for HttpIdentityDirectory {
    #[instrument(skip(self))]
    async fn identity(
        &self,
        identity_type: WalletType,
        remote_id: &str,
    ) -> Result<Option<Identity>, AppError> {
        self.get_optional(
            "/identities",
            &[("type", identity_type.as_str()), ("remoteId", remote_id)],
        )
        .await
    }

    #[instrument(skip(self))]
    async fn identity_by_id(&self, id: i64) -> Result<Option<Identity>, AppError> {
        self.get_optional(&format!("/identities/{}", id), &[]).await
    }

    #[instrument(skip(self))]
    async fn is_member_of(&self, username: &str, group: &str) -> Result<bool, AppError> {
        let membership: Option<MembershipResponse> = self
            .get_optional("/memberships", &[("user", username), ("group", group)])
            .await?;
        Ok(membership.map(|m| m.member).unwrap_or(false))
    }
}
