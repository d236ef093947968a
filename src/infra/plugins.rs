//! Reward point sources exposed by platform add-ons over HTTP.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, instrument};

use crate::domain::{AppError, ExternalServiceError, RewardPlugin};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PointsRequest<'a> {
    identity_ids: &'a [i64],
    start: i64,
    end: i64,
}

#[derive(Debug, Deserialize)]
struct PointsResponse {
    #[serde(default)]
    points: HashMap<i64, Decimal>,
}

/// Point source answering `POST {base}/points`
pub struct HttpRewardPlugin {
    plugin_id: String,
    http_client: Client,
    base_url: String,
    enabled: AtomicBool,
}

impl HttpRewardPlugin {
    pub fn new(plugin_id: &str, base_url: &str) -> Result<Self, AppError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| {
                AppError::ExternalService(ExternalServiceError::Unavailable(e.to_string()))
            })?;
        Ok(Self {
            plugin_id: plugin_id.to_string(),
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            enabled: AtomicBool::new(true),
        })
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

#[async_trait]
impl RewardPlugin for HttpRewardPlugin {
    fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    #[instrument(skip(self, identity_ids), fields(plugin = %self.plugin_id, identities = identity_ids.len()))]
    async fn earned_points(
        &self,
        identity_ids: &[i64],
        start_seconds: i64,
        end_seconds: i64,
    ) -> Result<HashMap<i64, Decimal>, AppError> {
        let url = format!("{}/points", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .json(&PointsRequest {
                identity_ids,
                start: start_seconds,
                end: end_seconds,
            })
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Point source request failed");
                if e.is_timeout() {
                    AppError::ExternalService(ExternalServiceError::Timeout(e.to_string()))
                } else {
                    AppError::ExternalService(ExternalServiceError::Unavailable(e.to_string()))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Point source returned error");
            return Err(AppError::ExternalService(ExternalServiceError::Unavailable(
                format!("HTTP {}: {}", status, body),
            )));
        }

        let parsed: PointsResponse = response.json().await.map_err(|e| {
            AppError::ExternalService(ExternalServiceError::InvalidResponse(e.to_string()))
        })?;
        debug!(count = parsed.points.len(), "Points received");
        Ok(parsed.points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_points_response_accepts_string_keys_and_amounts() {
        let parsed: PointsResponse =
            serde_json::from_str(r#"{"points":{"1":"12.5","2":"3"}}"#).unwrap();
        assert_eq!(parsed.points.get(&1), Some(&Decimal::new(125, 1)));
        assert_eq!(parsed.points.get(&2), Some(&Decimal::new(3, 0)));

        let empty: PointsResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.points.is_empty());
    }

    #[test]
    fn test_enablement_toggle() {
        let plugin = HttpRewardPlugin::new("kudos", "http://localhost:1/").unwrap();
        assert!(plugin.is_enabled());
        plugin.set_enabled(false);
        assert!(!plugin.is_enabled());
        assert_eq!(plugin.plugin_id(), "kudos");
    }
}
