//! HTTP request handlers with OpenAPI documentation.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use utoipa::{IntoParams, OpenApi, ToSchema};

use crate::app::AppState;
use crate::app::reward::{RewardSendFailure, RewardSendResult};
use crate::domain::{
    AppError, BlockchainError, DatabaseError, ErrorDetail, ErrorResponse, ExternalServiceError,
    HealthResponse, HealthStatus, RewardReport, RewardSettings, RewardTeam, TransactionDetail,
};

/// Header naming the user issuing a reward batch
pub const ISSUER_HEADER: &str = "x-user";

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Wallet Reward Reconciler API",
        version = "0.1.0",
        description = "Transaction reconciliation, nonce lookup and token reward distribution",
        license(
            name = "MIT"
        )
    ),
    paths(
        health_check_handler,
        liveness_handler,
        readiness_handler,
        get_transaction_handler,
        cancel_transaction_handler,
        replace_transaction_handler,
        next_nonce_handler,
        compute_rewards_handler,
        send_rewards_handler,
        get_settings_handler,
        save_settings_handler,
        list_teams_handler,
    ),
    components(
        schemas(
            TransactionDetail,
            crate::domain::TransactionState,
            crate::domain::Wallet,
            crate::domain::WalletType,
            crate::domain::WalletState,
            crate::domain::WalletProvider,
            RewardReport,
            crate::domain::WalletReward,
            crate::domain::WalletPluginReward,
            crate::domain::RewardTeamRef,
            crate::domain::RewardPeriod,
            crate::domain::RewardPeriodType,
            crate::domain::RewardTransaction,
            RewardSettings,
            crate::domain::RewardPluginSettings,
            crate::domain::RewardBudgetType,
            RewardTeam,
            crate::domain::RewardTeamMember,
            RewardSendResult,
            RewardSendFailure,
            SendRewardsRequest,
            NonceResponse,
            HealthResponse,
            HealthStatus,
            ErrorResponse,
            ErrorDetail,
        )
    ),
    tags(
        (name = "transactions", description = "Ledger and nonce endpoints"),
        (name = "rewards", description = "Reward computation, sending and settings"),
        (name = "health", description = "Health check endpoints")
    )
)]
pub struct ApiDoc;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NonceResponse {
    pub address: String,
    pub network_id: i64,
    pub nonce: i64,
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct RewardDateQuery {
    /// Any day of the period, `YYYY-MM-DD`
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SendRewardsRequest {
    /// Any day of the period to pay, `YYYY-MM-DD`
    #[schema(value_type = String, example = "2024-07-15")]
    pub date: NaiveDate,
}

/// Detailed health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Health status", body = HealthResponse)
    )
)]
pub async fn health_check_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let health = state.service.health_check().await;
    Json(health)
}

/// Kubernetes liveness check
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    responses(
        (status = 200, description = "Application is alive")
    )
)]
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness check
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Application is ready to serve traffic"),
        (status = 503, description = "Application is not ready")
    )
)]
pub async fn readiness_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    let health = state.service.health_check().await;
    match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Get a ledger transaction by hash
#[utoipa::path(
    get,
    path = "/transactions/{hash}",
    tag = "transactions",
    params(
        ("hash" = String, Path, description = "Transaction hash, 0x-prefixed")
    ),
    responses(
        (status = 200, description = "Transaction found", body = TransactionDetail),
        (status = 400, description = "Malformed hash", body = ErrorResponse),
        (status = 404, description = "Transaction not found", body = ErrorResponse)
    )
)]
pub async fn get_transaction_handler(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> Result<Json<TransactionDetail>, AppError> {
    let tx = state.service.get_transaction(&hash).await?;
    Ok(Json(tx))
}

/// Cancel a pending transaction
///
/// A transaction already broadcast cannot be revoked on chain and is only
/// dropped locally.
#[utoipa::path(
    post,
    path = "/transactions/{hash}/cancel",
    tag = "transactions",
    params(
        ("hash" = String, Path, description = "Transaction hash, 0x-prefixed")
    ),
    responses(
        (status = 200, description = "Transaction dropped", body = TransactionDetail),
        (status = 404, description = "Transaction not found", body = ErrorResponse),
        (status = 409, description = "Transaction already final", body = ErrorResponse)
    )
)]
pub async fn cancel_transaction_handler(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> Result<Json<TransactionDetail>, AppError> {
    let tx = state.service.cancel_transaction(&hash).await?;
    info!(hash = %hash, "Transaction cancelled");
    Ok(Json(tx))
}

/// Replace a pending transaction with a higher gas price
///
/// The replacement uses the same nonce; whichever candidate is mined wins
/// and the other is dropped.
#[utoipa::path(
    post,
    path = "/transactions/{hash}/replace",
    tag = "transactions",
    params(
        ("hash" = String, Path, description = "Hash of the pending transaction")
    ),
    responses(
        (status = 200, description = "Replacement signed and queued", body = TransactionDetail),
        (status = 404, description = "Transaction not found", body = ErrorResponse),
        (status = 409, description = "Transaction cannot be replaced", body = ErrorResponse),
        (status = 501, description = "Method cannot be re-signed", body = ErrorResponse)
    )
)]
pub async fn replace_transaction_handler(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> Result<Json<TransactionDetail>, AppError> {
    let tx = state.service.replace_transaction(&hash).await?;
    info!(old_hash = %hash, new_hash = ?tx.hash, "Transaction replaced");
    Ok(Json(tx))
}

/// Next nonce to sign with for an address
///
/// Accounts for transactions recorded locally that the chain has not
/// confirmed yet.
#[utoipa::path(
    get,
    path = "/wallets/{address}/nonce",
    tag = "transactions",
    params(
        ("address" = String, Path, description = "Sender address")
    ),
    responses(
        (status = 200, description = "Next nonce", body = NonceResponse),
        (status = 400, description = "Malformed address", body = ErrorResponse),
        (status = 503, description = "Chain unavailable", body = ErrorResponse)
    )
)]
pub async fn next_nonce_handler(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Result<Json<NonceResponse>, AppError> {
    let nonce = state.service.next_nonce(&address).await?;
    Ok(Json(NonceResponse {
        address: address.to_lowercase(),
        network_id: state.service.network_id(),
        nonce,
    }))
}

/// Preview the rewards of a period
///
/// Never submits anything to the chain.
#[utoipa::path(
    get,
    path = "/rewards/compute",
    tag = "rewards",
    params(RewardDateQuery),
    responses(
        (status = 200, description = "Computed report", body = RewardReport),
        (status = 400, description = "Invalid settings or points", body = ErrorResponse)
    )
)]
pub async fn compute_rewards_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RewardDateQuery>,
) -> Result<Json<RewardReport>, AppError> {
    let report = state.service.compute_rewards(query.date).await?;
    Ok(Json(report))
}

/// Send the rewards still owed for a period
///
/// Re-running after a partial failure only targets unpaid entries.
#[utoipa::path(
    post,
    path = "/rewards/send",
    tag = "rewards",
    request_body = SendRewardsRequest,
    params(
        ("X-User" = String, Header, description = "Issuing user")
    ),
    responses(
        (status = 200, description = "Batch submitted", body = RewardSendResult),
        (status = 400, description = "Period not ended or nothing to send", body = ErrorResponse),
        (status = 403, description = "Issuer not allowed", body = ErrorResponse),
        (status = 409, description = "A previous batch is still pending", body = ErrorResponse),
        (status = 422, description = "Admin wallet cannot pay", body = ErrorResponse)
    )
)]
pub async fn send_rewards_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<SendRewardsRequest>,
) -> Result<Json<RewardSendResult>, AppError> {
    let issuer = headers
        .get(ISSUER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Authorization("Missing X-User header".to_string()))?;

    let result = state.service.send_rewards(payload.date, issuer).await?;
    info!(
        issuer = %issuer,
        sent = result.sent.len(),
        failed = result.failures.len(),
        "Reward send request handled"
    );
    Ok(Json(result))
}

/// Current reward settings
#[utoipa::path(
    get,
    path = "/rewards/settings",
    tag = "rewards",
    responses(
        (status = 200, description = "Settings with live plugin state", body = RewardSettings)
    )
)]
pub async fn get_settings_handler(State(state): State<Arc<AppState>>) -> Json<RewardSettings> {
    Json(state.service.get_settings().await)
}

/// Replace the reward settings
#[utoipa::path(
    put,
    path = "/rewards/settings",
    tag = "rewards",
    request_body = RewardSettings,
    responses(
        (status = 200, description = "Saved settings", body = RewardSettings),
        (status = 400, description = "Invalid settings", body = ErrorResponse)
    )
)]
pub async fn save_settings_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RewardSettings>,
) -> Result<Json<RewardSettings>, AppError> {
    let saved = state.service.save_settings(payload).await?;
    Ok(Json(saved))
}

/// List active reward teams
#[utoipa::path(
    get,
    path = "/rewards/teams",
    tag = "rewards",
    responses(
        (status = 200, description = "Reward teams", body = Vec<RewardTeam>)
    )
)]
pub async fn list_teams_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<RewardTeam>>, AppError> {
    let teams = state.service.list_teams().await?;
    Ok(Json(teams))
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_type) = match &self {
            AppError::Database(db_err) => match db_err {
                DatabaseError::Connection(_) => (StatusCode::SERVICE_UNAVAILABLE, "database_error"),
                DatabaseError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                DatabaseError::Duplicate(_) => (StatusCode::CONFLICT, "duplicate"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            },
            AppError::Blockchain(bc_err) => match bc_err {
                BlockchainError::Connection(_) | BlockchainError::RpcError(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "blockchain_error")
                }
                BlockchainError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
                BlockchainError::InsufficientFunds => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "insufficient_funds")
                }
                BlockchainError::InsufficientPrivilege(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "insufficient_privilege")
                }
                BlockchainError::AccountNotApproved(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "account_not_approved")
                }
                BlockchainError::TransactionFailed(_) | BlockchainError::NonceTooLow(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "transaction_failed")
                }
            },
            AppError::ExternalService(ext_err) => match ext_err {
                ExternalServiceError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
                ExternalServiceError::RateLimited(_) => {
                    (StatusCode::TOO_MANY_REQUESTS, "rate_limited")
                }
                _ => (StatusCode::BAD_GATEWAY, "external_service_error"),
            },
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            AppError::Authorization(_) => (StatusCode::FORBIDDEN, "authorization_error"),
            AppError::Consistency(_) => (StatusCode::CONFLICT, "consistency_error"),
            AppError::Serialization(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "serialization_error")
            }
            AppError::NotSupported(_) => (StatusCode::NOT_IMPLEMENTED, "not_supported"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        let message = self.to_string();

        if status.is_server_error() {
            error!(error_type = %error_type, message = %message, "Server error");
        }

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}
