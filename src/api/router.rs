//! Route table and middleware stack.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::app::AppState;

use super::handlers::{
    ApiDoc, cancel_transaction_handler, compute_rewards_handler, get_settings_handler,
    get_transaction_handler, health_check_handler, list_teams_handler, liveness_handler,
    next_nonce_handler, readiness_handler, replace_transaction_handler, save_settings_handler,
    send_rewards_handler,
};

/// Upper bound on a single request, reward batches included
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Settings documents are the largest bodies accepted
const MAX_BODY_BYTES: usize = 64 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/health", get(health_check_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .route("/transactions/{hash}", get(get_transaction_handler))
        .route("/transactions/{hash}/cancel", post(cancel_transaction_handler))
        .route("/transactions/{hash}/replace", post(replace_transaction_handler))
        .route("/wallets/{address}/nonce", get(next_nonce_handler))
        .route("/rewards/compute", get(compute_rewards_handler))
        .route("/rewards/send", post(send_rewards_handler))
        .route(
            "/rewards/settings",
            get(get_settings_handler).put(save_settings_handler),
        )
        .route("/rewards/teams", get(list_teams_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
                .layer(CorsLayer::permissive()),
        )
}
