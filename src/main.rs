//! Application entry point.

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::{ExposeSecret, SecretString};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use wallet_reward_reconciler::api::create_router;
use wallet_reward_reconciler::app::{
    AppService, AppState, EventBus, NetworkConfig, ReconcilerConfig, RewardConfig, SenderConfig,
    ServiceDependencies, WorkerConfig, spawn_chain_watcher, spawn_event_listeners,
    spawn_sender_worker, spawn_status_tracker,
};
use wallet_reward_reconciler::infra::{
    HttpIdentityDirectory, HttpRewardPlugin, HttpTransactionSigner, PostgresClient,
    PostgresConfig, RpcChainClient, RpcClientConfig, RpcTokenContract,
};

/// Application configuration
struct Config {
    database_url: SecretString,
    host: String,
    port: u16,
    network: NetworkConfig,
    signer_url: String,
    signer_token: SecretString,
    identity_url: String,
    identity_token: Option<SecretString>,
    /// `id=url` pairs of HTTP point sources
    plugins: Vec<(String, String)>,
    worker_config: WorkerConfig,
}

impl Config {
    fn from_env() -> Result<Self> {
        let database_url =
            SecretString::from(env::var("DATABASE_URL").context("DATABASE_URL not set")?);
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);
        let network = NetworkConfig::from_env().context("Invalid network configuration")?;
        let signer_url = env::var("SIGNER_URL").context("SIGNER_URL not set")?;
        let signer_token =
            SecretString::from(env::var("SIGNER_API_TOKEN").context("SIGNER_API_TOKEN not set")?);
        let identity_url = env::var("IDENTITY_URL").context("IDENTITY_URL not set")?;
        let identity_token = env::var("IDENTITY_API_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .map(SecretString::from);
        let plugins = parse_plugins(&env::var("REWARD_PLUGINS").unwrap_or_default());

        Ok(Self {
            database_url,
            host,
            port,
            network,
            signer_url,
            signer_token,
            identity_url,
            identity_token,
            plugins,
            worker_config: WorkerConfig::from_env(),
        })
    }
}

fn parse_plugins(value: &str) -> Vec<(String, String)> {
    value
        .split(',')
        .filter_map(|entry| {
            let (id, url) = entry.split_once('=')?;
            let (id, url) = (id.trim(), url.trim());
            (!id.is_empty() && !url.is_empty()).then(|| (id.to_string(), url.to_string()))
        })
        .collect()
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    let json = env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    info!("Wallet Reward Reconciler v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    info!("📦 Initializing infrastructure...");

    let postgres_client =
        PostgresClient::new(config.database_url.expose_secret(), PostgresConfig::from_env())
            .await
            .context("Failed to connect to the database")?;
    postgres_client
        .run_migrations()
        .await
        .context("Failed to apply migrations")?;
    let postgres_client = Arc::new(postgres_client);
    info!("   ✓ Database connected and migrations applied");

    let chain_client = Arc::new(
        RpcChainClient::new(&config.network.rpc_url, RpcClientConfig::from_env())
            .context("Failed to create chain client")?,
    );
    info!(
        network_id = config.network.network_id,
        "   ✓ Chain client created"
    );

    let signer = Arc::new(
        HttpTransactionSigner::new(&config.signer_url, config.signer_token.clone())
            .context("Failed to create signer client")?,
    );
    let token = Arc::new(
        RpcTokenContract::new(
            Arc::clone(&chain_client),
            signer,
            &config.network.token_address,
            config.network.token_decimals,
            config.network.network_id,
        )
        .context("Failed to create token contract client")?,
    );
    info!(token = %config.network.token_address, "   ✓ Token contract configured");

    let identities = Arc::new(
        HttpIdentityDirectory::new(&config.identity_url, config.identity_token.clone())
            .context("Failed to create identity directory client")?,
    );

    let reward_config = RewardConfig::from_env();
    if reward_config.admin_address.is_none() {
        warn!("   ⚠ ADMIN_WALLET_ADDRESS not set, reward sending disabled");
    }

    let events = EventBus::default();
    let service = Arc::new(AppService::new(ServiceDependencies {
        network_id: config.network.network_id,
        ledger: postgres_client.clone(),
        wallets: postgres_client.clone(),
        rewards: postgres_client.clone(),
        chain: chain_client,
        token,
        identities,
        sender_config: SenderConfig::from_env(),
        reconciler_config: ReconcilerConfig::from_env(),
        reward_config,
        events: events.clone(),
    }));

    let settings = service.settings();
    for (plugin_id, url) in &config.plugins {
        let plugin = HttpRewardPlugin::new(plugin_id, url)
            .with_context(|| format!("Failed to create reward plugin {}", plugin_id))?;
        settings.register_plugin(Arc::new(plugin)).await;
    }
    service
        .initialize()
        .await
        .context("Failed to load reward settings")?;
    info!(plugins = config.plugins.len(), "   ✓ Reward settings loaded");

    let mut shutdown_senders = Vec::new();
    let mut handles = Vec::new();

    let (listener_handle, listener_shutdown) =
        spawn_event_listeners(&events, service.reward_store());
    handles.push(listener_handle);
    shutdown_senders.push(listener_shutdown);

    if config.worker_config.enabled {
        let (handle, tx) = spawn_chain_watcher(service.reconciler(), &config.worker_config);
        handles.push(handle);
        shutdown_senders.push(tx);

        let (handle, tx) = spawn_sender_worker(service.sender(), &config.worker_config);
        handles.push(handle);
        shutdown_senders.push(tx);

        let (handle, tx) = spawn_status_tracker(service.tracker(), &config.worker_config);
        handles.push(handle);
        shutdown_senders.push(tx);
        info!("   ✓ Background workers started");
    } else {
        info!("   ○ Background workers disabled");
    }

    let router = create_router(Arc::new(AppState::new(Arc::clone(&service))));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("🚀 Server listening on http://{}", addr);
    info!("📖 Swagger UI available at http://{}/swagger-ui", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down background tasks...");
    for tx in shutdown_senders {
        let _ = tx.send(true);
    }
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }
    info!("Shutdown complete");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plugins() {
        let plugins = parse_plugins("kudos=http://kudos:8080, gamification = http://g/ ,broken,=x");
        assert_eq!(
            plugins,
            vec![
                ("kudos".to_string(), "http://kudos:8080".to_string()),
                ("gamification".to_string(), "http://g/".to_string()),
            ]
        );
        assert!(parse_plugins("").is_empty());
    }
}
