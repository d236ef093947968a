//! Runtime configuration of the application services.

use std::env;

use crate::domain::{AppError, ConfigError, RewardPeriodType, normalize_address};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn required(key: &str) -> Result<String, AppError> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::Config(ConfigError::MissingEnvVar(key.to_string())))
}

/// The blockchain network this instance reconciles
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub network_id: i64,
    pub rpc_url: String,
    /// Canonical token contract address
    pub token_address: String,
    pub token_decimals: u32,
}

impl NetworkConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let raw_token = required("TOKEN_ADDRESS")?;
        let token_address = normalize_address(&raw_token).ok_or_else(|| {
            AppError::Config(ConfigError::InvalidValue {
                key: "TOKEN_ADDRESS".to_string(),
                message: format!("'{}' is not an address", raw_token),
            })
        })?;
        Ok(Self {
            network_id: env_or("NETWORK_ID", 1),
            rpc_url: required("RPC_URL")?,
            token_address,
            token_decimals: env_or("TOKEN_DECIMALS", 18),
        })
    }
}

/// Pending transaction sender policy
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Broadcast attempts before a transaction is abandoned
    pub max_attempts: i32,
    /// Broadcast transactions per sender awaiting a receipt
    pub max_parallel_pending: i64,
    /// Age after which a transaction never seen on chain is abandoned
    pub pending_max_days: i64,
    /// Send every ready transaction of a sender per sweep instead of one
    pub boost: bool,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_parallel_pending: 5,
            pending_max_days: 3,
            boost: false,
        }
    }
}

impl SenderConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: env_or("MAX_SENDING_ATTEMPTS", defaults.max_attempts),
            max_parallel_pending: env_or(
                "MAX_PARALLEL_PENDING_TRANSACTIONS",
                defaults.max_parallel_pending,
            ),
            pending_max_days: env_or("PENDING_TRANSACTION_MAX_DAYS", defaults.pending_max_days),
            boost: env_or("SENDER_BOOST", defaults.boost),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub log_all_transactions: bool,
    /// Blocks processed per watcher tick
    pub block_batch_size: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            log_all_transactions: false,
            block_batch_size: 100,
        }
    }
}

impl ReconcilerConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_all_transactions: env_or("LOG_ALL_TRANSACTIONS", defaults.log_all_transactions),
            block_batch_size: env_or("BLOCK_BATCH_SIZE", defaults.block_batch_size).max(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RewardConfig {
    /// Wallet issuing reward transactions
    pub admin_address: Option<String>,
    /// Platform group whose members may send rewards
    pub rewarding_group: String,
    pub default_period_type: RewardPeriodType,
    pub default_time_zone: String,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            admin_address: None,
            rewarding_group: "/platform/rewarding".to_string(),
            default_period_type: RewardPeriodType::Month,
            default_time_zone: "UTC".to_string(),
        }
    }
}

impl RewardConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            admin_address: env::var("ADMIN_WALLET_ADDRESS")
                .ok()
                .and_then(|v| normalize_address(&v)),
            rewarding_group: env::var("REWARDING_GROUP").unwrap_or(defaults.rewarding_group),
            default_period_type: env_or("REWARD_PERIOD_TYPE", defaults.default_period_type),
            default_time_zone: env::var("REWARD_TIME_ZONE").unwrap_or(defaults.default_time_zone),
        }
    }

    #[must_use]
    pub fn with_admin(mut self, address: &str) -> Self {
        self.admin_address = normalize_address(address);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_defaults() {
        let config = SenderConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.max_parallel_pending, 5);
        assert_eq!(config.pending_max_days, 3);
        assert!(!config.boost);
    }

    #[test]
    fn test_reward_config_admin_is_normalized() {
        let config = RewardConfig::default().with_admin("0xABCDEF0123456789ABCDEF0123456789ABCDEF01");
        assert_eq!(
            config.admin_address.as_deref(),
            Some("0xabcdef0123456789abcdef0123456789abcdef01")
        );
        assert_eq!(config.rewarding_group, "/platform/rewarding");

        let invalid = RewardConfig::default().with_admin("not-an-address");
        assert!(invalid.admin_address.is_none());
    }
}
