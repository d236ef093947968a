//! PostgreSQL transaction ledger and wallet store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{
    PgConnection, PgPool, Row,
    postgres::{PgPoolOptions, PgRow},
};
use std::env;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::domain::{
    AMOUNT_METHODS, AppError, DatabaseError, FlowDirection, TransactionDetail, TransactionLedger,
    Wallet, WalletState, WalletStore, WalletType,
};

pub(crate) const TRANSACTION_COLUMNS: &str = "id, network_id, hash, from_address, to_address, \
    by_address, raw_transaction, nonce, value, contract_amount, contract_address, \
    contract_method, pending, succeeded, dropped, admin_operation, gas_price, gas_used, fee, \
    label, message, created_at, sent_at, sending_attempts, issuer_identity_id";

/// Reads a text column holding an enum, rejecting values this build does not know.
pub(crate) fn parse_column<T>(row: &PgRow, column: &str) -> Result<T, AppError>
where
    T: std::str::FromStr<Err = String>,
{
    let value: String = row.get(column);
    value
        .parse()
        .map_err(|e: String| AppError::Serialization(format!("column {}: {}", column, e)))
}

const WALLET_COLUMNS: &str = "identity_id, wallet_type, remote_id, address, enabled, \
    is_deleted_user, is_disabled_user, initialization_state, provider, encrypted_private_key, \
    created_at";

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl PostgresConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            env::var(key)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };
        Self {
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_connections),
            min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.min_connections),
            acquire_timeout: secs("DATABASE_ACQUIRE_TIMEOUT_SECS", defaults.acquire_timeout),
            idle_timeout: secs("DATABASE_IDLE_TIMEOUT_SECS", defaults.idle_timeout),
            max_lifetime: secs("DATABASE_MAX_LIFETIME_SECS", defaults.max_lifetime),
        }
    }
}

/// PostgreSQL client with connection pooling
pub struct PostgresClient {
    pub(crate) pool: PgPool,
}

impl PostgresClient {
    /// Create a new PostgreSQL client with custom configuration
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a new PostgreSQL client with default configuration
    pub async fn with_defaults(database_url: &str) -> Result<Self, AppError> {
        Self::new(database_url, PostgresConfig::default()).await
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Migration(e.to_string())))?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying connection pool (for testing)
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub(crate) fn row_to_transaction(row: &PgRow) -> TransactionDetail {
        TransactionDetail {
            id: Some(row.get("id")),
            network_id: row.get("network_id"),
            hash: row.get("hash"),
            from_address: row.get("from_address"),
            to_address: row.get("to_address"),
            by_address: row.get("by_address"),
            raw_transaction: row.get("raw_transaction"),
            nonce: row.get("nonce"),
            value: row.get("value"),
            contract_amount: row.get("contract_amount"),
            contract_address: row.get("contract_address"),
            contract_method: row.get("contract_method"),
            pending: row.get("pending"),
            succeeded: row.get("succeeded"),
            dropped: row.get("dropped"),
            admin_operation: row.get("admin_operation"),
            gas_price: row.get("gas_price"),
            gas_used: row.get("gas_used"),
            fee: row.get("fee"),
            label: row.get("label"),
            message: row.get("message"),
            created_at: Some(row.get("created_at")),
            sent_at: row.get("sent_at"),
            sending_attempts: row.get("sending_attempts"),
            issuer_identity_id: row.get("issuer_identity_id"),
        }
    }

    fn row_to_wallet(row: &PgRow) -> Result<Wallet, AppError> {
        Ok(Wallet {
            identity_id: row.get("identity_id"),
            wallet_type: parse_column(row, "wallet_type")?,
            remote_id: row.get("remote_id"),
            address: row.get("address"),
            enabled: row.get("enabled"),
            is_deleted_user: row.get("is_deleted_user"),
            is_disabled_user: row.get("is_disabled_user"),
            initialization_state: parse_column(row, "initialization_state")?,
            provider: parse_column(row, "provider")?,
            encrypted_private_key: row.get("encrypted_private_key"),
            created_at: Some(row.get("created_at")),
        })
    }

    /// Insert or update on an open connection, so callers can join a transaction.
    async fn upsert_on(
        conn: &mut PgConnection,
        tx: &TransactionDetail,
    ) -> Result<TransactionDetail, AppError> {
        let created_at = tx.created_at.unwrap_or_else(Utc::now);
        let sql = match tx.id {
            None => format!(
                r#"
                INSERT INTO transactions (
                    network_id, hash, from_address, to_address, by_address, raw_transaction,
                    nonce, value, contract_amount, contract_address, contract_method, pending,
                    succeeded, dropped, admin_operation, gas_price, gas_used, fee, label,
                    message, created_at, sent_at, sending_attempts, issuer_identity_id
                )
                VALUES ($2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                        $17, $18, $19, $20, $21, $22, $23, $24, $25)
                RETURNING {}
                "#,
                TRANSACTION_COLUMNS
            ),
            Some(_) => format!(
                r#"
                UPDATE transactions
                SET network_id = $2, hash = $3, from_address = $4, to_address = $5,
                    by_address = $6, raw_transaction = $7, nonce = $8, value = $9,
                    contract_amount = $10, contract_address = $11, contract_method = $12,
                    pending = $13, succeeded = $14, dropped = $15, admin_operation = $16,
                    gas_price = $17, gas_used = $18, fee = $19, label = $20, message = $21,
                    created_at = $22, sent_at = $23, sending_attempts = $24,
                    issuer_identity_id = $25
                WHERE id = $1
                RETURNING {}
                "#,
                TRANSACTION_COLUMNS
            ),
        };

        // $1 is only referenced by the update
        let row = sqlx::query(&sql)
            .bind(tx.id.unwrap_or(0))
            .bind(tx.network_id)
            .bind(&tx.hash)
            .bind(&tx.from_address)
            .bind(&tx.to_address)
            .bind(&tx.by_address)
            .bind(&tx.raw_transaction)
            .bind(tx.nonce)
            .bind(tx.value)
            .bind(tx.contract_amount)
            .bind(&tx.contract_address)
            .bind(&tx.contract_method)
            .bind(tx.pending)
            .bind(tx.succeeded)
            .bind(tx.dropped)
            .bind(tx.admin_operation)
            .bind(tx.gas_price)
            .bind(tx.gas_used)
            .bind(tx.fee)
            .bind(&tx.label)
            .bind(&tx.message)
            .bind(created_at)
            .bind(tx.sent_at)
            .bind(tx.sending_attempts)
            .bind(tx.issuer_identity_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        match row {
            Some(row) => Ok(Self::row_to_transaction(&row)),
            None => Err(AppError::Database(DatabaseError::NotFound(format!(
                "transaction {}",
                tx.id.unwrap_or_default()
            )))),
        }
    }

    async fn fetch_transactions(
        &self,
        filter: &str,
        network_id: i64,
        address: Option<&str>,
        nonce: Option<i64>,
    ) -> Result<Vec<TransactionDetail>, AppError> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE network_id = $1 AND {} ORDER BY nonce ASC NULLS LAST, id ASC",
            TRANSACTION_COLUMNS, filter
        );
        let mut query = sqlx::query(&sql).bind(network_id);
        if let Some(address) = address {
            query = query.bind(address.to_lowercase());
        }
        if let Some(nonce) = nonce {
            query = query.bind(nonce);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        Ok(rows.iter().map(Self::row_to_transaction).collect())
    }
}

#[async_trait]
impl TransactionLedger for PostgresClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self, tx), fields(id = ?tx.id, hash = ?tx.hash))]
    async fn upsert(&self, tx: &TransactionDetail) -> Result<TransactionDetail, AppError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Self::upsert_on(&mut conn, tx).await
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, id: i64) -> Result<Option<TransactionDetail>, AppError> {
        let sql = format!("SELECT {} FROM transactions WHERE id = $1", TRANSACTION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        Ok(row.as_ref().map(Self::row_to_transaction))
    }

    #[instrument(skip(self))]
    async fn find_by_hash(&self, hash: &str) -> Result<Option<TransactionDetail>, AppError> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE hash = $1",
            TRANSACTION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        Ok(row.as_ref().map(Self::row_to_transaction))
    }

    #[instrument(skip(self))]
    async fn find_pending(&self, network_id: i64) -> Result<Vec<TransactionDetail>, AppError> {
        self.fetch_transactions("pending = TRUE", network_id, None, None)
            .await
    }

    #[instrument(skip(self))]
    async fn find_pending_hashes(&self, network_id: i64) -> Result<Vec<String>, AppError> {
        let rows = sqlx::query(
            "SELECT hash FROM transactions WHERE network_id = $1 AND pending = TRUE AND hash IS NOT NULL",
        )
        .bind(network_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        Ok(rows.iter().map(|row| row.get("hash")).collect())
    }

    #[instrument(skip(self))]
    async fn find_by_nonce(
        &self,
        network_id: i64,
        from_address: &str,
        nonce: i64,
    ) -> Result<Vec<TransactionDetail>, AppError> {
        self.fetch_transactions(
            "from_address = $2 AND nonce = $3",
            network_id,
            Some(from_address),
            Some(nonce),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn find_pending_with_same_nonce(
        &self,
        network_id: i64,
        from_address: &str,
        nonce: i64,
        exclude_hash: &str,
    ) -> Result<Vec<TransactionDetail>, AppError> {
        let sql = format!(
            r#"
            SELECT {} FROM transactions
            WHERE network_id = $1 AND from_address = $2 AND nonce = $3
              AND pending = TRUE AND (hash IS NULL OR hash <> $4)
            ORDER BY id ASC
            "#,
            TRANSACTION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(network_id)
            .bind(from_address.to_lowercase())
            .bind(nonce)
            .bind(exclude_hash)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        Ok(rows.iter().map(Self::row_to_transaction).collect())
    }

    #[instrument(skip(self))]
    async fn find_pending_as_sender_up_to_nonce(
        &self,
        network_id: i64,
        from_address: &str,
        nonce: i64,
    ) -> Result<Vec<TransactionDetail>, AppError> {
        self.fetch_transactions(
            "from_address = $2 AND pending = TRUE AND nonce <= $3",
            network_id,
            Some(from_address),
            Some(nonce),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn find_pending_ether_transactions(
        &self,
        network_id: i64,
        address: &str,
    ) -> Result<Vec<TransactionDetail>, AppError> {
        self.fetch_transactions(
            "pending = TRUE AND contract_address IS NULL AND sent_at IS NOT NULL \
             AND (from_address = $2 OR to_address = $2)",
            network_id,
            Some(address),
            None,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn find_transactions_to_send(
        &self,
        network_id: i64,
    ) -> Result<Vec<TransactionDetail>, AppError> {
        self.fetch_transactions(
            "pending = TRUE AND raw_transaction IS NOT NULL",
            network_id,
            None,
            None,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn count_pending_sent(&self, network_id: i64, address: &str) -> Result<i64, AppError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count FROM transactions
            WHERE network_id = $1 AND from_address = $2 AND pending = TRUE
              AND sent_at IS NOT NULL AND raw_transaction IS NOT NULL
            "#,
        )
        .bind(network_id)
        .bind(address.to_lowercase())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        Ok(row.get("count"))
    }

    #[instrument(skip(self))]
    async fn max_pending_nonce(
        &self,
        network_id: i64,
        address: &str,
    ) -> Result<Option<i64>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT MAX(nonce) AS max_nonce FROM transactions
            WHERE network_id = $1 AND from_address = $2 AND pending = TRUE AND nonce IS NOT NULL
            "#,
        )
        .bind(network_id)
        .bind(address.to_lowercase())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        Ok(row.get("max_nonce"))
    }

    #[instrument(skip(self, tx), fields(hash = ?tx.hash, nonce = ?tx.nonce))]
    async fn apply_mined(
        &self,
        tx: &TransactionDetail,
    ) -> Result<Option<(TransactionDetail, Vec<TransactionDetail>)>, AppError> {
        let mut db_tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;

        // Row lock serializes concurrent deliveries of the same receipt
        let mut tx = tx.clone();
        if let Some(hash) = tx.hash.as_deref() {
            let existing = sqlx::query("SELECT id, pending FROM transactions WHERE hash = $1 FOR UPDATE")
                .bind(hash)
                .fetch_optional(&mut *db_tx)
                .await
                .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
            if let Some(row) = existing {
                if !row.get::<bool, _>("pending") {
                    debug!("Transaction already final, mined update skipped");
                    return Ok(None);
                }
                tx.id = Some(row.get("id"));
            }
        }

        let stored = match Self::upsert_on(&mut db_tx, &tx).await {
            Ok(stored) => stored,
            // Inserted concurrently by another delivery
            Err(AppError::Database(DatabaseError::Duplicate(_))) => return Ok(None),
            Err(e) => return Err(e),
        };

        let dropped = match (stored.nonce, stored.id) {
            (Some(nonce), Some(id)) => {
                let sql = format!(
                    r#"
                    UPDATE transactions
                    SET pending = FALSE, succeeded = FALSE, dropped = TRUE
                    WHERE network_id = $1 AND from_address = $2 AND nonce <= $3
                      AND pending = TRUE AND id <> $4
                    RETURNING {}
                    "#,
                    TRANSACTION_COLUMNS
                );
                let rows = sqlx::query(&sql)
                    .bind(stored.network_id)
                    .bind(&stored.from_address)
                    .bind(nonce)
                    .bind(id)
                    .fetch_all(&mut *db_tx)
                    .await
                    .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
                rows.iter().map(Self::row_to_transaction).collect()
            }
            _ => Vec::new(),
        };

        db_tx
            .commit()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        if !dropped.is_empty() {
            debug!(count = dropped.len(), "Dropped stale same-sender transactions");
        }
        Ok(Some((stored, dropped)))
    }

    #[instrument(skip(self))]
    async fn sum_contract_amount(
        &self,
        network_id: i64,
        address: &str,
        direction: FlowDirection,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Decimal, AppError> {
        let address_filter = match direction {
            FlowDirection::Sent => "((from_address = $2 AND by_address IS NULL) OR by_address = $2)",
            FlowDirection::Received => "to_address = $2",
        };
        let sql = format!(
            r#"
            SELECT COALESCE(SUM(contract_amount), 0) AS total FROM transactions
            WHERE network_id = $1 AND {}
              AND contract_method = ANY($3)
              AND succeeded = TRUE
              AND created_at >= $4 AND created_at < $5
            "#,
            address_filter
        );
        let row = sqlx::query(&sql)
            .bind(network_id)
            .bind(address.to_lowercase())
            .bind(&AMOUNT_METHODS[..])
            .bind(start)
            .bind(end)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        Ok(row.get("total"))
    }

    #[instrument(skip(self))]
    async fn last_watched_block(&self, network_id: i64) -> Result<Option<u64>, AppError> {
        let row = sqlx::query("SELECT last_block FROM chain_cursors WHERE network_id = $1")
            .bind(network_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        Ok(row.map(|r| r.get::<i64, _>("last_block").max(0) as u64))
    }

    #[instrument(skip(self))]
    async fn save_last_watched_block(&self, network_id: i64, block: u64) -> Result<(), AppError> {
        let block = i64::try_from(block)
            .map_err(|_| AppError::invalid_field("block", "block number out of range"))?;
        sqlx::query(
            r#"
            INSERT INTO chain_cursors (network_id, last_block, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (network_id)
            DO UPDATE SET last_block = EXCLUDED.last_block, updated_at = NOW()
            "#,
        )
        .bind(network_id)
        .bind(block)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        Ok(())
    }
}

#[async_trait]
impl WalletStore for PostgresClient {
    #[instrument(skip(self))]
    async fn find_wallet_by_address(&self, address: &str) -> Result<Option<Wallet>, AppError> {
        let sql = format!("SELECT {} FROM wallets WHERE address = $1", WALLET_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(address.to_lowercase())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        row.as_ref().map(Self::row_to_wallet).transpose()
    }

    #[instrument(skip(self))]
    async fn find_wallet_by_identity(&self, identity_id: i64) -> Result<Option<Wallet>, AppError> {
        let sql = format!(
            "SELECT {} FROM wallets WHERE identity_id = $1",
            WALLET_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(identity_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        row.as_ref().map(Self::row_to_wallet).transpose()
    }

    #[instrument(skip(self))]
    async fn list_wallets(&self, wallet_type: Option<WalletType>) -> Result<Vec<Wallet>, AppError> {
        let sql = format!(
            "SELECT {} FROM wallets WHERE ($1::VARCHAR IS NULL OR wallet_type = $1) ORDER BY identity_id ASC",
            WALLET_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(wallet_type.map(|t| t.as_str()))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        rows.iter().map(Self::row_to_wallet).collect()
    }

    #[instrument(skip(self, wallet), fields(identity_id = wallet.identity_id))]
    async fn save_wallet(&self, wallet: &Wallet) -> Result<Wallet, AppError> {
        let sql = format!(
            r#"
            INSERT INTO wallets (
                identity_id, wallet_type, remote_id, address, enabled, is_deleted_user,
                is_disabled_user, initialization_state, provider, encrypted_private_key,
                created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, COALESCE($11, NOW()))
            ON CONFLICT (identity_id) DO UPDATE SET
                wallet_type = EXCLUDED.wallet_type,
                remote_id = EXCLUDED.remote_id,
                address = EXCLUDED.address,
                enabled = EXCLUDED.enabled,
                is_deleted_user = EXCLUDED.is_deleted_user,
                is_disabled_user = EXCLUDED.is_disabled_user,
                initialization_state = EXCLUDED.initialization_state,
                provider = EXCLUDED.provider,
                encrypted_private_key = EXCLUDED.encrypted_private_key
            RETURNING {}
            "#,
            WALLET_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(wallet.identity_id)
            .bind(wallet.wallet_type.as_str())
            .bind(&wallet.remote_id)
            .bind(wallet.address.as_ref().map(|a| a.to_lowercase()))
            .bind(wallet.enabled)
            .bind(wallet.is_deleted_user)
            .bind(wallet.is_disabled_user)
            .bind(wallet.initialization_state.as_str())
            .bind(wallet.provider.as_str())
            .bind(&wallet.encrypted_private_key)
            .bind(wallet.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;
        Self::row_to_wallet(&row)
    }

    #[instrument(skip(self))]
    async fn update_initialization_state(
        &self,
        address: &str,
        state: WalletState,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE wallets SET initialization_state = $1 WHERE address = $2")
            .bind(state.as_str())
            .bind(address.to_lowercase())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        Ok(())
    }
}
