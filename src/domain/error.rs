//! Error types shared across all layers.

use thiserror::Error;

/// Top-level application error
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Blockchain error: {0}")]
    Blockchain(#[from] BlockchainError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("External service error: {0}")]
    ExternalService(#[from] ExternalServiceError),

    #[error("Access denied: {0}")]
    Authorization(String),

    /// A second writer tried to change state that is already settled
    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Blockchain(e) => e.is_transient(),
            AppError::Database(DatabaseError::Connection(_)) => true,
            AppError::ExternalService(
                ExternalServiceError::Unavailable(_) | ExternalServiceError::Timeout(_),
            ) => true,
            _ => false,
        }
    }

    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation(ValidationError::InvalidField {
            field: field.into(),
            message: message.into(),
        })
    }
}

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound(err.to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::Connection(err.to_string())
            }
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DatabaseError::Duplicate(db_err.message().to_string())
            }
            _ => DatabaseError::Query(err.to_string()),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(DatabaseError::from(err))
    }
}

#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("RPC error: {0}")]
    RpcError(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Insufficient admin privilege: {0}")]
    InsufficientPrivilege(String),

    #[error("Account not approved: {0}")]
    AccountNotApproved(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Nonce already used: {0}")]
    NonceTooLow(String),
}

impl BlockchainError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BlockchainError::Connection(_) | BlockchainError::RpcError(_) | BlockchainError::Timeout(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("{0}")]
    Multiple(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("{0}")]
    NotConfigured(String),
}

#[derive(Debug, Error)]
pub enum ExternalServiceError {
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(AppError::Blockchain(BlockchainError::Timeout("t".into())).is_transient());
        assert!(AppError::Blockchain(BlockchainError::Connection("c".into())).is_transient());
        assert!(!AppError::Blockchain(BlockchainError::InsufficientFunds).is_transient());
        assert!(
            !AppError::Blockchain(BlockchainError::TransactionFailed("reverted".into()))
                .is_transient()
        );
        assert!(!AppError::invalid_field("amount", "negative").is_transient());
        assert!(AppError::Database(DatabaseError::Connection("down".into())).is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = AppError::invalid_field("hash", "malformed");
        assert_eq!(
            err.to_string(),
            "Validation error: Invalid field 'hash': malformed"
        );
        let err = AppError::Authorization("not a rewarding admin".into());
        assert_eq!(err.to_string(), "Access denied: not a rewarding admin");
    }

    #[test]
    fn test_sqlx_row_not_found_maps_to_not_found() {
        let err: DatabaseError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DatabaseError::NotFound(_)));
    }
}
