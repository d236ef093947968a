//! Domain types for wallets, transactions and chain data.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::error::{AppError, ValidationError};

/// Decimal count of the native coin (wei)
pub const ETHER_DECIMALS: u32 = 18;

/// Kind of identity owning a wallet
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WalletType {
    #[default]
    User,
    Space,
    Admin,
}

impl WalletType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Space => "space",
            Self::Admin => "admin",
        }
    }
}

impl std::str::FromStr for WalletType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "space" => Ok(Self::Space),
            "admin" => Ok(Self::Admin),
            _ => Err(format!("Invalid wallet type: {}", s)),
        }
    }
}

impl std::fmt::Display for WalletType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// On-chain initialization state of a wallet
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WalletState {
    #[default]
    New,
    Modified,
    Pending,
    Initialized,
    Denied,
}

impl WalletState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Modified => "modified",
            Self::Pending => "pending",
            Self::Initialized => "initialized",
            Self::Denied => "denied",
        }
    }
}

impl std::str::FromStr for WalletState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "modified" => Ok(Self::Modified),
            "pending" => Ok(Self::Pending),
            "initialized" => Ok(Self::Initialized),
            "denied" => Ok(Self::Denied),
            _ => Err(format!("Invalid wallet state: {}", s)),
        }
    }
}

impl std::fmt::Display for WalletState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who holds the signing key of a wallet
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WalletProvider {
    /// Key generated and stored encrypted by the platform
    #[default]
    Internal,
    /// Key held by the user in an external signer
    External,
}

impl WalletProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External => "external",
        }
    }
}

impl std::str::FromStr for WalletProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "internal" => Ok(Self::Internal),
            "external" => Ok(Self::External),
            _ => Err(format!("Invalid wallet provider: {}", s)),
        }
    }
}

/// A blockchain wallet bound to a platform identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Wallet {
    /// Identity id of the owner, also the wallet technical id
    pub identity_id: i64,
    pub wallet_type: WalletType,
    /// Username or space pretty name
    pub remote_id: String,
    /// Canonical lower-case address
    pub address: Option<String>,
    pub enabled: bool,
    pub is_deleted_user: bool,
    pub is_disabled_user: bool,
    pub initialization_state: WalletState,
    pub provider: WalletProvider,
    /// Encrypted key material, never serialized
    #[serde(skip)]
    pub encrypted_private_key: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Wallet {
    #[must_use]
    pub fn new(identity_id: i64, wallet_type: WalletType, remote_id: impl Into<String>) -> Self {
        Self {
            identity_id,
            wallet_type,
            remote_id: remote_id.into(),
            address: None,
            enabled: true,
            is_deleted_user: false,
            is_disabled_user: false,
            initialization_state: WalletState::New,
            provider: WalletProvider::Internal,
            encrypted_private_key: None,
            created_at: None,
        }
    }

    #[must_use]
    pub fn with_address(mut self, address: &str) -> Self {
        self.address = Some(address.trim().to_lowercase());
        self
    }

    /// A wallet can receive rewards only while usable by a live owner.
    #[must_use]
    pub fn is_eligible_for_reward(&self) -> bool {
        self.enabled
            && !self.is_deleted_user
            && !self.is_disabled_user
            && self
                .address
                .as_deref()
                .map(|a| !a.trim().is_empty())
                .unwrap_or(false)
    }
}

/// A platform identity as seen by the wallet add-on
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Identity {
    pub id: i64,
    pub identity_type: WalletType,
    pub remote_id: String,
    pub display_name: String,
    #[serde(default)]
    pub deleted: bool,
}

/// Lifecycle state of a transaction, derived from its flags
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// Recorded but not yet broadcast
    Created,
    /// Broadcast and waiting to be mined
    Broadcast,
    MinedSuccess,
    MinedFailed,
    /// Abandoned locally: superseded, expired or out of attempts
    Dropped,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Broadcast => "broadcast",
            Self::MinedSuccess => "mined_success",
            Self::MinedFailed => "mined_failed",
            Self::Dropped => "dropped",
        }
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One blockchain transaction attempt as mirrored in the ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct TransactionDetail {
    /// Ledger id, `None` until first persisted
    pub id: Option<i64>,
    pub network_id: i64,
    #[schema(example = "0x5eb1d6a3c0f8f3c9d4b2e1a0f9e8d7c6b5a4938271605f4e3d2c1b0a99887766")]
    pub hash: Option<String>,
    pub from_address: String,
    pub to_address: Option<String>,
    /// Token owner debited by a `transferFrom` call, the chain sender being its delegate
    pub by_address: Option<String>,
    /// Signed payload, present when this service is responsible for broadcasting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_transaction: Option<String>,
    pub nonce: Option<i64>,
    /// Native coin value
    #[schema(value_type = String)]
    pub value: Decimal,
    /// Token amount for contract calls
    #[schema(value_type = String)]
    pub contract_amount: Decimal,
    pub contract_address: Option<String>,
    pub contract_method: Option<String>,
    pub pending: bool,
    pub succeeded: bool,
    pub dropped: bool,
    pub admin_operation: bool,
    pub gas_price: i64,
    pub gas_used: i64,
    #[schema(value_type = String)]
    pub fee: Decimal,
    pub label: Option<String>,
    pub message: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub sending_attempts: i32,
    pub issuer_identity_id: Option<i64>,
}

impl TransactionDetail {
    #[must_use]
    pub fn new(network_id: i64, from_address: &str) -> Self {
        Self {
            id: None,
            network_id,
            hash: None,
            from_address: from_address.trim().to_lowercase(),
            to_address: None,
            by_address: None,
            raw_transaction: None,
            nonce: None,
            value: Decimal::ZERO,
            contract_amount: Decimal::ZERO,
            contract_address: None,
            contract_method: None,
            pending: true,
            succeeded: false,
            dropped: false,
            admin_operation: false,
            gas_price: 0,
            gas_used: 0,
            fee: Decimal::ZERO,
            label: None,
            message: None,
            created_at: None,
            sent_at: None,
            sending_attempts: 0,
            issuer_identity_id: None,
        }
    }

    #[must_use]
    pub fn is_contract_transaction(&self) -> bool {
        self.contract_address.is_some()
    }

    #[must_use]
    pub fn is_sent(&self) -> bool {
        self.sent_at.is_some()
    }

    #[must_use]
    pub fn state(&self) -> TransactionState {
        if self.dropped {
            TransactionState::Dropped
        } else if self.pending {
            if self.is_sent() {
                TransactionState::Broadcast
            } else {
                TransactionState::Created
            }
        } else if self.succeeded {
            TransactionState::MinedSuccess
        } else {
            TransactionState::MinedFailed
        }
    }

    /// Marks the transaction as abandoned without a chain receipt.
    pub fn mark_dropped(&mut self) {
        self.pending = false;
        self.succeeded = false;
        self.dropped = true;
    }

    /// Lower-cases addresses and canonicalizes the hash in place.
    pub fn normalize(&mut self) {
        self.from_address = self.from_address.trim().to_lowercase();
        for address in [
            &mut self.to_address,
            &mut self.by_address,
            &mut self.contract_address,
        ] {
            if let Some(a) = address.as_mut() {
                *a = a.trim().to_lowercase();
            }
        }
        if let Some(hash) = self.hash.as_deref() {
            self.hash = Some(normalize_hash(hash).unwrap_or_else(|| hash.trim().to_lowercase()));
        }
    }

    /// Addresses whose wallets are affected by this transaction.
    pub fn involved_addresses(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.from_address.as_str())
            .chain(self.to_address.as_deref())
            .chain(self.by_address.as_deref())
    }
}

/// A mined block with the hashes of its transactions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainBlock {
    pub number: u64,
    pub hash: String,
    pub transaction_hashes: Vec<String>,
}

/// A transaction as returned by the chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainTransaction {
    pub hash: String,
    pub from: String,
    pub to: Option<String>,
    pub nonce: u64,
    /// Value in wei
    pub value: u128,
    pub gas_price: u128,
    /// Hex call data, `0x` for plain transfers
    pub input: String,
    /// `None` while not yet mined
    pub block_number: Option<u64>,
}

/// Receipt of a mined transaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    pub block_number: u64,
    /// `true` when execution succeeded
    pub status: bool,
    pub gas_used: u64,
    pub effective_gas_price: Option<u128>,
}

/// Token contract call decoded from transaction input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    /// Method name as declared by the contract ABI, e.g. `transferFrom`
    pub method: String,
    /// Token sender for `transferFrom`
    pub from: Option<String>,
    /// Receiver or target account
    pub to: Option<String>,
    /// Amount in base units, 0 for methods without one
    pub amount: u128,
    /// Administrative method, excluded from user-facing history
    pub admin: bool,
}

/// Canonicalizes a transaction hash to `0x` + 64 lower-case hex digits.
/// Returns `None` for anything that cannot be a hash.
#[must_use]
pub fn normalize_hash(hash: &str) -> Option<String> {
    normalize_hex(hash, 64)
}

/// Canonicalizes an address to `0x` + 40 lower-case hex digits.
#[must_use]
pub fn normalize_address(address: &str) -> Option<String> {
    normalize_hex(address, 40)
}

fn normalize_hex(value: &str, digits: usize) -> Option<String> {
    let trimmed = value.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if body.len() != digits || !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("0x{}", body.to_lowercase()))
}

/// Converts a decimal amount into integer base units.
pub fn to_base_units(amount: Decimal, decimals: u32) -> Result<u128, AppError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(AppError::Validation(ValidationError::InvalidField {
            field: "amount".to_string(),
            message: format!("negative amount {}", amount),
        }));
    }
    let mut scaled = amount;
    for _ in 0..decimals {
        scaled = scaled.checked_mul(Decimal::TEN).ok_or_else(|| {
            AppError::invalid_field("amount", format!("{} overflows base units", amount))
        })?;
    }
    let integral = scaled.trunc();
    let mantissa = integral.mantissa();
    let scale = integral.scale();
    let value = u128::try_from(mantissa)
        .map_err(|_| AppError::invalid_field("amount", "negative base units"))?;
    Ok(value / 10u128.pow(scale))
}

/// Converts integer base units into a decimal amount.
pub fn from_base_units(units: u128, decimals: u32) -> Result<Decimal, AppError> {
    let mantissa = i128::try_from(units)
        .map_err(|_| AppError::invalid_field("amount", "base units out of range"))?;
    if decimals > 28 {
        return Err(AppError::invalid_field(
            "decimals",
            format!("{} decimals not representable", decimals),
        ));
    }
    Decimal::try_from_i128_with_scale(mantissa, decimals)
        .map(|d| d.normalize())
        .map_err(|e| AppError::invalid_field("amount", e.to_string()))
}

/// Health status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub database: HealthStatus,
    pub blockchain: HealthStatus,
    /// Last block processed by the chain watcher
    pub last_watched_block: Option<u64>,
    pub timestamp: DateTime<Utc>,
    #[schema(example = "0.1.0")]
    pub version: String,
}

impl HealthResponse {
    #[must_use]
    pub fn new(database: HealthStatus, blockchain: HealthStatus) -> Self {
        let status = match (&database, &blockchain) {
            (HealthStatus::Healthy, HealthStatus::Healthy) => HealthStatus::Healthy,
            (HealthStatus::Unhealthy, _) => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        };
        Self {
            status,
            database,
            blockchain,
            last_watched_block: None,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Error response structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Error detail structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    #[schema(example = "validation_error")]
    pub r#type: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_wallet_enums_display_and_parsing() {
        for (state, s) in [
            (WalletState::New, "new"),
            (WalletState::Modified, "modified"),
            (WalletState::Pending, "pending"),
            (WalletState::Initialized, "initialized"),
            (WalletState::Denied, "denied"),
        ] {
            assert_eq!(state.to_string(), s);
            assert_eq!(WalletState::from_str(s).unwrap(), state);
        }
        assert_eq!(WalletType::from_str("space").unwrap(), WalletType::Space);
        assert!(WalletType::from_str("group").is_err());
        assert_eq!(
            WalletProvider::from_str("external").unwrap(),
            WalletProvider::External
        );
    }

    #[test]
    fn test_normalize_hash() {
        let body = "AB".repeat(32);
        assert_eq!(
            normalize_hash(&format!("0x{}", body)),
            Some(format!("0x{}", "ab".repeat(32)))
        );
        assert_eq!(
            normalize_hash(&body),
            Some(format!("0x{}", "ab".repeat(32)))
        );
        assert_eq!(normalize_hash("0x1234"), None);
        assert_eq!(normalize_hash(&format!("0x{}", "zz".repeat(32))), None);
        assert_eq!(normalize_hash(""), None);
    }

    #[test]
    fn test_normalize_address() {
        let addr = format!("0x{}", "A1".repeat(20));
        assert_eq!(
            normalize_address(&addr),
            Some(format!("0x{}", "a1".repeat(20)))
        );
        assert_eq!(normalize_address("0xabc"), None);
    }

    #[test]
    fn test_wallet_reward_eligibility() {
        let wallet = Wallet::new(1, WalletType::User, "alice").with_address("0xABC");
        assert!(wallet.is_eligible_for_reward());
        assert_eq!(wallet.address.as_deref(), Some("0xabc"));

        let mut disabled = wallet.clone();
        disabled.enabled = false;
        assert!(!disabled.is_eligible_for_reward());

        let mut deleted = wallet.clone();
        deleted.is_deleted_user = true;
        assert!(!deleted.is_eligible_for_reward());

        let no_address = Wallet::new(2, WalletType::User, "bob");
        assert!(!no_address.is_eligible_for_reward());
    }

    #[test]
    fn test_transaction_state_derivation() {
        let mut tx = TransactionDetail::new(1, "0xFrom");
        assert_eq!(tx.from_address, "0xfrom");
        assert_eq!(tx.state(), TransactionState::Created);

        tx.sent_at = Some(Utc::now());
        assert_eq!(tx.state(), TransactionState::Broadcast);

        tx.pending = false;
        tx.succeeded = true;
        assert_eq!(tx.state(), TransactionState::MinedSuccess);

        tx.succeeded = false;
        assert_eq!(tx.state(), TransactionState::MinedFailed);

        tx.mark_dropped();
        assert_eq!(tx.state(), TransactionState::Dropped);
    }

    #[test]
    fn test_transaction_normalize() {
        let mut tx = TransactionDetail::new(1, "0xAA");
        tx.to_address = Some(" 0xBB ".to_string());
        tx.hash = Some(format!("0X{}", "CD".repeat(32)));
        tx.normalize();
        assert_eq!(tx.to_address.as_deref(), Some("0xbb"));
        assert_eq!(tx.hash, Some(format!("0x{}", "cd".repeat(32))));
        let involved: Vec<&str> = tx.involved_addresses().collect();
        assert_eq!(involved, vec!["0xaa", "0xbb"]);
    }

    #[test]
    fn test_base_units_conversion() {
        let amount = Decimal::from_str("1.5").unwrap();
        assert_eq!(to_base_units(amount, 18).unwrap(), 1_500_000_000_000_000_000);
        assert_eq!(
            from_base_units(1_500_000_000_000_000_000, 18).unwrap(),
            amount
        );
        assert_eq!(to_base_units(Decimal::ZERO, 6).unwrap(), 0);
        assert!(to_base_units(Decimal::from_str("-1").unwrap(), 6).is_err());
        // Sub-unit dust is truncated
        assert_eq!(
            to_base_units(Decimal::from_str("0.0000015").unwrap(), 6).unwrap(),
            1
        );
    }
}
