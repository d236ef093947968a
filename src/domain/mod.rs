//! Domain layer containing core business types, traits, and error definitions.

pub mod error;
pub mod events;
pub mod period;
pub mod reward;
pub mod traits;
pub mod types;

pub use error::{
    AppError, BlockchainError, ConfigError, DatabaseError, ExternalServiceError, ValidationError,
};
pub use events::{Event, RewardEvent, TransactionEvent, WalletEvent};
pub use period::{RewardPeriod, RewardPeriodType, RewardTimeZone, parse_time_zone};
pub use reward::{
    RewardBudgetType, RewardPluginSettings, RewardReport, RewardSettings, RewardStatus,
    RewardTeam, RewardTeamMember, RewardTeamRef, RewardTransaction, RewardTransactionStatus,
    WalletPluginReward, WalletReward,
};
pub use traits::{
    AMOUNT_METHODS, ChainClient, FlowDirection, IdentityDirectory, RewardPlugin, RewardStore,
    TokenContract, TransactionLedger, WalletStore,
};
pub use types::{
    ChainBlock, ChainTransaction, ContractCall, ETHER_DECIMALS, ErrorDetail, ErrorResponse,
    HealthResponse, HealthStatus, Identity, TransactionDetail, TransactionReceipt,
    TransactionState, Wallet, WalletProvider, WalletState, WalletType, from_base_units,
    normalize_address, normalize_hash, to_base_units,
};
