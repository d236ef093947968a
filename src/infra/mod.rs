//! Infrastructure layer implementations.

pub mod blockchain;
pub mod database;
pub mod identity;
pub mod plugins;

pub use blockchain::{
    HttpTransactionSigner, RpcChainClient, RpcClientConfig, RpcTokenContract, TransactionSigner,
};
pub use database::{PostgresClient, PostgresConfig};
pub use identity::HttpIdentityDirectory;
pub use plugins::HttpRewardPlugin;
