//! Ethereum chain access: JSON-RPC reader, token contract adapter and remote signer.

pub mod abi;
pub mod ethereum;
pub mod signer;
pub mod token;

pub use ethereum::{EthRpcProvider, HttpEthRpcProvider, RpcChainClient, RpcClientConfig};
pub use signer::{HttpTransactionSigner, SignedTransaction, TransactionSigner, UnsignedTransaction};
pub use token::RpcTokenContract;
