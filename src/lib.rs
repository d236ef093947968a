//! Wallet transaction reconciliation and token reward distribution.
//!
//! The crate mirrors blockchain transactions of platform wallets in a local
//! ledger, keeps that ledger consistent with the chain, hands out nonces and
//! pays periodic token rewards computed from pluggable point sources.

pub mod api;
pub mod app;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
