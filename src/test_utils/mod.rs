//! In-memory collaborators for unit and integration tests.

pub mod mocks;

pub use mocks::*;
