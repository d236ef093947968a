//! PostgreSQL storage.

mod postgres;
mod reward_store;

pub use postgres::{PostgresClient, PostgresConfig};
