//! The API layer, containing web handlers and routing.

pub mod handlers;
pub mod router;

pub use handlers::{ApiDoc, ISSUER_HEADER, NonceResponse, SendRewardsRequest};
pub use router::create_router;
