//! marketplace-core: Shared infrastructure for the marketplace front ends.
pub mod error;
pub mod middleware;
pub mod observability;

pub use axum;
pub use serde;
pub use serde_json;
pub use tracing;
