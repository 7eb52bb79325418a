pub mod auth;
pub mod metrics;

pub use auth::auth_middleware;
pub use metrics::metrics_middleware;
