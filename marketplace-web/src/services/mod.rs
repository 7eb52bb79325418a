pub mod grant_ledgers;
pub mod identity;
pub mod metrics;
pub mod session_storage;

pub use grant_ledgers::SessionGrantLedgers;
pub use identity::{GoTrueFactory, IdentityProviderFactory};
pub use session_storage::CookieSessionStorage;
