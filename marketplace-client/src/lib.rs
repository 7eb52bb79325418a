//! Client runtime shared by the admin, organizer and exhibitor front ends.
//!
//! The centrepiece is [`controller::AuthSessionController`], which turns a
//! page URL plus whatever session the browser already stored into one of a
//! small set of outcomes, consuming at most one redirect-delivered grant.
pub mod config;
pub mod controller;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use controller::{
    AuthInput, AuthSessionController, AuthState, GrantLedger, Outcome, Subscription, Transition,
};
pub use error::{AuthError, ErrorKind, ProfileError, ProviderError, StorageError};
pub use models::{AppRole, PendingGrant, Principal, ProfileRecord, Session};
