use async_trait::async_trait;
use tokio::sync::broadcast;
use url::Url;

use crate::error::ProviderError;
use crate::models::{OtpType, Principal, Session, TokenPair};

/// Capacity of the auth-state feed. Subscribers that fall further behind
/// skip the oldest events.
pub const AUTH_EVENT_CAPACITY: usize = 16;

/// Session changes published by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(Session),
    SignedOut,
    /// `None` means the refresh failed and the session is gone.
    TokenRefreshed(Option<Session>),
}

impl AuthEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AuthEvent::SignedIn(_) => "SIGNED_IN",
            AuthEvent::SignedOut => "SIGNED_OUT",
            AuthEvent::TokenRefreshed(_) => "TOKEN_REFRESHED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    SignedIn(Session),
    /// The provider sent a confirmation email; the session arrives through
    /// the link in it.
    ConfirmationPending { email: String },
}

/// Identity-provider contract consumed by the front ends.
///
/// Implementations publish an [`AuthEvent`] on the feed for every session
/// they create, refresh or end.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn get_user(&self, access_token: &str) -> Result<Principal, ProviderError>;

    async fn exchange_code_for_session(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<Session, ProviderError>;

    async fn set_session(&self, tokens: &TokenPair) -> Result<Session, ProviderError>;

    /// `Ok(None)` when the token was accepted but no session was issued.
    async fn verify_otp(
        &self,
        token_hash: &str,
        otp_type: OtpType,
    ) -> Result<Option<Session>, ProviderError>;

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, ProviderError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, ProviderError>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        redirect_to: Option<&str>,
    ) -> Result<SignUpOutcome, ProviderError>;

    /// URL the browser must be sent to for a third-party sign-in.
    fn sign_in_with_oauth(
        &self,
        provider: &str,
        redirect_to: &str,
        code_challenge: &str,
    ) -> Result<Url, ProviderError>;

    /// Email a magic link.
    async fn sign_in_with_otp(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), ProviderError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), ProviderError>;

    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthEvent>;
}
