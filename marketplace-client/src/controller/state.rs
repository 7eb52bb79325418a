use url::Url;

use crate::error::AuthError;
use crate::models::{GrantKind, Principal, ProfileRecord};
use crate::services::AuthEvent;

/// Where a page load ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    NoSession,
    /// Signed in without a profile row. `registration_deferred` is set when
    /// the wizard should wait for a later screen instead of blocking the app.
    ProfileMissing {
        principal: Principal,
        registration_deferred: bool,
    },
    /// Signed in with a profile row, which may still be a placeholder.
    ProfilePresent {
        principal: Principal,
        profile: ProfileRecord,
    },
    /// Signed in to an app without profiles.
    ProfileNotRequired { principal: Principal },
}

impl Outcome {
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Outcome::NoSession => None,
            Outcome::ProfileMissing { principal, .. }
            | Outcome::ProfilePresent { principal, .. }
            | Outcome::ProfileNotRequired { principal } => Some(principal),
        }
    }

    pub fn is_signed_in(&self) -> bool {
        self.principal().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    Idle,
    DetectingGrant,
    ExchangingGrant(GrantKind),
    ReconcilingProfile,
    Ready(Outcome),
    Error(AuthError),
}

impl AuthState {
    pub fn name(&self) -> &'static str {
        match self {
            AuthState::Idle => "idle",
            AuthState::DetectingGrant => "detecting_grant",
            AuthState::ExchangingGrant(_) => "exchanging_grant",
            AuthState::ReconcilingProfile => "reconciling_profile",
            AuthState::Ready(_) => "ready",
            AuthState::Error(_) => "error",
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(
            self,
            AuthState::DetectingGrant | AuthState::ExchangingGrant(_) | AuthState::ReconcilingProfile
        )
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        match self {
            AuthState::Ready(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// Signed-in data is on screen, so a re-check can run without a spinner.
    pub(crate) fn has_signed_in_data(&self) -> bool {
        self.outcome().is_some_and(Outcome::is_signed_in)
    }
}

/// Everything that can move the controller.
#[derive(Debug, Clone)]
pub enum AuthInput {
    /// The page at this URL was (re)loaded.
    PageLoad(Url),
    /// Session change published by the identity provider.
    Event(AuthEvent),
    /// The user's "return home" action.
    Reset,
}

/// Result of one [`dispatch`](super::AuthSessionController::dispatch).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: AuthState,
    /// Address to show instead of the loaded one, without adding a history
    /// entry.
    pub replace_url: Option<Url>,
    /// The input was ignored and the state did not change.
    pub skipped: bool,
}

impl Transition {
    pub(crate) fn to(state: AuthState) -> Self {
        Self {
            state,
            replace_url: None,
            skipped: false,
        }
    }

    pub(crate) fn skipped(state: AuthState) -> Self {
        Self {
            state,
            replace_url: None,
            skipped: true,
        }
    }

    pub(crate) fn replacing(mut self, url: Url) -> Self {
        self.replace_url = Some(url);
        self
    }
}
