use std::time::Duration;
use thiserror::Error;

use crate::models::{AppRole, GrantKind};

/// Failure reported by the hosted backend (identity provider, REST API or
/// object storage).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("{message}")]
    Rejected {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("response carried no session")]
    MissingSession,

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// True when the backend refused the credentials themselves, as opposed
    /// to being unreachable.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ProviderError::Rejected { status, .. } if *status == 401 || *status == 403)
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Network(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Redirect,
    Grant,
    Session,
    Timeout,
    Provider,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Redirect => "redirect",
            ErrorKind::Grant => "grant",
            ErrorKind::Session => "session",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Provider => "provider",
            ErrorKind::Storage => "storage",
        }
    }
}

/// Errors that end the current page load in `AuthState::Error`, plus the
/// sign-in form failures returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("{description}")]
    Redirect { code: String, description: String },

    #[error("The {kind} could not be used: {message}")]
    Grant { kind: GrantKind, message: String },

    #[error("The {0} did not produce a session")]
    Session(GrantKind),

    #[error(
        "No session arrived within {}s of verifying your link. Reload the page or sign in directly.",
        .waited.as_secs()
    )]
    Timeout { waited: Duration },

    #[error("{0}")]
    Provider(ProviderError),

    #[error("Session storage failed: {0}")]
    Storage(#[from] StorageError),
}

impl AuthError {
    pub fn grant(kind: GrantKind, err: ProviderError) -> Self {
        match err {
            ProviderError::MissingSession => AuthError::Session(kind),
            other => AuthError::Grant {
                kind,
                message: other.to_string(),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::Redirect { .. } => ErrorKind::Redirect,
            AuthError::Grant { .. } => ErrorKind::Grant,
            AuthError::Session(_) => ErrorKind::Session,
            AuthError::Timeout { .. } => ErrorKind::Timeout,
            AuthError::Provider(_) => ErrorKind::Provider,
            AuthError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Heading for the error page; the `Display` text is the detail.
    pub fn title(&self) -> &'static str {
        match self {
            AuthError::Redirect { .. } => "Sign-in was cancelled",
            AuthError::Grant { .. } => "Sign-in link could not be used",
            AuthError::Session(_) => "Sign-in did not complete",
            AuthError::Timeout { .. } => "Still waiting for your session",
            AuthError::Provider(_) => "Sign-in failed",
            AuthError::Storage(_) => "Session could not be saved",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileError {
    #[error("profile lookup failed: {0}")]
    Lookup(String),

    #[error("profile create failed: {0}")]
    Create(String),

    #[error("profile save failed: {0}")]
    Save(String),

    #[error("the {0} app has no profile table")]
    NoTable(AppRole),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("storage backend failed: {0}")]
    Backend(String),

    #[error("stored value for '{key}' is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_session_becomes_session_error() {
        let err = AuthError::grant(GrantKind::Implicit, ProviderError::MissingSession);
        assert_eq!(err, AuthError::Session(GrantKind::Implicit));
        assert_eq!(err.kind(), ErrorKind::Session);
    }

    #[test]
    fn grant_error_names_grant_and_message() {
        let err = AuthError::grant(
            GrantKind::Code,
            ProviderError::Rejected {
                status: 400,
                code: Some("flow_state_expired".into()),
                message: "invalid flow state, flow state has expired".into(),
            },
        );
        assert_eq!(
            err.to_string(),
            "The authorization code could not be used: invalid flow state, flow state has expired"
        );
    }

    #[test]
    fn timeout_suggests_reload() {
        let err = AuthError::Timeout {
            waited: Duration::from_secs(5),
        };
        assert!(err.to_string().contains("within 5s"));
        assert!(err.to_string().contains("sign in directly"));
    }
}
