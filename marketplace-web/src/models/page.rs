use marketplace_client::AuthError;
use serde::{Deserialize, Serialize};
use tower_sessions::Session;

const FLASH_ERROR_KEY: &str = "flash.auth_error";

/// An auth error as shown on the error page.
///
/// Carried across the redirect that cleans the address bar, then shown
/// once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorView {
    pub title: String,
    pub message: String,
    pub kind: String,
}

impl From<&AuthError> for ErrorView {
    fn from(err: &AuthError) -> Self {
        Self {
            title: err.title().to_string(),
            message: err.to_string(),
            kind: err.kind().as_str().to_string(),
        }
    }
}

impl ErrorView {
    pub async fn stash(&self, session: &Session) {
        if let Err(err) = session.insert(FLASH_ERROR_KEY, self).await {
            tracing::warn!(error = %err, "Could not keep auth error for the next page");
        }
    }

    pub async fn take(session: &Session) -> Option<Self> {
        // Peek first: `remove` marks the session modified, and an untouched
        // session is not written back over a concurrent sign-in.
        match session.get::<ErrorView>(FLASH_ERROR_KEY).await {
            Ok(None) => None,
            Ok(Some(_)) => session
                .remove::<ErrorView>(FLASH_ERROR_KEY)
                .await
                .unwrap_or_else(|err| {
                    tracing::warn!(error = %err, "Could not clear stashed auth error");
                    None
                }),
            Err(err) => {
                tracing::warn!(error = %err, "Could not read stashed auth error");
                None
            }
        }
    }
}

/// One input on a registration step.
#[derive(Debug, Clone)]
pub struct StepField {
    pub name: &'static str,
    pub label: &'static str,
    /// HTML input type; `textarea` renders a text area.
    pub input_type: &'static str,
    pub value: String,
    pub required: bool,
    pub error: Option<String>,
}

impl StepField {
    pub fn new(name: &'static str, label: &'static str, input_type: &'static str) -> Self {
        Self {
            name,
            label,
            input_type,
            value: String::new(),
            required: true,
            error: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    pub fn is_checked(&self) -> bool {
        self.value == "true"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketplace_client::models::GrantKind;
    use std::sync::Arc;
    use tower_sessions::MemoryStore;

    #[tokio::test]
    async fn stashed_error_is_shown_once() {
        let session = Session::new(None, Arc::new(MemoryStore::default()), None);
        let view = ErrorView::from(&AuthError::Session(GrantKind::Code));

        view.stash(&session).await;

        assert_eq!(ErrorView::take(&session).await, Some(view));
        assert_eq!(ErrorView::take(&session).await, None);
    }

    #[test]
    fn view_carries_title_and_detail() {
        let view = ErrorView::from(&AuthError::Redirect {
            code: "access_denied".into(),
            description: "User denied access".into(),
        });
        assert_eq!(view.title, "Sign-in was cancelled");
        assert_eq!(view.message, "User denied access");
        assert_eq!(view.kind, "redirect");
    }
}
