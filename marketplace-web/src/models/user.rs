use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use marketplace_client::services::AuthStorage;
use marketplace_client::{Principal, Session};
use std::sync::Arc;

use crate::services::CookieSessionStorage;

/// What the page header shows about the signed-in principal.
#[derive(Debug, Clone)]
pub struct UserView {
    pub name: String,
    pub email: String,
    pub avatar_url: Option<String>,
}

impl UserView {
    pub fn initials(&self) -> String {
        let initials: String = self
            .name
            .split_whitespace()
            .filter_map(|word| word.chars().next())
            .take(2)
            .collect::<String>()
            .to_uppercase();
        if initials.is_empty() {
            "U".to_string()
        } else {
            initials
        }
    }
}

impl From<&Principal> for UserView {
    fn from(principal: &Principal) -> Self {
        Self {
            name: principal.greeting_name(),
            email: principal.email.clone().unwrap_or_default(),
            avatar_url: principal.avatar_url.clone(),
        }
    }
}

/// Authenticated user context extracted from the stored session.
///
/// The session is not re-validated here; `GET /` does that. Backend calls
/// made with an expired token fail on their own.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub session: Session,
}

impl AuthUser {
    pub fn user_id(&self) -> &str {
        &self.session.principal.id
    }

    pub fn access_token(&self) -> &str {
        &self.session.access_token
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = tower_sessions::Session::from_request_parts(parts, state)
            .await
            .map_err(|_| {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to extract session",
                )
                    .into_response()
            })?;

        let storage = AuthStorage::new(Arc::new(CookieSessionStorage::new(session)));
        match storage.load_session().await {
            Ok(Some(session)) => Ok(AuthUser { session }),
            Ok(None) => Err(Redirect::to("/login").into_response()),
            Err(err) => {
                tracing::warn!(error = %err, "Stored session unreadable");
                Err(Redirect::to("/login").into_response())
            }
        }
    }
}
