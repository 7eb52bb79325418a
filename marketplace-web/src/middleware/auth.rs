use axum::{
    body::Body,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use marketplace_client::services::AuthStorage;
use std::sync::Arc;
use tower_sessions::Session;

use crate::services::CookieSessionStorage;

/// Send visitors without a stored session to the sign-in page.
pub async fn auth_middleware(session: Session, request: Request<Body>, next: Next) -> Response {
    let storage = AuthStorage::new(Arc::new(CookieSessionStorage::new(session)));
    match storage.load_session().await {
        Ok(Some(_)) => next.run(request).await,
        Ok(None) => Redirect::to("/login").into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "Stored session unreadable");
            Redirect::to("/login").into_response()
        }
    }
}
