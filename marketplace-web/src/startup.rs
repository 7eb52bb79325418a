use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use marketplace_client::services::ocr::MAX_IMAGE_BYTES;
use marketplace_core::middleware::{request_id_middleware, security_headers_middleware};
use time::Duration;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tower_sessions::cookie::SameSite;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};

use crate::config::ServerSettings;
use crate::handlers::{
    app::{health_check, index, reset},
    auth::{
        fragment_handler, login_handler, login_page, logout_handler, magic_link_handler,
        oauth_handler, register_handler, register_page,
    },
    documents::scan_handler,
    registration::{registration_save, registration_start, registration_step, registration_submit},
};
use crate::middleware::{auth_middleware, metrics_middleware};
use crate::{AppState, CALLBACK_PATH};

pub fn build_router(state: AppState, server: &ServerSettings) -> Router {
    // Session setup. Lax, not Strict: the provider's redirect back to the
    // callback is a cross-site navigation and must carry the cookie that
    // holds the PKCE verifier.
    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(server.secure_cookies)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(Duration::hours(
            server.session_idle_hours,
        )));

    let signed_in = Router::new()
        .route("/registration", get(registration_start))
        .route("/registration/submit", post(registration_submit))
        .route(
            "/registration/:step",
            get(registration_step).post(registration_save),
        )
        .route(
            "/documents/scan",
            post(scan_handler).layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES + 64 * 1024)),
        )
        .route_layer(from_fn(auth_middleware));

    Router::new()
        .route("/", get(index))
        .route(CALLBACK_PATH, get(index))
        .route("/auth/fragment", post(fragment_handler))
        .route("/auth/magic-link", post(magic_link_handler))
        .route("/auth/oauth/:provider", get(oauth_handler))
        .route("/auth/reset", get(reset))
        .route("/login", get(login_page).post(login_handler))
        .route("/register", get(register_page).post(register_handler))
        .route("/logout", post(logout_handler))
        .route("/health", get(health_check))
        .route("/metrics", get(crate::handlers::metrics::metrics))
        .merge(signed_in)
        .route_layer(from_fn(metrics_middleware))
        .nest_service("/static", ServeDir::new("marketplace-web/static"))
        .layer(session_layer)
        .layer(from_fn(security_headers_middleware))
        // Add tracing layer
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                // Path only: redirect callbacks carry credentials in the query.
                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    path = %request.uri().path(),
                    version = ?request.version(),
                )
            }),
        )
        // Add tracing middleware for request_id
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}
