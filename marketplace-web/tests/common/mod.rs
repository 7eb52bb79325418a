//! Common test utilities for router integration tests.
#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request, Response},
    Router,
};
use http_body_util::BodyExt;
use marketplace_client::config::{AuthSettings, BackendSettings};
use marketplace_client::services::{
    DocumentOcr, IdentityProvider, MockIdentityProvider, MockProfileStore, ObjectStorageClient,
};
use marketplace_client::AppRole;
use marketplace_web::config::ServerSettings;
use marketplace_web::services::{IdentityProviderFactory, SessionGrantLedgers};
use marketplace_web::startup::build_router;
use marketplace_web::AppState;
use secrecy::Secret;
use std::sync::{Arc, Mutex};
use tower::util::ServiceExt;
use url::Url;

pub const TEST_USER_ID: &str = "user-1";

/// Hands every request the same mock provider.
struct SharedProvider(Arc<MockIdentityProvider>);

impl IdentityProviderFactory for SharedProvider {
    fn provider(&self) -> Arc<dyn IdentityProvider> {
        self.0.clone()
    }
}

/// Router over in-memory backends, with a browser-like cookie jar.
pub struct TestApp {
    pub router: Router,
    pub provider: Arc<MockIdentityProvider>,
    pub profiles: Arc<MockProfileStore>,
    cookie: Mutex<Option<String>>,
}

pub struct TestAppBuilder {
    role: AppRole,
    backend_url: String,
    auth: AuthSettings,
    ocr: Option<Arc<dyn DocumentOcr>>,
}

impl TestAppBuilder {
    pub fn backend_url(mut self, url: impl Into<String>) -> Self {
        self.backend_url = url.into();
        self
    }

    pub fn auth_settings(mut self, auth: AuthSettings) -> Self {
        self.auth = auth;
        self
    }

    pub fn ocr(mut self, ocr: Arc<dyn DocumentOcr>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    pub fn build(self) -> TestApp {
        let provider = Arc::new(MockIdentityProvider::new(TEST_USER_ID));
        let profiles = Arc::new(MockProfileStore::new());
        let backend = BackendSettings {
            url: self.backend_url,
            anon_key: Secret::new("test-anon-key".to_string()),
            request_timeout_secs: 5,
        };

        let server = ServerSettings {
            host: "127.0.0.1".to_string(),
            port: 0,
            secure_cookies: false,
            session_idle_hours: 1,
        };

        let state = AppState {
            role: self.role,
            site_url: Url::parse("http://localhost:3000").expect("Invalid site URL"),
            auth_settings: self.auth,
            oauth_providers: Arc::new(vec!["google".to_string(), "kakao".to_string()]),
            document_bucket: "documents".to_string(),
            identity: Arc::new(SharedProvider(provider.clone())),
            grants: Arc::new(SessionGrantLedgers::new(server.session_idle())),
            profiles: profiles.clone(),
            objects: ObjectStorageClient::new(reqwest::Client::new(), &backend),
            ocr: self.ocr,
        };

        TestApp {
            router: build_router(state, &server),
            provider,
            profiles,
            cookie: Mutex::new(None),
        }
    }
}

impl TestApp {
    pub fn builder(role: AppRole) -> TestAppBuilder {
        TestAppBuilder {
            role,
            // Nothing listens here; tests that upload pass a mock server.
            backend_url: "http://127.0.0.1:9".to_string(),
            auth: AuthSettings::default(),
            ocr: None,
        }
    }

    pub fn new(role: AppRole) -> Self {
        Self::builder(role).build()
    }

    /// Send a request with the current session cookie and keep any cookie
    /// the response sets.
    pub async fn send(&self, mut request: Request<Body>) -> Response<Body> {
        if let Some(cookie) = self.cookie.lock().expect("cookie jar poisoned").clone() {
            request.headers_mut().insert(
                header::COOKIE,
                cookie.parse().expect("Invalid cookie header"),
            );
        }

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to execute request");

        if let Some(set_cookie) = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
        {
            let pair = set_cookie.split(';').next().unwrap_or_default().to_string();
            let mut jar = self.cookie.lock().expect("cookie jar poisoned");
            if set_cookie.contains("Max-Age=0") {
                *jar = None;
            } else {
                *jar = Some(pair);
            }
        }
        response
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(
            Request::builder()
                .uri(uri)
                .body(Body::empty())
                .expect("Failed to build request"),
        )
        .await
    }

    pub async fn post_form(&self, uri: &str, pairs: &[(&str, &str)]) -> Response<Body> {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form(pairs)))
                .expect("Failed to build request"),
        )
        .await
    }

    /// Sign in with a password, as the login form does.
    pub async fn sign_in(&self) {
        let response = self
            .post_form(
                "/login",
                &[("email", "user-1@example.com"), ("password", "correct horse")],
            )
            .await;
        assert_eq!(hx_redirect(&response), Some("/"));
    }

    pub fn has_cookie(&self) -> bool {
        self.cookie.lock().expect("cookie jar poisoned").is_some()
    }
}

pub fn form(pairs: &[(&str, &str)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

pub fn location(response: &Response<Body>) -> Option<&str> {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
}

pub fn hx_redirect(response: &Response<Body>) -> Option<&str> {
    response
        .headers()
        .get("HX-Redirect")
        .and_then(|v| v.to_str().ok())
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("Body is not UTF-8")
}
