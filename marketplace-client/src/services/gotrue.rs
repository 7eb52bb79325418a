//! Identity provider client for GoTrue-compatible auth servers.
//!
//! One client is created per browser session so that the auth-state feed
//! only carries that session's events.

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use marketplace_core::observability::{TracedClientExt, TracedRequest};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;
use url::Url;

use super::identity::{AuthEvent, IdentityProvider, SignUpOutcome, AUTH_EVENT_CAPACITY};
use crate::config::BackendSettings;
use crate::error::ProviderError;
use crate::models::{OtpType, Principal, Session, TokenPair};
use crate::utils::jwt::decode_claims;

/// Used when neither the response nor the token says when it expires.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

pub struct GoTrueClient {
    client: Client,
    auth_url: String,
    anon_key: Secret<String>,
    events: broadcast::Sender<AuthEvent>,
}

#[derive(Debug, Deserialize)]
struct GoTrueUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: Map<String, Value>,
}

impl From<GoTrueUser> for Principal {
    fn from(user: GoTrueUser) -> Self {
        let text = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| user.user_metadata.get(*k).and_then(Value::as_str))
                .map(str::to_string)
        };
        Principal {
            display_name: text(&["full_name", "name"]),
            avatar_url: text(&["avatar_url", "picture"]),
            id: user.id,
            email: user.email,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: GoTrueUser,
}

impl From<TokenResponse> for Session {
    fn from(tokens: TokenResponse) -> Self {
        let expires_at = tokens
            .expires_at
            .and_then(|at| Utc.timestamp_opt(at, 0).single())
            .or_else(|| {
                tokens
                    .expires_in
                    .and_then(Duration::try_seconds)
                    .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            })
            .unwrap_or_else(|| Utc::now() + Duration::seconds(DEFAULT_EXPIRES_IN_SECS));
        Session {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at,
            principal: tokens.user.into(),
        }
    }
}

/// GoTrue has used several error shapes over the years.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
    error_code: Option<String>,
}

#[derive(Serialize)]
struct PkceGrant<'a> {
    auth_code: &'a str,
    code_verifier: &'a str,
}

impl GoTrueClient {
    pub fn new(client: Client, settings: &BackendSettings) -> Self {
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            client,
            auth_url: settings.auth_url(),
            anon_key: settings.anon_key.clone(),
            events,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.auth_url, path)
    }

    fn get(&self, path: &str) -> TracedRequest {
        self.client
            .traced_get(&self.url(path))
            .header("apikey", self.anon_key.expose_secret())
    }

    fn post(&self, path: &str) -> TracedRequest {
        self.client
            .traced_post(&self.url(path))
            .header("apikey", self.anon_key.expose_secret())
    }

    fn emit(&self, event: AuthEvent) {
        tracing::debug!(event = event.name(), "Publishing auth event");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ProviderError> {
        let response = Self::check(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
        let message = body
            .error_description
            .or(body.msg)
            .or(body.message)
            .or_else(|| body.error.clone())
            .unwrap_or_else(|| format!("identity provider returned {}", status));

        tracing::warn!(status = %status, message = %message, "Identity provider rejected request");

        Err(ProviderError::Rejected {
            status: status.as_u16(),
            code: body.error_code.or(body.error),
            message,
        })
    }

    async fn token_grant<B: Serialize + ?Sized>(
        &self,
        grant_type: &str,
        body: &B,
    ) -> Result<Session, ProviderError> {
        let response = self
            .post("/token")
            .query(&[("grant_type", grant_type)])
            .json(body)
            .send()
            .await?;
        let value: Value = Self::read(response).await?;
        session_from_value(value)?.ok_or(ProviderError::MissingSession)
    }
}

/// A session when the body carries tokens, `None` when it is a bare user.
fn session_from_value(value: Value) -> Result<Option<Session>, ProviderError> {
    if value.get("access_token").and_then(Value::as_str).is_none() {
        return Ok(None);
    }
    let tokens: TokenResponse = serde_json::from_value(value)
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
    Ok(Some(tokens.into()))
}

#[async_trait]
impl IdentityProvider for GoTrueClient {
    #[tracing::instrument(skip_all)]
    async fn get_user(&self, access_token: &str) -> Result<Principal, ProviderError> {
        let response = self.get("/user").bearer_auth(access_token).send().await?;
        let user: GoTrueUser = Self::read(response).await?;
        Ok(user.into())
    }

    #[tracing::instrument(skip_all)]
    async fn exchange_code_for_session(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<Session, ProviderError> {
        if code_verifier.is_none() {
            tracing::warn!("Exchanging code without a stored PKCE verifier");
        }
        let body = PkceGrant {
            auth_code: code,
            code_verifier: code_verifier.unwrap_or_default(),
        };
        let session = self.token_grant("pkce", &body).await?;
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    #[tracing::instrument(skip_all)]
    async fn set_session(&self, tokens: &TokenPair) -> Result<Session, ProviderError> {
        let principal = self.get_user(&tokens.access_token).await?;
        let expires_at = tokens
            .expires_at
            .or_else(|| {
                decode_claims(&tokens.access_token)
                    .ok()
                    .and_then(|claims| claims.expires_at())
            })
            .unwrap_or_else(|| Utc::now() + Duration::seconds(DEFAULT_EXPIRES_IN_SECS));

        let session = Session {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            expires_at,
            principal,
        };
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    #[tracing::instrument(skip(self, token_hash))]
    async fn verify_otp(
        &self,
        token_hash: &str,
        otp_type: OtpType,
    ) -> Result<Option<Session>, ProviderError> {
        let response = self
            .post("/verify")
            .json(&json!({ "type": otp_type.as_str(), "token_hash": token_hash }))
            .send()
            .await?;
        let value: Value = Self::read(response).await?;
        let session = session_from_value(value)?;
        if let Some(session) = &session {
            self.emit(AuthEvent::SignedIn(session.clone()));
        }
        Ok(session)
    }

    #[tracing::instrument(skip_all)]
    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, ProviderError> {
        match self
            .token_grant("refresh_token", &json!({ "refresh_token": refresh_token }))
            .await
        {
            Ok(session) => {
                self.emit(AuthEvent::TokenRefreshed(Some(session.clone())));
                Ok(session)
            }
            Err(e) => {
                self.emit(AuthEvent::TokenRefreshed(None));
                Err(e)
            }
        }
    }

    #[tracing::instrument(skip(self, password))]
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, ProviderError> {
        let session = self
            .token_grant("password", &json!({ "email": email, "password": password }))
            .await?;
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    #[tracing::instrument(skip(self, password))]
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        redirect_to: Option<&str>,
    ) -> Result<SignUpOutcome, ProviderError> {
        let mut request = self
            .post("/signup")
            .json(&json!({ "email": email, "password": password }));
        if let Some(redirect_to) = redirect_to {
            request = request.query(&[("redirect_to", redirect_to)]);
        }
        let value: Value = Self::read(request.send().await?).await?;

        match session_from_value(value)? {
            Some(session) => {
                self.emit(AuthEvent::SignedIn(session.clone()));
                Ok(SignUpOutcome::SignedIn(session))
            }
            None => Ok(SignUpOutcome::ConfirmationPending {
                email: email.to_string(),
            }),
        }
    }

    fn sign_in_with_oauth(
        &self,
        provider: &str,
        redirect_to: &str,
        code_challenge: &str,
    ) -> Result<Url, ProviderError> {
        Url::parse_with_params(
            &self.url("/authorize"),
            &[
                ("provider", provider),
                ("redirect_to", redirect_to),
                ("code_challenge", code_challenge),
                ("code_challenge_method", "s256"),
            ],
        )
        .map_err(|e| ProviderError::InvalidResponse(format!("authorize url: {}", e)))
    }

    #[tracing::instrument(skip(self))]
    async fn sign_in_with_otp(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), ProviderError> {
        let mut request = self
            .post("/otp")
            .json(&json!({ "email": email, "create_user": true }));
        if let Some(redirect_to) = redirect_to {
            request = request.query(&[("redirect_to", redirect_to)]);
        }
        Self::check(request.send().await?).await?;
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    async fn sign_out(&self, access_token: &str) -> Result<(), ProviderError> {
        let result = match self
            .post("/logout")
            .bearer_auth(access_token)
            .send()
            .await
        {
            Ok(response) => Self::check(response).await.map(|_| ()),
            Err(e) => Err(e.into()),
        };
        // The local session ends regardless of what the server said.
        self.emit(AuthEvent::SignedOut);
        result
    }

    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
