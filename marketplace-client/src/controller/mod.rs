//! Auth session state machine.
//!
//! `Idle -> DetectingGrant -> ExchangingGrant -> ReconcilingProfile ->
//! Ready(outcome) | Error(kind)`. Every input, whether a page load, a
//! provider event or the user's reset, goes through [`dispatch`], which owns
//! the whole transition table.
//!
//! Long-lived hosts call [`subscribe`] to follow the provider's session
//! feed. Server-rendered hosts build a controller per request and never
//! subscribe: every page load restores the stored session, refreshing it
//! once expired, and the request's [`GrantLedger`] is shared through the
//! browser session instead.
//!
//! [`dispatch`]: AuthSessionController::dispatch
//! [`subscribe`]: AuthSessionController::subscribe

mod ledger;
mod state;
mod subscription;

pub use ledger::GrantLedger;
pub use state::{AuthInput, AuthState, Outcome, Transition};
pub use subscription::Subscription;

use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use url::Url;

use crate::config::AuthSettings;
use crate::error::{AuthError, ProviderError};
use crate::models::{
    scrub_auth_params, AppRole, Detected, GrantKind, PendingGrant, ProfilePolicy, RedirectParams,
    Session, TokenPair,
};
use crate::services::{AuthEvent, AuthStorage, IdentityProvider, ProfileStore, SignUpOutcome};
use crate::utils::pkce::PkcePair;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn sign_in_in_progress() -> AuthError {
    AuthError::Provider(ProviderError::Rejected {
        status: 409,
        code: None,
        message: "A sign-in is already in progress".to_string(),
    })
}

pub struct AuthSessionController {
    role: AppRole,
    provider: Arc<dyn IdentityProvider>,
    profiles: Arc<dyn ProfileStore>,
    storage: AuthStorage,
    settings: AuthSettings,
    grants: Arc<GrantLedger>,
    session: Mutex<Option<Session>>,
    state: watch::Sender<AuthState>,
}

impl AuthSessionController {
    pub fn new(
        role: AppRole,
        provider: Arc<dyn IdentityProvider>,
        profiles: Arc<dyn ProfileStore>,
        storage: AuthStorage,
        settings: AuthSettings,
    ) -> Self {
        let (state, _) = watch::channel(AuthState::Idle);
        Self {
            role,
            provider,
            profiles,
            storage,
            settings,
            grants: Arc::default(),
            session: Mutex::new(None),
            state,
        }
    }

    /// Share `grants` with the other controllers serving the same browser
    /// session.
    pub fn with_grant_ledger(mut self, grants: Arc<GrantLedger>) -> Self {
        self.grants = grants;
        self
    }

    pub fn role(&self) -> AppRole {
        self.role
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn session(&self) -> Option<Session> {
        lock(&self.session).clone()
    }

    pub fn grant_in_flight(&self) -> bool {
        self.grants.in_flight()
    }

    /// Forward the provider's session feed into [`dispatch`](Self::dispatch)
    /// until the returned subscription is dropped.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let mut feed = self.provider.on_auth_state_change();
        let controller = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            loop {
                match feed.recv().await {
                    Ok(event) => {
                        let Some(controller) = controller.upgrade() else {
                            break;
                        };
                        controller.dispatch(AuthInput::Event(event)).await;
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Auth event feed lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        Subscription::new(handle)
    }

    /// The single transition entry point.
    #[tracing::instrument(skip(self, input), fields(role = %self.role))]
    pub async fn dispatch(&self, input: AuthInput) -> Transition {
        match input {
            AuthInput::PageLoad(url) => self.load(url).await,
            AuthInput::Event(event) => self.on_event(event).await,
            AuthInput::Reset => self.reset().await,
        }
    }

    fn set_state(&self, state: AuthState) -> AuthState {
        tracing::debug!(state = state.name(), "Auth state changed");
        self.state.send_replace(state.clone());
        state
    }

    fn set_session(&self, session: Option<Session>) {
        *lock(&self.session) = session;
    }

    async fn load(&self, url: Url) -> Transition {
        let grant = match RedirectParams::from_url(&url).detect() {
            Detected::Error(err) => {
                self.set_state(AuthState::DetectingGrant);
                tracing::warn!(code = %err.code, "Provider redirected with an error");
                let state = self.set_state(AuthState::Error(AuthError::Redirect {
                    code: err.code,
                    description: err.description,
                }));
                return Transition::to(state).replacing(scrub_auth_params(&url));
            }
            Detected::Nothing => {
                self.set_state(AuthState::DetectingGrant);
                return Transition::to(self.restore().await);
            }
            Detected::Grant(grant) => grant,
        };

        let Some(guard) = self.grants.begin() else {
            tracing::debug!(grant = grant.kind().as_str(), "Grant already in flight");
            return Transition::skipped(self.state());
        };
        if self.grants.is_consumed(&grant) {
            tracing::debug!(grant = grant.kind().as_str(), "Grant already consumed");
            return Transition::skipped(self.state()).replacing(scrub_auth_params(&url));
        }

        let kind = grant.kind();
        self.set_state(AuthState::DetectingGrant);
        self.set_state(AuthState::ExchangingGrant(kind));
        let exchanged = self.exchange(&grant).await;
        self.grants.mark_consumed(grant);
        let scrubbed = scrub_auth_params(&url);

        let session = match exchanged {
            Ok(session) => session,
            Err(err) => {
                drop(guard);
                tracing::warn!(grant = kind.as_str(), error = %err, "Grant exchange failed");
                let state = self.set_state(AuthState::Error(err));
                return Transition::to(state).replacing(scrubbed);
            }
        };

        // Published before the flag drops so our own SIGNED_IN is recognised.
        self.set_session(Some(session.clone()));
        drop(guard);
        tracing::info!(grant = kind.as_str(), user_id = %session.principal.id, "Grant exchanged");

        if let Err(err) = self.storage.persist_session(&session).await {
            let state = self.set_state(AuthState::Error(err.into()));
            return Transition::to(state).replacing(scrubbed);
        }
        if let Err(err) = self.storage.mark_auth_completed().await {
            tracing::warn!(error = %err, "Could not mark auth completed");
        }

        self.set_state(AuthState::ReconcilingProfile);
        let outcome = self.reconcile(&session).await;
        Transition::to(self.set_state(AuthState::Ready(outcome))).replacing(scrubbed)
    }

    async fn exchange(&self, grant: &PendingGrant) -> Result<Session, AuthError> {
        let kind = grant.kind();
        match grant {
            PendingGrant::Code { code } => {
                let verifier = match self.storage.take_code_verifier().await {
                    Ok(verifier) => verifier,
                    Err(err) => {
                        tracing::warn!(error = %err, "Code verifier unreadable");
                        None
                    }
                };
                self.provider
                    .exchange_code_for_session(code, verifier.as_deref())
                    .await
                    .map_err(|e| AuthError::grant(kind, e))
            }
            PendingGrant::Implicit {
                access_token,
                refresh_token,
                expires_at,
            } => {
                let tokens = TokenPair {
                    access_token: access_token.clone(),
                    refresh_token: refresh_token.clone(),
                    expires_at: *expires_at,
                };
                self.provider
                    .set_session(&tokens)
                    .await
                    .map_err(|e| AuthError::grant(kind, e))
            }
            PendingGrant::TokenHash {
                token_hash,
                otp_type,
            } => {
                // Subscribe first so a session published during verification
                // is not missed.
                let feed = self.provider.on_auth_state_change();
                match self.provider.verify_otp(token_hash, *otp_type).await {
                    Ok(Some(session)) => Ok(session),
                    Ok(None) => self.await_late_session(feed, kind).await,
                    Err(e) => Err(AuthError::grant(kind, e)),
                }
            }
        }
    }

    async fn await_late_session(
        &self,
        mut feed: broadcast::Receiver<AuthEvent>,
        kind: GrantKind,
    ) -> Result<Session, AuthError> {
        let waited = self.settings.otp_session_wait();
        tracing::info!(wait_ms = waited.as_millis() as u64, "Verified without a session, waiting");

        let arrived = tokio::time::timeout(waited, async {
            loop {
                match feed.recv().await {
                    Ok(AuthEvent::SignedIn(session)) => return Some(session),
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .await;

        match arrived {
            Ok(Some(session)) => Ok(session),
            Ok(None) => Err(AuthError::Session(kind)),
            Err(_) => Err(AuthError::Timeout { waited }),
        }
    }

    /// No grant in the URL: pick up whatever session the browser kept.
    async fn restore(&self) -> AuthState {
        let stored = match self.storage.load_session().await {
            Ok(stored) => stored,
            Err(err) => {
                tracing::warn!(error = %err, "Stored session unreadable, signing out");
                self.clear().await;
                None
            }
        };
        let Some(mut session) = stored else {
            self.set_session(None);
            return self.set_state(AuthState::Ready(Outcome::NoSession));
        };

        if session.is_expired(Utc::now()) {
            match self.provider.refresh_session(&session.refresh_token).await {
                Ok(refreshed) => {
                    tracing::info!("Refreshed expired session");
                    session = refreshed;
                    if let Err(err) = self.storage.persist_session(&session).await {
                        tracing::warn!(error = %err, "Could not persist refreshed session");
                    }
                }
                Err(err) => {
                    tracing::info!(error = %err, "Session refresh failed, signing out");
                    self.clear().await;
                    return self.set_state(AuthState::Ready(Outcome::NoSession));
                }
            }
        }

        match self.provider.get_user(&session.access_token).await {
            Ok(principal) => session.principal = principal,
            Err(err) if err.is_unauthorized() => {
                tracing::info!(error = %err, "Stored session rejected, signing out");
                self.clear().await;
                return self.set_state(AuthState::Ready(Outcome::NoSession));
            }
            Err(err) => {
                tracing::warn!(error = %err, "User lookup failed, using stored principal");
            }
        }

        self.set_session(Some(session.clone()));
        self.set_state(AuthState::ReconcilingProfile);
        let outcome = self.reconcile(&session).await;
        self.set_state(AuthState::Ready(outcome))
    }

    /// Find the principal's profile row, applying the app's policy when
    /// there is none. Store failures never fail the sign-in.
    async fn reconcile(&self, session: &Session) -> Outcome {
        let principal = session.principal.clone();
        let policy = self.role.profile_policy();
        if policy == ProfilePolicy::NotRequired {
            return Outcome::ProfileNotRequired { principal };
        }

        let found = self
            .profiles
            .find_by_user(self.role, &principal.id, &session.access_token)
            .await;
        match found {
            Ok(Some(profile)) => Outcome::ProfilePresent { principal, profile },
            Ok(None) if policy == ProfilePolicy::AutoCreatePlaceholder => {
                match self
                    .profiles
                    .create_placeholder(self.role, &principal.id, &session.access_token)
                    .await
                {
                    Ok(profile) => Outcome::ProfilePresent { principal, profile },
                    Err(err) => {
                        tracing::warn!(error = %err, "Placeholder profile not created");
                        Outcome::ProfileMissing {
                            principal,
                            registration_deferred: false,
                        }
                    }
                }
            }
            Ok(None) => Outcome::ProfileMissing {
                registration_deferred: self.registration_deferred(policy).await,
                principal,
            },
            Err(err) => {
                tracing::warn!(error = %err, "Profile lookup failed, treating as missing");
                Outcome::ProfileMissing {
                    registration_deferred: self.registration_deferred(policy).await,
                    principal,
                }
            }
        }
    }

    async fn registration_deferred(&self, policy: ProfilePolicy) -> bool {
        if policy != ProfilePolicy::RequireRegistration {
            return false;
        }
        self.storage.auth_completed().await.unwrap_or_else(|err| {
            tracing::warn!(error = %err, "Auth-completed flag unreadable");
            false
        })
    }

    async fn on_event(&self, event: AuthEvent) -> Transition {
        let current = self.state();
        if matches!(current, AuthState::Error(_)) {
            // Only the user's reset leaves the error page, but a sign-out
            // still has to forget the session.
            if event == AuthEvent::SignedOut {
                self.clear().await;
            }
            tracing::debug!(event = event.name(), "Ignoring event in error state");
            return Transition::skipped(current);
        }

        match event {
            AuthEvent::SignedOut | AuthEvent::TokenRefreshed(None) => {
                tracing::info!(event = event.name(), "Session ended");
                self.clear().await;
                Transition::to(self.set_state(AuthState::Ready(Outcome::NoSession)))
            }
            AuthEvent::TokenRefreshed(Some(session)) => {
                if let Err(err) = self.storage.persist_session(&session).await {
                    tracing::warn!(error = %err, "Could not persist refreshed session");
                }
                self.set_session(Some(session));
                Transition::skipped(current)
            }
            AuthEvent::SignedIn(session) => {
                if self.grant_in_flight() {
                    return Transition::skipped(current);
                }
                let ours = lock(&self.session)
                    .as_ref()
                    .is_some_and(|s| s.access_token == session.access_token);
                if ours {
                    return Transition::skipped(current);
                }
                tracing::info!(user_id = %session.principal.id, "Signed in elsewhere");
                Transition::to(self.adopt(session, !current.has_signed_in_data()).await)
            }
        }
    }

    /// Make `session` current and reconcile its profile.
    async fn adopt(&self, session: Session, show_loading: bool) -> AuthState {
        self.set_session(Some(session.clone()));
        if let Err(err) = self.storage.persist_session(&session).await {
            return self.set_state(AuthState::Error(err.into()));
        }
        if show_loading {
            self.set_state(AuthState::ReconcilingProfile);
        }
        let outcome = self.reconcile(&session).await;
        self.set_state(AuthState::Ready(outcome))
    }

    async fn reset(&self) -> Transition {
        self.grants.forget();
        if let Err(err) = self.storage.clear_tab().await {
            tracing::warn!(error = %err, "Could not clear tab storage");
        }
        Transition::to(self.set_state(AuthState::Idle))
    }

    async fn clear(&self) {
        self.set_session(None);
        if let Err(err) = self.storage.clear_session().await {
            tracing::warn!(error = %err, "Could not clear stored session");
        }
        if let Err(err) = self.storage.clear_tab().await {
            tracing::warn!(error = %err, "Could not clear tab storage");
        }
    }

    /// Start a third-party sign-in: keep a PKCE verifier for the callback
    /// and return the provider URL to send the browser to.
    pub async fn sign_in_with_oauth(
        &self,
        provider: &str,
        redirect_to: &str,
    ) -> Result<Url, AuthError> {
        let pkce = PkcePair::generate();
        self.storage.set_code_verifier(&pkce.verifier).await?;
        self.provider
            .sign_in_with_oauth(provider, redirect_to, &pkce.challenge)
            .map_err(AuthError::Provider)
    }

    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Transition, AuthError> {
        let Some(guard) = self.grants.begin() else {
            return Err(sign_in_in_progress());
        };
        let session = self
            .provider
            .sign_in_with_password(email, password)
            .await
            .map_err(AuthError::Provider)?;
        self.set_session(Some(session.clone()));
        drop(guard);
        Ok(Transition::to(self.adopt(session, true).await))
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        redirect_to: Option<&str>,
    ) -> Result<SignUpOutcome, AuthError> {
        let Some(guard) = self.grants.begin() else {
            return Err(sign_in_in_progress());
        };
        let outcome = self
            .provider
            .sign_up(email, password, redirect_to)
            .await
            .map_err(AuthError::Provider)?;
        if let SignUpOutcome::SignedIn(session) = &outcome {
            self.set_session(Some(session.clone()));
            drop(guard);
            self.adopt(session.clone(), true).await;
        }
        Ok(outcome)
    }

    pub async fn send_magic_link(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), AuthError> {
        self.provider
            .sign_in_with_otp(email, redirect_to)
            .await
            .map_err(AuthError::Provider)
    }

    /// End the session locally even when the provider call fails.
    ///
    /// Works before the first page load too, using the stored session.
    pub async fn sign_out(&self) -> Transition {
        let session = match self.session() {
            Some(session) => Some(session),
            None => self.storage.load_session().await.ok().flatten(),
        };
        if let Some(session) = session {
            if let Err(err) = self.provider.sign_out(&session.access_token).await {
                tracing::warn!(error = %err, "Provider sign-out failed");
            }
        }
        self.dispatch(AuthInput::Event(AuthEvent::SignedOut)).await
    }
}
