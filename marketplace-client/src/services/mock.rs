//! In-memory stand-ins for the hosted backend, used by tests and local
//! development without a backend project.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use url::Url;

use super::identity::{AuthEvent, IdentityProvider, SignUpOutcome, AUTH_EVENT_CAPACITY};
use super::ocr::{DocumentOcr, OcrError};
use super::profile_store::ProfileStore;
use crate::error::{ProfileError, ProviderError};
use crate::models::{
    AppRole, DocumentImage, DocumentKind, OcrResult, OtpType, Principal, ProfileRecord, Session,
    TokenPair,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Identity provider that issues sessions for a single fixed principal.
pub struct MockIdentityProvider {
    principal: Mutex<Principal>,
    events: broadcast::Sender<AuthEvent>,
    calls: Mutex<HashMap<&'static str, usize>>,
    failures: Mutex<HashMap<&'static str, ProviderError>>,
    delay: Mutex<Option<Duration>>,
    verify_without_session: AtomicBool,
    confirm_sign_up: AtomicBool,
    issued: AtomicUsize,
    last_code_verifier: Mutex<Option<String>>,
}

impl MockIdentityProvider {
    pub fn new(user_id: &str) -> Self {
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        let mut principal = Principal::new(user_id);
        principal.email = Some(format!("{}@example.com", user_id));
        Self {
            principal: Mutex::new(principal),
            events,
            calls: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            delay: Mutex::new(None),
            verify_without_session: AtomicBool::new(false),
            confirm_sign_up: AtomicBool::new(false),
            issued: AtomicUsize::new(0),
            last_code_verifier: Mutex::new(None),
        }
    }

    pub fn principal(&self) -> Principal {
        lock(&self.principal).clone()
    }

    /// Make every later call to `method` fail with `error`.
    pub fn fail(&self, method: &'static str, error: ProviderError) {
        lock(&self.failures).insert(method, error);
    }

    /// Slow down every provider call, to widen race windows in tests.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    /// Accept token hashes without returning a session.
    pub fn verify_returns_no_session(&self) {
        self.verify_without_session.store(true, Ordering::SeqCst);
    }

    /// Answer sign-ups with a pending email confirmation.
    pub fn require_email_confirmation(&self) {
        self.confirm_sign_up.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self, method: &str) -> usize {
        lock(&self.calls).get(method).copied().unwrap_or(0)
    }

    pub fn last_code_verifier(&self) -> Option<String> {
        lock(&self.last_code_verifier).clone()
    }

    /// Publish an event as if the provider had raised it.
    pub fn emit(&self, event: AuthEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// A fresh session for the fixed principal.
    pub fn issue_session(&self) -> Session {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Session {
            access_token: format!("access-{}", n),
            refresh_token: format!("refresh-{}", n),
            expires_at: Utc::now() + ChronoDuration::hours(1),
            principal: self.principal(),
        }
    }

    async fn enter(&self, method: &'static str) -> Result<(), ProviderError> {
        *lock(&self.calls).entry(method).or_insert(0) += 1;
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match lock(&self.failures).get(method) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn signed_in(&self, session: Session) -> Session {
        self.emit(AuthEvent::SignedIn(session.clone()));
        session
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn get_user(&self, _access_token: &str) -> Result<Principal, ProviderError> {
        self.enter("get_user").await?;
        Ok(self.principal())
    }

    async fn exchange_code_for_session(
        &self,
        _code: &str,
        code_verifier: Option<&str>,
    ) -> Result<Session, ProviderError> {
        *lock(&self.last_code_verifier) = code_verifier.map(str::to_string);
        self.enter("exchange_code_for_session").await?;
        let session = self.issue_session();
        Ok(self.signed_in(session))
    }

    async fn set_session(&self, tokens: &TokenPair) -> Result<Session, ProviderError> {
        self.enter("set_session").await?;
        let session = Session {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            expires_at: tokens
                .expires_at
                .unwrap_or_else(|| Utc::now() + ChronoDuration::hours(1)),
            principal: self.principal(),
        };
        Ok(self.signed_in(session))
    }

    async fn verify_otp(
        &self,
        _token_hash: &str,
        _otp_type: OtpType,
    ) -> Result<Option<Session>, ProviderError> {
        self.enter("verify_otp").await?;
        if self.verify_without_session.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let session = self.issue_session();
        Ok(Some(self.signed_in(session)))
    }

    async fn refresh_session(&self, _refresh_token: &str) -> Result<Session, ProviderError> {
        if let Err(e) = self.enter("refresh_session").await {
            self.emit(AuthEvent::TokenRefreshed(None));
            return Err(e);
        }
        let session = self.issue_session();
        self.emit(AuthEvent::TokenRefreshed(Some(session.clone())));
        Ok(session)
    }

    async fn sign_in_with_password(
        &self,
        _email: &str,
        _password: &str,
    ) -> Result<Session, ProviderError> {
        self.enter("sign_in_with_password").await?;
        let session = self.issue_session();
        Ok(self.signed_in(session))
    }

    async fn sign_up(
        &self,
        email: &str,
        _password: &str,
        _redirect_to: Option<&str>,
    ) -> Result<SignUpOutcome, ProviderError> {
        self.enter("sign_up").await?;
        if self.confirm_sign_up.load(Ordering::SeqCst) {
            return Ok(SignUpOutcome::ConfirmationPending {
                email: email.to_string(),
            });
        }
        let session = self.issue_session();
        Ok(SignUpOutcome::SignedIn(self.signed_in(session)))
    }

    fn sign_in_with_oauth(
        &self,
        provider: &str,
        redirect_to: &str,
        code_challenge: &str,
    ) -> Result<Url, ProviderError> {
        *lock(&self.calls).entry("sign_in_with_oauth").or_insert(0) += 1;
        Url::parse_with_params(
            "https://auth.example.com/authorize",
            &[
                ("provider", provider),
                ("redirect_to", redirect_to),
                ("code_challenge", code_challenge),
                ("code_challenge_method", "s256"),
            ],
        )
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    async fn sign_in_with_otp(
        &self,
        _email: &str,
        _redirect_to: Option<&str>,
    ) -> Result<(), ProviderError> {
        self.enter("sign_in_with_otp").await
    }

    async fn sign_out(&self, _access_token: &str) -> Result<(), ProviderError> {
        let result = self.enter("sign_out").await;
        self.emit(AuthEvent::SignedOut);
        result
    }

    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

/// Profile tables held in memory, unique on `(role, user_id)`.
#[derive(Default)]
pub struct MockProfileStore {
    rows: Mutex<HashMap<(AppRole, String), ProfileRecord>>,
    fail_lookup: AtomicBool,
    fail_create: AtomicBool,
    lookups: AtomicUsize,
    creates: AtomicUsize,
}

impl MockProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, role: AppRole, record: ProfileRecord) {
        lock(&self.rows).insert((role, record.user_id.clone()), record);
    }

    pub fn rows(&self, role: AppRole) -> Vec<ProfileRecord> {
        lock(&self.rows)
            .iter()
            .filter(|((r, _), _)| *r == role)
            .map(|(_, record)| record.clone())
            .collect()
    }

    pub fn fail_lookups(&self) {
        self.fail_lookup.store(true, Ordering::SeqCst);
    }

    pub fn fail_creates(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileStore for MockProfileStore {
    async fn find_by_user(
        &self,
        role: AppRole,
        user_id: &str,
        _access_token: &str,
    ) -> Result<Option<ProfileRecord>, ProfileError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        role.profile_table().ok_or(ProfileError::NoTable(role))?;
        if self.fail_lookup.load(Ordering::SeqCst) {
            return Err(ProfileError::Lookup("mock lookup failure".to_string()));
        }
        Ok(lock(&self.rows).get(&(role, user_id.to_string())).cloned())
    }

    async fn create_placeholder(
        &self,
        role: AppRole,
        user_id: &str,
        _access_token: &str,
    ) -> Result<ProfileRecord, ProfileError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        role.profile_table().ok_or(ProfileError::NoTable(role))?;
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ProfileError::Create("mock create failure".to_string()));
        }
        Ok(lock(&self.rows)
            .entry((role, user_id.to_string()))
            .or_insert_with(|| ProfileRecord::placeholder(user_id))
            .clone())
    }

    async fn upsert(
        &self,
        role: AppRole,
        record: &ProfileRecord,
        _access_token: &str,
    ) -> Result<ProfileRecord, ProfileError> {
        role.profile_table().ok_or(ProfileError::NoTable(role))?;
        let stored = ProfileRecord {
            created_at: Some(Utc::now()),
            ..record.clone()
        };
        lock(&self.rows).insert((role, record.user_id.clone()), stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        role: AppRole,
        record: &ProfileRecord,
        _access_token: &str,
    ) -> Result<ProfileRecord, ProfileError> {
        role.profile_table().ok_or(ProfileError::NoTable(role))?;
        let mut rows = lock(&self.rows);
        let row = rows
            .get_mut(&(role, record.user_id.clone()))
            .ok_or_else(|| ProfileError::Save("no profile row to update".to_string()))?;
        *row = ProfileRecord {
            created_at: row.created_at,
            ..record.clone()
        };
        Ok(row.clone())
    }
}

/// OCR that answers with fixed fields for every document.
pub struct MockOcr {
    enabled: bool,
}

impl MockOcr {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

#[async_trait]
impl DocumentOcr for MockOcr {
    async fn extract(
        &self,
        image: &DocumentImage,
        kind: DocumentKind,
    ) -> Result<OcrResult, OcrError> {
        if !self.enabled {
            return Err(OcrError::NotConfigured);
        }
        if image.bytes.is_empty() {
            return Err(OcrError::InvalidImage("image is empty".to_string()));
        }
        let fields: BTreeMap<String, String> = kind
            .fields()
            .iter()
            .map(|field| (field.to_string(), format!("mock {}", field)))
            .collect();
        Ok(OcrResult::Structured { fields })
    }
}
