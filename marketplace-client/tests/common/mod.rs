//! Common test utilities for controller integration tests.
#![allow(dead_code)]

use chrono::{Duration, Utc};
use marketplace_client::config::AuthSettings;
use marketplace_client::services::{
    AuthStorage, MemoryStorage, MockIdentityProvider, MockProfileStore,
};
use marketplace_client::{AppRole, AuthSessionController, AuthState, Session};
use std::sync::Arc;
use url::Url;

pub const TEST_USER_ID: &str = "user-1";

/// Controller wired to in-memory backends, with handles on each of them.
pub struct TestController {
    pub controller: Arc<AuthSessionController>,
    pub provider: Arc<MockIdentityProvider>,
    pub profiles: Arc<MockProfileStore>,
    pub storage: AuthStorage,
}

impl TestController {
    pub fn new(role: AppRole) -> Self {
        Self::with_settings(role, AuthSettings::default())
    }

    pub fn with_settings(role: AppRole, settings: AuthSettings) -> Self {
        let provider = Arc::new(MockIdentityProvider::new(TEST_USER_ID));
        let profiles = Arc::new(MockProfileStore::new());
        let storage = AuthStorage::new(Arc::new(MemoryStorage::new()));
        let controller = Arc::new(AuthSessionController::new(
            role,
            provider.clone(),
            profiles.clone(),
            storage.clone(),
            settings,
        ));

        Self {
            controller,
            provider,
            profiles,
            storage,
        }
    }

    /// Persist a session as if an earlier page load had signed in.
    pub async fn store_session(&self, session: &Session) {
        self.storage
            .persist_session(session)
            .await
            .expect("Failed to store session");
    }

    pub fn exchange_calls(&self) -> usize {
        self.provider.calls("exchange_code_for_session")
            + self.provider.calls("set_session")
            + self.provider.calls("verify_otp")
    }
}

pub fn url(s: &str) -> Url {
    Url::parse(s).expect("Invalid test URL")
}

pub fn session_expiring_in(provider: &MockIdentityProvider, minutes: i64) -> Session {
    let mut session = provider.issue_session();
    session.expires_at = Utc::now() + Duration::minutes(minutes);
    session
}

/// Wait until the controller's published state satisfies `done`.
pub async fn wait_for_state(
    controller: &AuthSessionController,
    done: impl FnMut(&AuthState) -> bool,
) -> AuthState {
    let mut rx = controller.watch();
    let state = tokio::time::timeout(std::time::Duration::from_secs(2), rx.wait_for(done))
        .await
        .expect("Timed out waiting for auth state")
        .expect("State channel closed");
    state.clone()
}
