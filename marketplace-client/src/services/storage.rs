//! Browser-side storage: a persistent slot that survives reloads and a
//! per-tab slot that does not.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::StorageError;
use crate::models::{AppRole, RegistrationDraft, Session};

const SESSION_KEY: &str = "auth.session";
const CODE_VERIFIER_KEY: &str = "auth.code_verifier";
const AUTH_COMPLETED_KEY: &str = "auth.completed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageScope {
    Persistent,
    Tab,
}

/// Raw string key/value storage, scoped like `localStorage` and
/// `sessionStorage`.
#[async_trait]
pub trait BrowserStorage: Send + Sync {
    async fn get_item(&self, scope: StorageScope, key: &str)
        -> Result<Option<String>, StorageError>;
    async fn set_item(
        &self,
        scope: StorageScope,
        key: &str,
        value: String,
    ) -> Result<(), StorageError>;
    async fn remove_item(&self, scope: StorageScope, key: &str) -> Result<(), StorageError>;
    async fn clear(&self, scope: StorageScope) -> Result<(), StorageError>;
}

/// In-process storage for tests and non-browser hosts.
#[derive(Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<(StorageScope, String), String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<(StorageScope, String), String>>, StorageError>
    {
        self.items
            .lock()
            .map_err(|e| StorageError::Backend(format!("memory storage mutex poisoned: {}", e)))
    }
}

#[async_trait]
impl BrowserStorage for MemoryStorage {
    async fn get_item(
        &self,
        scope: StorageScope,
        key: &str,
    ) -> Result<Option<String>, StorageError> {
        Ok(self.items()?.get(&(scope, key.to_string())).cloned())
    }

    async fn set_item(
        &self,
        scope: StorageScope,
        key: &str,
        value: String,
    ) -> Result<(), StorageError> {
        self.items()?.insert((scope, key.to_string()), value);
        Ok(())
    }

    async fn remove_item(&self, scope: StorageScope, key: &str) -> Result<(), StorageError> {
        self.items()?.remove(&(scope, key.to_string()));
        Ok(())
    }

    async fn clear(&self, scope: StorageScope) -> Result<(), StorageError> {
        self.items()?.retain(|(s, _), _| *s != scope);
        Ok(())
    }
}

/// Typed view over [`BrowserStorage`] for everything the auth flow and the
/// registration wizard keep in the browser.
#[derive(Clone)]
pub struct AuthStorage {
    inner: Arc<dyn BrowserStorage>,
}

impl AuthStorage {
    pub fn new(inner: Arc<dyn BrowserStorage>) -> Self {
        Self { inner }
    }

    async fn load<T: DeserializeOwned>(
        &self,
        scope: StorageScope,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        let Some(raw) = self.inner.get_item(scope, key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StorageError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    async fn store<T: Serialize>(
        &self,
        scope: StorageScope,
        key: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        let raw = serde_json::to_string(value).map_err(|e| StorageError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.inner.set_item(scope, key, raw).await
    }

    pub async fn load_session(&self) -> Result<Option<Session>, StorageError> {
        self.load(StorageScope::Persistent, SESSION_KEY).await
    }

    pub async fn persist_session(&self, session: &Session) -> Result<(), StorageError> {
        self.store(StorageScope::Persistent, SESSION_KEY, session)
            .await
    }

    pub async fn clear_session(&self) -> Result<(), StorageError> {
        self.inner
            .remove_item(StorageScope::Persistent, SESSION_KEY)
            .await?;
        self.inner
            .remove_item(StorageScope::Persistent, CODE_VERIFIER_KEY)
            .await
    }

    pub async fn set_code_verifier(&self, verifier: &str) -> Result<(), StorageError> {
        self.inner
            .set_item(
                StorageScope::Persistent,
                CODE_VERIFIER_KEY,
                verifier.to_string(),
            )
            .await
    }

    /// Read and forget the PKCE verifier; it is good for one exchange only.
    pub async fn take_code_verifier(&self) -> Result<Option<String>, StorageError> {
        let verifier = self
            .inner
            .get_item(StorageScope::Persistent, CODE_VERIFIER_KEY)
            .await?;
        if verifier.is_some() {
            self.inner
                .remove_item(StorageScope::Persistent, CODE_VERIFIER_KEY)
                .await?;
        }
        Ok(verifier)
    }

    pub async fn auth_completed(&self) -> Result<bool, StorageError> {
        Ok(self
            .inner
            .get_item(StorageScope::Tab, AUTH_COMPLETED_KEY)
            .await?
            .as_deref()
            == Some("true"))
    }

    pub async fn mark_auth_completed(&self) -> Result<(), StorageError> {
        self.inner
            .set_item(StorageScope::Tab, AUTH_COMPLETED_KEY, "true".to_string())
            .await
    }

    pub async fn clear_tab(&self) -> Result<(), StorageError> {
        self.inner.clear(StorageScope::Tab).await
    }

    fn draft_key(role: AppRole, user_id: &str) -> String {
        format!("registration.draft.{}.{}", role, user_id)
    }

    pub async fn load_draft(
        &self,
        role: AppRole,
        user_id: &str,
    ) -> Result<Option<RegistrationDraft>, StorageError> {
        self.load(StorageScope::Persistent, &Self::draft_key(role, user_id))
            .await
    }

    pub async fn save_draft(&self, draft: &RegistrationDraft) -> Result<(), StorageError> {
        let key = Self::draft_key(draft.role, &draft.user_id);
        self.store(StorageScope::Persistent, &key, draft).await
    }

    pub async fn remove_draft(&self, role: AppRole, user_id: &str) -> Result<(), StorageError> {
        self.inner
            .remove_item(StorageScope::Persistent, &Self::draft_key(role, user_id))
            .await
    }
}
