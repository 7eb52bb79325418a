//! Browser storage kept in the server-side cookie session.
//!
//! Both scopes live in the same cookie session, each as one map. The tab
//! scope is emptied on sign-out and on "return home", which is as close to
//! `sessionStorage` lifetime as a server can get.

use async_trait::async_trait;
use marketplace_client::services::{BrowserStorage, StorageScope};
use marketplace_client::StorageError;
use std::collections::HashMap;
use tower_sessions::Session;

const PERSISTENT_SLOT: &str = "storage.persistent";
const TAB_SLOT: &str = "storage.tab";

type Items = HashMap<String, String>;

#[derive(Clone)]
pub struct CookieSessionStorage {
    session: Session,
}

impl CookieSessionStorage {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    fn slot(scope: StorageScope) -> &'static str {
        match scope {
            StorageScope::Persistent => PERSISTENT_SLOT,
            StorageScope::Tab => TAB_SLOT,
        }
    }

    async fn items(&self, scope: StorageScope) -> Result<Items, StorageError> {
        self.session
            .get::<Items>(Self::slot(scope))
            .await
            .map(Option::unwrap_or_default)
            .map_err(backend)
    }

    async fn write(&self, scope: StorageScope, items: Items) -> Result<(), StorageError> {
        self.session
            .insert(Self::slot(scope), items)
            .await
            .map_err(backend)
    }
}

fn backend(err: tower_sessions::session::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

#[async_trait]
impl BrowserStorage for CookieSessionStorage {
    async fn get_item(
        &self,
        scope: StorageScope,
        key: &str,
    ) -> Result<Option<String>, StorageError> {
        Ok(self.items(scope).await?.remove(key))
    }

    async fn set_item(
        &self,
        scope: StorageScope,
        key: &str,
        value: String,
    ) -> Result<(), StorageError> {
        let mut items = self.items(scope).await?;
        items.insert(key.to_string(), value);
        self.write(scope, items).await
    }

    async fn remove_item(&self, scope: StorageScope, key: &str) -> Result<(), StorageError> {
        let mut items = self.items(scope).await?;
        if items.remove(key).is_some() {
            self.write(scope, items).await?;
        }
        Ok(())
    }

    async fn clear(&self, scope: StorageScope) -> Result<(), StorageError> {
        self.session
            .remove::<Items>(Self::slot(scope))
            .await
            .map(|_| ())
            .map_err(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketplace_client::services::AuthStorage;
    use std::sync::Arc;
    use tower_sessions::MemoryStore;

    fn storage() -> CookieSessionStorage {
        let store = Arc::new(MemoryStore::default());
        CookieSessionStorage::new(Session::new(None, store, None))
    }

    #[tokio::test]
    async fn scopes_are_separate() {
        let storage = storage();
        storage
            .set_item(StorageScope::Persistent, "k", "persistent".to_string())
            .await
            .unwrap();
        storage
            .set_item(StorageScope::Tab, "k", "tab".to_string())
            .await
            .unwrap();

        storage.clear(StorageScope::Tab).await.unwrap();

        assert_eq!(
            storage.get_item(StorageScope::Persistent, "k").await.unwrap(),
            Some("persistent".to_string())
        );
        assert_eq!(storage.get_item(StorageScope::Tab, "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn auth_completed_flag_round_trips_through_the_session() {
        let auth = AuthStorage::new(Arc::new(storage()));
        assert!(!auth.auth_completed().await.unwrap());

        auth.mark_auth_completed().await.unwrap();
        assert!(auth.auth_completed().await.unwrap());

        auth.clear_tab().await.unwrap();
        assert!(!auth.auth_completed().await.unwrap());
    }

    #[tokio::test]
    async fn removing_a_missing_key_is_fine() {
        let storage = storage();
        storage
            .remove_item(StorageScope::Persistent, "absent")
            .await
            .unwrap();
    }
}
