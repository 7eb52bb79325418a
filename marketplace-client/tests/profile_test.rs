//! Placeholder profiles under duplicate dispatch.

mod common;

use common::{url, TEST_USER_ID};
use marketplace_client::config::AuthSettings;
use marketplace_client::services::{
    AuthStorage, MemoryStorage, MockIdentityProvider, MockProfileStore, ProfileStore,
};
use marketplace_client::{AppRole, AuthInput, AuthSessionController, AuthState, ProfileRecord};
use std::sync::Arc;

#[tokio::test]
async fn concurrent_placeholder_creates_yield_one_row() {
    let profiles = MockProfileStore::new();

    let (first, second) = tokio::join!(
        profiles.create_placeholder(AppRole::Exhibitor, TEST_USER_ID, "at"),
        profiles.create_placeholder(AppRole::Exhibitor, TEST_USER_ID, "at"),
    );

    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(profiles.rows(AppRole::Exhibitor).len(), 1);
}

#[tokio::test]
async fn placeholder_never_overwrites_existing_row() {
    let profiles = MockProfileStore::new();
    let mut existing = ProfileRecord::placeholder(TEST_USER_ID);
    existing.name = Some("Han River Crafts".to_string());
    profiles.insert(AppRole::Exhibitor, existing.clone());

    let row = profiles
        .create_placeholder(AppRole::Exhibitor, TEST_USER_ID, "at")
        .await
        .unwrap();

    assert_eq!(row, existing);
}

#[tokio::test]
async fn two_tabs_exchanging_grants_create_one_row() {
    let profiles = Arc::new(MockProfileStore::new());
    let tab = || {
        AuthSessionController::new(
            AppRole::Exhibitor,
            Arc::new(MockIdentityProvider::new(TEST_USER_ID)),
            profiles.clone(),
            AuthStorage::new(Arc::new(MemoryStorage::new())),
            AuthSettings::default(),
        )
    };
    let (first_tab, second_tab) = (tab(), tab());

    let (first, second) = tokio::join!(
        first_tab.dispatch(AuthInput::PageLoad(url("http://localhost:3000/?code=one"))),
        second_tab.dispatch(AuthInput::PageLoad(url("http://localhost:3000/?code=two"))),
    );

    assert!(matches!(first.state, AuthState::Ready(_)));
    assert!(matches!(second.state, AuthState::Ready(_)));
    assert_eq!(profiles.rows(AppRole::Exhibitor).len(), 1);
}

#[tokio::test]
async fn admin_has_no_profile_table() {
    let profiles = MockProfileStore::new();
    assert!(profiles
        .find_by_user(AppRole::Admin, TEST_USER_ID, "at")
        .await
        .is_err());
}
