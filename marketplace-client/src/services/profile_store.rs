use async_trait::async_trait;

use crate::error::ProfileError;
use crate::models::{AppRole, ProfileRecord};

/// Role-specific profile rows, unique on `user_id`.
///
/// Every call carries the caller's access token so row-level security
/// applies on the backend.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn find_by_user(
        &self,
        role: AppRole,
        user_id: &str,
        access_token: &str,
    ) -> Result<Option<ProfileRecord>, ProfileError>;

    /// Insert an all-null row unless one exists, and return the stored row.
    /// Safe to call concurrently for the same user.
    async fn create_placeholder(
        &self,
        role: AppRole,
        user_id: &str,
        access_token: &str,
    ) -> Result<ProfileRecord, ProfileError>;

    /// Insert or overwrite the row for `record.user_id`.
    async fn upsert(
        &self,
        role: AppRole,
        record: &ProfileRecord,
        access_token: &str,
    ) -> Result<ProfileRecord, ProfileError>;

    /// Overwrite the existing row for `record.user_id`; fails when there is
    /// none.
    async fn update(
        &self,
        role: AppRole,
        record: &ProfileRecord,
        access_token: &str,
    ) -> Result<ProfileRecord, ProfileError>;
}
