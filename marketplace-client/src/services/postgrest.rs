//! Profile rows over the backend's PostgREST API.

use async_trait::async_trait;
use marketplace_core::observability::{TracedClientExt, TracedRequest};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};

use super::profile_store::ProfileStore;
use crate::config::BackendSettings;
use crate::error::ProfileError;
use crate::models::{AppRole, ProfileRecord};

const CONFLICT_COLUMN: &str = "user_id";

#[derive(Clone)]
pub struct PostgrestProfileStore {
    client: Client,
    rest_url: String,
    anon_key: Secret<String>,
}

impl PostgrestProfileStore {
    pub fn new(client: Client, settings: &BackendSettings) -> Self {
        Self {
            client,
            rest_url: settings.rest_url(),
            anon_key: settings.anon_key.clone(),
        }
    }

    fn table_url(&self, role: AppRole) -> Result<String, ProfileError> {
        let table = role.profile_table().ok_or(ProfileError::NoTable(role))?;
        Ok(format!("{}/{}", self.rest_url, table))
    }

    fn authorized(&self, request: TracedRequest, access_token: &str) -> TracedRequest {
        request
            .header("apikey", self.anon_key.expose_secret())
            .bearer_auth(access_token)
    }

    /// POST with `on_conflict=user_id`; `resolution` picks between keeping
    /// and overwriting an existing row.
    async fn upsert_rows(
        &self,
        role: AppRole,
        record: &ProfileRecord,
        resolution: &str,
        access_token: &str,
    ) -> Result<Vec<ProfileRecord>, String> {
        let url = self.table_url(role).map_err(|e| e.to_string())?;
        let request = self
            .client
            .traced_post(&url)
            .query(&[("on_conflict", CONFLICT_COLUMN)])
            .header(
                "Prefer",
                &format!("resolution={},return=representation", resolution),
            )
            .json(&[record]);

        let response = self
            .authorized(request, access_token)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        read_rows(response).await
    }
}

async fn read_rows(response: reqwest::Response) -> Result<Vec<ProfileRecord>, String> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(format!("{}: {}", status, body));
    }
    response
        .json::<Vec<ProfileRecord>>()
        .await
        .map_err(|e| format!("unreadable rows: {}", e))
}

#[async_trait]
impl ProfileStore for PostgrestProfileStore {
    #[tracing::instrument(skip(self, access_token))]
    async fn find_by_user(
        &self,
        role: AppRole,
        user_id: &str,
        access_token: &str,
    ) -> Result<Option<ProfileRecord>, ProfileError> {
        let url = self.table_url(role)?;
        let filter = format!("eq.{}", user_id);
        let request = self.client.traced_get(&url).query(&[
            (CONFLICT_COLUMN, filter.as_str()),
            ("select", "*"),
            ("limit", "1"),
        ]);

        let response = self
            .authorized(request, access_token)
            .send()
            .await
            .map_err(|e| ProfileError::Lookup(e.to_string()))?;
        let rows = read_rows(response).await.map_err(ProfileError::Lookup)?;
        Ok(rows.into_iter().next())
    }

    #[tracing::instrument(skip(self, access_token))]
    async fn create_placeholder(
        &self,
        role: AppRole,
        user_id: &str,
        access_token: &str,
    ) -> Result<ProfileRecord, ProfileError> {
        let placeholder = ProfileRecord::placeholder(user_id);
        let rows = self
            .upsert_rows(role, &placeholder, "ignore-duplicates", access_token)
            .await
            .map_err(ProfileError::Create)?;

        if let Some(row) = rows.into_iter().next() {
            tracing::info!(role = %role, "Created placeholder profile");
            return Ok(row);
        }

        // An ignored duplicate returns no rows; the existing row wins.
        self.find_by_user(role, user_id, access_token)
            .await?
            .ok_or_else(|| ProfileError::Create("row not visible after upsert".to_string()))
    }

    #[tracing::instrument(skip(self, record, access_token), fields(user_id = %record.user_id))]
    async fn upsert(
        &self,
        role: AppRole,
        record: &ProfileRecord,
        access_token: &str,
    ) -> Result<ProfileRecord, ProfileError> {
        let rows = self
            .upsert_rows(role, record, "merge-duplicates", access_token)
            .await
            .map_err(ProfileError::Save)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| ProfileError::Save("upsert returned no row".to_string()))
    }

    #[tracing::instrument(skip(self, record, access_token), fields(user_id = %record.user_id))]
    async fn update(
        &self,
        role: AppRole,
        record: &ProfileRecord,
        access_token: &str,
    ) -> Result<ProfileRecord, ProfileError> {
        let url = self.table_url(role)?;
        let filter = format!("eq.{}", record.user_id);
        let request = self
            .client
            .traced_patch(&url)
            .query(&[(CONFLICT_COLUMN, filter.as_str())])
            .header("Prefer", "return=representation")
            .json(record);

        let response = self
            .authorized(request, access_token)
            .send()
            .await
            .map_err(|e| ProfileError::Save(e.to_string()))?;
        let rows = read_rows(response).await.map_err(ProfileError::Save)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| ProfileError::Save("no profile row to update".to_string()))
    }
}
