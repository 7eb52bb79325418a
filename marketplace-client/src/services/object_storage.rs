//! Uploads to the backend's object storage.

use marketplace_core::observability::TracedClientExt;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};

use crate::config::BackendSettings;
use crate::error::ProviderError;

#[derive(Clone)]
pub struct ObjectStorageClient {
    client: Client,
    storage_url: String,
    anon_key: Secret<String>,
}

impl ObjectStorageClient {
    pub fn new(client: Client, settings: &BackendSettings) -> Self {
        Self {
            client,
            storage_url: settings.storage_url(),
            anon_key: settings.anon_key.clone(),
        }
    }

    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/object/public/{}/{}",
            self.storage_url,
            bucket,
            path.trim_start_matches('/')
        )
    }

    /// Store `bytes` at `bucket/path`, replacing any existing object, and
    /// return its public URL.
    #[tracing::instrument(skip(self, bytes, access_token), fields(bytes = bytes.len()))]
    pub async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        access_token: &str,
    ) -> Result<String, ProviderError> {
        let url = format!(
            "{}/object/{}/{}",
            self.storage_url,
            bucket,
            path.trim_start_matches('/')
        );

        let response = self
            .client
            .traced_post(&url)
            .header("apikey", self.anon_key.expose_secret())
            .header("content-type", content_type)
            .header("x-upsert", "true")
            .bearer_auth(access_token)
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                code: None,
                message: if message.is_empty() {
                    format!("upload failed with {}", status)
                } else {
                    message
                },
            });
        }

        tracing::info!(bucket, path, "Uploaded object");
        Ok(self.public_url(bucket, path))
    }
}
