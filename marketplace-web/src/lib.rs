pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;

use axum::http::Uri;
use marketplace_client::config::AuthSettings;
use marketplace_client::services::{
    AuthStorage, DocumentOcr, GeminiVisionOcr, ObjectStorageClient, PostgrestProfileStore,
    ProfileStore, RegistrationError, RegistrationWizard,
};
use marketplace_client::{AppRole, AuthSessionController};
use reqwest::Client;
use services::{
    CookieSessionStorage, GoTrueFactory, IdentityProviderFactory, SessionGrantLedgers,
};
use std::sync::Arc;
use tower_sessions::Session;
use url::Url;

use crate::config::Settings;

pub const CALLBACK_PATH: &str = "/auth/callback";

/// Shared application state: which app this is and the backend clients.
#[derive(Clone)]
pub struct AppState {
    pub role: AppRole,
    pub site_url: Url,
    pub auth_settings: AuthSettings,
    pub oauth_providers: Arc<Vec<String>>,
    pub document_bucket: String,
    pub identity: Arc<dyn IdentityProviderFactory>,
    /// Grant bookkeeping shared by the requests of one browser session.
    pub grants: Arc<SessionGrantLedgers>,
    pub profiles: Arc<dyn ProfileStore>,
    pub objects: ObjectStorageClient,
    /// `None` when document scanning is not configured.
    pub ocr: Option<Arc<dyn DocumentOcr>>,
}

impl AppState {
    /// Build the backend and OCR clients described by `settings`.
    pub fn from_settings(settings: &Settings) -> Result<Self, reqwest::Error> {
        let backend_client = Client::builder()
            .timeout(settings.backend.request_timeout())
            .build()?;
        // The OCR call is bounded by its own, longer timeout.
        let ocr = settings.ocr.as_ref().map(|ocr| {
            Arc::new(GeminiVisionOcr::new(Client::new(), ocr)) as Arc<dyn DocumentOcr>
        });

        Ok(Self {
            role: settings.application.role,
            site_url: settings.application.site_url.clone(),
            auth_settings: settings.auth.clone(),
            oauth_providers: Arc::new(settings.application.oauth_providers.clone()),
            document_bucket: settings.application.document_bucket.clone(),
            identity: Arc::new(GoTrueFactory::new(
                backend_client.clone(),
                settings.backend.clone(),
            )),
            grants: Arc::new(SessionGrantLedgers::new(settings.server.session_idle())),
            profiles: Arc::new(PostgrestProfileStore::new(
                backend_client.clone(),
                &settings.backend,
            )),
            objects: ObjectStorageClient::new(backend_client, &settings.backend),
            ocr,
        })
    }

    pub fn app_name(&self) -> &'static str {
        match self.role {
            AppRole::Admin => "Marketplace Admin",
            AppRole::Organizer => "Organizer Console",
            AppRole::Exhibitor => "Exhibitor Store",
        }
    }

    pub fn storage(&self, session: Session) -> AuthStorage {
        AuthStorage::new(Arc::new(CookieSessionStorage::new(session)))
    }

    /// Controller for one request, reading and writing the caller's cookie
    /// session and sharing its grant ledger.
    pub fn controller(&self, session: Session) -> AuthSessionController {
        let grants = self.grants.for_session(&session);
        AuthSessionController::new(
            self.role,
            self.identity.provider(),
            self.profiles.clone(),
            self.storage(session),
            self.auth_settings.clone(),
        )
        .with_grant_ledger(grants)
    }

    pub fn wizard(&self, session: Session) -> Result<RegistrationWizard, RegistrationError> {
        RegistrationWizard::new(self.role, self.storage(session), self.profiles.clone())
    }

    /// Where the identity provider sends the browser back to.
    pub fn callback_url(&self) -> String {
        self.absolute(CALLBACK_PATH).to_string()
    }

    /// The address the browser loaded, rebuilt on the public origin.
    pub fn page_url(&self, uri: &Uri) -> Url {
        let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
        self.absolute(path_and_query)
    }

    fn absolute(&self, path: &str) -> Url {
        self.site_url
            .join(path)
            .unwrap_or_else(|_| self.site_url.clone())
    }
}

/// Path and query of `url`, for a same-origin redirect.
pub fn local_path(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_path_keeps_query_only() {
        let url = Url::parse("http://localhost:3000/events?page=2#top").unwrap();
        assert_eq!(local_path(&url), "/events?page=2");

        let url = Url::parse("http://localhost:3000/").unwrap();
        assert_eq!(local_path(&url), "/");
    }
}
