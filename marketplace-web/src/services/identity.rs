use marketplace_client::config::BackendSettings;
use marketplace_client::services::{GoTrueClient, IdentityProvider};
use reqwest::Client;
use std::sync::Arc;

/// Hands out an identity provider for one request.
///
/// A provider carries its own auth-event feed, so each browser session
/// gets a fresh one instead of hearing other users' sign-ins.
pub trait IdentityProviderFactory: Send + Sync {
    fn provider(&self) -> Arc<dyn IdentityProvider>;
}

pub struct GoTrueFactory {
    client: Client,
    settings: BackendSettings,
}

impl GoTrueFactory {
    pub fn new(client: Client, settings: BackendSettings) -> Self {
        Self { client, settings }
    }
}

impl IdentityProviderFactory for GoTrueFactory {
    fn provider(&self) -> Arc<dyn IdentityProvider> {
        Arc::new(GoTrueClient::new(self.client.clone(), &self.settings))
    }
}
