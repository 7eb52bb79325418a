use secrecy::Secret;
use serde::Deserialize;
use std::time::Duration;

/// Connection details for the hosted backend (auth, REST and storage).
#[derive(Deserialize, Clone)]
pub struct BackendSettings {
    /// Project URL, e.g. `https://xyz.supabase.co`. Service paths are appended.
    pub url: String,
    /// Public anon key sent as `apikey` on every request.
    pub anon_key: Secret<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl BackendSettings {
    pub fn auth_url(&self) -> String {
        format!("{}/auth/v1", self.url.trim_end_matches('/'))
    }

    pub fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.url.trim_end_matches('/'))
    }

    pub fn storage_url(&self) -> String {
        format!("{}/storage/v1", self.url.trim_end_matches('/'))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_request_timeout_secs() -> u64 {
    15
}

#[derive(Deserialize, Clone, Debug)]
pub struct AuthSettings {
    /// How long to wait for a late session after a token-hash verification
    /// that returned none.
    #[serde(default = "default_otp_session_wait_ms")]
    pub otp_session_wait_ms: u64,
}

impl AuthSettings {
    pub fn otp_session_wait(&self) -> Duration {
        Duration::from_millis(self.otp_session_wait_ms)
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            otp_session_wait_ms: default_otp_session_wait_ms(),
        }
    }
}

fn default_otp_session_wait_ms() -> u64 {
    5_000
}

/// Vision model used to read registration documents.
#[derive(Deserialize, Clone)]
pub struct OcrSettings {
    #[serde(default = "default_ocr_api_base")]
    pub api_base: String,
    pub api_key: Secret<String>,
    #[serde(default = "default_ocr_model")]
    pub model: String,
    #[serde(default = "default_ocr_timeout_secs")]
    pub timeout_secs: u64,
}

impl OcrSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_ocr_api_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_ocr_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_ocr_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_urls_ignore_trailing_slash() {
        let settings = BackendSettings {
            url: "https://project.example.co/".to_string(),
            anon_key: Secret::new("anon".to_string()),
            request_timeout_secs: 15,
        };

        assert_eq!(settings.auth_url(), "https://project.example.co/auth/v1");
        assert_eq!(settings.rest_url(), "https://project.example.co/rest/v1");
        assert_eq!(settings.storage_url(), "https://project.example.co/storage/v1");
    }
}
