use marketplace_client::config::{AuthSettings, BackendSettings, OcrSettings};
use marketplace_client::AppRole;
use serde::{Deserialize, Deserializer};
use url::Url;

#[derive(Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub application: ApplicationSettings,
    pub backend: BackendSettings,
    #[serde(default)]
    pub auth: AuthSettings,
    /// Document scanning is switched off when this section is absent.
    #[serde(default)]
    pub ocr: Option<OcrSettings>,
    #[serde(default)]
    pub observability: ObservabilitySettings,
}

#[derive(Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Mark the session cookie `Secure`. Needs HTTPS in front of the server.
    #[serde(default)]
    pub secure_cookies: bool,
    #[serde(default = "default_session_idle_hours")]
    pub session_idle_hours: i64,
}

fn default_session_idle_hours() -> i64 {
    24
}

impl ServerSettings {
    pub fn session_idle(&self) -> std::time::Duration {
        let hours = u64::try_from(self.session_idle_hours).unwrap_or(0);
        std::time::Duration::from_secs(hours.saturating_mul(3600))
    }
}

#[derive(Deserialize, Clone)]
pub struct ApplicationSettings {
    /// Which front end this process serves: `admin`, `organizer` or
    /// `exhibitor` (also accepted as `store`).
    #[serde(deserialize_with = "deserialize_role")]
    pub role: AppRole,
    /// Public origin of this front end. Redirect URLs handed to the identity
    /// provider are built from it.
    pub site_url: Url,
    #[serde(default = "default_document_bucket")]
    pub document_bucket: String,
    #[serde(default = "default_oauth_providers")]
    pub oauth_providers: Vec<String>,
}

fn default_document_bucket() -> String {
    "documents".to_string()
}

fn default_oauth_providers() -> Vec<String> {
    vec!["google".to_string(), "kakao".to_string()]
}

fn deserialize_role<'de, D>(deserializer: D) -> Result<AppRole, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

#[derive(Deserialize, Clone)]
pub struct ObservabilitySettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// OTLP collector; spans are only exported when set.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            otlp_endpoint: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("no current directory: {}", e)))?;

    // Run either from the workspace root or from the crate directory.
    let configuration_directory = if base_path.ends_with("marketplace-web") {
        base_path.join("config")
    } else {
        base_path.join("marketplace-web").join("config")
    };

    let settings = config::Config::builder()
        .add_source(config::File::from(configuration_directory.join("base.yaml")).required(true))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize::<Settings>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_yaml(yaml: &str) -> Result<Settings, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()?
            .try_deserialize()
    }

    const MINIMAL: &str = r#"
server:
  host: "127.0.0.1"
  port: 3000
application:
  role: "store"
  site_url: "http://localhost:3000"
backend:
  url: "http://localhost:54321"
  anon_key: "anon"
"#;

    #[test]
    fn store_role_is_the_exhibitor_app() {
        let settings = from_yaml(MINIMAL).unwrap();
        assert_eq!(settings.application.role, AppRole::Exhibitor);
    }

    #[test]
    fn optional_sections_take_defaults() {
        let settings = from_yaml(MINIMAL).unwrap();
        assert!(settings.ocr.is_none());
        assert_eq!(settings.auth.otp_session_wait_ms, 5_000);
        assert_eq!(settings.application.document_bucket, "documents");
        assert_eq!(settings.application.oauth_providers, vec!["google", "kakao"]);
        assert_eq!(settings.observability.log_level, "info");
        assert_eq!(settings.server.session_idle_hours, 24);
        assert_eq!(settings.server.session_idle(), std::time::Duration::from_secs(24 * 3600));
    }

    #[test]
    fn unknown_role_is_rejected() {
        let yaml = MINIMAL.replace("\"store\"", "\"vendor\"");
        assert!(from_yaml(&yaml).is_err());
    }
}
