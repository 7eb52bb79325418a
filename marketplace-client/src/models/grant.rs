//! Redirect URL parsing: which credential, if any, the identity provider
//! handed back to us, and how to remove it from the address bar afterwards.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Every parameter the provider may append to a redirect. All of them are
/// removed once the redirect has been handled; anything else is kept.
pub const AUTH_PARAMS: &[&str] = &[
    "code",
    "error",
    "error_code",
    "error_description",
    "access_token",
    "refresh_token",
    "expires_in",
    "expires_at",
    "token_type",
    "provider_token",
    "provider_refresh_token",
    "token_hash",
    "type",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantKind {
    Code,
    Implicit,
    TokenHash,
}

impl GrantKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantKind::Code => "code",
            GrantKind::Implicit => "access_token",
            GrantKind::TokenHash => "token_hash",
        }
    }
}

impl fmt::Display for GrantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GrantKind::Code => "authorization code",
            GrantKind::Implicit => "access token",
            GrantKind::TokenHash => "email link",
        };
        f.write_str(label)
    }
}

/// One-time token flavours accepted by `verify_otp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpType {
    #[default]
    Signup,
    Magiclink,
    Recovery,
    Invite,
    EmailChange,
    Email,
}

impl OtpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpType::Signup => "signup",
            OtpType::Magiclink => "magiclink",
            OtpType::Recovery => "recovery",
            OtpType::Invite => "invite",
            OtpType::EmailChange => "email_change",
            OtpType::Email => "email",
        }
    }
}

impl FromStr for OtpType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signup" => Ok(OtpType::Signup),
            "magiclink" => Ok(OtpType::Magiclink),
            "recovery" => Ok(OtpType::Recovery),
            "invite" => Ok(OtpType::Invite),
            "email_change" => Ok(OtpType::EmailChange),
            "email" => Ok(OtpType::Email),
            other => Err(format!("unknown otp type '{}'", other)),
        }
    }
}

/// A single-use credential delivered through the redirect URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingGrant {
    Code {
        code: String,
    },
    Implicit {
        access_token: String,
        refresh_token: String,
        expires_at: Option<DateTime<Utc>>,
    },
    TokenHash {
        token_hash: String,
        otp_type: OtpType,
    },
}

impl PendingGrant {
    pub fn kind(&self) -> GrantKind {
        match self {
            PendingGrant::Code { .. } => GrantKind::Code,
            PendingGrant::Implicit { .. } => GrantKind::Implicit,
            PendingGrant::TokenHash { .. } => GrantKind::TokenHash,
        }
    }
}

/// `error` / `error_description` pair sent back instead of a grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectError {
    pub code: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detected {
    Error(RedirectError),
    Grant(PendingGrant),
    Nothing,
}

/// Decoded query and fragment parameters of a page URL.
#[derive(Debug, Clone, Default)]
pub struct RedirectParams {
    query: Vec<(String, String)>,
    fragment: Vec<(String, String)>,
}

impl RedirectParams {
    pub fn from_url(url: &Url) -> Self {
        let query = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let fragment = url.fragment().map(parse_fragment).unwrap_or_default();

        Self { query, fragment }
    }

    /// Query first, then fragment; empty values count as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .chain(self.fragment.iter())
            .find(|(k, v)| k == key && !v.is_empty())
            .map(|(_, v)| v.as_str())
    }

    /// Classify the redirect. Errors win over grants; grants are checked in
    /// the fixed order code, implicit tokens, token hash.
    pub fn detect(&self) -> Detected {
        if let Some(code) = self.get("error") {
            let description = self
                .get("error_description")
                .unwrap_or(code)
                .to_string();
            return Detected::Error(RedirectError {
                code: code.to_string(),
                description,
            });
        }

        if let Some(code) = self.get("code") {
            return Detected::Grant(PendingGrant::Code {
                code: code.to_string(),
            });
        }

        if let Some(access_token) = self.get("access_token") {
            match self.get("refresh_token") {
                Some(refresh_token) => {
                    return Detected::Grant(PendingGrant::Implicit {
                        access_token: access_token.to_string(),
                        refresh_token: refresh_token.to_string(),
                        expires_at: self.expires_at(),
                    });
                }
                None => tracing::warn!("Redirect carried access_token without refresh_token"),
            }
        }

        if let Some(token_hash) = self.get("token_hash") {
            let otp_type = match self.get("type").map(OtpType::from_str) {
                Some(Ok(otp_type)) => otp_type,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Falling back to signup verification");
                    OtpType::Signup
                }
                None => OtpType::Signup,
            };
            return Detected::Grant(PendingGrant::TokenHash {
                token_hash: token_hash.to_string(),
                otp_type,
            });
        }

        Detected::Nothing
    }

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        if let Some(at) = self.get("expires_at").and_then(|v| v.parse::<i64>().ok()) {
            return Utc.timestamp_opt(at, 0).single();
        }
        self.get("expires_in")
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(Duration::try_seconds)
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
    }
}

/// Fragments that are not form-encoded (client-side routes like `#/events`)
/// yield no parameters.
fn parse_fragment(fragment: &str) -> Vec<(String, String)> {
    if !fragment.contains('=') {
        return Vec::new();
    }
    serde_urlencoded::from_str::<Vec<(String, String)>>(fragment).unwrap_or_default()
}

/// Copy of `url` with every auth parameter removed from query and fragment.
pub fn scrub_auth_params(url: &Url) -> Url {
    let mut scrubbed = url.clone();

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !AUTH_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        scrubbed.set_query(None);
    } else {
        scrubbed.query_pairs_mut().clear().extend_pairs(kept.iter());
    }

    if let Some(fragment) = url.fragment() {
        if fragment.contains('=') {
            let kept: Vec<(String, String)> = parse_fragment(fragment)
                .into_iter()
                .filter(|(k, _)| !AUTH_PARAMS.contains(&k.as_str()))
                .collect();
            if kept.is_empty() {
                scrubbed.set_fragment(None);
            } else {
                let encoded = serde_urlencoded::to_string(&kept).unwrap_or_default();
                scrubbed.set_fragment(Some(&encoded));
            }
        }
    }

    scrubbed
}
