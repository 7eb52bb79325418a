use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which of the three front ends is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppRole {
    Admin,
    Organizer,
    Exhibitor,
}

/// What to do when a signed-in principal has no profile row yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfilePolicy {
    /// The app has no profile table.
    NotRequired,
    /// Insert an empty row straight after sign-in.
    AutoCreatePlaceholder,
    /// Leave it to the registration wizard.
    RequireRegistration,
}

impl AppRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppRole::Admin => "admin",
            AppRole::Organizer => "organizer",
            AppRole::Exhibitor => "exhibitor",
        }
    }

    pub fn profile_table(&self) -> Option<&'static str> {
        match self {
            AppRole::Admin => None,
            AppRole::Organizer => Some("organizers"),
            AppRole::Exhibitor => Some("exhibitors"),
        }
    }

    pub fn profile_policy(&self) -> ProfilePolicy {
        match self {
            AppRole::Admin => ProfilePolicy::NotRequired,
            AppRole::Organizer => ProfilePolicy::RequireRegistration,
            AppRole::Exhibitor => ProfilePolicy::AutoCreatePlaceholder,
        }
    }
}

impl fmt::Display for AppRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(AppRole::Admin),
            "organizer" => Ok(AppRole::Organizer),
            // The exhibitor app ships as "store".
            "exhibitor" | "store" => Ok(AppRole::Exhibitor),
            other => Err(format!("unknown app role '{}'", other)),
        }
    }
}

/// An organizer or exhibitor row, one per principal per role table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub user_id: String,
    pub name: Option<String>,
    pub contact_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub avatar_url: Option<String>,
    pub business_number: Option<String>,
    pub business_document_url: Option<String>,
    #[serde(default, skip_serializing)]
    pub created_at: Option<DateTime<Utc>>,
}

impl ProfileRecord {
    /// Row with every business field null, filled in later by the wizard.
    pub fn placeholder(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: None,
            contact_name: None,
            email: None,
            phone: None,
            website: None,
            description: None,
            category: None,
            avatar_url: None,
            business_number: None,
            business_document_url: None,
            created_at: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.name.as_deref().is_some_and(|n| !n.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_is_an_alias_for_exhibitor() {
        assert_eq!("store".parse::<AppRole>().unwrap(), AppRole::Exhibitor);
        assert_eq!("Organizer".parse::<AppRole>().unwrap(), AppRole::Organizer);
        assert!("vendor".parse::<AppRole>().is_err());
    }

    #[test]
    fn placeholder_serializes_explicit_nulls() {
        let json = serde_json::to_value(ProfileRecord::placeholder("user-1")).unwrap();
        assert_eq!(json["user_id"], "user-1");
        assert!(json["name"].is_null());
        assert!(json.as_object().unwrap().contains_key("phone"));
        assert!(!json.as_object().unwrap().contains_key("created_at"));
    }

    #[test]
    fn placeholder_is_incomplete() {
        let mut record = ProfileRecord::placeholder("user-1");
        assert!(!record.is_complete());
        record.name = Some("Night Market Co".into());
        assert!(record.is_complete());
    }
}
