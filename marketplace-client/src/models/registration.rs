use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use validator::{Validate, ValidationError};

use super::profile::{AppRole, ProfileRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    Basics,
    Contact,
    Business,
    Documents,
    Details,
    Agreements,
    Review,
}

impl WizardStep {
    pub const ALL: [WizardStep; 7] = [
        WizardStep::Basics,
        WizardStep::Contact,
        WizardStep::Business,
        WizardStep::Documents,
        WizardStep::Details,
        WizardStep::Agreements,
        WizardStep::Review,
    ];

    /// 1-based position shown as "step n of 7".
    pub fn number(&self) -> usize {
        Self::ALL.iter().position(|s| s == self).map_or(0, |i| i + 1)
    }

    pub fn next(&self) -> Option<WizardStep> {
        Self::ALL.get(self.number()).copied()
    }

    pub fn previous(&self) -> Option<WizardStep> {
        self.number()
            .checked_sub(2)
            .and_then(|i| Self::ALL.get(i).copied())
    }

    pub fn slug(&self) -> &'static str {
        match self {
            WizardStep::Basics => "basics",
            WizardStep::Contact => "contact",
            WizardStep::Business => "business",
            WizardStep::Documents => "documents",
            WizardStep::Details => "details",
            WizardStep::Agreements => "agreements",
            WizardStep::Review => "review",
        }
    }
}

impl fmt::Display for WizardStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for WizardStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|step| step.slug() == s)
            .copied()
            .ok_or_else(|| format!("unknown wizard step '{}'", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct BasicsStep {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(max = 50))]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ContactStep {
    #[validate(length(min = 1, max = 100))]
    pub contact_name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 7, max = 20))]
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct BusinessStep {
    #[validate(length(min = 5, max = 20))]
    pub business_number: String,
    #[validate(url)]
    pub website: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct DocumentsStep {
    #[validate(url)]
    pub business_document_url: String,
    /// Fields read from the document, kept for the review step.
    #[serde(default)]
    pub extracted: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct DetailsStep {
    #[validate(length(min = 1, max = 2000))]
    pub description: String,
    #[validate(url)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct AgreementsStep {
    #[validate(custom(function = "must_accept"))]
    pub accept_terms: bool,
    #[validate(custom(function = "must_accept"))]
    pub accept_privacy: bool,
}

fn must_accept(value: &bool) -> Result<(), ValidationError> {
    if *value {
        Ok(())
    } else {
        Err(ValidationError::new("must_accept"))
    }
}

/// Payload submitted for one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum StepInput {
    Basics(BasicsStep),
    Contact(ContactStep),
    Business(BusinessStep),
    Documents(DocumentsStep),
    Details(DetailsStep),
    Agreements(AgreementsStep),
}

impl StepInput {
    pub fn step(&self) -> WizardStep {
        match self {
            StepInput::Basics(_) => WizardStep::Basics,
            StepInput::Contact(_) => WizardStep::Contact,
            StepInput::Business(_) => WizardStep::Business,
            StepInput::Documents(_) => WizardStep::Documents,
            StepInput::Details(_) => WizardStep::Details,
            StepInput::Agreements(_) => WizardStep::Agreements,
        }
    }

    pub fn validate(&self) -> Result<(), validator::ValidationErrors> {
        match self {
            StepInput::Basics(s) => s.validate(),
            StepInput::Contact(s) => s.validate(),
            StepInput::Business(s) => s.validate(),
            StepInput::Documents(s) => s.validate(),
            StepInput::Details(s) => s.validate(),
            StepInput::Agreements(s) => s.validate(),
        }
    }
}

/// Registration in progress, persisted after every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationDraft {
    pub role: AppRole,
    pub user_id: String,
    pub current_step: WizardStep,
    pub basics: Option<BasicsStep>,
    pub contact: Option<ContactStep>,
    pub business: Option<BusinessStep>,
    pub documents: Option<DocumentsStep>,
    pub details: Option<DetailsStep>,
    pub agreements: Option<AgreementsStep>,
    pub updated_at: DateTime<Utc>,
}

impl RegistrationDraft {
    pub fn new(role: AppRole, user_id: impl Into<String>) -> Self {
        Self {
            role,
            user_id: user_id.into(),
            current_step: WizardStep::Basics,
            basics: None,
            contact: None,
            business: None,
            documents: None,
            details: None,
            agreements: None,
            updated_at: Utc::now(),
        }
    }

    pub fn apply(&mut self, input: StepInput) {
        match input {
            StepInput::Basics(s) => self.basics = Some(s),
            StepInput::Contact(s) => self.contact = Some(s),
            StepInput::Business(s) => self.business = Some(s),
            StepInput::Documents(s) => self.documents = Some(s),
            StepInput::Details(s) => self.details = Some(s),
            StepInput::Agreements(s) => self.agreements = Some(s),
        }
        self.updated_at = Utc::now();
    }

    /// First step whose payload is missing, if any.
    pub fn first_missing_step(&self) -> Option<WizardStep> {
        let filled = [
            (WizardStep::Basics, self.basics.is_some()),
            (WizardStep::Contact, self.contact.is_some()),
            (WizardStep::Business, self.business.is_some()),
            (WizardStep::Documents, self.documents.is_some()),
            (WizardStep::Details, self.details.is_some()),
            (WizardStep::Agreements, self.agreements.is_some()),
        ];
        filled
            .iter()
            .find(|(_, present)| !present)
            .map(|(step, _)| *step)
    }

    /// Complete profile row, or the first step still missing.
    pub fn to_record(&self) -> Result<ProfileRecord, WizardStep> {
        if let Some(step) = self.first_missing_step() {
            return Err(step);
        }
        let (Some(basics), Some(contact), Some(business), Some(documents), Some(details)) = (
            &self.basics,
            &self.contact,
            &self.business,
            &self.documents,
            &self.details,
        ) else {
            return Err(WizardStep::Basics);
        };

        Ok(ProfileRecord {
            user_id: self.user_id.clone(),
            name: Some(basics.name.clone()),
            contact_name: Some(contact.contact_name.clone()),
            email: Some(contact.email.clone()),
            phone: Some(contact.phone.clone()),
            website: business.website.clone(),
            description: Some(details.description.clone()),
            category: basics.category.clone(),
            avatar_url: details.avatar_url.clone(),
            business_number: Some(business.business_number.clone()),
            business_document_url: Some(documents.business_document_url.clone()),
            created_at: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_walk_in_order() {
        assert_eq!(WizardStep::Basics.number(), 1);
        assert_eq!(WizardStep::Review.number(), 7);
        assert_eq!(WizardStep::Basics.previous(), None);
        assert_eq!(WizardStep::Contact.previous(), Some(WizardStep::Basics));
        assert_eq!(WizardStep::Agreements.next(), Some(WizardStep::Review));
        assert_eq!(WizardStep::Review.next(), None);
        assert_eq!("documents".parse::<WizardStep>().unwrap(), WizardStep::Documents);
    }

    #[test]
    fn agreements_must_be_accepted() {
        let input = StepInput::Agreements(AgreementsStep {
            accept_terms: true,
            accept_privacy: false,
        });
        let errors = input.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("accept_privacy"));
    }

    #[test]
    fn contact_rejects_bad_email() {
        let input = StepInput::Contact(ContactStep {
            contact_name: "Min".into(),
            email: "not-an-email".into(),
            phone: "010-1234-5678".into(),
        });
        assert!(input.validate().is_err());
    }

    #[test]
    fn record_requires_every_step() {
        let mut draft = RegistrationDraft::new(AppRole::Organizer, "user-1");
        assert_eq!(draft.to_record(), Err(WizardStep::Basics));

        draft.apply(StepInput::Basics(BasicsStep {
            name: "Han River Night Market".into(),
            category: None,
        }));
        assert_eq!(draft.to_record(), Err(WizardStep::Contact));
    }
}
