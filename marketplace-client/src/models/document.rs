use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Documents the registration wizard can read with OCR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    BusinessRegistration,
    IdentityCard,
    BankAccount,
}

impl DocumentKind {
    /// Field names the model is asked to return.
    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            DocumentKind::BusinessRegistration => &[
                "business_number",
                "business_name",
                "representative",
                "address",
                "opened_on",
            ],
            DocumentKind::IdentityCard => &["name", "birth_date", "issued_on"],
            DocumentKind::BankAccount => &["bank_name", "account_number", "account_holder"],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DocumentKind::BusinessRegistration => "business registration certificate",
            DocumentKind::IdentityCard => "identity card",
            DocumentKind::BankAccount => "bank account statement",
        }
    }

    pub fn prompt(&self) -> String {
        format!(
            "Read this {} and reply with a single JSON object with the keys {}. \
             Use null for anything you cannot read. Do not add other keys.",
            self.label(),
            self.fields().join(", ")
        )
    }
}

impl FromStr for DocumentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "business_registration" => Ok(DocumentKind::BusinessRegistration),
            "identity_card" => Ok(DocumentKind::IdentityCard),
            "bank_account" => Ok(DocumentKind::BankAccount),
            other => Err(format!("unknown document kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DocumentImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// What the model returned: the requested fields, or its raw reply when
/// that was not a JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OcrResult {
    Structured { fields: BTreeMap<String, String> },
    RawText { text: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_lists_fields() {
        let prompt = DocumentKind::BankAccount.prompt();
        assert!(prompt.contains("bank account statement"));
        assert!(prompt.contains("bank_name, account_number, account_holder"));
    }
}
