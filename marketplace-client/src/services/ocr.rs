//! Document OCR over the Gemini vision API.
//!
//! The model is asked for a JSON object with the fields of the document
//! kind. A reply that is not such an object is handed back as raw text so
//! the user can still copy from it.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use marketplace_core::observability::TracedClientExt;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::config::OcrSettings;
use crate::models::{DocumentImage, DocumentKind, OcrResult};

/// Largest image accepted for inline upload.
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OcrError {
    #[error("Document scanning is not configured")]
    NotConfigured,

    #[error("Document scan timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("OCR API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),
}

#[async_trait]
pub trait DocumentOcr: Send + Sync {
    async fn extract(
        &self,
        image: &DocumentImage,
        kind: DocumentKind,
    ) -> Result<OcrResult, OcrError>;
}

pub struct GeminiVisionOcr {
    client: Client,
    api_base: String,
    api_key: Secret<String>,
    model: String,
    timeout: Duration,
}

impl GeminiVisionOcr {
    pub fn new(client: Client, settings: &OcrSettings) -> Self {
        Self {
            client,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            timeout: settings.timeout(),
        }
    }

    fn api_url(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }

    async fn generate(&self, request: &GenerateContentRequest) -> Result<String, OcrError> {
        let url = self.api_url();
        let response = self
            .client
            .traced_post(&url)
            .query(&[("key", self.api_key.expose_secret().as_str())])
            .json(request)
            .send()
            .await
            .map_err(|e| OcrError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(OcrError::Api(format!(
                "Gemini API error {}: {}",
                status, error_text
            )));
        }

        let api_response: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| OcrError::Api(format!("Failed to parse response: {}", e)))?;

        api_response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().find_map(|p| p.text))
            .ok_or_else(|| OcrError::Api("response carried no text".to_string()))
    }
}

#[async_trait]
impl DocumentOcr for GeminiVisionOcr {
    #[tracing::instrument(skip(self, image), fields(model = %self.model, bytes = image.bytes.len()))]
    async fn extract(
        &self,
        image: &DocumentImage,
        kind: DocumentKind,
    ) -> Result<OcrResult, OcrError> {
        if self.api_key.expose_secret().is_empty() {
            return Err(OcrError::NotConfigured);
        }
        check_image(image)?;

        let request = GenerateContentRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![
                    Part::inline(image),
                    Part {
                        text: Some(kind.prompt()),
                        inline_data: None,
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                response_mime_type: "application/json".to_string(),
            },
        };

        let reply = tokio::time::timeout(self.timeout, self.generate(&request))
            .await
            .map_err(|_| OcrError::Timeout(self.timeout))??;

        let result = parse_reply(&reply, kind);
        if matches!(result, OcrResult::RawText { .. }) {
            tracing::warn!(kind = kind.label(), "OCR reply was not a JSON object");
        }
        Ok(result)
    }
}

/// Reject images the vision model would refuse before sending them.
pub fn check_image(image: &DocumentImage) -> Result<(), OcrError> {
    if image.bytes.is_empty() {
        return Err(OcrError::InvalidImage("image is empty".to_string()));
    }
    if image.bytes.len() > MAX_IMAGE_BYTES {
        return Err(OcrError::InvalidImage(format!(
            "image is larger than {} MB",
            MAX_IMAGE_BYTES / (1024 * 1024)
        )));
    }
    if !(image.mime_type.starts_with("image/") || image.mime_type == "application/pdf") {
        return Err(OcrError::InvalidImage(format!(
            "unsupported type '{}'",
            image.mime_type
        )));
    }
    Ok(())
}

/// Keep only the requested fields that came back as readable values.
pub fn parse_reply(reply: &str, kind: DocumentKind) -> OcrResult {
    let body = strip_code_fence(reply);
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) else {
        return OcrResult::RawText {
            text: reply.trim().to_string(),
        };
    };

    let fields: BTreeMap<String, String> = kind
        .fields()
        .iter()
        .filter_map(|field| {
            let value = match map.get(*field)? {
                Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            Some((field.to_string(), value))
        })
        .collect();

    OcrResult::Structured { fields }
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn inline(image: &DocumentImage) -> Self {
        Part {
            text: None,
            inline_data: Some(InlineData {
                mime_type: image.mime_type.clone(),
                data: STANDARD.encode(&image.bytes),
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(api_base: &str, timeout_secs: u64) -> OcrSettings {
        OcrSettings {
            api_base: api_base.to_string(),
            api_key: Secret::new("test-key".to_string()),
            model: "gemini-1.5-flash".to_string(),
            timeout_secs,
        }
    }

    fn png() -> DocumentImage {
        DocumentImage {
            bytes: vec![0x89, 0x50, 0x4e, 0x47],
            mime_type: "image/png".to_string(),
        }
    }

    fn reply(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": text }] } }]
        })
    }

    #[test]
    fn fenced_json_is_structured() {
        let result = parse_reply(
            "```json\n{\"bank_name\": \"Kookmin\", \"account_number\": \"123-45\", \"account_holder\": null, \"extra\": \"x\"}\n```",
            DocumentKind::BankAccount,
        );
        let OcrResult::Structured { fields } = result else {
            panic!("expected structured result");
        };
        assert_eq!(fields.get("bank_name").map(String::as_str), Some("Kookmin"));
        assert_eq!(fields.get("account_number").map(String::as_str), Some("123-45"));
        assert!(!fields.contains_key("account_holder"));
        assert!(!fields.contains_key("extra"));
    }

    #[test]
    fn prose_reply_is_raw_text() {
        let result = parse_reply("  I cannot read this image.  ", DocumentKind::IdentityCard);
        assert_eq!(
            result,
            OcrResult::RawText {
                text: "I cannot read this image.".to_string()
            }
        );
    }

    #[test]
    fn rejects_unsupported_images() {
        let image = DocumentImage {
            bytes: vec![1, 2, 3],
            mime_type: "text/plain".to_string(),
        };
        assert!(matches!(check_image(&image), Err(OcrError::InvalidImage(_))));
    }

    #[tokio::test]
    async fn extracts_fields_from_gemini_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-1.5-flash:generateContent"))
            .and(query_param("key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply(
                "{\"business_number\": \"123-45-67890\", \"business_name\": \"Night Market Co\"}",
            )))
            .expect(1)
            .mount(&server)
            .await;

        let ocr = GeminiVisionOcr::new(Client::new(), &settings(&server.uri(), 30));
        let result = ocr
            .extract(&png(), DocumentKind::BusinessRegistration)
            .await
            .unwrap();

        let OcrResult::Structured { fields } = result else {
            panic!("expected structured result");
        };
        assert_eq!(
            fields.get("business_number").map(String::as_str),
            Some("123-45-67890")
        );
    }

    #[tokio::test]
    async fn slow_model_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(reply("{}"))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let ocr = GeminiVisionOcr::new(Client::new(), &settings(&server.uri(), 1));
        let err = ocr
            .extract(&png(), DocumentKind::IdentityCard)
            .await
            .unwrap_err();

        assert_eq!(err, OcrError::Timeout(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn api_errors_are_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota"))
            .mount(&server)
            .await;

        let ocr = GeminiVisionOcr::new(Client::new(), &settings(&server.uri(), 30));
        let err = ocr
            .extract(&png(), DocumentKind::IdentityCard)
            .await
            .unwrap_err();

        assert!(matches!(err, OcrError::Api(msg) if msg.contains("429")));
    }
}
