use anyhow::anyhow;
use axum::extract::{Multipart, State};
use axum::Json;
use marketplace_client::models::{DocumentImage, DocumentKind, OcrResult};
use marketplace_client::services::ocr::check_image;
use marketplace_client::services::OcrError;
use marketplace_core::error::AppError;
use serde::Serialize;
use uuid::Uuid;

use crate::models::AuthUser;
use crate::services::metrics::record_document_scan;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub document_url: String,
    pub kind: DocumentKind,
    /// Absent when document scanning is not configured.
    pub ocr: Option<OcrResult>,
}

fn ocr_error(err: OcrError) -> AppError {
    match err {
        OcrError::NotConfigured => AppError::ServiceUnavailable,
        OcrError::Timeout(_) => AppError::GatewayTimeout(err.to_string()),
        OcrError::InvalidImage(_) => AppError::BadRequest(anyhow!(err)),
        OcrError::Api(_) | OcrError::Network(_) => AppError::BadGateway(err.to_string()),
    }
}

fn ocr_result_label(err: &OcrError) -> &'static str {
    match err {
        OcrError::NotConfigured => "not_configured",
        OcrError::Timeout(_) => "timeout",
        OcrError::InvalidImage(_) => "invalid_image",
        OcrError::Api(_) => "api_error",
        OcrError::Network(_) => "network_error",
    }
}

/// Keep object keys to a safe alphabet.
fn safe_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}

/// Read a registration document and store it.
///
/// Multipart fields: `kind` (defaults to a business registration
/// certificate) and `file`. The scan runs before the upload so a document
/// the model cannot read is not stored.
pub async fn scan_handler(
    State(state): State<AppState>,
    auth_user: AuthUser,
    mut multipart: Multipart,
) -> Result<Json<ScanResponse>, AppError> {
    let mut kind = DocumentKind::BusinessRegistration;
    let mut upload: Option<(String, DocumentImage)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(anyhow!(e)))?
    {
        match field.name() {
            Some("kind") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(anyhow!(e)))?;
                kind = raw
                    .parse()
                    .map_err(|e: String| AppError::BadRequest(anyhow!(e)))?;
            }
            Some("file") => {
                let file_name = safe_file_name(field.file_name().unwrap_or("document"));
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(|e| {
                    tracing::error!("Failed to read file {}: {}", file_name, e);
                    AppError::BadRequest(anyhow!("could not read the uploaded file"))
                })?;
                upload = Some((
                    file_name,
                    DocumentImage {
                        bytes: bytes.to_vec(),
                        mime_type,
                    },
                ));
            }
            _ => {}
        }
    }

    let (file_name, image) =
        upload.ok_or_else(|| AppError::BadRequest(anyhow!("no file was uploaded")))?;
    check_image(&image).map_err(ocr_error)?;

    let kind_label = serde_json::to_value(kind)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();

    let ocr = match &state.ocr {
        Some(ocr) => match ocr.extract(&image, kind).await {
            Ok(result) => {
                record_document_scan(&kind_label, "ok");
                Some(result)
            }
            Err(err) => {
                record_document_scan(&kind_label, ocr_result_label(&err));
                tracing::warn!(error = %err, kind = kind.label(), "Document scan failed");
                return Err(ocr_error(err));
            }
        },
        None => None,
    };

    let path = format!(
        "{}/{}/{}-{}",
        state.role,
        auth_user.user_id(),
        Uuid::new_v4(),
        file_name
    );
    let document_url = state
        .objects
        .upload(
            &state.document_bucket,
            &path,
            image.bytes,
            &image.mime_type,
            auth_user.access_token(),
        )
        .await
        .map_err(|e| AppError::BadGateway(e.to_string()))?;

    tracing::info!(
        user_id = %auth_user.user_id(),
        kind = kind.label(),
        "Registration document stored"
    );
    Ok(Json(ScanResponse {
        document_url,
        kind,
        ocr,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn file_names_are_sanitised() {
        assert_eq!(safe_file_name("사업자 등록증.png"), "_______.png");
        assert_eq!(safe_file_name("scan-01.pdf"), "scan-01.pdf");
        assert_eq!(safe_file_name(".."), "document");
    }

    #[test]
    fn timeouts_map_to_gateway_timeout() {
        let err = ocr_error(OcrError::Timeout(Duration::from_secs(30)));
        assert_eq!(err.status(), axum::http::StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            ocr_error(OcrError::NotConfigured).status(),
            axum::http::StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
