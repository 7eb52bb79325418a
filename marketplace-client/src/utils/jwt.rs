use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::error::ProviderError;

#[derive(Debug, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: i64,
}

impl AccessTokenClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.exp, 0).single()
    }
}

/// Read the claims of an access token without verifying its signature.
///
/// Only used to learn the expiry of tokens handed to us by an implicit-grant
/// redirect; the provider still validates the token on every call.
pub fn decode_claims(token: &str) -> Result<AccessTokenClaims, ProviderError> {
    let parts: Vec<&str> = token.split('.').collect();

    if parts.len() != 3 {
        return Err(ProviderError::InvalidResponse(
            "access token is not a JWT".to_string(),
        ));
    }

    let payload = general_purpose::URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|e| ProviderError::InvalidResponse(format!("JWT payload: {}", e)))?;

    serde_json::from_slice(&payload)
        .map_err(|e| ProviderError::InvalidResponse(format!("JWT claims: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_claims() {
        // Payload: {"sub":"user_123","email":"test@example.com","exp":9999999999,"iat":1736500000,"jti":"abc123"}
        let token = "eyJhbGciOiJSUzI1NiIsInR5cCI6IkpXVCJ9.eyJzdWIiOiJ1c2VyXzEyMyIsImVtYWlsIjoidGVzdEBleGFtcGxlLmNvbSIsImV4cCI6OTk5OTk5OTk5OSwiaWF0IjoxNzM2NTAwMDAwLCJqdGkiOiJhYmMxMjMifQ.signature";

        let claims = decode_claims(token).unwrap();
        assert_eq!(claims.sub, "user_123");
        assert_eq!(claims.email.as_deref(), Some("test@example.com"));
        assert_eq!(claims.expires_at().unwrap().timestamp(), 9_999_999_999);
    }

    #[test]
    fn test_rejects_opaque_token() {
        assert!(decode_claims("opaque-token").is_err());
    }
}
