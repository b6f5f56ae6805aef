//! Unsigned JWT payload decoding
//!
//! Reads expiry and subject claims out of the middle segment of a compact
//! token. No signature verification; a decode failure means "claims unknown",
//! never an error.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    pub sub: Option<String>,
    pub exp: Option<f64>,
    pub iat: Option<f64>,
}

impl Claims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| DateTime::from_timestamp(exp as i64, 0))
    }

    /// Subject identifiers can be composite (`issuer|userId`); the user id is
    /// the part after the last `|`.
    pub fn subject_id(&self) -> Option<&str> {
        let sub = self.sub.as_deref()?;
        Some(sub.rsplit('|').next().unwrap_or(sub))
    }
}

/// Decode the payload segment of a compact token. Returns `None` on any
/// malformed input.
pub fn decode_payload(token: &str) -> Option<Claims> {
    let mut segments = token.split('.');
    let _header = segments.next()?;
    let payload = segments.next()?;

    let decoded = base64_url_decode(payload)?;
    serde_json::from_slice(&decoded).ok()
}

fn base64_url_decode(segment: &str) -> Option<Vec<u8>> {
    let mut normalized = segment.replace('-', "+").replace('_', "/");
    let remainder = normalized.len() % 4;
    if remainder > 0 {
        normalized.push_str(&"=".repeat(4 - remainder));
    }
    base64::engine::general_purpose::STANDARD
        .decode(normalized)
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_token(payload: &str) -> String {
        let encoded =
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(payload.as_bytes());
        format!("header.{encoded}.signature")
    }

    #[test]
    fn decodes_exp_and_sub() {
        let token = make_token(r#"{"sub":"auth0|user_123","exp":1900000000,"iat":1700000000}"#);
        let claims = decode_payload(&token).expect("claims");

        assert_eq!(claims.subject_id(), Some("user_123"));
        assert_eq!(claims.expires_at().unwrap().timestamp(), 1_900_000_000);
    }

    #[test]
    fn plain_subject_passes_through() {
        let token = make_token(r#"{"sub":"user_456"}"#);
        let claims = decode_payload(&token).expect("claims");

        assert_eq!(claims.subject_id(), Some("user_456"));
        assert!(claims.expires_at().is_none());
    }

    #[test]
    fn takes_part_after_last_separator() {
        let token = make_token(r#"{"sub":"a|b|c"}"#);
        assert_eq!(decode_payload(&token).unwrap().subject_id(), Some("c"));
    }

    #[test]
    fn malformed_inputs_are_absent() {
        assert!(decode_payload("no-separators").is_none());
        assert!(decode_payload("only.!!!not-base64!!!").is_none());

        let not_json = format!(
            "h.{}.s",
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(b"plain text")
        );
        assert!(decode_payload(&not_json).is_none());
    }

    #[test]
    fn two_segment_token_is_accepted() {
        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(br#"{"sub":"svc|u9"}"#);
        let token = format!("header.{encoded}");
        assert_eq!(decode_payload(&token).unwrap().subject_id(), Some("u9"));
    }
}
