use serde_json::Value;
use thiserror::Error;

use super::uri::UriError;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed room message: {0}")]
    MalformedMessage(String),
}

/// Shallow routability gate for scanned data: accepted iff the payload is
/// addressable as an http(s) uri. Decoding has its own failure reporting,
/// so this deliberately proves nothing more.
pub fn validate_bootstrap_string(input: &str) -> Result<(), UriError> {
    let trimmed = input.trim();
    if trimmed.starts_with("http:") || trimmed.starts_with("https:") {
        Ok(())
    } else {
        Err(UriError::InvalidBootstrapString)
    }
}

/// Parse a raw room payload. Empty and whitespace-only payloads are a
/// defined no-op; anything non-empty must parse as JSON or the failure
/// surfaces to the caller. Never panics on hostile input.
pub fn parse_room_message(raw: &str) -> Result<Option<Value>, MessageError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|err| MessageError::MalformedMessage(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn gate_accepts_http_and_https_prefixes() {
        assert!(validate_bootstrap_string("https://metaconnect.me?id=1").is_ok());
        assert!(validate_bootstrap_string("http://localhost:3000").is_ok());
        assert!(validate_bootstrap_string("  https://padded.example  ").is_ok());
    }

    #[test]
    fn gate_rejects_everything_else() {
        for input in ["ftp://x", "", "justtext", "ws://room"] {
            assert_eq!(
                validate_bootstrap_string(input).unwrap_err(),
                UriError::InvalidBootstrapString,
                "input {input:?}"
            );
        }
    }

    #[test]
    fn empty_payloads_are_a_no_op() {
        assert!(parse_room_message("").expect("no error").is_none());
        assert!(parse_room_message("   ").expect("no error").is_none());
        assert!(parse_room_message("\n\t").expect("no error").is_none());
    }

    #[test]
    fn malformed_payloads_surface_an_error() {
        let err = parse_room_message("{not json").unwrap_err();
        assert!(matches!(err, MessageError::MalformedMessage(_)));
    }

    #[test]
    fn valid_payloads_parse() {
        let value = parse_room_message(r#"{"name":"alice","socialMedia":{}}"#)
            .expect("no error")
            .expect("some value");
        assert_eq!(value, json!({ "name": "alice", "socialMedia": {} }));
    }
}
