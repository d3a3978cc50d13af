//! Payload encoding between the page (text) and the BLE stack (base64)

use base64::prelude::BASE64_STANDARD;
use base64::{DecodeError, Engine};

/// Decode a base64 characteristic value into page text.
/// Invalid UTF-8 sequences are replaced, never rejected.
pub fn decode_notification(value: &str) -> Result<String, DecodeError> {
    let bytes = BASE64_STANDARD.decode(value)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Encode page text for a characteristic write
pub fn encode_payload(text: &str) -> String {
    BASE64_STANDARD.encode(text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_payload() {
        assert_eq!(encode_payload("hello"), "aGVsbG8=");
        assert_eq!(encode_payload(""), "");
    }

    #[test]
    fn test_decode_notification() {
        assert_eq!(decode_notification("aGVsbG8=").unwrap(), "hello");
        assert!(decode_notification("not base64!").is_err());
    }

    #[test]
    fn test_decode_replaces_invalid_utf8() {
        let raw = BASE64_STANDARD.encode([0x41, 0xFF, 0x42]);
        assert_eq!(decode_notification(&raw).unwrap(), "A\u{FFFD}B");
    }
}
