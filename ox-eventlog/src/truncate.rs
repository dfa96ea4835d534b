//! Payload truncation.
//!
//! A single oversized action must not become a self-DoS vector: any payload
//! whose serialized form exceeds 16 KiB is replaced with a tagged preview
//! before it reaches the event table.

use serde_json::{json, Value};

/// Hard cap on serialized payload size. A payload of exactly this many
/// bytes passes untouched; one byte more is truncated.
pub const MAX_PAYLOAD_BYTES: usize = 16 * 1024;

/// Trailing marker appended to truncated previews.
pub const TRUNCATION_MARKER: &str = "...[TRUNCATED]";

/// Headroom for the wrapper object (`{"truncated":true,"preview":"..."}`),
/// JSON string escaping, and the marker.
const WRAPPER_HEADROOM: usize = 256;

/// Enforce the payload cap.
///
/// Returns the (possibly replaced) payload and whether truncation happened.
pub fn truncate_payload(payload: Value) -> (Value, bool) {
    let serialized = payload.to_string();
    if serialized.len() <= MAX_PAYLOAD_BYTES {
        return (payload, false);
    }

    let mut cut = MAX_PAYLOAD_BYTES - WRAPPER_HEADROOM;
    while !serialized.is_char_boundary(cut) {
        cut -= 1;
    }

    let preview = format!("{}{}", &serialized[..cut], TRUNCATION_MARKER);
    (json!({ "truncated": true, "preview": preview }), true)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A JSON string payload whose serialized form is exactly `total` bytes.
    fn payload_of_serialized_len(total: usize) -> Value {
        // Serialized form is the content plus two quote characters.
        Value::String("x".repeat(total - 2))
    }

    #[test]
    fn test_exact_cap_is_untouched() {
        let payload = payload_of_serialized_len(MAX_PAYLOAD_BYTES);
        assert_eq!(payload.to_string().len(), MAX_PAYLOAD_BYTES);

        let (result, truncated) = truncate_payload(payload.clone());
        assert!(!truncated);
        assert_eq!(result, payload);
    }

    #[test]
    fn test_one_byte_over_is_truncated() {
        let payload = payload_of_serialized_len(MAX_PAYLOAD_BYTES + 1);
        let (result, truncated) = truncate_payload(payload);
        assert!(truncated);
        assert_eq!(result["truncated"], json!(true));

        let preview = result["preview"].as_str().unwrap();
        assert!(preview.ends_with(TRUNCATION_MARKER));
        assert!(result.to_string().len() <= MAX_PAYLOAD_BYTES);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        // Multi-byte characters around the cut point must not split.
        let payload = Value::String("é".repeat(MAX_PAYLOAD_BYTES));
        let (result, truncated) = truncate_payload(payload);
        assert!(truncated);
        assert!(result["preview"].as_str().is_some());
    }

    #[test]
    fn test_small_payload_passthrough() {
        let payload = json!({"message": "hello"});
        let (result, truncated) = truncate_payload(payload.clone());
        assert!(!truncated);
        assert_eq!(result, payload);
    }
}
