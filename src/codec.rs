//! Canonical member encoding for the durable queue.
//!
//! A member is the compact JSON rendering of the untagged [`WorkValue`]:
//! integers are JSON numbers, text is a JSON string, sequences are arrays and
//! mappings are objects with sorted keys. Because text is always quoted, a
//! numeric-looking text value and an integer never collide on read.
//!
//! Producers that predate this encoding wrote text members unquoted. Those
//! members (and anything else that does not parse as a `WorkValue`, such as
//! floats) decode as `Text(raw)` rather than failing.

use crate::error::StorageError;
use crate::types::WorkValue;

/// Encode a value into its durable member form.
pub fn encode_member(value: &WorkValue) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|err| StorageError::Encode(err.to_string()))
}

/// Decode a durable member back into a value.
///
/// Never fails: members that are not valid encodings are returned verbatim
/// as text.
pub fn decode_member(raw: &str) -> WorkValue {
    match serde_json::from_str::<WorkValue>(raw) {
        Ok(value) => value,
        Err(err) => {
            tracing::debug!(member = raw, error = %err, "member is not canonically encoded; keeping raw text");
            WorkValue::Text(raw.to_string())
        }
    }
}
