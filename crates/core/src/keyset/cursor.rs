//! Cursor encoding.
//!
//! A cursor is the standard base64 encoding of the JSON array of a row's
//! sort-key values, in order-by order.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;

use crate::error::{CursorError, CursorResult};
use crate::ports::Cursor;

impl Cursor {
    /// Encode a sort key.
    pub fn encode(sort_key: &[Value]) -> Self {
        let json = Value::Array(sort_key.to_vec()).to_string();
        Self::new(STANDARD.encode(json))
    }

    /// Decode the sort key carried by this cursor.
    pub fn decode(&self) -> CursorResult<Vec<Value>> {
        let bytes = STANDARD
            .decode(self.value.as_bytes())
            .map_err(|e| CursorError::Malformed(format!("not base64: {e}")))?;

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Array(values)) => Ok(values),
            Ok(other) => Err(CursorError::Malformed(format!(
                "expected a JSON array, found {}",
                json_kind(&other)
            ))),
            Err(e) => Err(CursorError::Malformed(format!("not JSON: {e}"))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encoding_is_base64_json_array() {
        assert_eq!(Cursor::encode(&[json!("r")]).as_str(), "WyJyIl0=");
        assert_eq!(Cursor::encode(&[json!("aaa"), json!(2)]).as_str(), "WyJhYWEiLDJd");
        assert_eq!(Cursor::encode(&[]).as_str(), "W10=");
    }

    #[test]
    fn test_decode_restores_mixed_values() {
        let key = vec![json!("ünïcode"), json!(42), json!(-1.5), json!(null), json!(true)];
        assert_eq!(Cursor::encode(&key).decode().unwrap(), key);
    }

    // Test critique: un curseur forgé est rejeté, pas interprété
    #[test]
    fn test_malformed_cursors_are_rejected() {
        let not_base64 = Cursor::new("%%%");
        assert!(matches!(not_base64.decode(), Err(CursorError::Malformed(_))));

        let not_json = Cursor::new(STANDARD.encode("not json"));
        assert!(matches!(not_json.decode(), Err(CursorError::Malformed(_))));

        let object = Cursor::new("eyJhIjoxfQ==");
        let err = object.decode().unwrap_err();
        assert!(err.to_string().contains("an object"));
    }
}
