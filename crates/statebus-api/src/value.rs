// ── Typed leaf values ──
//
// Values carried by update notifications. Scalars encode to their
// textual form on the bus; JSON-bearing values pass through untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::strip_module;

/// Fixed-point decimal (`digits * 10^-precision`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decimal64 {
    pub digits: i64,
    pub precision: u32,
}

impl std::fmt::Display for Decimal64 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.precision == 0 {
            return write!(f, "{}", self.digits);
        }
        let sign = if self.digits < 0 { "-" } else { "" };
        let magnitude = self.digits.unsigned_abs().to_string();
        let precision = usize::try_from(self.precision).unwrap_or(usize::MAX);
        let padded = format!("{magnitude:0>width$}", width = precision.saturating_add(1));
        let (int_part, frac_part) = padded.split_at(padded.len() - precision.min(padded.len()));
        write!(f, "{sign}{int_part}.{frac_part}")
    }
}

/// A typed leaf value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypedValue {
    Ascii(String),
    Bool(bool),
    Bytes(Vec<u8>),
    Decimal(Decimal64),
    Float(f64),
    Int(i64),
    String(String),
    Uint(u64),
    /// RFC 7951 encoded JSON.
    JsonIetf(Vec<u8>),
    Json(Vec<u8>),
    LeafList(Vec<TypedValue>),
}

impl TypedValue {
    /// JSON-IETF value holding the serialization of `value`.
    pub fn json_ietf(value: &Value) -> Self {
        Self::JsonIetf(value.to_string().into_bytes())
    }

    /// Encode as the bus payload.
    ///
    /// Scalars use their textual form, byte and JSON values pass through,
    /// leaf-lists become a JSON array of their elements' JSON forms.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Ascii(s) | Self::String(s) => s.clone().into_bytes(),
            Self::Bool(b) => b.to_string().into_bytes(),
            Self::Bytes(b) | Self::JsonIetf(b) | Self::Json(b) => b.clone(),
            Self::Decimal(d) => d.to_string().into_bytes(),
            Self::Float(v) => v.to_string().into_bytes(),
            Self::Int(v) => v.to_string().into_bytes(),
            Self::Uint(v) => v.to_string().into_bytes(),
            Self::LeafList(_) => self.to_json().to_string().into_bytes(),
        }
    }

    /// Convert to a JSON value for merging into a configuration tree.
    ///
    /// JSON payloads that fail to parse are kept as a JSON string so the
    /// schema check downstream reports them. Module prefixes on object
    /// member names are stripped.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Ascii(s) | Self::String(s) => Value::String(s.clone()),
            Self::Bool(b) => Value::Bool(*b),
            Self::Bytes(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
            Self::Decimal(d) => Value::String(d.to_string()),
            Self::Float(v) => serde_json::Number::from_f64(*v).map_or(Value::Null, Value::Number),
            Self::Int(v) => Value::from(*v),
            Self::Uint(v) => Value::from(*v),
            Self::JsonIetf(b) | Self::Json(b) => match serde_json::from_slice::<Value>(b) {
                Ok(v) => strip_json_modules(v),
                Err(_) => Value::String(String::from_utf8_lossy(b).into_owned()),
            },
            Self::LeafList(items) => Value::Array(items.iter().map(Self::to_json).collect()),
        }
    }
}

/// Recursively strip `module:` prefixes from object member names.
pub fn strip_json_modules(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (strip_module(&k).to_owned(), strip_json_modules(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_json_modules).collect()),
        other => other,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_encode_as_text() {
        assert_eq!(TypedValue::String("up".into()).encode(), b"up");
        assert_eq!(TypedValue::Bool(true).encode(), b"true");
        assert_eq!(TypedValue::Int(-42).encode(), b"-42");
        assert_eq!(TypedValue::Uint(42).encode(), b"42");
        assert_eq!(TypedValue::Float(1.5).encode(), b"1.5");
    }

    #[test]
    fn json_values_pass_through() {
        let raw = br#"{"a":1}"#.to_vec();
        assert_eq!(TypedValue::JsonIetf(raw.clone()).encode(), raw);
        assert_eq!(TypedValue::Bytes(vec![0, 1, 2]).encode(), vec![0, 1, 2]);
    }

    #[test]
    fn decimal_formatting() {
        let d = |digits, precision| Decimal64 { digits, precision }.to_string();
        assert_eq!(d(12345, 2), "123.45");
        assert_eq!(d(5, 3), "0.005");
        assert_eq!(d(-5, 1), "-0.5");
        assert_eq!(d(7, 0), "7");
    }

    #[test]
    fn leaf_list_encodes_as_json_array() {
        let list = TypedValue::LeafList(vec![TypedValue::String("a".into()), TypedValue::Int(1)]);
        assert_eq!(list.encode(), br#"["a",1]"#);
    }

    #[test]
    fn to_json_strips_module_prefixes() {
        let value = TypedValue::JsonIetf(br#"{"mod:state-entry":[{"mod:name":"x"}]}"#.to_vec());
        assert_eq!(value.to_json(), json!({"state-entry": [{"name": "x"}]}));
    }
}
