//! Typed payload marshaling.
//!
//! A handler declares the [`PayloadType`] it wants at registration time; the
//! router calls [`cast`] on the raw payload bytes before invoking it.
//!
//! # Wire representation
//!
//! | type            | payload bytes                                   |
//! |-----------------|-------------------------------------------------|
//! | `Bytes`         | verbatim                                        |
//! | `Text`          | UTF-8                                           |
//! | `Int` / `Float` | decimal text, e.g. `42`, `3.5`                  |
//! | `Bool`          | `true` / `false`                                |
//! | `Null`          | no payload (or an empty / `null` payload)       |
//! | `List` / `Map`  | JSON; nested bytes are arrays of `0..=255`      |
//!
//! The conversion matrix is explicit.  An integer may widen to a float; a
//! float never narrows to an integer.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value as Json;
use thiserror::Error;

/// Semantic type a handler declares for its payload parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadType {
    Bytes,
    Text,
    Int,
    Float,
    Bool,
    Null,
    List(Box<PayloadType>),
    Map(Box<PayloadType>),
}

impl PayloadType {
    pub fn list_of(inner: PayloadType) -> Self {
        PayloadType::List(Box::new(inner))
    }

    pub fn map_of(inner: PayloadType) -> Self {
        PayloadType::Map(Box::new(inner))
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadType::Bytes => f.write_str("bytes"),
            PayloadType::Text => f.write_str("text"),
            PayloadType::Int => f.write_str("int"),
            PayloadType::Float => f.write_str("float"),
            PayloadType::Bool => f.write_str("bool"),
            PayloadType::Null => f.write_str("null"),
            PayloadType::List(inner) => write!(f, "list<{inner}>"),
            PayloadType::Map(inner) => write!(f, "map<{inner}>"),
        }
    }
}

/// A payload after casting.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bytes(Vec<u8>),
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

/// A payload could not be converted to the declared type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cannot cast {source_kind} payload to {target_kind}: {detail}")]
pub struct TypeCastError {
    pub source_kind: String,
    pub target_kind: String,
    pub detail: String,
}

impl TypeCastError {
    fn new(source_kind: impl Into<String>, target: &PayloadType, detail: impl Into<String>) -> Self {
        Self {
            source_kind: source_kind.into(),
            target_kind: target.to_string(),
            detail: detail.into(),
        }
    }
}

/// Converts a raw payload into `target`.
///
/// `None` is an absent payload.  It casts to [`Value::Null`] and to an empty
/// [`Value::Bytes`]; every other target fails.
///
/// # Examples
///
/// ```rust
/// use cmdwire_core::typecast::{cast, PayloadType, Value};
///
/// assert_eq!(cast(Some(b"42".as_slice()), &PayloadType::Int).unwrap(), Value::Int(42));
/// assert_eq!(cast(Some(b"42".as_slice()), &PayloadType::Float).unwrap(), Value::Float(42.0));
/// assert!(cast(Some(b"4.2".as_slice()), &PayloadType::Int).is_err());
/// ```
pub fn cast(payload: Option<&[u8]>, target: &PayloadType) -> Result<Value, TypeCastError> {
    let Some(bytes) = payload else {
        return match target {
            PayloadType::Null => Ok(Value::Null),
            PayloadType::Bytes => Ok(Value::Bytes(Vec::new())),
            other => Err(TypeCastError::new("absent", other, "no payload was sent")),
        };
    };

    let text = match target {
        PayloadType::Bytes => return Ok(Value::Bytes(bytes.to_vec())),
        _ => std::str::from_utf8(bytes)
            .map_err(|e| TypeCastError::new("bytes", target, format!("payload is not UTF-8: {e}")))?,
    };

    match target {
        PayloadType::Bytes => Ok(Value::Bytes(bytes.to_vec())),
        PayloadType::Text => Ok(Value::Text(text.to_string())),
        PayloadType::Int => text
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| TypeCastError::new("text", target, format!("{text:?}: {e}"))),
        PayloadType::Float => text
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| TypeCastError::new("text", target, format!("{text:?}: {e}"))),
        PayloadType::Bool => match text.trim() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            other => Err(TypeCastError::new("text", target, format!("{other:?} is not a boolean"))),
        },
        PayloadType::Null => match text.trim() {
            "" | "null" => Ok(Value::Null),
            _ => Err(TypeCastError::new("text", target, "payload is not empty")),
        },
        PayloadType::List(_) | PayloadType::Map(_) => {
            let json: Json = serde_json::from_str(text)
                .map_err(|e| TypeCastError::new("text", target, format!("invalid JSON: {e}")))?;
            from_json(&json, target)
        }
    }
}

fn json_kind(json: &Json) -> &'static str {
    match json {
        Json::Null => "json null",
        Json::Bool(_) => "json bool",
        Json::Number(_) => "json number",
        Json::String(_) => "json string",
        Json::Array(_) => "json array",
        Json::Object(_) => "json object",
    }
}

fn from_json(json: &Json, target: &PayloadType) -> Result<Value, TypeCastError> {
    let mismatch = || TypeCastError::new(json_kind(json), target, "type mismatch");

    match (target, json) {
        (PayloadType::Null, Json::Null) => Ok(Value::Null),
        (PayloadType::Bool, Json::Bool(b)) => Ok(Value::Bool(*b)),
        (PayloadType::Text, Json::String(s)) => Ok(Value::Text(s.clone())),
        (PayloadType::Int, Json::Number(n)) => n.as_i64().map(Value::Int).ok_or_else(|| {
            TypeCastError::new("json number", target, format!("{n} is not an integer"))
        }),
        (PayloadType::Float, Json::Number(n)) => n.as_f64().map(Value::Float).ok_or_else(mismatch),
        (PayloadType::Bytes, Json::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|b| u8::try_from(b).ok())
                    .ok_or_else(|| TypeCastError::new(json_kind(item), target, format!("{item} is not a byte")))
            })
            .collect::<Result<Vec<u8>, _>>()
            .map(Value::Bytes),
        (PayloadType::List(inner), Json::Array(items)) => items
            .iter()
            .map(|item| from_json(item, inner))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        (PayloadType::Map(inner), Json::Object(entries)) => entries
            .iter()
            .map(|(key, item)| from_json(item, inner).map(|value| (key.clone(), value)))
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(Value::Map),
        _ => Err(mismatch()),
    }
}

impl Value {
    /// Name of the variant, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bytes(_) => "bytes",
            Value::Text(_) => "text",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Null => "null",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Serialises the value into payload bytes.
    ///
    /// [`Value::Null`] means "no payload" and yields `None`.
    ///
    /// # Errors
    ///
    /// Non-finite floats have no JSON representation and fail inside lists
    /// and maps.
    pub fn to_payload(&self) -> Result<Option<Vec<u8>>, TypeCastError> {
        let bytes = match self {
            Value::Null => return Ok(None),
            Value::Bytes(b) => b.clone(),
            Value::Text(s) => s.as_bytes().to_vec(),
            Value::Int(i) => i.to_string().into_bytes(),
            Value::Float(x) => x.to_string().into_bytes(),
            Value::Bool(b) => b.to_string().into_bytes(),
            Value::List(_) | Value::Map(_) => self.to_json()?.to_string().into_bytes(),
        };
        Ok(Some(bytes))
    }

    fn to_json(&self) -> Result<Json, TypeCastError> {
        let json = match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(x) => serde_json::Number::from_f64(*x)
                .map(Json::Number)
                .ok_or_else(|| TypeCastError {
                    source_kind: "float".to_string(),
                    target_kind: "json number".to_string(),
                    detail: format!("{x} has no JSON representation"),
                })?,
            Value::Text(s) => Json::String(s.clone()),
            Value::Bytes(b) => Json::Array(b.iter().map(|byte| Json::from(*byte)).collect()),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect::<Result<_, _>>()?),
            Value::Map(entries) => Json::Object(
                entries
                    .iter()
                    .map(|(key, value)| value.to_json().map(|json| (key.clone(), json)))
                    .collect::<Result<_, _>>()?,
            ),
        };
        Ok(json)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Value::Map(entries)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cast_text_payload() {
        assert_eq!(
            cast(Some(b"hi".as_slice()), &PayloadType::Text).unwrap(),
            Value::Text("hi".to_string())
        );
    }

    #[test]
    fn test_cast_rejects_invalid_utf8_as_text() {
        let err = cast(Some([0xFFu8, 0xFE].as_slice()), &PayloadType::Text).unwrap_err();
        assert_eq!(err.source_kind, "bytes");
        assert_eq!(err.target_kind, "text");
    }

    #[test]
    fn test_cast_does_not_narrow_float_to_int() {
        let err = cast(Some(b"3.5".as_slice()), &PayloadType::Int).unwrap_err();
        assert_eq!(err.target_kind, "int");
    }

    #[test]
    fn test_cast_widens_int_to_float() {
        assert_eq!(cast(Some(b"7".as_slice()), &PayloadType::Float).unwrap(), Value::Float(7.0));
    }

    #[test]
    fn test_cast_absent_payload() {
        assert_eq!(cast(None, &PayloadType::Null).unwrap(), Value::Null);
        assert_eq!(cast(None, &PayloadType::Bytes).unwrap(), Value::Bytes(Vec::new()));

        let err = cast(None, &PayloadType::Text).unwrap_err();
        assert_eq!(err.source_kind, "absent");
    }

    #[test]
    fn test_cast_bool_is_strict() {
        assert_eq!(cast(Some(b"true".as_slice()), &PayloadType::Bool).unwrap(), Value::Bool(true));
        assert!(cast(Some(b"yes".as_slice()), &PayloadType::Bool).is_err());
    }

    #[test]
    fn test_cast_nested_containers() {
        // Arrange
        let payload = br#"{"a":[1,2],"b":[]}"#;
        let target = PayloadType::map_of(PayloadType::list_of(PayloadType::Int));

        // Act
        let value = cast(Some(payload.as_slice()), &target).unwrap();

        // Assert
        let mut expected = BTreeMap::new();
        expected.insert("a".to_string(), Value::List(vec![Value::Int(1), Value::Int(2)]));
        expected.insert("b".to_string(), Value::List(Vec::new()));
        assert_eq!(value, Value::Map(expected));
    }

    #[test]
    fn test_cast_list_rejects_wrong_element_type() {
        let target = PayloadType::list_of(PayloadType::Int);
        let err = cast(Some(br#"[1, "two"]"#.as_slice()), &target).unwrap_err();
        assert_eq!(err.source_kind, "json string");
        assert_eq!(err.target_kind, "int");
    }

    #[test]
    fn test_cast_list_rejects_float_elements_for_int() {
        let target = PayloadType::list_of(PayloadType::Int);
        assert!(cast(Some(b"[1.5]".as_slice()), &target).is_err());
    }

    #[test]
    fn test_bytes_inside_containers_survive_round_trip() {
        // Arrange
        let value = Value::List(vec![Value::Bytes(vec![0, 127, 255])]);

        // Act
        let payload = value.to_payload().unwrap().unwrap();
        let back = cast(Some(payload.as_slice()), &PayloadType::list_of(PayloadType::Bytes)).unwrap();

        // Assert
        assert_eq!(payload, b"[[0,127,255]]");
        assert_eq!(back, value);
    }

    #[test]
    fn test_null_value_has_no_payload() {
        assert_eq!(Value::Null.to_payload().unwrap(), None);
        assert_eq!(Value::from(()).to_payload().unwrap(), None);
    }

    #[test]
    fn test_non_finite_float_in_container_fails() {
        let value = Value::List(vec![Value::Float(f64::NAN)]);
        assert!(value.to_payload().is_err());
    }

    #[test]
    fn test_payload_type_display_nests() {
        let target = PayloadType::map_of(PayloadType::list_of(PayloadType::Text));
        assert_eq!(target.to_string(), "map<list<text>>");
    }
}
