//! # Unit Return Values
//!
//! Values returned by unit bodies and by cached computations. A unit's return
//! value may be consumed by a dependent unit running on another worker, or by a
//! later process reading it back from disk, so every value has exactly one
//! canonical serialized form: the tagged JSON produced by [`Value::encode`].
//!
//! Primitive kinds convert through `From`; anything else can be carried as an
//! opaque string via [`Value::opaque`].

use crate::errors::{Result, SnapbookError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A serializable value passed between units and stored in caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    /// Non-finite floats encode as `"NaN"`, `"inf"` or `"-inf"`.
    #[serde(with = "float_repr")]
    Float(f64),
    Str(String),
    List(Vec<Value>),
    /// Best-effort textual rendering of a value with no primitive mapping.
    Opaque(String),
}

impl Value {
    /// Wraps any debuggable value as an opaque string payload.
    pub fn opaque<T: fmt::Debug>(value: &T) -> Self {
        Value::Opaque(format!("{:?}", value))
    }

    /// Canonical serialized form, used both for disk records and cache hashing.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| SnapbookError::serialization("encode value", e))
    }

    /// Inverse of [`Value::encode`].
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| SnapbookError::serialization("decode value", e))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Opaque(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Opaque(_) => "opaque",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Str(s) | Value::Opaque(s) => write!(f, "{}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

mod float_repr {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(x: &f64, s: S) -> Result<S::Ok, S::Error> {
        if x.is_finite() {
            s.serialize_f64(*x)
        } else if x.is_nan() {
            s.serialize_str("NaN")
        } else if x.is_sign_positive() {
            s.serialize_str("inf")
        } else {
            s.serialize_str("-inf")
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        match Repr::deserialize(d)? {
            Repr::Number(x) => Ok(x),
            Repr::Text(text) => match text.as_str() {
                "NaN" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(D::Error::custom(format!("invalid float `{}`", other))),
            },
        }
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Nil
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Nil)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_is_tagged_and_stable() {
        let v = Value::from(vec![Value::from(1), Value::from("a"), Value::Nil]);
        let text = v.encode().unwrap();
        assert_eq!(
            text,
            r#"{"kind":"list","value":[{"kind":"int","value":1},{"kind":"str","value":"a"},{"kind":"nil"}]}"#
        );
        assert_eq!(Value::decode(&text).unwrap(), v);
    }

    #[test]
    fn opaque_falls_back_to_debug_text() {
        #[derive(Debug)]
        struct Point {
            x: i32,
        }
        let v = Value::opaque(&Point { x: 3 });
        assert_eq!(v.as_str(), Some("Point { x: 3 }"));
        assert_eq!(v.type_name(), "opaque");
    }

    #[test]
    fn numeric_views() {
        assert_eq!(Value::from(2).as_f64(), Some(2.0));
        assert_eq!(Value::from(2.5).as_i64(), None);
        assert_eq!(Value::from(2.5).to_string(), "2.5");
        assert_eq!(Value::from(Some("x")), Value::Str("x".into()));
        assert_eq!(Value::from(None::<i64>), Value::Nil);
    }

    #[test]
    fn non_finite_floats_survive_encoding() {
        let nan = Value::decode(&Value::Float(f64::NAN).encode().unwrap()).unwrap();
        assert!(nan.as_f64().unwrap().is_nan());
        for x in [f64::INFINITY, f64::NEG_INFINITY, 1.5] {
            let text = Value::Float(x).encode().unwrap();
            assert_eq!(Value::decode(&text).unwrap(), Value::Float(x));
        }
        assert_eq!(Value::Float(f64::NEG_INFINITY).encode().unwrap(), r#"{"kind":"float","value":"-inf"}"#);
        assert_eq!(Value::Float(2.0).encode().unwrap(), r#"{"kind":"float","value":2.0}"#);
        assert!(Value::decode(r#"{"kind":"float","value":"lots"}"#).is_err());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            Value::decode("not json"),
            Err(SnapbookError::Serialization { .. })
        ));
    }
}
