//! Scalar values carried by constants, variable bindings, bound statement
//! parameters and result rows.

use serde::{Deserialize, Serialize};

/// Typed scalar. Serialized as `{"t": <variant>, "v": <payload>}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    /// Null literal.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Signed 64-bit integer literal.
    Int(i64),
    /// 64-bit floating point literal.
    Float(f64),
    /// UTF-8 string literal.
    String(String),
    /// Nanoseconds since Unix epoch in UTC.
    #[serde(deserialize_with = "serde_datetime::deserialize")]
    DateTime(i128),
    /// Homogeneous list of values.
    Array(Vec<Value>),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the integer payload, if any.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Short type name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::DateTime(_) => "datetime",
            Value::Array(_) => "array",
        }
    }
}

/// Datetime payloads arrive either as epoch nanoseconds (number or numeric
/// string) or as RFC 3339 text.
mod serde_datetime {
    use std::fmt;

    use serde::de::{Error, Unexpected, Visitor};
    use serde::Deserializer;
    use time::format_description::well_known::Rfc3339;
    use time::OffsetDateTime;

    struct EpochNanos;

    impl Visitor<'_> for EpochNanos {
        type Value = i128;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("epoch nanoseconds or an RFC 3339 timestamp")
        }

        fn visit_i64<E: Error>(self, nanos: i64) -> Result<i128, E> {
            Ok(i128::from(nanos))
        }

        fn visit_u64<E: Error>(self, nanos: u64) -> Result<i128, E> {
            Ok(i128::from(nanos))
        }

        fn visit_i128<E: Error>(self, nanos: i128) -> Result<i128, E> {
            Ok(nanos)
        }

        fn visit_str<E: Error>(self, text: &str) -> Result<i128, E> {
            if let Ok(nanos) = text.parse::<i128>() {
                return Ok(nanos);
            }
            OffsetDateTime::parse(text, &Rfc3339)
                .map(OffsetDateTime::unix_timestamp_nanos)
                .map_err(|_| E::invalid_value(Unexpected::Str(text), &self))
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i128, D::Error> {
        deserializer.deserialize_any(EpochNanos)
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value.into())
                }
            }
        )*
    };
}

value_from!(
    bool => Bool,
    i64 => Int,
    i32 => Int,
    f64 => Float,
    String => String,
    &str => String,
);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(flag) => Value::Bool(flag),
            Json::Number(number) => number
                .as_i64()
                .map(Value::Int)
                .unwrap_or_else(|| Value::Float(number.as_f64().unwrap_or(f64::NAN))),
            Json::String(text) => Value::String(text),
            Json::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            // Objects have no scalar form; keep their JSON text.
            object @ Json::Object(_) => Value::String(object.to_string()),
        }
    }
}
