//! Scalar values.

use std::cmp::Ordering;
use std::fmt;

use crate::common::{Error, Result, StreamId};
use crate::types::data_type::ScalarKind;

/// A scalar value.
///
/// `Stream` is a deferred non-native value: the bytes live in a stream owned
/// by the row that carries the reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Text(String),
    Binary(Vec<u8>),
    Stream(StreamId),
}

impl Value {
    /// The kind of an inline value; `None` for a deferred stream reference.
    pub fn kind(&self) -> Option<ScalarKind> {
        match self {
            Value::Boolean(_) => Some(ScalarKind::Boolean),
            Value::Integer(_) => Some(ScalarKind::Integer),
            Value::Text(_) => Some(ScalarKind::Text),
            Value::Binary(_) => Some(ScalarKind::Binary),
            Value::Stream(_) => None,
        }
    }

    #[inline]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    #[inline]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Default comparison.
    ///
    /// # Errors
    /// Returns `Error::TypeMismatch` when the kinds differ or either side is a
    /// deferred stream reference.
    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => Ok(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Ok(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Ok(a.cmp(b)),
            (Value::Binary(a), Value::Binary(b)) => Ok(a.cmp(b)),
            _ => Err(Error::TypeMismatch(format!(
                "cannot compare {self} with {other}"
            ))),
        }
    }

    /// Encode an inline value in its native representation.
    pub(crate) fn to_native_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Value::Boolean(v) => Ok(vec![u8::from(*v)]),
            Value::Integer(v) => Ok(v.to_le_bytes().to_vec()),
            Value::Text(v) => Ok(v.as_bytes().to_vec()),
            Value::Binary(v) => Ok(v.clone()),
            Value::Stream(id) => Err(Error::InvalidPhysicalFormat(format!(
                "{id} must be expanded before it is written inline"
            ))),
        }
    }

    /// Decode a value of `kind` from its native representation.
    pub(crate) fn from_native_bytes(kind: ScalarKind, bytes: &[u8]) -> Result<Value> {
        match kind {
            ScalarKind::Boolean => match bytes {
                [b] => Ok(Value::Boolean(*b != 0)),
                _ => Err(Error::InvalidPhysicalFormat("boolean must be 1 byte".into())),
            },
            ScalarKind::Integer => {
                let raw: [u8; 8] = bytes.try_into().map_err(|_| {
                    Error::InvalidPhysicalFormat("integer must be 8 bytes".into())
                })?;
                Ok(Value::Integer(i64::from_le_bytes(raw)))
            }
            ScalarKind::Text => String::from_utf8(bytes.to_vec())
                .map(Value::Text)
                .map_err(|e| Error::InvalidPhysicalFormat(e.to_string())),
            ScalarKind::Binary => Ok(Value::Binary(bytes.to_vec())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v:?}"),
            Value::Binary(v) => write!(f, "<{} bytes>", v.len()),
            Value::Stream(id) => write!(f, "{id}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Binary(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_same_kind() {
        assert_eq!(
            Value::Integer(1).compare(&Value::Integer(2)).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            Value::from("b").compare(&Value::from("a")).unwrap(),
            Ordering::Greater
        );
    }

    #[test]
    fn test_compare_mixed_kinds_fails() {
        assert!(matches!(
            Value::Integer(1).compare(&Value::from("1")),
            Err(Error::TypeMismatch(_))
        ));
        assert!(Value::Stream(StreamId::new(1))
            .compare(&Value::Stream(StreamId::new(1)))
            .is_err());
    }

    #[test]
    fn test_native_bytes() {
        let bytes = Value::Integer(-2).to_native_bytes().unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(
            Value::from_native_bytes(ScalarKind::Integer, &bytes).unwrap(),
            Value::Integer(-2)
        );
        assert!(Value::from_native_bytes(ScalarKind::Boolean, &[]).is_err());
        assert!(Value::Stream(StreamId::new(3)).to_native_bytes().is_err());
    }
}
