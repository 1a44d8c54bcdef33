//! Tagged wire values exchanged with a receiver.
//!
//! Every method argument, return value and callback payload is a [`Value`].
//! Ownership stays with the call that produced it; there is no manual
//! allocation or release.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::{Error, Result};

/// A single typed wire value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    U8(u8),
    U32(u32),
    U64(u64),
    F64(f64),
    String(String),
    Blob(Bytes),
    Array(Vec<Value>),
    Struct(BTreeMap<String, Value>),
}

impl Value {
    /// Name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::U8(_) => "uint8",
            Value::U32(_) => "uint32",
            Value::U64(_) => "uint64",
            Value::F64(_) => "double",
            Value::String(_) => "string",
            Value::Blob(_) => "blob",
            Value::Array(_) => "array",
            Value::Struct(_) => "struct",
        }
    }

    /// Build a struct value from `(name, value)` pairs.
    pub fn structure<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Value::Struct(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(unexpected("bool", other)),
        }
    }

    pub fn as_u8(&self) -> Result<u8> {
        match self {
            Value::U8(v) => Ok(*v),
            other => Err(unexpected("uint8", other)),
        }
    }

    /// Unsigned integer of any width, widened to 64 bits.
    pub fn as_u64(&self) -> Result<u64> {
        match self {
            Value::U8(v) => Ok(u64::from(*v)),
            Value::U32(v) => Ok(u64::from(*v)),
            Value::U64(v) => Ok(*v),
            other => Err(unexpected("unsigned integer", other)),
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Value::F64(v) => Ok(*v),
            other => Err(unexpected("double", other)),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(unexpected("string", other)),
        }
    }

    pub fn as_blob(&self) -> Result<&Bytes> {
        match self {
            Value::Blob(b) => Ok(b),
            other => Err(unexpected("blob", other)),
        }
    }

    /// Look up a struct field. Returns `None` for missing fields and for non-struct values.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Struct(fields) => fields.get(name),
            _ => None,
        }
    }
}

fn unexpected(expected: &str, got: &Value) -> Error {
    Error::Protocol(format!("expected {expected}, got {}", got.kind()))
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::U8(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::U32(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::U64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Blob(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_u64_widens_narrower_integers() {
        assert_eq!(Value::U8(7).as_u64().unwrap(), 7);
        assert_eq!(Value::U32(70_000).as_u64().unwrap(), 70_000);
        assert!(Value::F64(1.0).as_u64().is_err());
    }

    #[test]
    fn mismatched_accessor_is_protocol_error() {
        let err = Value::String("yes".into()).as_bool().unwrap_err();
        match err {
            Error::Protocol(msg) => assert_eq!(msg, "expected bool, got string"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn field_lookup_on_struct_only() {
        let v = Value::structure([("filesize", Value::U32(10))]);
        assert_eq!(v.field("filesize"), Some(&Value::U32(10)));
        assert_eq!(v.field("missing"), None);
        assert_eq!(Value::U8(1).field("filesize"), None);
    }
}
