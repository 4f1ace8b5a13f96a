use crate::error::{Error, ErrorType};
use serde::Serialize;
use std::fmt;

/// Default maximum length of a string value, in bytes.
pub const MAX_STRING_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Permission {
    #[serde(rename = "pr")]
    Read,
    #[serde(rename = "pw")]
    Write,
    #[serde(rename = "ev")]
    Notify,
    /// Only discoverable by parties that already know the characteristic type.
    #[serde(rename = "hd")]
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Bool,
    String,
    Int,
    Float,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    String(String),
    Int(i64),
    Float(f64),
}

impl Value {
    pub fn format(&self) -> Format {
        match self {
            Value::Bool(_) => Format::Bool,
            Value::String(_) => Format::String,
            Value::Int(_) => Format::Int,
            Value::Float(_) => Format::Float,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
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
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Rejects values the protocol cannot carry.
    pub(crate) fn check_supported(&self) -> Result<(), Error> {
        match self {
            Value::Float(f) if !f.is_finite() => Err(Error::from_string(
                format!("float value {f} is not finite"),
                ErrorType::UnsupportedValue,
            )),
            Value::String(s) if s.len() > MAX_STRING_LEN => Err(Error::from_string(
                format!("string of {} bytes exceeds {MAX_STRING_LEN}", s.len()),
                ErrorType::UnsupportedValue,
            )),
            _ => Ok(()),
        }
    }

    /// Decode a value received from a remote party, coercing it to `format`.
    pub fn from_json(format: Format, value: &serde_json::Value) -> Result<Value, Error> {
        let decoded = match (format, value) {
            (Format::Bool, serde_json::Value::Bool(b)) => Some(Value::Bool(*b)),
            // Controllers commonly send 0/1 for booleans.
            (Format::Bool, serde_json::Value::Number(n)) => match n.as_u64() {
                Some(0) => Some(Value::Bool(false)),
                Some(1) => Some(Value::Bool(true)),
                _ => None,
            },
            (Format::String, serde_json::Value::String(s)) => Some(Value::String(s.clone())),
            (Format::Int, serde_json::Value::Number(n)) => n.as_i64().map(Value::Int),
            (Format::Float, serde_json::Value::Number(n)) => n.as_f64().map(Value::Float),
            _ => None,
        };
        let decoded = decoded.ok_or_else(|| {
            Error::from_string(
                format!("{value} is not a valid {format} value"),
                ErrorType::FormatMismatch,
            )
        })?;
        decoded.check_supported()?;
        Ok(decoded)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Format::Bool => "bool",
            Format::String => "string",
            Format::Int => "int",
            Format::Float => "float",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}
