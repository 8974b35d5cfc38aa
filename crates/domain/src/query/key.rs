use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Primary key field present on every stored document.
pub const KEY_FIELD: &str = "_id";

/// Primary key of one stored document.
///
/// Integer keys sort before string keys; within one variant the natural
/// ordering applies. Keyset pagination relies on this total order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentKey {
    /// Integer primary key.
    Int(i64),
    /// String primary key.
    Str(String),
}

impl DocumentKey {
    /// Reads a key from a JSON value when it has a supported key type.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => number.as_i64().map(Self::Int),
            Value::String(text) => Some(Self::Str(text.clone())),
            _ => None,
        }
    }

    /// Reads the primary key of a stored document.
    #[must_use]
    pub fn of_document(document: &Value) -> Option<Self> {
        document.get(KEY_FIELD).and_then(Self::from_value)
    }

    /// Converts the key into its JSON representation.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(value) => Value::from(*value),
            Self::Str(value) => Value::from(value.as_str()),
        }
    }
}

impl From<i64> for DocumentKey {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for DocumentKey {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for DocumentKey {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl Display for DocumentKey {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(value) => write!(formatter, "{value}"),
            Self::Str(value) => formatter.write_str(value),
        }
    }
}
