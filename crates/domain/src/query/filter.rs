use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::key::{DocumentKey, KEY_FIELD};
use super::lookup_path;

/// Comparison applied by one field predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// Field equals the value. A missing field equals `null`.
    Eq,
    /// Field does not equal the value.
    Ne,
    /// Field is strictly greater than the value.
    Gt,
    /// Field is greater than or equal to the value.
    Gte,
    /// Field is strictly less than the value.
    Lt,
    /// Field is less than or equal to the value.
    Lte,
    /// Field equals one element of the array value.
    In,
    /// Field presence matches the boolean value.
    Exists,
}

impl Comparison {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::In => "in",
            Self::Exists => "exists",
        }
    }
}

/// One named-field predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPredicate {
    /// Dot-separated field path.
    pub field: String,
    /// Comparison operator.
    pub comparison: Comparison,
    /// Comparison operand.
    pub value: Value,
}

impl FieldPredicate {
    /// Evaluates the predicate against one document.
    #[must_use]
    pub fn matches(&self, document: &Value) -> bool {
        let actual = lookup_path(document, self.field.as_str());

        match self.comparison {
            Comparison::Exists => actual.is_some() == self.value.as_bool().unwrap_or(true),
            Comparison::Eq => values_equal(actual.unwrap_or(&Value::Null), &self.value),
            Comparison::Ne => !values_equal(actual.unwrap_or(&Value::Null), &self.value),
            Comparison::In => match &self.value {
                Value::Array(candidates) => {
                    let actual = actual.unwrap_or(&Value::Null);
                    candidates
                        .iter()
                        .any(|candidate| values_equal(actual, candidate))
                }
                _ => false,
            },
            Comparison::Gt | Comparison::Gte | Comparison::Lt | Comparison::Lte => {
                let Some(ordering) = actual.and_then(|actual| compare_values(actual, &self.value))
                else {
                    return false;
                };

                match self.comparison {
                    Comparison::Gt => ordering == Ordering::Greater,
                    Comparison::Gte => ordering != Ordering::Less,
                    Comparison::Lt => ordering == Ordering::Less,
                    _ => ordering != Ordering::Greater,
                }
            }
        }
    }
}

/// Conjunction of field predicates. An empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter {
    predicates: Vec<FieldPredicate>,
}

impl Filter {
    /// Creates an empty filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Matches one document by primary key.
    #[must_use]
    pub fn by_key(key: &DocumentKey) -> Self {
        Self::new().eq(KEY_FIELD, key.to_value())
    }

    /// Adds one predicate.
    #[must_use]
    pub fn with(
        mut self,
        field: impl Into<String>,
        comparison: Comparison,
        value: impl Into<Value>,
    ) -> Self {
        self.predicates.push(FieldPredicate {
            field: field.into(),
            comparison,
            value: value.into(),
        });
        self
    }

    /// Adds an equality predicate.
    #[must_use]
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Comparison::Eq, value)
    }

    /// Adds an inequality predicate.
    #[must_use]
    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Comparison::Ne, value)
    }

    /// Adds a strictly-greater-than predicate.
    #[must_use]
    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Comparison::Gt, value)
    }

    /// Adds a membership predicate.
    #[must_use]
    pub fn is_in(self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.with(field, Comparison::In, Value::Array(values))
    }

    /// Returns the predicates in insertion order.
    #[must_use]
    pub fn predicates(&self) -> &[FieldPredicate] {
        &self.predicates
    }

    /// Returns true when every predicate matches.
    #[must_use]
    pub fn matches(&self, document: &Value) -> bool {
        self.predicates
            .iter()
            .all(|predicate| predicate.matches(document))
    }
}

/// Orders two JSON scalars.
///
/// Numbers sort before strings, mirroring [`DocumentKey`] ordering. Values
/// of other mixed types are incomparable.
fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(left), Value::Number(right)) => match (left.as_i64(), right.as_i64()) {
            (Some(left), Some(right)) => Some(left.cmp(&right)),
            _ => left.as_f64()?.partial_cmp(&right.as_f64()?),
        },
        (Value::String(left), Value::String(right)) => Some(left.cmp(right)),
        (Value::Bool(left), Value::Bool(right)) => Some(left.cmp(right)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Number(_), Value::String(_)) => Some(Ordering::Less),
        (Value::String(_), Value::Number(_)) => Some(Ordering::Greater),
        _ => None,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match compare_values(left, right) {
        Some(ordering) => ordering == Ordering::Equal,
        None => left == right,
    }
}
