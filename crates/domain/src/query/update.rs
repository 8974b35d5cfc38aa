use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shardwork_core::{AppError, AppResult};

use super::key::KEY_FIELD;

/// One field-level write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum UpdateOperation {
    /// Sets a field, creating intermediate objects as needed.
    Set {
        /// Dot-separated field path.
        field: String,
        /// New value.
        value: Value,
    },
    /// Removes a field when present.
    Unset {
        /// Dot-separated field path.
        field: String,
    },
    /// Adds to an integer field, treating a missing field as zero.
    Inc {
        /// Dot-separated field path.
        field: String,
        /// Signed increment.
        by: i64,
    },
}

impl UpdateOperation {
    fn field(&self) -> &str {
        match self {
            Self::Set { field, .. } | Self::Unset { field } | Self::Inc { field, .. } => {
                field.as_str()
            }
        }
    }
}

/// Ordered list of field writes applied atomically by a store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Update {
    operations: Vec<UpdateOperation>,
}

impl Update {
    /// Creates an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a set operation.
    #[must_use]
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.operations.push(UpdateOperation::Set {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Adds an unset operation.
    #[must_use]
    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.operations.push(UpdateOperation::Unset {
            field: field.into(),
        });
        self
    }

    /// Adds an increment operation.
    #[must_use]
    pub fn inc(mut self, field: impl Into<String>, by: i64) -> Self {
        self.operations.push(UpdateOperation::Inc {
            field: field.into(),
            by,
        });
        self
    }

    /// Returns the operations in application order.
    #[must_use]
    pub fn operations(&self) -> &[UpdateOperation] {
        &self.operations
    }

    /// Returns true when the update writes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Applies every operation to one document.
    ///
    /// The primary key is immutable; writes to it are rejected before any
    /// field is touched.
    pub fn apply(&self, document: &mut Value) -> AppResult<()> {
        if let Some(operation) = self
            .operations
            .iter()
            .find(|operation| operation.field() == KEY_FIELD || operation.field().is_empty())
        {
            return Err(AppError::Validation(format!(
                "update must not write field '{}'",
                operation.field()
            )));
        }

        for operation in &self.operations {
            match operation {
                UpdateOperation::Set { field, value } => {
                    *slot_mut(document, field)? = value.clone();
                }
                UpdateOperation::Unset { field } => unset_path(document, field),
                UpdateOperation::Inc { field, by } => {
                    let slot = slot_mut(document, field)?;
                    let current = match slot {
                        Value::Null => 0,
                        Value::Number(number) => number.as_i64().ok_or_else(|| {
                            AppError::Validation(format!(
                                "cannot increment non-integer field '{field}'"
                            ))
                        })?,
                        _ => {
                            return Err(AppError::Validation(format!(
                                "cannot increment non-numeric field '{field}'"
                            )));
                        }
                    };
                    *slot = Value::from(current.saturating_add(*by));
                }
            }
        }

        Ok(())
    }
}

fn slot_mut<'a>(document: &'a mut Value, path: &str) -> AppResult<&'a mut Value> {
    let mut current = document;
    for segment in path.split('.') {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }

        current = match current {
            Value::Object(map) => map.entry(segment.to_owned()).or_insert(Value::Null),
            Value::Array(items) => {
                let index = segment.parse::<usize>().map_err(|_| {
                    AppError::Validation(format!(
                        "path '{path}' uses non-numeric segment '{segment}' on an array"
                    ))
                })?;
                items.get_mut(index).ok_or_else(|| {
                    AppError::Validation(format!("path '{path}' index {index} is out of bounds"))
                })?
            }
            _ => {
                return Err(AppError::Validation(format!(
                    "path '{path}' traverses a scalar at segment '{segment}'"
                )));
            }
        };
    }

    Ok(current)
}

fn unset_path(document: &mut Value, path: &str) {
    let (parent_path, leaf) = match path.rsplit_once('.') {
        Some((parent, leaf)) => (Some(parent), leaf),
        None => (None, path),
    };

    let parent = match parent_path {
        Some(parent_path) => parent_path
            .split('.')
            .try_fold(&mut *document, |current, segment| match current {
                Value::Object(map) => map.get_mut(segment),
                Value::Array(items) => segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| items.get_mut(index)),
                _ => None,
            }),
        None => Some(document),
    };

    if let Some(Value::Object(map)) = parent {
        map.remove(leaf);
    }
}
