//! Shared primitives for all Rust crates in Shardwork.

#![forbid(unsafe_code)]

/// Process identity used when holding leases.
pub mod holder;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use holder::HolderId;

/// Result type used across Shardwork crates.
pub type AppResult<T> = Result<T, AppError>;

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Validation(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    pub(crate) fn from_trusted(value: String) -> Self {
        Self(value)
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

/// Common application error categories.
///
/// Lease contention, cursor exhaustion and "no more partitions" are not
/// errors; they are reported through return values.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write operation conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A lease handle no longer owns the lease it was issued for.
    #[error("lease ownership lost: {0}")]
    OwnershipLost(String),

    /// Document store call failed.
    #[error("store error: {0}")]
    Store(String),

    /// Caller-supplied document processing failed.
    #[error("processing error: {0}")]
    Processing(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns true when the error means the current unit of work must be
    /// abandoned without further writes.
    #[must_use]
    pub fn is_ownership_lost(&self) -> bool {
        matches!(self, Self::OwnershipLost(_))
    }
}
