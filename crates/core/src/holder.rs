use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppResult, NonEmptyString};

/// Identity of one process that acquires and renews leases.
///
/// The holder id is informational: ownership is proven by the lease id and
/// version, never by the holder id alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HolderId(NonEmptyString);

impl HolderId {
    /// Creates a validated holder identity.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        NonEmptyString::new(value).map(Self)
    }

    /// Generates a unique holder identity with the given prefix.
    #[must_use]
    pub fn generate(prefix: &str) -> Self {
        let prefix = if prefix.trim().is_empty() {
            "holder"
        } else {
            prefix.trim()
        };

        Self(NonEmptyString::from_trusted(format!(
            "{prefix}-{}-{}",
            std::process::id(),
            Uuid::new_v4().simple()
        )))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for HolderId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}
