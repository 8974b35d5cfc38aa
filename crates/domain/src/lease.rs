use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use shardwork_core::{AppError, AppResult};

use crate::query::DocumentKey;

/// Lease data key holding the last committed document key of a partition.
pub const LEASE_RESUME_KEY: &str = "resume_id";

/// Lease data key recording the partition status written by the holder.
pub const LEASE_PARTITION_STATUS_KEY: &str = "partition_status";

/// Lease lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseStatus {
    /// Nobody holds the lease.
    Available,
    /// One holder owns the lease until it is released or expires.
    Leased,
    /// The lease was parked after an unrecoverable failure.
    Error,
}

impl LeaseStatus {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Leased => "leased",
            Self::Error => "error",
        }
    }

    /// Parses storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "available" => Ok(Self::Available),
            "leased" => Ok(Self::Leased),
            "error" => Ok(Self::Error),
            _ => Err(AppError::Validation(format!(
                "unknown lease status '{value}'"
            ))),
        }
    }
}

/// Scalar value stored in lease data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LeaseValue {
    /// Integer value.
    Int(i64),
    /// String value.
    Str(String),
}

impl From<DocumentKey> for LeaseValue {
    fn from(value: DocumentKey) -> Self {
        match value {
            DocumentKey::Int(value) => Self::Int(value),
            DocumentKey::Str(value) => Self::Str(value),
        }
    }
}

impl From<&str> for LeaseValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<i64> for LeaseValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// Holder-owned key/value bag persisted with the lease.
///
/// Known keys: [`LEASE_RESUME_KEY`] and [`LEASE_PARTITION_STATUS_KEY`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseData(BTreeMap<String, LeaseValue>);

impl LeaseData {
    /// Returns one value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&LeaseValue> {
        self.0.get(key)
    }

    /// Returns one value or the provided default.
    #[must_use]
    pub fn get_or(&self, key: &str, default: LeaseValue) -> LeaseValue {
        self.0.get(key).cloned().unwrap_or(default)
    }

    /// Stores one value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<LeaseValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Returns the committed resume key, if any.
    #[must_use]
    pub fn resume_key(&self) -> Option<DocumentKey> {
        match self.0.get(LEASE_RESUME_KEY)? {
            LeaseValue::Int(value) => Some(DocumentKey::Int(*value)),
            LeaseValue::Str(value) => Some(DocumentKey::Str(value.clone())),
        }
    }

    /// Returns a string value.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key)? {
            LeaseValue::Str(value) => Some(value.as_str()),
            LeaseValue::Int(_) => None,
        }
    }
}

/// TTL-based ownership record for one `(object_id, group_id)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    /// Document key, `"<group_id>/<object_id>"`; group ids never contain `/`.
    #[serde(rename = "_id")]
    pub id: String,
    /// Protected resource.
    pub object_id: String,
    /// Namespace of the protected resource.
    pub group_id: String,
    /// Token that changes every time the lease changes hands.
    pub lease_id: String,
    /// Holder that last acquired the lease.
    pub holder_id: String,
    /// Lifecycle status.
    pub status: LeaseStatus,
    /// Optimistic-concurrency version, bumped on every write.
    pub etag: i64,
    /// Holder-owned data such as the resume key.
    #[serde(default)]
    pub data: LeaseData,
    /// Time to live in seconds.
    pub duration_seconds: u32,
    /// Last write time.
    pub timestamp: DateTime<Utc>,
    /// Failed renewals reported by holders.
    #[serde(default)]
    pub errors: i64,
    /// Number of successful acquisitions.
    #[serde(default)]
    pub acquisitions: i64,
}

impl Lease {
    /// Returns the document key for one lease.
    #[must_use]
    pub fn document_id(group_id: &str, object_id: &str) -> String {
        format!("{group_id}/{object_id}")
    }

    /// Creates the first, already-acquired lease for a resource.
    #[must_use]
    pub fn new_acquired(
        group_id: &str,
        object_id: &str,
        holder_id: &str,
        duration_seconds: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Self::document_id(group_id, object_id),
            object_id: object_id.to_owned(),
            group_id: group_id.to_owned(),
            lease_id: uuid::Uuid::new_v4().to_string(),
            holder_id: holder_id.to_owned(),
            status: LeaseStatus::Leased,
            etag: 0,
            data: LeaseData::default(),
            duration_seconds,
            timestamp: now,
            errors: 0,
            acquisitions: 1,
        }
    }

    /// Returns true when the last write is older than the TTL.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.timestamp)
            > Duration::seconds(i64::from(self.duration_seconds))
    }

    /// Returns true when a new holder may take the lease.
    #[must_use]
    pub fn is_acquirable(&self, now: DateTime<Utc>) -> bool {
        self.status == LeaseStatus::Available || self.is_expired(now)
    }

    /// Returns the state after a successful takeover by `holder_id`.
    ///
    /// Data is carried over so the next holder resumes where the previous
    /// one committed.
    #[must_use]
    pub fn acquired_by(&self, holder_id: &str, duration_seconds: u32, now: DateTime<Utc>) -> Self {
        Self {
            lease_id: uuid::Uuid::new_v4().to_string(),
            holder_id: holder_id.to_owned(),
            status: LeaseStatus::Leased,
            etag: self.etag.saturating_add(1),
            duration_seconds,
            timestamp: now,
            acquisitions: self.acquisitions.saturating_add(1),
            ..self.clone()
        }
    }
}
