use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use shardwork_core::{AppError, AppResult, HolderId};
use shardwork_domain::{Filter, Lease, Update};
use tracing::debug;

use crate::store_ports::{DocumentStore, decode_document, encode_document};

mod handle;
mod renewal;

pub use handle::LeaseHandle;

const DEFAULT_RENEW_FRACTION: f64 = 0.6;

/// Acquires TTL leases stored as ordinary documents.
///
/// Mutual exclusion relies only on the store's atomic single-document
/// update: every takeover and renewal matches on the previously read
/// `etag`, and first creation relies on the store rejecting a duplicate
/// `_id`.
#[derive(Clone)]
pub struct LeaseManager {
    store: Arc<dyn DocumentStore>,
    collection: String,
    holder_id: HolderId,
    duration_seconds: u32,
    renew_fraction: f64,
}

impl LeaseManager {
    /// Creates a lease manager.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
        holder_id: HolderId,
        duration_seconds: u32,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            holder_id,
            duration_seconds: duration_seconds.max(1),
            renew_fraction: DEFAULT_RENEW_FRACTION,
        }
    }

    /// Overrides the fraction of the TTL after which auto-renewal ticks.
    #[must_use]
    pub fn with_renew_fraction(mut self, renew_fraction: f64) -> Self {
        if renew_fraction > 0.0 && renew_fraction < 1.0 {
            self.renew_fraction = renew_fraction;
        }
        self
    }

    /// Returns the holder identity written on acquisition.
    #[must_use]
    pub fn holder_id(&self) -> &HolderId {
        &self.holder_id
    }

    /// Returns true when no lease exists or the current one is free or expired.
    pub async fn can_acquire(&self, group_id: &str, object_id: &str) -> AppResult<bool> {
        Ok(
            fetch_lease(self.store.as_ref(), &self.collection, group_id, object_id)
                .await?
                .is_none_or(|lease| lease.is_acquirable(Utc::now())),
        )
    }

    /// Attempts to acquire one lease.
    ///
    /// Returns `Ok(None)` when another holder owns the lease or won the race.
    pub async fn acquire(
        &self,
        group_id: &str,
        object_id: &str,
        auto_renew: bool,
    ) -> AppResult<Option<LeaseHandle>> {
        validate_lease_name("group_id", group_id)?;
        validate_lease_name("object_id", object_id)?;

        let now = Utc::now();
        let acquired = match fetch_lease(self.store.as_ref(), &self.collection, group_id, object_id)
            .await?
        {
            None => {
                let lease = Lease::new_acquired(
                    group_id,
                    object_id,
                    self.holder_id.as_str(),
                    self.duration_seconds,
                    now,
                );
                let document = encode_document(&self.collection, &lease)?;
                match self.store.insert_one(&self.collection, document).await {
                    Ok(()) => lease,
                    Err(AppError::Conflict(_)) => {
                        debug!(group_id, object_id, "lost first-acquisition race");
                        return Ok(None);
                    }
                    Err(error) => return Err(error),
                }
            }
            Some(existing) if !existing.is_acquirable(now) => {
                debug!(
                    group_id,
                    object_id,
                    holder_id = %existing.holder_id,
                    "lease is held"
                );
                return Ok(None);
            }
            Some(existing) => {
                let next = existing.acquired_by(self.holder_id.as_str(), self.duration_seconds, now);
                let matched = self
                    .store
                    .update_one(
                        &self.collection,
                        &version_filter(&existing),
                        &state_update(&self.collection, &next)?,
                    )
                    .await?;

                if matched == 0 {
                    debug!(group_id, object_id, "lost lease takeover race");
                    return Ok(None);
                }

                next
            }
        };

        debug!(
            group_id,
            object_id,
            lease_id = %acquired.lease_id,
            etag = acquired.etag,
            "lease acquired"
        );

        let handle = LeaseHandle::new(self.store.clone(), self.collection.clone(), acquired);
        Ok(Some(if auto_renew {
            handle.with_auto_renewal(self.renewal_period())
        } else {
            handle
        }))
    }

    fn renewal_period(&self) -> Duration {
        Duration::from_secs_f64(f64::from(self.duration_seconds) * self.renew_fraction)
            .max(Duration::from_millis(10))
    }
}

fn validate_lease_name(name: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!(
            "lease {name} must not be empty"
        )));
    }

    if name == "group_id" && value.contains('/') {
        return Err(AppError::Validation(format!(
            "lease group_id '{value}' must not contain '/'"
        )));
    }

    Ok(())
}

pub(crate) async fn fetch_lease(
    store: &dyn DocumentStore,
    collection: &str,
    group_id: &str,
    object_id: &str,
) -> AppResult<Option<Lease>> {
    let filter = Filter::new().eq("_id", Lease::document_id(group_id, object_id));
    store
        .find_one(collection, &filter)
        .await?
        .map(|document| decode_document(collection, document))
        .transpose()
}

/// Matches the exact stored version of a lease.
pub(crate) fn version_filter(lease: &Lease) -> Filter {
    Filter::new()
        .eq("_id", lease.id.as_str())
        .eq("lease_id", lease.lease_id.as_str())
        .eq("etag", lease.etag)
}

/// Writes every mutable lease field.
pub(crate) fn state_update(collection: &str, lease: &Lease) -> AppResult<Update> {
    Ok(Update::new()
        .set("lease_id", lease.lease_id.as_str())
        .set("holder_id", lease.holder_id.as_str())
        .set("status", lease.status.as_str())
        .set("etag", lease.etag)
        .set("data", encode_document(collection, &lease.data)?)
        .set("duration_seconds", lease.duration_seconds)
        .set("timestamp", timestamp_value(collection, lease)?)
        .set("errors", lease.errors)
        .set("acquisitions", lease.acquisitions))
}

fn timestamp_value(collection: &str, lease: &Lease) -> AppResult<Value> {
    encode_document(collection, &lease.timestamp)
}
