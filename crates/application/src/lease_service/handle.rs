use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use shardwork_core::{AppError, AppResult};
use shardwork_domain::{DocumentKey, LEASE_RESUME_KEY, Lease, LeaseData, LeaseStatus, LeaseValue};
use tokio::sync::Mutex;
use tracing::debug;

use super::renewal::RenewalTask;
use super::{fetch_lease, state_update, version_filter};
use crate::store_ports::DocumentStore;

/// Proof of ownership of one acquired lease.
///
/// Data written with [`LeaseHandle::set_data`] stays in memory until the
/// next [`LeaseHandle::renew`] or [`LeaseHandle::release`]. Dropping a
/// handle without releasing it stops auto-renewal and leaves the lease to
/// expire.
pub struct LeaseHandle {
    inner: Arc<HandleState>,
    renewal: Option<RenewalTask>,
}

pub(super) struct HandleState {
    store: Arc<dyn DocumentStore>,
    collection: String,
    group_id: String,
    object_id: String,
    lease_id: String,
    lease: Mutex<Lease>,
    lost: AtomicBool,
}

impl LeaseHandle {
    pub(super) fn new(store: Arc<dyn DocumentStore>, collection: String, lease: Lease) -> Self {
        Self {
            inner: Arc::new(HandleState {
                store,
                collection,
                group_id: lease.group_id.clone(),
                object_id: lease.object_id.clone(),
                lease_id: lease.lease_id.clone(),
                lease: Mutex::new(lease),
                lost: AtomicBool::new(false),
            }),
            renewal: None,
        }
    }

    pub(super) fn with_auto_renewal(mut self, period: Duration) -> Self {
        self.renewal = Some(RenewalTask::spawn(self.inner.clone(), period));
        self
    }

    /// Returns the leased object identifier.
    #[must_use]
    pub fn object_id(&self) -> &str {
        self.inner.object_id.as_str()
    }

    /// Returns the lease group identifier.
    #[must_use]
    pub fn group_id(&self) -> &str {
        self.inner.group_id.as_str()
    }

    /// Returns the acquisition token of this handle.
    #[must_use]
    pub fn lease_id(&self) -> &str {
        self.inner.lease_id.as_str()
    }

    /// Returns true once a renewal discovered that ownership was lost.
    #[must_use]
    pub fn is_lost(&self) -> bool {
        self.inner.lost.load(Ordering::SeqCst)
    }

    /// Returns the last version written by this handle.
    pub async fn etag(&self) -> i64 {
        self.inner.lease.lock().await.etag
    }

    /// Returns a copy of the in-memory lease data.
    pub async fn data(&self) -> LeaseData {
        self.inner.lease.lock().await.data.clone()
    }

    /// Reads one data value, falling back to `default`.
    pub async fn get_data(&self, key: &str, default: LeaseValue) -> LeaseValue {
        self.inner.lease.lock().await.data.get_or(key, default)
    }

    /// Stores one data value in memory.
    pub async fn set_data(&self, key: &str, value: impl Into<LeaseValue>) {
        self.inner.lease.lock().await.data.set(key, value);
    }

    /// Returns the committed resume key, if any.
    pub async fn resume_key(&self) -> Option<DocumentKey> {
        self.inner.lease.lock().await.data.resume_key()
    }

    /// Stores a new resume key in memory.
    pub async fn set_resume_key(&self, key: DocumentKey) {
        self.set_data(LEASE_RESUME_KEY, key).await;
    }

    /// Extends the lease and persists the in-memory data.
    ///
    /// Fails with `AppError::OwnershipLost` when another holder took the
    /// lease; the caller must abandon the protected work.
    pub async fn renew(&self, with_errors: bool) -> AppResult<()> {
        self.inner.renew(with_errors).await
    }

    /// Frees the lease and persists the in-memory data.
    ///
    /// Releasing a lease that already changed hands is a no-op.
    pub async fn release(mut self) -> AppResult<()> {
        if let Some(renewal) = self.renewal.take() {
            renewal.stop().await;
        }

        self.inner.release().await
    }
}

impl Drop for LeaseHandle {
    fn drop(&mut self) {
        if let Some(renewal) = self.renewal.take() {
            renewal.cancel();
        }
    }
}

impl HandleState {
    pub(super) async fn renew(&self, with_errors: bool) -> AppResult<()> {
        let mut lease = self.lease.lock().await;
        let stored = fetch_lease(
            self.store.as_ref(),
            &self.collection,
            &self.group_id,
            &self.object_id,
        )
        .await?;

        let Some(stored) = stored.filter(|stored| stored.lease_id == self.lease_id) else {
            return Err(self.mark_lost("lease changed hands before renewal"));
        };

        let next = Lease {
            status: LeaseStatus::Leased,
            etag: stored.etag.saturating_add(1),
            timestamp: Utc::now(),
            errors: if with_errors {
                stored.errors.saturating_add(1)
            } else {
                stored.errors
            },
            acquisitions: stored.acquisitions,
            ..lease.clone()
        };

        let matched = self
            .store
            .update_one(
                &self.collection,
                &version_filter(&stored),
                &state_update(&self.collection, &next)?,
            )
            .await?;

        if matched == 0 {
            return Err(self.mark_lost("lease version moved during renewal"));
        }

        debug!(
            group_id = %self.group_id,
            object_id = %self.object_id,
            etag = next.etag,
            "lease renewed"
        );
        *lease = next;
        Ok(())
    }

    async fn release(&self) -> AppResult<()> {
        let mut lease = self.lease.lock().await;
        let stored = fetch_lease(
            self.store.as_ref(),
            &self.collection,
            &self.group_id,
            &self.object_id,
        )
        .await?;

        let Some(stored) = stored.filter(|stored| stored.lease_id == self.lease_id) else {
            debug!(
                group_id = %self.group_id,
                object_id = %self.object_id,
                "lease already released or taken over"
            );
            return Ok(());
        };

        let next = Lease {
            status: LeaseStatus::Available,
            etag: stored.etag.saturating_add(1),
            timestamp: Utc::now(),
            errors: stored.errors,
            acquisitions: stored.acquisitions,
            ..lease.clone()
        };

        let matched = self
            .store
            .update_one(
                &self.collection,
                &version_filter(&stored),
                &state_update(&self.collection, &next)?,
            )
            .await?;

        if matched == 0 {
            debug!(
                group_id = %self.group_id,
                object_id = %self.object_id,
                "lease moved during release"
            );
            return Ok(());
        }

        debug!(
            group_id = %self.group_id,
            object_id = %self.object_id,
            etag = next.etag,
            "lease released"
        );
        *lease = next;
        Ok(())
    }

    fn mark_lost(&self, reason: &str) -> AppError {
        self.lost.store(true, Ordering::SeqCst);
        AppError::OwnershipLost(format!(
            "{reason}: group '{}' object '{}' lease '{}'",
            self.group_id, self.object_id, self.lease_id
        ))
    }
}
