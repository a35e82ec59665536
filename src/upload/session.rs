//! Upload Session Tracker
//!
//! Sessions are implicit: one exists while the chunk store holds at least one
//! chunk for its upload ID. The tracker adds:
//! - A per-upload read/write lock (chunk writes share it, finalize owns it)
//! - Expiry cleanup of abandoned sessions

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use super::chunk_store::ChunkStore;
use super::types::{StorageError, UploadError, UploadId};

// ============================================================================
// Session Tracker
// ============================================================================

/// Tracks upload sessions on top of the chunk store
#[derive(Clone)]
pub struct SessionTracker {
    inner: Arc<SessionTrackerInner>,
}

struct SessionTrackerInner {
    store: ChunkStore,

    /// Per-upload locks, created on demand
    locks: Mutex<HashMap<UploadId, Arc<RwLock<()>>>>,

    /// Sessions idle longer than this are reaped
    ttl: chrono::Duration,
}

impl SessionTracker {
    pub fn new(store: ChunkStore, ttl: chrono::Duration) -> Self {
        Self {
            inner: Arc::new(SessionTrackerInner {
                store,
                locks: Mutex::new(HashMap::new()),
                ttl,
            }),
        }
    }

    // ========================================================================
    // Session Queries
    // ========================================================================

    pub async fn session_exists(&self, upload_id: &UploadId) -> Result<bool, StorageError> {
        Ok(!self.inner.store.list_indices(upload_id).await?.is_empty())
    }

    /// Received indices, or `SessionNotFound` if there are none
    pub async fn received_indices(&self, upload_id: &UploadId) -> Result<BTreeSet<u64>, UploadError> {
        let indices = self.inner.store.list_indices(upload_id).await?;
        if indices.is_empty() {
            return Err(UploadError::SessionNotFound(upload_id.clone()));
        }
        Ok(indices)
    }

    // ========================================================================
    // Locking
    // ========================================================================

    async fn lock_for(&self, upload_id: &UploadId) -> Arc<RwLock<()>> {
        let mut locks = self.inner.locks.lock().await;
        locks.entry(upload_id.clone()).or_default().clone()
    }

    /// Shared guard held for the duration of one chunk write
    pub async fn begin_chunk_write(&self, upload_id: &UploadId) -> OwnedRwLockReadGuard<()> {
        self.lock_for(upload_id).await.read_owned().await
    }

    /// Exclusive guard held for a whole finalize run
    pub async fn begin_finalize(&self, upload_id: &UploadId) -> OwnedRwLockWriteGuard<()> {
        self.lock_for(upload_id).await.write_owned().await
    }

    /// Drop the lock entry for an upload if nobody holds or awaits it
    pub async fn forget(&self, upload_id: &UploadId) {
        let mut locks = self.inner.locks.lock().await;
        if let Some(lock) = locks.get(upload_id) {
            // The map's own reference is the only one left
            if Arc::strong_count(lock) == 1 {
                locks.remove(upload_id);
            }
        }
    }

    /// Number of uploads with a live lock entry
    pub async fn tracked_count(&self) -> usize {
        self.inner.locks.lock().await.len()
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// Clean up sessions idle for longer than the configured TTL
    ///
    /// Returns the number of sessions cleaned up
    pub async fn cleanup_expired(&self) -> usize {
        let cutoff = Utc::now() - self.inner.ttl;
        self.reap_older_than(cutoff).await
    }

    /// Remove every session last written before `cutoff`.
    ///
    /// Sessions with a chunk write or finalize in progress are skipped.
    pub async fn reap_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let sessions = match self.inner.store.list_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list upload sessions for cleanup");
                return 0;
            }
        };

        let mut count = 0;
        for session in sessions.into_iter().filter(|s| s.last_modified < cutoff) {
            let lock = self.lock_for(&session.upload_id).await;
            let Ok(guard) = lock.try_write_owned() else {
                tracing::debug!(upload_id = %session.upload_id, "Session busy, skipping cleanup");
                continue;
            };

            // A chunk may have landed between the listing and the lock
            match self.inner.store.last_modified(&session.upload_id).await {
                Ok(Some(modified)) if modified < cutoff => {}
                Ok(_) => {
                    drop(guard);
                    self.forget(&session.upload_id).await;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(upload_id = %session.upload_id, error = %e, "Failed to stat session");
                    drop(guard);
                    self.forget(&session.upload_id).await;
                    continue;
                }
            }

            match self.inner.store.delete_session(&session.upload_id).await {
                Ok(removed) => {
                    count += 1;
                    tracing::debug!(
                        upload_id = %session.upload_id,
                        chunks = removed,
                        last_modified = %session.last_modified,
                        "Cleaned up expired session"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        upload_id = %session.upload_id,
                        error = %e,
                        "Failed to clean up expired session"
                    );
                }
            }

            drop(guard);
            self.forget(&session.upload_id).await;
        }

        if count > 0 {
            tracing::info!(count = count, "Cleaned up expired upload sessions");
        }

        count
    }

    /// Start background cleanup task
    pub fn start_cleanup_task(self, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);

            loop {
                interval.tick().await;
                self.cleanup_expired().await;
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
