//! Upload Service
//!
//! Ties the chunk store, session tracker, assembler and relay together.
//!
//! Finalize runs `Validating -> Assembling -> Forwarding -> Done` while
//! holding the upload's exclusive lock; any failure ends in `Failed`.

use std::path::PathBuf;
use std::sync::Arc;

use super::assembler::Assembler;
use super::chunk_store::ChunkStore;
use super::session::SessionTracker;
use super::types::{FinalizeStage, FinishRequest, UploadError, UploadId};
use crate::relay::Relay;

/// Tunables for [`UploadService`]
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Where assembled artifacts are written
    pub artifact_dir: PathBuf,
    /// Idle time after which a session may be reaped
    pub session_ttl: chrono::Duration,
    /// Keep chunk storage after a successful relay
    pub retain_chunks: bool,
}

#[derive(Clone)]
pub struct UploadService {
    inner: Arc<UploadServiceInner>,
}

struct UploadServiceInner {
    store: ChunkStore,
    tracker: SessionTracker,
    assembler: Assembler,
    relay: Arc<dyn Relay>,
    retain_chunks: bool,
}

impl UploadService {
    pub fn new(store: ChunkStore, relay: Arc<dyn Relay>, options: ServiceOptions) -> Self {
        let tracker = SessionTracker::new(store.clone(), options.session_ttl);
        let assembler = Assembler::new(store.clone(), options.artifact_dir);

        Self {
            inner: Arc::new(UploadServiceInner {
                store,
                tracker,
                assembler,
                relay,
                retain_chunks: options.retain_chunks,
            }),
        }
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.inner.tracker
    }

    pub fn assembler(&self) -> &Assembler {
        &self.inner.assembler
    }

    /// Store one chunk. Creates the session on first use.
    pub async fn put_chunk(
        &self,
        upload_id: &UploadId,
        index: u64,
        data: &[u8],
    ) -> Result<(), UploadError> {
        let guard = self.inner.tracker.begin_chunk_write(upload_id).await;
        let result = self.inner.store.put_chunk(upload_id, index, data).await;
        drop(guard);

        if let Err(e) = result {
            // The session may have no storage for the reaper to find
            self.inner.tracker.forget(upload_id).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Validate, assemble and relay an upload, returning the host's response
    pub async fn finish(&self, request: &FinishRequest) -> Result<String, UploadError> {
        let upload_id = &request.upload_id;

        let guard = self.inner.tracker.begin_finalize(upload_id).await;
        let result = self.run_finalize(request).await;
        drop(guard);

        self.inner.tracker.forget(upload_id).await;

        if let Err(e) = &result {
            tracing::error!(
                upload_id = %upload_id,
                stage = ?FinalizeStage::Failed,
                error = %e,
                "Finalize failed"
            );
        }

        result
    }

    async fn run_finalize(&self, request: &FinishRequest) -> Result<String, UploadError> {
        let upload_id = &request.upload_id;
        let relay_request = &request.relay;

        tracing::debug!(upload_id = %upload_id, stage = ?FinalizeStage::Validating, "Finalize started");
        let indices = self.inner.tracker.received_indices(upload_id).await?;

        tracing::info!(
            upload_id = %upload_id,
            stage = ?FinalizeStage::Assembling,
            chunks = indices.len(),
            filename = %relay_request.filename,
            "Assembling file from chunks"
        );
        let artifact = self
            .inner
            .assembler
            .assemble(upload_id, &relay_request.filename)
            .await?;

        tracing::info!(
            upload_id = %upload_id,
            stage = ?FinalizeStage::Forwarding,
            destination = relay_request.destination().as_str(),
            size = artifact.size,
            "Forwarding artifact"
        );
        let response = self.inner.relay.forward(&artifact, relay_request).await?;

        if !self.inner.retain_chunks {
            if let Err(e) = self.inner.store.delete_session(upload_id).await {
                tracing::warn!(upload_id = %upload_id, error = %e, "Failed to delete session chunks");
            }
        }

        tracing::info!(upload_id = %upload_id, stage = ?FinalizeStage::Done, "Upload finalized");
        Ok(response)
    }
}

// ============================================================================
// Tests
// ============================================================================
