//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::relay::Relay;
use crate::upload::{ChunkStore, ServiceOptions, UploadService};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    uploads: UploadService,
}

impl AppState {
    /// Create state over the given chunk store and relay
    pub fn new(config: Config, store: ChunkStore, relay: Arc<dyn Relay>) -> Self {
        let uploads = UploadService::new(
            store,
            relay,
            ServiceOptions {
                artifact_dir: config.storage.temp_dir.clone(),
                session_ttl: chrono::Duration::hours(config.sessions.ttl_hours),
                retain_chunks: config.storage.retain_chunks,
            },
        );

        Self {
            inner: Arc::new(AppStateInner { config, uploads }),
        }
    }

    /// Create state with on-disk chunk storage under `uploads_dir`
    pub fn with_local_storage(config: Config, relay: Arc<dyn Relay>) -> Self {
        let store = ChunkStore::with_local_storage(config.storage.uploads_dir.clone());
        Self::new(config, store, relay)
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the upload service
    pub fn uploads(&self) -> &UploadService {
        &self.inner.uploads
    }
}
