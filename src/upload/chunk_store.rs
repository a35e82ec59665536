//! Chunk Store
//!
//! Durable storage for uploaded chunks, keyed by `(upload_id, index)`.
//! Supports local filesystem and in-memory backends.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::{StorageError, UploadId, CHUNK_FILE_PREFIX};

// ============================================================================
// Chunk Storage Trait
// ============================================================================

/// Summary of one stored session, used by the reaper
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub upload_id: UploadId,
    pub last_modified: DateTime<Utc>,
}

/// Trait for chunk storage backends
///
/// A completed `put_chunk` is visible to every later read, and a key always
/// holds either its previous or its new content in full.
#[async_trait::async_trait]
pub trait ChunkStorage: Send + Sync {
    /// Store a chunk, replacing any previous content at the same index
    async fn put_chunk(
        &self,
        upload_id: &UploadId,
        index: u64,
        data: &[u8],
    ) -> Result<(), StorageError>;

    /// Indices stored for a session, ascending. Empty for unknown sessions.
    async fn list_indices(&self, upload_id: &UploadId) -> Result<BTreeSet<u64>, StorageError>;

    /// Read one chunk
    async fn read_chunk(&self, upload_id: &UploadId, index: u64) -> Result<Vec<u8>, StorageError>;

    /// Delete all chunks for a session, returning how many were removed
    async fn delete_session(&self, upload_id: &UploadId) -> Result<usize, StorageError>;

    /// All sessions currently holding storage
    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, StorageError>;

    /// Last write time of one session, `None` if it holds no storage
    async fn last_modified(
        &self,
        upload_id: &UploadId,
    ) -> Result<Option<DateTime<Utc>>, StorageError> {
        Ok(self
            .list_sessions()
            .await?
            .into_iter()
            .find(|s| &s.upload_id == upload_id)
            .map(|s| s.last_modified))
    }
}

// ============================================================================
// Chunk Store (Main Implementation)
// ============================================================================

/// Chunk store with a pluggable backend
#[derive(Clone)]
pub struct ChunkStore {
    inner: Arc<ChunkStoreInner>,
}

struct ChunkStoreInner {
    backend: Box<dyn ChunkStorage>,
}

impl ChunkStore {
    /// Create with local filesystem storage rooted at `base_path`
    pub fn with_local_storage(base_path: PathBuf) -> Self {
        Self::with_backend(LocalChunkStorage::new(base_path))
    }

    /// Create with in-memory storage
    pub fn in_memory() -> Self {
        Self::with_backend(MemoryChunkStorage::default())
    }

    pub fn with_backend(backend: impl ChunkStorage + 'static) -> Self {
        Self {
            inner: Arc::new(ChunkStoreInner {
                backend: Box::new(backend),
            }),
        }
    }

    pub async fn put_chunk(
        &self,
        upload_id: &UploadId,
        index: u64,
        data: &[u8],
    ) -> Result<(), StorageError> {
        self.inner.backend.put_chunk(upload_id, index, data).await?;

        tracing::debug!(
            upload_id = %upload_id,
            index = index,
            bytes = data.len(),
            "Chunk stored"
        );

        Ok(())
    }

    pub async fn list_indices(&self, upload_id: &UploadId) -> Result<BTreeSet<u64>, StorageError> {
        self.inner.backend.list_indices(upload_id).await
    }

    pub async fn read_chunk(&self, upload_id: &UploadId, index: u64) -> Result<Vec<u8>, StorageError> {
        self.inner.backend.read_chunk(upload_id, index).await
    }

    pub async fn delete_session(&self, upload_id: &UploadId) -> Result<usize, StorageError> {
        let removed = self.inner.backend.delete_session(upload_id).await?;
        tracing::debug!(upload_id = %upload_id, removed = removed, "Session chunks deleted");
        Ok(removed)
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionInfo>, StorageError> {
        self.inner.backend.list_sessions().await
    }

    pub async fn last_modified(
        &self,
        upload_id: &UploadId,
    ) -> Result<Option<DateTime<Utc>>, StorageError> {
        self.inner.backend.last_modified(upload_id).await
    }
}

// ============================================================================
// Local Filesystem Storage
// ============================================================================

/// Local filesystem chunk storage: `<base>/<upload_id>/chunk_<index>`
pub struct LocalChunkStorage {
    base_path: PathBuf,
}

impl LocalChunkStorage {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn session_dir(&self, upload_id: &UploadId) -> PathBuf {
        self.base_path.join(upload_id.as_str())
    }

    fn chunk_path(&self, upload_id: &UploadId, index: u64) -> PathBuf {
        self.session_dir(upload_id)
            .join(format!("{}{}", CHUNK_FILE_PREFIX, index))
    }
}

/// Parse `chunk_<n>`; anything else in a session directory is ignored.
fn parse_chunk_file_name(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(CHUNK_FILE_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Write `data` to a unique sibling of `target`, then rename it into place.
async fn write_then_rename(target: &Path, data: &[u8]) -> std::io::Result<()> {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = target.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

    let result = async {
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp_path, target).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp_path).await;
    }
    result
}

#[async_trait::async_trait]
impl ChunkStorage for LocalChunkStorage {
    async fn put_chunk(
        &self,
        upload_id: &UploadId,
        index: u64,
        data: &[u8],
    ) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(self.session_dir(upload_id)).await?;
        write_then_rename(&self.chunk_path(upload_id, index), data).await?;
        Ok(())
    }

    async fn list_indices(&self, upload_id: &UploadId) -> Result<BTreeSet<u64>, StorageError> {
        let mut entries = match tokio::fs::read_dir(self.session_dir(upload_id)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };

        let mut indices = BTreeSet::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(index) = parse_chunk_file_name(&entry.file_name().to_string_lossy()) {
                indices.insert(index);
            }
        }
        Ok(indices)
    }

    async fn read_chunk(&self, upload_id: &UploadId, index: u64) -> Result<Vec<u8>, StorageError> {
        match tokio::fs::read(self.chunk_path(upload_id, index)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                upload_id: upload_id.to_string(),
                index,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_session(&self, upload_id: &UploadId) -> Result<usize, StorageError> {
        let count = self.list_indices(upload_id).await?.len();

        match tokio::fs::remove_dir_all(self.session_dir(upload_id)).await {
            Ok(()) => Ok(count),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, StorageError> {
        let mut entries = match tokio::fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_dir() {
                continue;
            }
            // Directories we did not create are left alone
            let Ok(upload_id) = UploadId::parse(&entry.file_name().to_string_lossy()) else {
                continue;
            };
            let last_modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            sessions.push(SessionInfo {
                upload_id,
                last_modified,
            });
        }
        Ok(sessions)
    }

    async fn last_modified(
        &self,
        upload_id: &UploadId,
    ) -> Result<Option<DateTime<Utc>>, StorageError> {
        match tokio::fs::metadata(self.session_dir(upload_id)).await {
            Ok(metadata) => Ok(Some(
                metadata
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now()),
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// In-Memory Storage
// ============================================================================

#[derive(Default)]
struct MemorySession {
    chunks: BTreeMap<u64, Vec<u8>>,
    last_modified: DateTime<Utc>,
}

/// In-memory chunk storage for tests and benchmarks
#[derive(Default)]
pub struct MemoryChunkStorage {
    sessions: RwLock<HashMap<UploadId, MemorySession>>,
}

#[async_trait::async_trait]
impl ChunkStorage for MemoryChunkStorage {
    async fn put_chunk(
        &self,
        upload_id: &UploadId,
        index: u64,
        data: &[u8],
    ) -> Result<(), StorageError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(upload_id.clone()).or_default();
        session.chunks.insert(index, data.to_vec());
        session.last_modified = Utc::now();
        Ok(())
    }

    async fn list_indices(&self, upload_id: &UploadId) -> Result<BTreeSet<u64>, StorageError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(upload_id)
            .map(|s| s.chunks.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn read_chunk(&self, upload_id: &UploadId, index: u64) -> Result<Vec<u8>, StorageError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(upload_id)
            .and_then(|s| s.chunks.get(&index))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                upload_id: upload_id.to_string(),
                index,
            })
    }

    async fn delete_session(&self, upload_id: &UploadId) -> Result<usize, StorageError> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.remove(upload_id).map(|s| s.chunks.len()).unwrap_or(0))
    }

    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, StorageError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .iter()
            .map(|(id, s)| SessionInfo {
                upload_id: id.clone(),
                last_modified: s.last_modified,
            })
            .collect())
    }

    async fn last_modified(
        &self,
        upload_id: &UploadId,
    ) -> Result<Option<DateTime<Utc>>, StorageError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(upload_id).map(|s| s.last_modified))
    }
}

// ============================================================================
// Tests
// ============================================================================
