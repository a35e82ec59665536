//! Assembler
//!
//! Concatenates a session's chunks in ascending index order into one artifact
//! under the output directory. The artifact is written under a temporary
//! `.part` name and only renamed to `<upload_id>-<filename>` once every chunk
//! has been copied. The returned artifact keeps the handle it was written
//! through; the name on disk is not unique across uploads.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use super::chunk_store::ChunkStore;
use super::types::{AssembledArtifact, UploadError, UploadId};

/// Builds artifacts from stored chunks
#[derive(Clone)]
pub struct Assembler {
    store: ChunkStore,
    output_dir: PathBuf,
}

/// Byte count and digest of an assembled stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblySummary {
    pub size: u64,
    pub sha256: String,
    pub chunk_count: usize,
}

impl Assembler {
    pub fn new(store: ChunkStore, output_dir: PathBuf) -> Self {
        Self { store, output_dir }
    }

    /// Final location of an artifact
    pub fn artifact_path(&self, upload_id: &UploadId, filename: &str) -> PathBuf {
        self.output_dir.join(format!("{}-{}", upload_id, filename))
    }

    /// Stream every chunk of `upload_id` into `writer`, lowest index first.
    ///
    /// Gaps in the index sequence are skipped.
    pub async fn assemble_into<W>(
        &self,
        upload_id: &UploadId,
        writer: &mut W,
    ) -> Result<AssemblySummary, UploadError>
    where
        W: AsyncWrite + Unpin,
    {
        let indices = self.store.list_indices(upload_id).await?;
        if indices.is_empty() {
            return Err(UploadError::SessionNotFound(upload_id.clone()));
        }

        let mut hasher = Sha256::new();
        let mut size = 0u64;

        for &index in &indices {
            let chunk = self
                .store
                .read_chunk(upload_id, index)
                .await
                .map_err(|e| UploadError::Assembly(format!("chunk {}: {}", index, e)))?;

            writer
                .write_all(&chunk)
                .await
                .map_err(|e| UploadError::Assembly(format!("write failed: {}", e)))?;

            hasher.update(&chunk);
            size += chunk.len() as u64;
        }

        writer
            .flush()
            .await
            .map_err(|e| UploadError::Assembly(format!("flush failed: {}", e)))?;

        Ok(AssemblySummary {
            size,
            sha256: hex::encode(hasher.finalize()),
            chunk_count: indices.len(),
        })
    }

    /// Assemble `upload_id` into `<output_dir>/<upload_id>-<filename>`
    pub async fn assemble(
        &self,
        upload_id: &UploadId,
        filename: &str,
    ) -> Result<AssembledArtifact, UploadError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| UploadError::Assembly(format!("cannot create output dir: {}", e)))?;

        let final_path = self.artifact_path(upload_id, filename);
        let part_path = self
            .output_dir
            .join(format!(".{}-{}.{}.part", upload_id, filename, Uuid::new_v4()));

        let result = self.write_part(upload_id, &part_path).await;
        let (file, summary) = match result {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&part_path, &final_path).await {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(UploadError::Assembly(format!("rename failed: {}", e)));
        }

        tracing::info!(
            upload_id = %upload_id,
            path = %final_path.display(),
            size = summary.size,
            chunks = summary.chunk_count,
            sha256 = %summary.sha256,
            "Artifact assembled"
        );

        Ok(AssembledArtifact::new(
            final_path,
            file,
            summary.size,
            summary.sha256,
            summary.chunk_count,
        ))
    }

    /// Write the part file through a handle that stays readable afterwards
    async fn write_part(
        &self,
        upload_id: &UploadId,
        part_path: &Path,
    ) -> Result<(File, AssemblySummary), UploadError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(part_path)
            .await
            .map_err(|e| UploadError::Assembly(format!("cannot create artifact: {}", e)))?;

        let summary = self.assemble_into(upload_id, &mut file).await?;

        file.sync_all()
            .await
            .map_err(|e| UploadError::Assembly(format!("sync failed: {}", e)))?;

        Ok((file, summary))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::upload::chunk_store::{ChunkStorage, MemoryChunkStorage, SessionInfo};
    use crate::upload::types::StorageError;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn id(raw: &str) -> UploadId {
        UploadId::parse(raw).unwrap()
    }

    /// Lists chunks it cannot read back
    struct BrokenStorage {
        inner: MemoryChunkStorage,
        unreadable: u64,
    }

    #[async_trait::async_trait]
    impl ChunkStorage for BrokenStorage {
        async fn put_chunk(&self, id: &UploadId, index: u64, data: &[u8]) -> Result<(), StorageError> {
            self.inner.put_chunk(id, index, data).await
        }

        async fn list_indices(&self, id: &UploadId) -> Result<BTreeSet<u64>, StorageError> {
            self.inner.list_indices(id).await
        }

        async fn read_chunk(&self, id: &UploadId, index: u64) -> Result<Vec<u8>, StorageError> {
            if index == self.unreadable {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "permission denied",
                )));
            }
            self.inner.read_chunk(id, index).await
        }

        async fn delete_session(&self, id: &UploadId) -> Result<usize, StorageError> {
            self.inner.delete_session(id).await
        }

        async fn list_sessions(&self) -> Result<Vec<SessionInfo>, StorageError> {
            self.inner.list_sessions().await
        }
    }

    #[tokio::test]
    async fn test_chunk_assembly() {
        let temp_dir = TempDir::new().unwrap();
        let store = ChunkStore::in_memory();
        let assembler = Assembler::new(store.clone(), temp_dir.path().to_path_buf());
        let upload = id("abc");

        store.put_chunk(&upload, 1, b"World!").await.unwrap();
        store.put_chunk(&upload, 0, b"Hello, ").await.unwrap();

        let artifact = assembler.assemble(&upload, "greeting.txt").await.unwrap();

        assert_eq!(artifact.path, temp_dir.path().join("abc-greeting.txt"));
        assert_eq!(std::fs::read(&artifact.path).unwrap(), b"Hello, World!");
        assert_eq!(artifact.size, 13);
        assert_eq!(artifact.chunk_count, 2);
        assert_eq!(artifact.sha256.len(), 64);

        let mut reader = artifact.reader().await.unwrap();
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).await.unwrap();
        assert_eq!(bytes, b"Hello, World!");
    }

    #[tokio::test]
    async fn test_artifact_reader_survives_name_collision() {
        let temp_dir = TempDir::new().unwrap();
        let store = ChunkStore::in_memory();
        let assembler = Assembler::new(store.clone(), temp_dir.path().to_path_buf());

        // Both land on "a-b-c"
        store.put_chunk(&id("a-b"), 0, b"ALICE-PRIVATE").await.unwrap();
        store.put_chunk(&id("a"), 0, b"bob").await.unwrap();

        let alice = assembler.assemble(&id("a-b"), "c").await.unwrap();
        let bob = assembler.assemble(&id("a"), "b-c").await.unwrap();
        assert_eq!(alice.path, bob.path);

        let mut bytes = Vec::new();
        alice.reader().await.unwrap().read_to_end(&mut bytes).await.unwrap();
        assert_eq!(bytes, b"ALICE-PRIVATE");

        bytes.clear();
        bob.reader().await.unwrap().read_to_end(&mut bytes).await.unwrap();
        assert_eq!(bytes, b"bob");
    }

    #[tokio::test]
    async fn test_numeric_not_lexicographic_order() {
        let store = ChunkStore::in_memory();
        let assembler = Assembler::new(store.clone(), PathBuf::from("unused"));
        let upload = id("order");

        store.put_chunk(&upload, 10, b"ten").await.unwrap();
        store.put_chunk(&upload, 2, b"two,").await.unwrap();

        let mut out = Vec::new();
        assembler.assemble_into(&upload, &mut out).await.unwrap();
        assert_eq!(out, b"two,ten");
    }

    #[tokio::test]
    async fn test_any_arrival_order_gives_same_bytes() {
        let chunks: [(u64, &[u8]); 4] = [(0, b"a"), (1, b"bb"), (2, b"ccc"), (3, b"dddd")];
        let orders: [[usize; 4]; 3] = [[0, 1, 2, 3], [3, 2, 1, 0], [2, 0, 3, 1]];

        for order in orders {
            let store = ChunkStore::in_memory();
            let assembler = Assembler::new(store.clone(), PathBuf::from("unused"));
            let upload = id("perm");

            for i in order {
                let (index, data) = chunks[i];
                store.put_chunk(&upload, index, data).await.unwrap();
            }

            let mut out = Vec::new();
            assembler.assemble_into(&upload, &mut out).await.unwrap();
            assert_eq!(out, b"abbcccdddd", "arrival order {:?}", order);
        }
    }

    #[tokio::test]
    async fn test_gaps_are_skipped() {
        let store = ChunkStore::in_memory();
        let assembler = Assembler::new(store.clone(), PathBuf::from("unused"));
        let upload = id("gappy");

        store.put_chunk(&upload, 0, b"zero|").await.unwrap();
        store.put_chunk(&upload, 2, b"two").await.unwrap();

        let mut out = Vec::new();
        let summary = assembler.assemble_into(&upload, &mut out).await.unwrap();
        assert_eq!(out, b"zero|two");
        assert_eq!(summary.chunk_count, 2);
    }

    #[tokio::test]
    async fn test_resent_chunk_replaces_content() {
        let store = ChunkStore::in_memory();
        let assembler = Assembler::new(store.clone(), PathBuf::from("unused"));
        let upload = id("resend");

        store.put_chunk(&upload, 0, b"first-").await.unwrap();
        store.put_chunk(&upload, 1, b"garbled").await.unwrap();
        store.put_chunk(&upload, 1, b"second").await.unwrap();

        let mut out = Vec::new();
        assembler.assemble_into(&upload, &mut out).await.unwrap();
        assert_eq!(out, b"first-second");
    }

    #[tokio::test]
    async fn test_empty_session_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let assembler = Assembler::new(ChunkStore::in_memory(), temp_dir.path().to_path_buf());

        let result = assembler.assemble(&id("nothing"), "x.bin").await;
        assert!(matches!(result, Err(UploadError::SessionNotFound(_))));
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failed_read_leaves_no_artifact() {
        let temp_dir = TempDir::new().unwrap();
        let store = ChunkStore::with_backend(BrokenStorage {
            inner: MemoryChunkStorage::default(),
            unreadable: 1,
        });
        let assembler = Assembler::new(store.clone(), temp_dir.path().to_path_buf());
        let upload = id("broken");

        store.put_chunk(&upload, 0, b"ok").await.unwrap();
        store.put_chunk(&upload, 1, b"lost").await.unwrap();

        let result = assembler.assemble(&upload, "out.bin").await;
        assert!(matches!(result, Err(UploadError::Assembly(_))));

        // Neither the final name nor a stray .part file
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failed_read_keeps_previous_artifact() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("again-out.bin"), b"earlier result").unwrap();

        let store = ChunkStore::with_backend(BrokenStorage {
            inner: MemoryChunkStorage::default(),
            unreadable: 0,
        });
        let assembler = Assembler::new(store.clone(), temp_dir.path().to_path_buf());
        let upload = id("again");
        store.put_chunk(&upload, 0, b"new").await.unwrap();

        assert!(assembler.assemble(&upload, "out.bin").await.is_err());
        assert_eq!(
            std::fs::read(temp_dir.path().join("again-out.bin")).unwrap(),
            b"earlier result"
        );
    }
}
