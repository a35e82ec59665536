//! Upload types for the chunk relay protocol

use std::fmt;
use std::io::SeekFrom;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::AsyncSeekExt;

use crate::relay::RelayError;

// ============================================================================
// Constants
// ============================================================================

/// Longest accepted upload identifier, in bytes
pub const MAX_UPLOAD_ID_LEN: usize = 128;

/// File name prefix of a stored chunk (`chunk_<index>`)
pub const CHUNK_FILE_PREFIX: &str = "chunk_";

/// Litterbox retention used when the client sends no `time`
pub const DEFAULT_LITTERBOX_TIME: &str = "1h";

// ============================================================================
// Identifiers
// ============================================================================

/// Client-chosen identifier of one upload session.
///
/// Guaranteed to be usable as a single filesystem path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UploadId(String);

impl UploadId {
    pub fn parse(raw: &str) -> Result<Self, UploadError> {
        let invalid = || UploadError::Validation("Invalid uploadId".to_string());

        if raw.is_empty() || raw.len() > MAX_UPLOAD_ID_LEN {
            return Err(invalid());
        }
        if raw == "." || raw == ".." {
            return Err(invalid());
        }
        if raw
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control())
        {
            return Err(invalid());
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a decimal chunk index. Ordering is always numeric.
pub fn parse_chunk_index(raw: &str) -> Result<u64, UploadError> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(UploadError::Validation("Invalid chunk index".to_string()));
    }
    raw.parse::<u64>()
        .map_err(|_| UploadError::Validation("Invalid chunk index".to_string()))
}

/// Reduce a client-supplied filename to its last path component.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let name = raw
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or("")
        .trim();

    if name.is_empty() || name == "." || name == ".." || name.chars().any(char::is_control) {
        return None;
    }
    Some(name.to_string())
}

// ============================================================================
// Destination Profiles
// ============================================================================

/// Which file host receives the assembled upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
    /// Permanent store
    #[default]
    Catbox,
    /// Time-limited store
    Litterbox,
}

impl Destination {
    /// Only an exact `litterbox` selects the time-limited store.
    pub fn from_field(raw: Option<&str>) -> Self {
        match raw {
            Some("litterbox") => Self::Litterbox,
            _ => Self::Catbox,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Catbox => "catbox",
            Self::Litterbox => "litterbox",
        }
    }
}

// ============================================================================
// Finalize Types
// ============================================================================

/// Raw `/finish` fields as sent by the client
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishParams {
    pub upload_id: Option<String>,
    pub filename: Option<String>,
    pub userhash: Option<String>,
    pub destination: Option<String>,
    pub time: Option<String>,
}

/// Profile-specific relay options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayTarget {
    Catbox { userhash: Option<String> },
    Litterbox { time: String },
}

/// Everything the relay needs besides the artifact itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRequest {
    pub filename: String,
    pub target: RelayTarget,
}

impl RelayRequest {
    pub fn new(
        filename: String,
        destination: Destination,
        userhash: Option<String>,
        time: Option<String>,
    ) -> Self {
        let target = match destination {
            Destination::Catbox => RelayTarget::Catbox {
                userhash: userhash.filter(|h| !h.is_empty()),
            },
            Destination::Litterbox => RelayTarget::Litterbox {
                time: time.unwrap_or_else(|| DEFAULT_LITTERBOX_TIME.to_string()),
            },
        };

        Self { filename, target }
    }

    pub fn destination(&self) -> Destination {
        match self.target {
            RelayTarget::Catbox { .. } => Destination::Catbox,
            RelayTarget::Litterbox { .. } => Destination::Litterbox,
        }
    }

    /// Text fields of the outbound multipart body, in send order.
    ///
    /// The file itself always follows as `fileToUpload`.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![("reqtype", "fileupload".to_string())];
        match &self.target {
            RelayTarget::Catbox { userhash } => {
                if let Some(hash) = userhash {
                    fields.push(("userhash", hash.clone()));
                }
            }
            RelayTarget::Litterbox { time } => {
                fields.push(("time", time.clone()));
            }
        }
        fields
    }
}

/// Validated `/finish` request
#[derive(Debug, Clone)]
pub struct FinishRequest {
    pub upload_id: UploadId,
    pub relay: RelayRequest,
}

impl FinishRequest {
    pub fn from_params(params: FinishParams) -> Result<Self, UploadError> {
        let missing = || UploadError::Validation("Missing uploadId or filename".to_string());

        let raw_id = params.upload_id.filter(|s| !s.is_empty()).ok_or_else(missing)?;
        let raw_name = params.filename.filter(|s| !s.is_empty()).ok_or_else(missing)?;

        let upload_id = UploadId::parse(&raw_id)?;
        let filename = sanitize_filename(&raw_name)
            .ok_or_else(|| UploadError::Validation("Invalid filename".to_string()))?;

        let destination = Destination::from_field(params.destination.as_deref());

        Ok(Self {
            upload_id,
            relay: RelayRequest::new(filename, destination, params.userhash, params.time),
        })
    }
}

/// A completed assembly.
///
/// Holds the file it was written through, so readers see these bytes even if
/// `path` is later replaced by another upload with the same artifact name.
#[derive(Debug)]
pub struct AssembledArtifact {
    pub path: PathBuf,
    pub size: u64,
    /// SHA-256 of the assembled bytes
    pub sha256: String,
    pub chunk_count: usize,
    file: File,
}

impl AssembledArtifact {
    pub fn new(path: PathBuf, file: File, size: u64, sha256: String, chunk_count: usize) -> Self {
        Self {
            path,
            size,
            sha256,
            chunk_count,
            file,
        }
    }

    /// A fresh handle on the assembled bytes, positioned at the start
    pub async fn reader(&self) -> std::io::Result<File> {
        let mut file = self.file.try_clone().await?;
        file.seek(SeekFrom::Start(0)).await?;
        Ok(file)
    }
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ChunkReceipt {
    pub message: String,
}

impl ChunkReceipt {
    pub fn new(upload_id: &UploadId, index: u64) -> Self {
        Self {
            message: format!("Chunk {} for {} received.", index, upload_id),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FinishResponse {
    /// Backend response text, passed through untouched
    pub url: String,
}

// ============================================================================
// Finalize State Machine
// ============================================================================

/// Stages of one finalize call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeStage {
    Validating,
    Assembling,
    Forwarding,
    Done,
    Failed,
}

// ============================================================================
// Error Types
// ============================================================================

/// Chunk store errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Chunk not found: {upload_id}/{index}")]
    NotFound { upload_id: String, index: u64 },

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("{0}")]
    Validation(String),

    #[error("No chunks found for this uploadId")]
    SessionNotFound(UploadId),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Assembly failed: {0}")]
    Assembly(String),

    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl UploadError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::SessionNotFound(_) => StatusCode::BAD_REQUEST,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Assembly(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Relay(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
