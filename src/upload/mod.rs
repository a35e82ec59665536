//! Chunked Upload Module
//!
//! Implements large file uploads as independently sent chunks:
//! - Chunks stored by `(upload_id, index)`, any arrival order
//! - Finalize assembles chunks in ascending numeric index order
//! - The assembled file is relayed to catbox or litterbox
//!
//! Protocol Flow:
//! 1. Client posts each chunk with its upload ID and index
//! 2. Client posts finish with filename and destination
//! 3. Server assembles, relays, and returns the host's response

pub mod assembler;
pub mod chunk_store;
pub mod service;
pub mod session;
pub mod types;

pub use assembler::{Assembler, AssemblySummary};
pub use chunk_store::{ChunkStorage, ChunkStore, LocalChunkStorage, MemoryChunkStorage, SessionInfo};
pub use service::{ServiceOptions, UploadService};
pub use session::SessionTracker;
pub use types::*;
