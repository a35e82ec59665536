//! Relay to external file hosts
//!
//! Forwards an assembled artifact as a multipart upload to catbox (permanent)
//! or litterbox (time-limited). The host's response text is returned as-is.

mod client;

use async_trait::async_trait;

use crate::upload::{AssembledArtifact, RelayRequest};

pub use client::HttpRelay;

/// Relay failures
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Failed to read artifact: {0}")]
    Artifact(#[from] std::io::Error),

    #[error("Relay request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Backend responded with status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Outbound relay trait
#[async_trait]
pub trait Relay: Send + Sync {
    /// Send the artifact to the host selected by `request`, returning the
    /// response body untouched
    async fn forward(
        &self,
        artifact: &AssembledArtifact,
        request: &RelayRequest,
    ) -> Result<String, RelayError>;
}
