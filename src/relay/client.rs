//! HTTP relay client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tokio_util::io::ReaderStream;

use super::{Relay, RelayError};
use crate::config::RelayConfig;
use crate::upload::{AssembledArtifact, Destination, RelayRequest};

/// Multipart field carrying the file
const FILE_FIELD: &str = "fileToUpload";

/// Relay over HTTP using reqwest
pub struct HttpRelay {
    client: reqwest::Client,
    catbox_url: String,
    litterbox_url: String,
}

impl HttpRelay {
    pub fn new(config: &RelayConfig) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("chunk-relay-server/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            catbox_url: config.catbox_url.clone(),
            litterbox_url: config.litterbox_url.clone(),
        })
    }

    fn endpoint(&self, destination: Destination) -> &str {
        match destination {
            Destination::Catbox => &self.catbox_url,
            Destination::Litterbox => &self.litterbox_url,
        }
    }

    /// Build the multipart body, streaming the artifact's own handle
    async fn build_form(
        &self,
        artifact: &AssembledArtifact,
        request: &RelayRequest,
    ) -> Result<Form, RelayError> {
        let mut form = Form::new();
        for (name, value) in request.form_fields() {
            form = form.text(name, value);
        }

        let file = artifact.reader().await?;
        let length = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let part = Part::stream_with_length(body, length)
            .file_name(request.filename.clone())
            .mime_str("application/octet-stream")?;

        Ok(form.part(FILE_FIELD, part))
    }
}

#[async_trait]
impl Relay for HttpRelay {
    async fn forward(
        &self,
        artifact: &AssembledArtifact,
        request: &RelayRequest,
    ) -> Result<String, RelayError> {
        let destination = request.destination();
        let url = self.endpoint(destination);
        let form = self.build_form(artifact, request).await?;

        tracing::debug!(
            destination = destination.as_str(),
            url = %url,
            filename = %request.filename,
            size = artifact.size,
            "Relaying artifact"
        );

        let response = self.client.post(url).multipart(form).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::warn!(
                destination = destination.as_str(),
                status = status.as_u16(),
                "Relay backend rejected upload"
            );
            return Err(RelayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!(
            destination = destination.as_str(),
            status = status.as_u16(),
            "Relay complete"
        );

        Ok(body)
    }
}
