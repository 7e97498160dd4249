use crate::error::{CrashwatchError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;

/// Contract for the clip blob storage. Uploading a clip publishes it and
/// removes the local file; a failed upload leaves the file in place so the
/// upload can be retried out of band.
#[async_trait]
pub trait ClipStorage: Send + Sync {
    /// Upload the clip at `path`, returning its public URL.
    async fn upload_clip(&self, path: &Path) -> Result<String>;
}

#[derive(Deserialize)]
struct UploadResponse {
    url: String,
}

/// Clip storage backed by an HTTP blob endpoint.
pub struct HttpClipStorage {
    client: reqwest::Client,
    base_url: String,
}

impl HttpClipStorage {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ClipStorage for HttpClipStorage {
    async fn upload_clip(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path).await?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4");
        let name = format!("accident_{}.{}", Uuid::new_v4(), extension);
        let content_type = match extension {
            "mp4" => "video/mp4",
            _ => "application/octet-stream",
        };

        debug!(path = %path.display(), name = %name, "uploading clip");

        let response = self
            .client
            .put(format!("{}/videos/{}", self.base_url, name))
            .header("content-type", content_type)
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CrashwatchError::storage(format!(
                "upload returned {}",
                response.status()
            )));
        }

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| CrashwatchError::storage(format!("malformed upload response: {}", e)))?;

        // The clip now lives in blob storage; the local copy is done.
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!(path = %path.display(), "failed to remove uploaded clip: {}", e);
        }

        Ok(body.url)
    }
}
