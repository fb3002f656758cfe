//! File record management.

use crate::error::Result;
use crate::pipeline::AuthenticatedClient;
use crate::transport::HttpRequest;
use crate::types::{DownloadUrl, FileRecord, FileUpdate, HealthStatus};
use tracing::{debug, info};

/// Client for the backend's file records.
pub struct FileClient<'a> {
    pipeline: &'a AuthenticatedClient,
}

impl<'a> FileClient<'a> {
    pub(crate) fn new(pipeline: &'a AuthenticatedClient) -> Self {
        Self { pipeline }
    }

    /// List files, newest first as ordered by the backend.
    pub async fn list(&self, skip: u32, limit: u32) -> Result<Vec<FileRecord>> {
        debug!(skip, limit, "Listing files");
        let request = HttpRequest::get(self.pipeline.endpoint("/files/"))
            .with_query("skip", skip)
            .with_query("limit", limit);
        self.pipeline.execute_json(request, "file list").await
    }

    pub async fn get(&self, file_id: i64) -> Result<FileRecord> {
        let request = HttpRequest::get(self.pipeline.endpoint(&format!("/files/{}", file_id)));
        self.pipeline.execute_json(request, "file record").await
    }

    pub async fn update(&self, file_id: i64, update: &FileUpdate) -> Result<FileRecord> {
        let request = HttpRequest::put(self.pipeline.endpoint(&format!("/files/{}", file_id)))
            .with_json(update)?;
        self.pipeline.execute_json(request, "file record").await
    }

    pub async fn delete(&self, file_id: i64) -> Result<()> {
        let request = HttpRequest::delete(self.pipeline.endpoint(&format!("/files/{}", file_id)));
        self.pipeline.execute(request).await?;
        info!(file_id, "File deleted");
        Ok(())
    }

    /// Time-limited download URL for a stored file.
    pub async fn download_url(&self, file_id: i64) -> Result<DownloadUrl> {
        let request = HttpRequest::get(
            self.pipeline
                .endpoint(&format!("/files/{}/download", file_id)),
        )
        .with_query("redirect", false);
        self.pipeline.execute_json(request, "download URL").await
    }

    /// Pre-signed download URL for an object key.
    pub async fn presign_download(&self, oss_key: &str) -> Result<DownloadUrl> {
        let request = HttpRequest::post(self.pipeline.endpoint("/files/presign/download"))
            .with_json(&serde_json::json!({ "oss_key": oss_key }))?;
        self.pipeline.execute_json(request, "download URL").await
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        let request = HttpRequest::get(self.pipeline.endpoint("/health"));
        self.pipeline.execute_json(request, "health status").await
    }
}
