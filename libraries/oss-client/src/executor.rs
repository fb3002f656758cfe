//! Executes upload plans against pre-signed object-store URLs.
//!
//! Part PUTs go straight to the object store through the bare transport:
//! pre-signed URLs carry their own credentials, so no bearer token is
//! attached and no 401 replay applies. Calls to the backend (registration,
//! completion, abort, progress) go through the authenticated pipeline.

use crate::error::{ClientError, Result};
use crate::pipeline::AuthenticatedClient;
use crate::planner::{part_range, UploadPlan};
use crate::progress::{ProgressReporter, UploadPhase};
use crate::source::UploadSource;
use crate::transport::HttpRequest;
use crate::types::{
    CompletionRequest, FileMetadata, FileRecord, PartDescriptor, PartResult, RegisterRequest,
    ServerProgress,
};
use futures_util::stream::{self, StreamExt};
use reqwest::header::{CONTENT_TYPE, ETAG};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Order part results for the completion call.
pub fn completion_payload(mut results: Vec<PartResult>) -> CompletionRequest {
    results.sort_by_key(|r| r.part_number);
    CompletionRequest { parts: results }
}

/// Uploads the bytes of a validated plan and finalizes it.
pub struct PartUploadExecutor<'a> {
    pipeline: &'a AuthenticatedClient,
    concurrency: usize,
}

impl<'a> PartUploadExecutor<'a> {
    pub(crate) fn new(pipeline: &'a AuthenticatedClient, concurrency: usize) -> Self {
        Self {
            pipeline,
            concurrency: concurrency.max(1),
        }
    }

    /// Transfer `source` according to `plan` and finalize the upload.
    ///
    /// Cancelling `cancel` stops dispatching new transfers; transfers already
    /// running finish, then the attempt fails with
    /// [`ClientError::UploadAborted`]. Aborting the backend's multipart
    /// session is left to the caller.
    pub async fn execute(
        &self,
        plan: &UploadPlan,
        metadata: &FileMetadata,
        source: &dyn UploadSource,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<FileRecord> {
        match plan {
            UploadPlan::Single {
                upload_url,
                object_key,
                file_id,
            } => {
                self.upload_single(
                    upload_url, object_key, *file_id, metadata, source, progress, cancel,
                )
                .await
            }
            UploadPlan::Multipart {
                upload_id,
                part_size,
                parts,
                ..
            } => {
                self.upload_multipart(upload_id, *part_size, parts, source, progress, cancel)
                    .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn upload_single(
        &self,
        upload_url: &str,
        object_key: &str,
        file_id: Option<i64>,
        metadata: &FileMetadata,
        source: &dyn UploadSource,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<FileRecord> {
        let total = source.len();
        progress.start(1, total);
        if cancel.is_cancelled() {
            return Err(ClientError::UploadAborted);
        }

        let body = source.read_range(0, total).await?;
        let reporter = progress.clone();
        let request = HttpRequest::put(upload_url)
            .with_bytes(body)
            .with_header(CONTENT_TYPE, &metadata.content_type)?
            .on_bytes_sent(move |sent| reporter.bytes_sent(sent));

        debug!(object_key = %object_key, size = total, "Uploading object");
        let response = self.pipeline.transport().send(request).await?;
        if !response.is_success() {
            warn!(object_key = %object_key, status = %response.status, "Object upload rejected");
            return Err(response.into_error());
        }
        progress.bytes_sent(total);

        if cancel.is_cancelled() {
            return Err(ClientError::UploadAborted);
        }

        progress.set_phase(UploadPhase::Finalizing);
        let record = self.register(object_key, file_id, metadata).await?;
        progress.complete();

        info!(
            file_id = record.id,
            object_key = %object_key,
            size = total,
            "Single upload complete"
        );
        Ok(record)
    }

    async fn upload_multipart(
        &self,
        upload_id: &str,
        part_size: u64,
        parts: &[PartDescriptor],
        source: &dyn UploadSource,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<FileRecord> {
        let file_size = source.len();
        let total_parts = parts.len() as u32;
        progress.start(total_parts, file_size);

        debug!(
            upload_id = %upload_id,
            parts = total_parts,
            concurrency = self.concurrency,
            "Starting multipart transfer"
        );

        let stop = AtomicBool::new(false);
        let completed = AtomicU32::new(0);

        let outcomes: Vec<Result<Option<PartResult>>> = stream::iter(parts.iter().cloned())
            .map(|part| {
                let stop = &stop;
                let completed = &completed;
                async move {
                    // First polled once the pool has a free slot.
                    if stop.load(Ordering::SeqCst) || cancel.is_cancelled() {
                        return Ok(None);
                    }

                    match self.upload_part(&part, part_size, file_size, source).await {
                        Ok(result) => {
                            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                            progress.part_completed(done, part.size);
                            Ok(Some(result))
                        }
                        Err(e) => {
                            stop.store(true, Ordering::SeqCst);
                            Err(e)
                        }
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut results = Vec::with_capacity(parts.len());
        let mut skipped = false;
        for outcome in outcomes {
            match outcome {
                Ok(Some(result)) => results.push(result),
                Ok(None) => skipped = true,
                Err(e) => {
                    warn!(upload_id = %upload_id, error = %e, "Multipart transfer failed");
                    return Err(e);
                }
            }
        }
        if skipped || cancel.is_cancelled() {
            info!(upload_id = %upload_id, uploaded = results.len(), "Multipart transfer cancelled");
            return Err(ClientError::UploadAborted);
        }

        progress.set_phase(UploadPhase::Finalizing);
        let record = self.complete(upload_id, results).await?;
        progress.complete();

        info!(
            file_id = record.id,
            upload_id = %upload_id,
            parts = total_parts,
            size = file_size,
            "Multipart upload complete"
        );
        Ok(record)
    }

    async fn upload_part(
        &self,
        part: &PartDescriptor,
        part_size: u64,
        file_size: u64,
        source: &dyn UploadSource,
    ) -> Result<PartResult> {
        let part_number = part.part_number;
        let failed = |reason: String| ClientError::PartUploadError {
            part_number,
            reason,
        };

        let range = part_range(part_number, part_size, file_size);
        let body = source
            .read_range(range.start, range.end - range.start)
            .await
            .map_err(|e| failed(format!("could not read part: {}", e)))?;

        let response = self
            .pipeline
            .transport()
            .send(HttpRequest::put(&part.upload_url).with_bytes(body))
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !response.is_success() {
            return Err(failed(format!(
                "HTTP {}: {}",
                response.status.as_u16(),
                response.error_message()
            )));
        }

        let etag = response
            .header_str(ETAG)
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .ok_or_else(|| failed("response carried no ETag".to_string()))?;

        debug!(part_number, etag = %etag, "Part uploaded");
        Ok(PartResult {
            part_number,
            etag: etag.to_string(),
        })
    }

    /// Record a single-mode upload with the backend.
    pub async fn register(
        &self,
        object_key: &str,
        file_id: Option<i64>,
        metadata: &FileMetadata,
    ) -> Result<FileRecord> {
        let request = HttpRequest::post(self.pipeline.endpoint("/files/smart-upload/register"))
            .with_json(&RegisterRequest {
                oss_key: object_key,
                file_id,
                metadata,
            })?;
        self.pipeline.execute_json(request, "file record").await
    }

    /// Finalize a multipart upload. Results may arrive in any order.
    pub async fn complete(&self, upload_id: &str, results: Vec<PartResult>) -> Result<FileRecord> {
        let payload = completion_payload(results);
        debug!(upload_id = %upload_id, parts = payload.parts.len(), "Completing multipart upload");

        let request = HttpRequest::post(
            self.pipeline
                .endpoint(&format!("/files/multipart/{}/complete", upload_id)),
        )
        .with_json(&payload)?;
        self.pipeline.execute_json(request, "file record").await
    }

    /// Tell the backend to discard a multipart upload.
    pub async fn abort(&self, upload_id: &str) -> Result<()> {
        let request = HttpRequest::put(
            self.pipeline
                .endpoint(&format!("/files/multipart/{}/abort", upload_id)),
        );
        self.pipeline.execute(request).await?;
        info!(upload_id = %upload_id, "Multipart upload aborted");
        Ok(())
    }

    /// Server-side view of a multipart upload.
    pub async fn get_progress(&self, upload_id: &str) -> Result<ServerProgress> {
        let request = HttpRequest::get(
            self.pipeline
                .endpoint(&format!("/files/multipart/{}/progress", upload_id)),
        );
        self.pipeline.execute_json(request, "upload progress").await
    }
}
