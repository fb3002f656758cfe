//! Main storage client.

use crate::auth::AuthClient;
use crate::config::ClientConfig;
use crate::credential::Credential;
use crate::error::{ClientError, Result};
use crate::executor::PartUploadExecutor;
use crate::files::FileClient;
use crate::pipeline::AuthenticatedClient;
use crate::planner::UploadPlanner;
use crate::progress::{ProgressReporter, UploadPhase, UploadProgress};
use crate::session::SessionContext;
use crate::source::{FileSource, UploadSource};
use crate::transport::{ReqwestTransport, Transport};
use crate::types::{FileMetadata, FileRecord, LoginResponse, UserInfo};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Main client for the storage backend.
///
/// Owns one session. Clones share it, so a clone handed to a background
/// upload sees the same credential and the same refresh gate.
///
/// # Example
///
/// ```ignore
/// use oss_client::{ClientConfig, FileSource, OssClient};
///
/// let client = OssClient::new(ClientConfig::new("https://oss.example.com"))?;
/// client.login("alice", "secret").await?;
///
/// let source = FileSource::open("video.mp4").await?;
/// let metadata = source.metadata();
/// let task = client.spawn_upload(Arc::new(source), metadata);
/// let record = task.wait().await?;
/// println!("Stored as {}", record.oss_key);
/// ```
#[derive(Clone)]
pub struct OssClient {
    config: Arc<ClientConfig>,
    pipeline: AuthenticatedClient,
}

impl OssClient {
    /// Create a client with an HTTP transport built from `config`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let config = config.validated()?;
        let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(&config)?);
        Ok(Self::assemble(config, transport))
    }

    /// Create a client on top of an existing transport.
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Ok(Self::assemble(config.validated()?, transport))
    }

    fn assemble(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let session = SessionContext::new(Arc::clone(&transport), &config);
        let pipeline = AuthenticatedClient::new(transport, session, &config);
        debug!(base_url = %config.base_url, "Storage client created");
        Self {
            config: Arc::new(config),
            pipeline,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionContext {
        self.pipeline.session()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session().is_authenticated()
    }

    /// Login with username and password and start the session.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse> {
        let response = self.auth().login(username, password).await?;
        self.session()
            .init(response.to_credential(self.config.default_token_lifetime_secs));
        Ok(response)
    }

    /// Resume a session from a credential obtained earlier.
    pub fn restore_session(&self, credential: Credential) {
        self.session().init(credential);
    }

    /// Resume a session from a bare token whose expiry is unknown.
    pub fn restore_token(&self, token: impl Into<String>) {
        self.restore_session(Credential::issued_now(
            token,
            self.config.default_token_lifetime_secs,
        ));
    }

    /// End the session.
    pub fn logout(&self) {
        self.session().teardown();
        info!("Logged out");
    }

    pub async fn current_user(&self) -> Result<UserInfo> {
        self.auth().current_user().await
    }

    pub fn auth(&self) -> AuthClient<'_> {
        AuthClient::new(&self.pipeline)
    }

    pub fn files(&self) -> FileClient<'_> {
        FileClient::new(&self.pipeline)
    }

    pub fn planner(&self) -> UploadPlanner<'_> {
        UploadPlanner::new(&self.pipeline, self.config.multipart_threshold_bytes)
    }

    pub fn executor(&self) -> PartUploadExecutor<'_> {
        PartUploadExecutor::new(&self.pipeline, self.config.part_concurrency)
    }

    /// Plan and run one upload attempt.
    ///
    /// A cancelled multipart attempt is aborted on the backend before
    /// returning [`ClientError::UploadAborted`].
    pub async fn upload(
        &self,
        source: &dyn UploadSource,
        metadata: &FileMetadata,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<FileRecord> {
        if metadata.file_size != source.len() {
            progress.set_phase(UploadPhase::Failed);
            return Err(ClientError::PlanningError(format!(
                "metadata declares {} bytes but the source holds {}",
                metadata.file_size,
                source.len()
            )));
        }

        progress.set_phase(UploadPhase::Planning);
        let plan = match self.planner().plan(metadata).await {
            Ok(plan) => plan,
            Err(e) => {
                progress.set_phase(UploadPhase::Failed);
                return Err(e);
            }
        };

        if cancel.is_cancelled() {
            progress.set_phase(UploadPhase::Aborted);
            self.abort_backend(plan.upload_id()).await;
            return Err(ClientError::UploadAborted);
        }

        let executor = self.executor();
        match executor
            .execute(&plan, metadata, source, progress, cancel)
            .await
        {
            Ok(record) => Ok(record),
            Err(ClientError::UploadAborted) => {
                progress.set_phase(UploadPhase::Aborted);
                self.abort_backend(plan.upload_id()).await;
                Err(ClientError::UploadAborted)
            }
            Err(e) => {
                progress.set_phase(UploadPhase::Failed);
                Err(e)
            }
        }
    }

    /// Upload a file from disk, waiting for the result.
    pub async fn upload_file(&self, path: impl AsRef<Path>) -> Result<FileRecord> {
        let source = FileSource::open(path).await?;
        let metadata = source.metadata();
        let (progress, _rx) = ProgressReporter::channel();
        self.upload(&source, &metadata, &progress, &CancellationToken::new())
            .await
    }

    /// Run an upload attempt in the background.
    pub fn spawn_upload(&self, source: Arc<dyn UploadSource>, metadata: FileMetadata) -> UploadTask {
        let (reporter, progress) = ProgressReporter::channel();
        let cancel = CancellationToken::new();
        let client = self.clone();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            client
                .upload(source.as_ref(), &metadata, &reporter, &token)
                .await
        });

        UploadTask {
            progress,
            cancel,
            handle,
        }
    }

    async fn abort_backend(&self, upload_id: Option<&str>) {
        let Some(upload_id) = upload_id else {
            return;
        };
        if let Err(e) = self.executor().abort(upload_id).await {
            warn!(upload_id = %upload_id, error = %e, "Failed to abort multipart upload");
        }
    }
}

/// Handle to an upload running in the background.
pub struct UploadTask {
    progress: watch::Receiver<UploadProgress>,
    cancel: CancellationToken,
    handle: JoinHandle<Result<FileRecord>>,
}

impl UploadTask {
    /// Progress of the attempt. The channel closes when the attempt ends.
    pub fn progress(&self) -> watch::Receiver<UploadProgress> {
        self.progress.clone()
    }

    /// Stop dispatching transfers; the attempt ends with `UploadAborted`.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the attempt's outcome.
    pub async fn wait(self) -> Result<FileRecord> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(ClientError::UploadAborted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use crate::testing::ScriptedTransport;
    use crate::transport::HttpRequest;
    use std::time::Duration;

    fn record() -> serde_json::Value {
        serde_json::json!({
            "id": 3,
            "filename": "a.bin",
            "original_filename": "a.bin",
            "content_type": "application/octet-stream",
            "file_size": 40,
            "oss_key": "uploads/a.bin",
            "oss_url": "https://store/uploads/a.bin",
            "created_at": "2024-01-01T00:00:00",
            "updated_at": "2024-01-01T00:00:00"
        })
    }

    fn multipart_plan() -> serde_json::Value {
        serde_json::json!({
            "mode": "multipart",
            "oss_key": "uploads/a.bin",
            "upload_id": "up-9",
            "part_size": 10,
            "parts": (1..=4)
                .map(|n| serde_json::json!({
                    "part_number": n,
                    "upload_url": format!("https://store/part/{}", n)
                }))
                .collect::<Vec<_>>()
        })
    }

    fn backend(req: &HttpRequest) -> crate::transport::HttpResponse {
        let url = req.url.as_str();
        if url.ends_with("/auth/login") {
            ScriptedTransport::json(200, serde_json::json!({"access_token": "t1", "expires_in": 3600}))
        } else if url.ends_with("/files/smart-upload") {
            ScriptedTransport::json(200, multipart_plan())
        } else if url.starts_with("https://store/part/") {
            ScriptedTransport::etag("\"e\"")
        } else if url.ends_with("/complete") {
            ScriptedTransport::json(200, record())
        } else if url.ends_with("/abort") {
            ScriptedTransport::status(200)
        } else {
            ScriptedTransport::status(404)
        }
    }

    fn client(transport: Arc<dyn Transport>) -> OssClient {
        OssClient::with_transport(ClientConfig::new("http://backend/"), transport).unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let transport = ScriptedTransport::new(|_| ScriptedTransport::status(200));
        let result = OssClient::with_transport(ClientConfig::new("ftp://backend"), transport);
        assert!(matches!(result, Err(ClientError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_login_starts_session() {
        let transport = ScriptedTransport::new(backend);
        let client = client(transport.clone());
        assert!(!client.is_authenticated());

        client.login("alice", "pw").await.unwrap();
        assert!(client.is_authenticated());
        assert_eq!(client.session().credential().unwrap().token(), "t1");
        assert_eq!(transport.requests()[0].url, "http://backend/auth/login");

        client.logout();
        assert!(!client.is_authenticated());
    }

    #[tokio::test]
    async fn test_spawned_upload_completes() {
        let transport = ScriptedTransport::new(backend);
        let client = client(transport.clone());
        client.restore_token("t1");

        let task = client.spawn_upload(
            Arc::new(MemorySource::new(vec![7u8; 40])),
            FileMetadata::new("a.bin", 40),
        );
        let progress = task.progress();
        let record = task.wait().await.unwrap();

        assert_eq!(record.id, 3);
        assert_eq!(progress.borrow().phase, UploadPhase::Completed);
        assert_eq!(transport.requests_to("https://store/part/").len(), 4);
        assert!(transport.requests_to("/abort").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_upload_aborts_backend() {
        let transport = ScriptedTransport::delayed(backend, |req| {
            if req.url.starts_with("https://store/") {
                Duration::from_secs(1)
            } else {
                Duration::ZERO
            }
        });
        let client = OssClient::with_transport(
            ClientConfig::new("http://backend").with_part_concurrency(1),
            transport.clone(),
        )
        .unwrap();
        client.restore_token("t1");

        let task = client.spawn_upload(
            Arc::new(MemorySource::new(vec![7u8; 40])),
            FileMetadata::new("a.bin", 40),
        );
        let mut progress = task.progress();
        while progress.borrow_and_update().phase != UploadPhase::Transferring {
            progress.changed().await.unwrap();
        }
        task.abort();

        let err = task.wait().await.unwrap_err();
        assert!(matches!(err, ClientError::UploadAborted));
        assert_eq!(progress.borrow().phase, UploadPhase::Aborted);
        assert!(transport.requests_to("https://store/part/").len() < 4);
        assert!(transport.requests_to("/complete").is_empty());
        assert_eq!(transport.requests_to("/files/multipart/up-9/abort").len(), 1);
    }

    #[tokio::test]
    async fn test_size_mismatch_is_a_planning_error() {
        let transport = ScriptedTransport::new(backend);
        let client = client(transport.clone());
        let (reporter, rx) = ProgressReporter::channel();

        let err = client
            .upload(
                &MemorySource::new(vec![0u8; 5]),
                &FileMetadata::new("a.bin", 40),
                &reporter,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::PlanningError(_)));
        assert_eq!(rx.borrow().phase, UploadPhase::Failed);
        assert!(transport.requests().is_empty());
    }
}
