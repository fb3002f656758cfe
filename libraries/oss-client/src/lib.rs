//! Object-Storage Client
//!
//! Client library for an object-storage backend that hands out pre-signed
//! URLs.
//!
//! # Features
//!
//! - **Sessions**: login, a short-lived bearer credential kept valid by a
//!   refresh alarm, and single-flight refresh when requests hit 401
//! - **Uploads**: the backend plans a single PUT or a multipart transfer;
//!   parts upload with bounded concurrency and are completed in order
//! - **Progress**: a `watch` channel per upload attempt
//! - **Files**: list, inspect, update, delete, and download links
//!
//! # Example
//!
//! ```ignore
//! use oss_client::{ClientConfig, OssClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = OssClient::new(ClientConfig::new("https://oss.example.com"))?;
//!     client.login("user", "password").await?;
//!
//!     let record = client.upload_file("backup.tar").await?;
//!     println!("Uploaded {} ({} bytes)", record.filename, record.file_size);
//!
//!     for file in client.files().list(0, 20).await? {
//!         println!("{}  {}", file.id, file.filename);
//!     }
//!     Ok(())
//! }
//! ```

mod auth;
mod client;
mod config;
mod credential;
mod error;
mod executor;
mod files;
mod pipeline;
mod planner;
mod progress;
mod refresh;
mod session;
mod source;
mod transport;
mod types;

#[cfg(test)]
mod testing;

// Re-export main types
pub use client::{OssClient, UploadTask};
pub use config::ClientConfig;
pub use credential::{Credential, CredentialStore};
pub use error::{ClientError, Result};
pub use progress::{percent_of, ProgressReporter, UploadPhase, UploadProgress};
pub use refresh::{RefreshCoordinator, SessionState};
pub use session::SessionContext;
pub use source::{FileSource, MemorySource, UploadSource};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, RequestBody, Transport};
pub use types::{
    content_type_for_file, CompletionRequest, DownloadUrl, FileMetadata, FileRecord, FileUpdate,
    HealthStatus, LoginRequest, LoginResponse, PartDescriptor, PartResult, PlanResponse,
    PlannedPart, RegisterRequest, ServerProgress, TokenResponse, UserInfo,
};

// Re-export sub-clients and planning helpers for direct use
pub use auth::AuthClient;
pub use executor::{completion_payload, PartUploadExecutor};
pub use files::FileClient;
pub use pipeline::AuthenticatedClient;
pub use planner::{part_count, part_range, validate_plan, UploadPlan, UploadPlanner};

// Cancellation handle accepted by `OssClient::upload`
pub use tokio_util::sync::CancellationToken;
