//! Types for the storage backend's API requests and responses.

use crate::credential::Credential;
use serde::{Deserialize, Serialize};
use std::path::Path;

// =============================================================================
// Authentication Types
// =============================================================================

/// Request body for login endpoint.
#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Token issued by the login and refresh endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Token validity in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl TokenResponse {
    /// Build the credential this response describes, falling back to
    /// `default_lifetime_secs` when the backend omits `expires_in`.
    pub fn to_credential(&self, default_lifetime_secs: u64) -> Credential {
        Credential::issued_now(
            self.access_token.clone(),
            self.expires_in.unwrap_or(default_lifetime_secs),
        )
    }
}

/// Response from successful login.
pub type LoginResponse = TokenResponse;

/// Current user info.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub created_at: String,
}

fn default_true() -> bool {
    true
}

// =============================================================================
// File Types
// =============================================================================

/// A file record as stored by the backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileRecord {
    pub id: i64,
    pub filename: String,
    pub original_filename: String,
    pub content_type: String,
    pub file_size: u64,
    pub oss_key: String,
    pub oss_url: String,
    pub description: Option<String>,
    pub tags: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Partial update of a file record.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
}

/// Download location for a stored object.
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadUrl {
    pub download_url: String,
    /// URL validity in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Response from the health endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

// =============================================================================
// Upload Types
// =============================================================================

/// Description of a file about to be uploaded.
#[derive(Debug, Clone, Serialize)]
pub struct FileMetadata {
    pub filename: String,
    pub content_type: String,
    pub file_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
}

impl FileMetadata {
    /// Metadata with a content type guessed from the file name.
    pub fn new(filename: impl Into<String>, file_size: u64) -> Self {
        let filename = filename.into();
        let content_type = content_type_for_file(Path::new(&filename));
        Self {
            filename,
            content_type,
            file_size,
            description: None,
            tags: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = Some(tags.into());
        self
    }
}

/// Get the MIME type for a file from its extension.
pub fn content_type_for_file(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Raw planning response; validated into an `UploadPlan` before use.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanResponse {
    pub mode: Option<String>,
    pub upload_url: Option<String>,
    pub oss_key: Option<String>,
    pub file_id: Option<i64>,
    pub upload_id: Option<String>,
    pub part_size: Option<u64>,
    #[serde(default)]
    pub parts: Vec<PlannedPart>,
}

/// One part URL as returned by the planning endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct PlannedPart {
    pub part_number: u32,
    pub upload_url: Option<String>,
}

/// One chunk of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartDescriptor {
    /// 1-based part number
    pub part_number: u32,
    pub upload_url: String,
    /// Size of this part's byte range
    pub size: u64,
}

/// A successfully transferred part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartResult {
    pub part_number: u32,
    /// Integrity tag returned by the object store
    pub etag: String,
}

/// Body of the multipart completion call.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub parts: Vec<PartResult>,
}

/// Body of the single-mode registration call.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest<'a> {
    pub oss_key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<i64>,
    #[serde(flatten)]
    pub metadata: &'a FileMetadata,
}

/// Server-tracked state of a multipart upload.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerProgress {
    pub upload_id: String,
    #[serde(default)]
    pub status: Option<String>,
    pub completed_parts: u32,
    pub total_parts: u32,
    #[serde(default)]
    pub uploaded_parts: Vec<u32>,
}

impl ServerProgress {
    pub fn percent(&self) -> f64 {
        if self.total_parts == 0 {
            return 0.0;
        }
        f64::from(self.completed_parts) / f64::from(self.total_parts) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for_file(Path::new("photo.png")), "image/png");
        assert_eq!(content_type_for_file(Path::new("doc.pdf")), "application/pdf");
        assert_eq!(
            content_type_for_file(Path::new("blob.unknownext")),
            "application/octet-stream"
        );
    }

    #[test]
    fn test_token_without_expiry_uses_default_lifetime() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token": "abc", "token_type": "bearer"}"#).unwrap();
        let credential = response.to_credential(1800);
        assert_eq!(credential.token(), "abc");
        assert_eq!(credential.expires_at() - credential.issued_at(), 1800);
    }

    #[test]
    fn test_token_with_expiry() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token": "abc", "expires_in": 60}"#).unwrap();
        assert_eq!(response.token_type, "bearer");
        let credential = response.to_credential(1800);
        assert_eq!(credential.expires_at() - credential.issued_at(), 60);
    }

    #[test]
    fn test_register_request_flattens_metadata() {
        let metadata = FileMetadata::new("report.pdf", 42).with_tags("q3");
        let body = serde_json::to_value(RegisterRequest {
            oss_key: "uploads/report.pdf",
            file_id: None,
            metadata: &metadata,
        })
        .unwrap();

        assert_eq!(
            body,
            serde_json::json!({
                "oss_key": "uploads/report.pdf",
                "filename": "report.pdf",
                "content_type": "application/pdf",
                "file_size": 42,
                "tags": "q3"
            })
        );
    }

    #[test]
    fn test_server_progress_percent() {
        let progress = ServerProgress {
            upload_id: "u1".into(),
            status: None,
            completed_parts: 3,
            total_parts: 12,
            uploaded_parts: vec![1, 2, 3],
        };
        assert!((progress.percent() - 25.0).abs() < f64::EPSILON);
    }
}
