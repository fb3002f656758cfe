//! Error types for the object-storage client.

use thiserror::Error;

/// Errors that can occur when talking to the storage backend or object store.
#[derive(Error, Debug)]
pub enum ClientError {
    /// HTTP request failed at the transport level
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Backend or object store answered with a non-success status
    #[error("Request failed ({status}): {message}")]
    RequestFailure { status: u16, message: String },

    /// Credential could not be refreshed or was rejected after a refresh.
    /// The session has been cleared when this is returned.
    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    /// Upload plan returned by the backend is unusable
    #[error("Invalid upload plan: {0}")]
    PlanningError(String),

    /// A multipart part could not be transferred
    #[error("Upload of part {part_number} failed: {reason}")]
    PartUploadError { part_number: u32, reason: String },

    /// Invalid server URL
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    /// Failed to parse server response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// File not found for upload
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// IO error while reading an upload source
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Upload was cancelled by the caller
    #[error("Upload aborted")]
    UploadAborted,

    /// Server is offline or unreachable
    #[error("Server unreachable: {0}")]
    ServerUnreachable(String),

    /// Request exceeded the configured timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Client configuration is invalid
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// Classify an error raised while sending a request.
    pub(crate) fn from_send(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout(e.to_string())
        } else if e.is_connect() {
            ClientError::ServerUnreachable(e.to_string())
        } else {
            ClientError::Transport(e)
        }
    }

    /// True when the session was terminated by this error.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ClientError::AuthFailure(_))
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::RequestFailure { status, .. } => Some(*status),
            ClientError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
