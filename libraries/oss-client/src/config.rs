//! Client configuration.

use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for connecting to the storage backend.
///
/// Every field has a default so a partial file or environment overlay
/// deserializes cleanly.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Base URL of the backend (e.g., "https://oss.example.com")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Seconds before expiry at which the refresh alarm fires
    #[serde(default = "default_refresh_skew_secs")]
    pub refresh_skew_secs: u64,

    /// Maximum simultaneous part transfers during a multipart upload
    #[serde(default = "default_part_concurrency")]
    pub part_concurrency: usize,

    /// Size above which the client expects a multipart plan.
    /// Advisory only: the backend's plan always wins.
    #[serde(default = "default_multipart_threshold_bytes")]
    pub multipart_threshold_bytes: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Lifetime assumed for a token whose response carries no `expires_in`
    #[serde(default = "default_token_lifetime_secs")]
    pub default_token_lifetime_secs: u64,

    /// API key sent when no bearer credential is present
    #[serde(default)]
    pub api_key: Option<String>,
}

impl ClientConfig {
    /// Create a config with defaults and the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_refresh_skew_secs(mut self, secs: u64) -> Self {
        self.refresh_skew_secs = secs;
        self
    }

    pub fn with_part_concurrency(mut self, concurrency: usize) -> Self {
        self.part_concurrency = concurrency;
        self
    }

    pub fn with_multipart_threshold_bytes(mut self, bytes: u64) -> Self {
        self.multipart_threshold_bytes = bytes;
        self
    }

    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Validate the configuration and return a copy with a normalized URL.
    pub fn validated(&self) -> Result<Self> {
        if self.base_url.is_empty() {
            return Err(ClientError::InvalidUrl("URL cannot be empty".into()));
        }

        let url = self.base_url.trim_end_matches('/').to_string();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ClientError::InvalidUrl(
                "URL must start with http:// or https://".into(),
            ));
        }
        url::Url::parse(&url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;

        if self.part_concurrency == 0 {
            return Err(ClientError::Config(
                "part_concurrency must be at least 1".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ClientError::Config(
                "request_timeout_secs must be at least 1".into(),
            ));
        }

        Ok(Self {
            base_url: url,
            ..self.clone()
        })
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            refresh_skew_secs: default_refresh_skew_secs(),
            part_concurrency: default_part_concurrency(),
            multipart_threshold_bytes: default_multipart_threshold_bytes(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            default_token_lifetime_secs: default_token_lifetime_secs(),
            api_key: None,
        }
    }
}

// Default values
fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_refresh_skew_secs() -> u64 {
    60
}

fn default_part_concurrency() -> usize {
    4
}

fn default_multipart_threshold_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_token_lifetime_secs() -> u64 {
    1800
}
