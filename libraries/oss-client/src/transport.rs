//! HTTP transport primitive shared by every higher layer.
//!
//! Requests and responses are plain values so they can be cloned for a
//! replay and inspected in tests. [`ReqwestTransport`] is the production
//! implementation; anything implementing [`Transport`] can stand in for it.

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_LENGTH};
use reqwest::{Body, Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Size of the slices a byte body is streamed in when progress is observed.
const PROGRESS_CHUNK_SIZE: usize = 64 * 1024;

/// Called with the cumulative number of body bytes handed to the network.
pub type BytesSentFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Outgoing request body.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Bytes(Bytes),
}

/// An outgoing HTTP request.
#[derive(Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    bytes_sent: Option<BytesSentFn>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: RequestBody::Empty,
            bytes_sent: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Serialize `body` as the JSON payload.
    pub fn with_json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        let value = serde_json::to_value(body)
            .map_err(|e| ClientError::ParseError(format!("Failed to encode request: {}", e)))?;
        self.body = RequestBody::Json(value);
        Ok(self)
    }

    pub fn with_bytes(mut self, body: Bytes) -> Self {
        self.body = RequestBody::Bytes(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: &str) -> Result<Self> {
        let value = HeaderValue::from_str(value)
            .map_err(|e| ClientError::ParseError(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Set (or replace) the `Authorization` header.
    pub fn with_authorization(self, scheme: &str, secret: &str) -> Result<Self> {
        self.with_header(AUTHORIZATION, &format!("{} {}", scheme, secret))
    }

    pub fn with_bearer(self, token: &str) -> Result<Self> {
        self.with_authorization("Bearer", token)
    }

    /// Observe body bytes as they are handed to the network.
    pub fn on_bytes_sent(mut self, callback: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.bytes_sent = Some(Arc::new(callback));
        self
    }

    pub fn authorization(&self) -> Option<&str> {
        self.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok())
    }

    pub fn body_len(&self) -> usize {
        match &self.body {
            RequestBody::Bytes(b) => b.len(),
            _ => 0,
        }
    }

    pub(crate) fn bytes_sent_callback(&self) -> Option<&BytesSentFn> {
        self.bytes_sent.as_ref()
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("query", &self.query)
            .field("body", &self.body)
            .field("observes_progress", &self.bytes_sent.is_some())
            .finish_non_exhaustive()
    }
}

/// A received HTTP response with its body fully buffered.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// FastAPI-style error body.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

impl HttpResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn header_str(&self, name: impl reqwest::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body, naming `what` in the error.
    pub fn json<T: DeserializeOwned>(&self, what: &str) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ClientError::ParseError(format!("Failed to parse {}: {}", what, e)))
    }

    /// Human-readable failure message: the backend's `detail` when present,
    /// otherwise the raw body, otherwise the status line.
    pub fn error_message(&self) -> String {
        if let Ok(body) = serde_json::from_slice::<ErrorBody>(&self.body) {
            return match body.detail {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
        }
        let text = self.text();
        if text.trim().is_empty() {
            format!("HTTP {}", self.status.as_u16())
        } else {
            text
        }
    }

    /// Convert a non-success response into a `RequestFailure`.
    pub fn into_error(self) -> ClientError {
        ClientError::RequestFailure {
            status: self.status.as_u16(),
            message: self.error_message(),
        }
    }
}

/// The request/response primitive.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request. Non-success statuses are returned as responses,
    /// only transport-level failures are errors.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Transport backed by a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    /// Build a client with the configured timeouts.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(format!("OssClient/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ClientError::Transport)?;
        Ok(Self { http })
    }

    pub fn from_client(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        trace!(method = %request.method, url = %request.url, "Sending request");

        let progress = request.bytes_sent_callback().cloned();
        let mut builder = self
            .http
            .request(request.method, &request.url)
            .headers(request.headers);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Bytes(bytes) => match progress {
                // Object stores reject chunked uploads, so keep the length explicit
                Some(callback) => builder
                    .header(CONTENT_LENGTH, bytes.len())
                    .body(Body::wrap_stream(progress_stream(bytes, callback))),
                None => builder.body(bytes),
            },
        };

        let response = builder.send().await.map_err(ClientError::from_send)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(ClientError::from_send)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Split `body` into slices and report the running total as each is yielded.
fn progress_stream(
    body: Bytes,
    callback: BytesSentFn,
) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send + Sync + 'static {
    let len = body.len();
    let chunks: Vec<Bytes> = (0..len)
        .step_by(PROGRESS_CHUNK_SIZE)
        .map(|start| body.slice(start..(start + PROGRESS_CHUNK_SIZE).min(len)))
        .collect();

    let mut sent = 0u64;
    stream::iter(chunks).map(move |chunk| {
        sent += chunk.len() as u64;
        callback(sent);
        Ok(chunk)
    })
}
