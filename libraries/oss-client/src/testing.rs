//! In-memory transport for unit tests.

use crate::error::Result;
use crate::transport::{HttpRequest, HttpResponse, RequestBody, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::header::{HeaderValue, ETAG};
use reqwest::StatusCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type Handler = Box<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;
type DelayFn = Box<dyn Fn(&HttpRequest) -> Duration + Send + Sync>;

/// What the transport saw for one request.
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub authorization: Option<String>,
    pub json: Option<serde_json::Value>,
    pub body_len: usize,
}

/// Answers requests from a closure, optionally after a per-request delay,
/// and records what it saw.
pub(crate) struct ScriptedTransport {
    handler: Handler,
    delay: Option<DelayFn>,
    requests: Mutex<Vec<RecordedRequest>>,
    completed: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(
        handler: impl Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self::build(Box::new(handler), None))
    }

    pub fn delayed(
        handler: impl Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
        delay: impl Fn(&HttpRequest) -> Duration + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self::build(Box::new(handler), Some(Box::new(delay))))
    }

    fn build(handler: Handler, delay: Option<DelayFn>) -> Self {
        Self {
            handler,
            delay,
            requests: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn status(code: u16) -> HttpResponse {
        HttpResponse::new(StatusCode::from_u16(code).expect("valid status"))
    }

    pub fn json(code: u16, body: serde_json::Value) -> HttpResponse {
        let mut response = Self::status(code);
        response.body = Bytes::from(body.to_string());
        response
    }

    pub fn etag(tag: &str) -> HttpResponse {
        let mut response = Self::status(200);
        response
            .headers
            .insert(ETAG, HeaderValue::from_str(tag).expect("valid etag"));
        response
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_to(&self, fragment: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.contains(fragment))
            .collect()
    }

    /// URLs in the order their responses were produced.
    pub fn completion_order(&self) -> Vec<String> {
        self.completed.lock().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().push(RecordedRequest {
            method: request.method.to_string(),
            url: request.url.clone(),
            authorization: request.authorization().map(str::to_owned),
            json: match &request.body {
                RequestBody::Json(value) => Some(value.clone()),
                _ => None,
            },
            body_len: request.body_len(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = &self.delay {
            let wait = delay(&request);
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }

        if let Some(callback) = request.bytes_sent_callback() {
            callback(request.body_len() as u64);
        }

        let response = (self.handler)(&request);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.lock().push(request.url.clone());
        Ok(response)
    }
}
