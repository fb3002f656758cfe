//! Authenticated request pipeline.
//!
//! Every backend call goes through [`AuthenticatedClient::execute`], which
//! attaches the live credential and survives exactly one expiry: a 401 on
//! the first attempt triggers the session's refresh gate and a single replay
//! with the new credential. A 401 on the replay, or a failed refresh, ends the
//! session. A refresh abandoned by a cancelled caller does not.

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::session::SessionContext;
use crate::transport::{HttpRequest, HttpResponse, Transport};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

/// Sends requests on behalf of the current session.
#[derive(Clone)]
pub struct AuthenticatedClient {
    transport: Arc<dyn Transport>,
    session: SessionContext,
    base_url: String,
    api_key: Option<String>,
}

impl AuthenticatedClient {
    pub fn new(transport: Arc<dyn Transport>, session: SessionContext, config: &ClientConfig) -> Self {
        Self {
            transport,
            session,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a backend path such as `/files/`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send `request` with the session's credential, replaying it once after
    /// a refresh if the backend answers 401.
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let (first, presented) = self.authorize(request.clone())?;
        let response = self.transport.send(first).await?;

        if response.status != StatusCode::UNAUTHORIZED {
            return Self::check(response);
        }

        debug!(url = %request.url, "Request rejected with 401, refreshing credential");
        let credential = match self.session.ensure_fresh_token(presented.as_deref()).await {
            Ok(credential) => credential,
            Err(e) => {
                // A failed refresh has already ended the session
                warn!(url = %request.url, error = %e, "Could not refresh credential");
                return Err(match e {
                    ClientError::AuthFailure(_) => e,
                    other => ClientError::AuthFailure(other.to_string()),
                });
            }
        };

        let replay = request.with_bearer(credential.token())?;
        let url = replay.url.clone();
        let response = self.transport.send(replay).await?;

        if response.status == StatusCode::UNAUTHORIZED {
            warn!(url = %url, "Refreshed credential rejected, ending session");
            self.session.teardown();
            return Err(ClientError::AuthFailure(
                "Credential rejected after refresh".to_string(),
            ));
        }

        Self::check(response)
    }

    /// Send a request to a public endpoint: no credential, no refresh.
    pub async fn execute_public(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.transport.send(request).await
    }

    /// Execute and decode the JSON body.
    pub async fn execute_json<T: DeserializeOwned>(&self, request: HttpRequest, what: &str) -> Result<T> {
        self.execute(request).await?.json(what)
    }

    /// Attach the best available authorization. Returns the bearer token
    /// used, if any, so a refresh can tell whether it is already stale.
    fn authorize(&self, request: HttpRequest) -> Result<(HttpRequest, Option<String>)> {
        if let Some(credential) = self.session.credential() {
            let token = credential.token().to_string();
            return Ok((request.with_bearer(&token)?, Some(token)));
        }
        if let Some(api_key) = &self.api_key {
            return Ok((request.with_authorization("ApiKey", api_key)?, None));
        }
        Ok((request, None))
    }

    fn check(response: HttpResponse) -> Result<HttpResponse> {
        if response.is_success() {
            Ok(response)
        } else {
            Err(response.into_error())
        }
    }
}
