//! Authentication methods for the storage backend.

use crate::error::{ClientError, Result};
use crate::pipeline::AuthenticatedClient;
use crate::transport::HttpRequest;
use crate::types::{LoginRequest, LoginResponse, UserInfo};
use reqwest::StatusCode;
use tracing::{debug, info, warn};

/// Authentication client for the storage backend.
pub struct AuthClient<'a> {
    pipeline: &'a AuthenticatedClient,
}

impl<'a> AuthClient<'a> {
    pub(crate) fn new(pipeline: &'a AuthenticatedClient) -> Self {
        Self { pipeline }
    }

    /// Login with username and password.
    ///
    /// Returns the issued token; starting the session is up to the caller.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse> {
        let url = self.pipeline.endpoint("/auth/login");
        debug!(url = %url, username = %username, "Attempting login");

        let request = HttpRequest::post(url).with_json(&LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        })?;
        let response = self.pipeline.execute_public(request).await?;

        if response.is_success() {
            let login_response: LoginResponse = response.json("login response")?;
            info!(
                username = %username,
                expires_in = ?login_response.expires_in,
                "Login successful"
            );
            Ok(login_response)
        } else if response.status == StatusCode::UNAUTHORIZED {
            let message = response.error_message();
            warn!(status = %response.status, error = %message, "Login failed: invalid credentials");
            Err(ClientError::AuthFailure(if message.starts_with("HTTP ") {
                "Invalid username or password".to_string()
            } else {
                message
            }))
        } else {
            Err(response.into_error())
        }
    }

    /// Get the current user for the session.
    pub async fn current_user(&self) -> Result<UserInfo> {
        let request = HttpRequest::get(self.pipeline.endpoint("/auth/me"));
        self.pipeline.execute_json(request, "user info").await
    }

    /// Check whether `token` is accepted by the backend, without touching
    /// the session.
    pub async fn verify_token(&self, token: &str) -> Result<bool> {
        let request = HttpRequest::get(self.pipeline.endpoint("/auth/me")).with_bearer(token)?;
        let response = self.pipeline.execute_public(request).await?;

        match response.status {
            s if s.is_success() => Ok(true),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(false),
            _ => Err(response.into_error()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::session::SessionContext;
    use crate::testing::ScriptedTransport;
    use crate::transport::{MockTransport, Transport};
    use std::sync::Arc;

    fn pipeline(transport: Arc<dyn Transport>) -> AuthenticatedClient {
        let config = ClientConfig::new("http://backend");
        let session = SessionContext::new(Arc::clone(&transport), &config);
        AuthenticatedClient::new(transport, session, &config)
    }

    #[tokio::test]
    async fn test_login_sends_no_authorization() {
        let mut mock = MockTransport::new();
        mock.expect_send()
            .times(1)
            .withf(|req| req.url == "http://backend/auth/login" && req.authorization().is_none())
            .returning(|_| {
                Ok(ScriptedTransport::json(
                    200,
                    serde_json::json!({"access_token": "t", "token_type": "bearer"}),
                ))
            });

        let pipeline = pipeline(Arc::new(mock));
        let response = AuthClient::new(&pipeline).login("alice", "pw").await.unwrap();
        assert_eq!(response.access_token, "t");
        assert_eq!(response.expires_in, None);
    }

    #[tokio::test]
    async fn test_login_failure_uses_detail() {
        let transport = ScriptedTransport::new(|_| {
            ScriptedTransport::json(401, serde_json::json!({"detail": "Incorrect username or password"}))
        });
        let pipeline = pipeline(transport);

        let err = AuthClient::new(&pipeline).login("alice", "bad").await.unwrap_err();
        match err {
            ClientError::AuthFailure(msg) => assert_eq!(msg, "Incorrect username or password"),
            e => panic!("Expected AuthFailure, got: {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_verify_token() {
        let transport = ScriptedTransport::new(|req| match req.authorization() {
            Some("Bearer good") => ScriptedTransport::json(
                200,
                serde_json::json!({"id": 1, "username": "alice", "created_at": "2024-01-01T00:00:00"}),
            ),
            _ => ScriptedTransport::status(401),
        });
        let pipeline = pipeline(transport);
        let auth = AuthClient::new(&pipeline);

        assert!(auth.verify_token("good").await.unwrap());
        assert!(!auth.verify_token("bad").await.unwrap());
    }
}
