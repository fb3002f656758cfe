//! Session context shared by the request pipeline, planner and executor.

use crate::config::ClientConfig;
use crate::credential::Credential;
use crate::error::Result;
use crate::refresh::{RefreshCoordinator, SessionState};
use crate::transport::Transport;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Owns the credential and the refresh gate for one logged-in user.
///
/// Cloning is cheap and every clone observes the same session. Components
/// receive the context through their constructors instead of reaching for
/// process-wide state.
#[derive(Clone)]
pub struct SessionContext {
    coordinator: Arc<RefreshCoordinator>,
}

impl SessionContext {
    pub fn new(transport: Arc<dyn Transport>, config: &ClientConfig) -> Self {
        Self {
            coordinator: RefreshCoordinator::new(transport, config),
        }
    }

    /// Start the session with the credential obtained at login.
    pub fn init(&self, credential: Credential) {
        info!(expires_at = credential.expires_at(), "Session started");
        self.coordinator.install(credential);
    }

    /// End the session: drop the credential, cancel its alarm, and move
    /// observers to the logged-out state.
    pub fn teardown(&self) {
        self.coordinator.terminate();
    }

    pub fn credential(&self) -> Option<Credential> {
        self.coordinator.store().get()
    }

    pub fn is_authenticated(&self) -> bool {
        self.credential().is_some()
    }

    pub fn state(&self) -> SessionState {
        self.coordinator.session_state()
    }

    /// Watch for session transitions; a change to `LoggedOut` means the UI
    /// should return to its unauthenticated entry point.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.coordinator.subscribe()
    }

    pub async fn ensure_fresh_token(&self, presented: Option<&str>) -> Result<Credential> {
        self.coordinator.ensure_fresh_token(presented).await
    }

    pub async fn refresh_now(&self) -> Result<Credential> {
        self.coordinator.refresh_now().await
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }
}
