//! Single-flight credential refresh.
//!
//! Every refresh in a session, whether triggered by the expiry alarm or by a
//! 401 response, goes through [`RefreshCoordinator::ensure_fresh_token`].
//! While one refresh call is outstanding, later callers queue behind it and
//! receive the same outcome, so the backend sees at most one refresh request
//! no matter how many requests fail at once.

use crate::config::ClientConfig;
use crate::credential::{Credential, CredentialStore};
use crate::error::{ClientError, Result};
use crate::transport::{HttpRequest, Transport};
use crate::types::TokenResponse;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use reqwest::StatusCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

/// Whether the session currently holds a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    LoggedOut,
    Authenticated,
}

/// How a refresh settled, as seen by the callers queued behind it.
#[derive(Debug, Clone)]
enum Settled {
    Refreshed(Credential),
    Failed(String),
    /// The leader went away before the call finished; waiters race again
    /// for leadership.
    Abandoned,
}

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    /// Bumped whenever a session starts or ends. A refresh that settles
    /// under a different epoch than it started in is discarded.
    epoch: u64,
    waiters: Vec<oneshot::Sender<Settled>>,
}

/// What the caller knows about the credential it wants replaced.
enum Want {
    /// Anything newer than the token the caller sent, if it sent one.
    NewerThan(Option<String>),
    /// A fresh credential regardless of what is current.
    Forced,
}

enum Role {
    Leader(Credential, u64),
    Follower(oneshot::Receiver<Settled>),
}

/// Serializes refresh attempts for one session.
pub struct RefreshCoordinator {
    transport: Arc<dyn Transport>,
    refresh_url: String,
    default_lifetime_secs: u64,
    store: CredentialStore,
    state: Mutex<RefreshState>,
    session_tx: watch::Sender<SessionState>,
    refresh_calls: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(transport: Arc<dyn Transport>, config: &ClientConfig) -> Arc<Self> {
        let (session_tx, _) = watch::channel(SessionState::LoggedOut);
        Arc::new(Self {
            transport,
            refresh_url: format!("{}/auth/refresh", config.base_url),
            default_lifetime_secs: config.default_token_lifetime_secs,
            store: CredentialStore::new(config.refresh_skew_secs),
            state: Mutex::new(RefreshState::default()),
            session_tx,
            refresh_calls: AtomicU64::new(0),
        })
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.session_tx.subscribe()
    }

    pub fn session_state(&self) -> SessionState {
        *self.session_tx.borrow()
    }

    pub fn is_in_flight(&self) -> bool {
        self.state.lock().in_flight
    }

    /// Number of refresh network calls issued so far.
    pub fn refresh_calls(&self) -> u64 {
        self.refresh_calls.load(Ordering::Relaxed)
    }

    /// Start a session with `credential` and arm its refresh alarm.
    ///
    /// Any refresh still in flight from an earlier session is discarded
    /// when it settles.
    pub fn install(self: &Arc<Self>, credential: Credential) {
        let mut state = self.state.lock();
        state.epoch += 1;
        self.arm(credential);
    }

    /// Drop the credential and tell observers the session is over.
    pub fn terminate(&self) {
        let mut state = self.state.lock();
        self.end_session(&mut state);
    }

    // Callers hold the state lock, so ending a session never interleaves
    // with a refresh being adopted or a new login.
    fn end_session(&self, state: &mut RefreshState) {
        state.epoch += 1;
        if self.store.clear() {
            info!("Session ended");
        }
        self.session_tx.send_if_modified(|session| {
            let changed = *session != SessionState::LoggedOut;
            *session = SessionState::LoggedOut;
            changed
        });
    }

    fn arm(self: &Arc<Self>, credential: Credential) {
        let weak = Arc::downgrade(self);
        let scheduled_for = credential.token().to_string();

        self.store.set(credential, async move {
            let Some(coordinator) = weak.upgrade() else {
                return;
            };
            debug!("Refresh alarm fired");
            if let Err(e) = coordinator
                .single_flight(Want::NewerThan(Some(scheduled_for)))
                .await
            {
                warn!(error = %e, "Scheduled credential refresh failed");
            }
        });
        self.session_tx.send_replace(SessionState::Authenticated);
    }

    /// Obtain a credential newer than `presented`.
    ///
    /// Joins an in-flight refresh if there is one. If `presented` is no
    /// longer the current token, or the caller sent no token at all, the
    /// current credential is returned without a network call. Otherwise
    /// exactly one refresh call is made; on failure the session is
    /// terminated and every queued caller receives `AuthFailure`.
    pub async fn ensure_fresh_token(self: &Arc<Self>, presented: Option<&str>) -> Result<Credential> {
        Arc::clone(self)
            .single_flight(Want::NewerThan(presented.map(str::to_owned)))
            .await
    }

    /// Refresh the current credential unconditionally, sharing any
    /// refresh already in flight.
    pub async fn refresh_now(self: &Arc<Self>) -> Result<Credential> {
        Arc::clone(self).single_flight(Want::Forced).await
    }

    // Boxed so the alarm task can name a `Send` future without recursing
    // through this function's own opaque type.
    fn single_flight(self: Arc<Self>, want: Want) -> BoxFuture<'static, Result<Credential>> {
        Box::pin(async move {
            loop {
                let role = {
                    let mut state = self.state.lock();
                    if state.in_flight {
                        let (tx, rx) = oneshot::channel();
                        state.waiters.push(tx);
                        Role::Follower(rx)
                    } else {
                        match (self.store.get(), &want) {
                            (None, _) => {
                                return Err(ClientError::AuthFailure(
                                    "No credential to refresh".to_string(),
                                ));
                            }
                            (Some(current), Want::NewerThan(None)) => {
                                debug!("Request carried no credential, using the current one");
                                return Ok(current);
                            }
                            (Some(current), Want::NewerThan(Some(seen))) if current.token() != seen => {
                                debug!("Credential already refreshed by another caller");
                                return Ok(current);
                            }
                            (Some(current), _) => {
                                state.in_flight = true;
                                Role::Leader(current, state.epoch)
                            }
                        }
                    }
                };

                match role {
                    Role::Follower(rx) => {
                        debug!("Waiting for in-flight credential refresh");
                        match rx.await {
                            Ok(Settled::Refreshed(credential)) => return Ok(credential),
                            Ok(Settled::Failed(message)) => {
                                return Err(ClientError::AuthFailure(message));
                            }
                            Ok(Settled::Abandoned) | Err(_) => {
                                debug!("Refresh leader went away, retrying");
                            }
                        }
                    }
                    Role::Leader(current, epoch) => {
                        let gate = InFlightGate::new(&self);
                        let settled = match self.exchange(&current).await {
                            Ok(credential) => self.adopt(credential, epoch),
                            Err(e) => self.fail(e, epoch),
                        };
                        gate.settle(settled.clone());
                        return match settled {
                            Settled::Refreshed(credential) => Ok(credential),
                            Settled::Failed(message) => Err(ClientError::AuthFailure(message)),
                            Settled::Abandoned => Err(ClientError::AuthFailure(
                                "Credential refresh was abandoned".to_string(),
                            )),
                        };
                    }
                }
            }
        })
    }

    /// Install a refreshed credential unless the session it was requested
    /// for has ended in the meantime.
    fn adopt(self: &Arc<Self>, credential: Credential, epoch: u64) -> Settled {
        let state = self.state.lock();
        if state.epoch != epoch {
            warn!("Session ended during credential refresh, discarding new token");
            return Settled::Failed("Session ended during credential refresh".to_string());
        }
        info!(expires_at = credential.expires_at(), "Credential refreshed");
        // Armed under the lock so a logout cannot slip in between.
        self.arm(credential.clone());
        drop(state);
        Settled::Refreshed(credential)
    }

    fn fail(&self, error: ClientError, epoch: u64) -> Settled {
        let message = match error {
            ClientError::AuthFailure(message) => message,
            other => other.to_string(),
        };
        let mut state = self.state.lock();
        if state.epoch == epoch {
            warn!(error = %message, "Credential refresh failed, ending session");
            self.end_session(&mut state);
        } else {
            debug!(error = %message, "Refresh for an ended session failed");
        }
        Settled::Failed(message)
    }

    /// The refresh network call itself.
    async fn exchange(&self, current: &Credential) -> Result<Credential> {
        self.refresh_calls.fetch_add(1, Ordering::Relaxed);
        debug!(url = %self.refresh_url, "Refreshing access token");

        let request = HttpRequest::post(&self.refresh_url).with_bearer(current.token())?;
        let response = self.transport.send(request).await?;

        if response.status == StatusCode::UNAUTHORIZED {
            return Err(ClientError::AuthFailure(
                "Refresh rejected: credential expired or invalid".to_string(),
            ));
        }
        if !response.is_success() {
            return Err(response.into_error());
        }

        let token: TokenResponse = response.json("refresh response")?;
        Ok(token.to_credential(self.default_lifetime_secs))
    }
}

/// Clears `in_flight` and releases waiters on every exit path.
///
/// If the leader's future is dropped before settling, waiters are woken
/// with [`Settled::Abandoned`] and one of them takes over the refresh.
struct InFlightGate<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl<'a> InFlightGate<'a> {
    fn new(coordinator: &'a RefreshCoordinator) -> Self {
        Self {
            coordinator,
            settled: false,
        }
    }

    fn settle(mut self, outcome: Settled) {
        self.settled = true;
        self.release(&outcome);
    }

    fn release(&self, outcome: &Settled) {
        let waiters = {
            let mut state = self.coordinator.state.lock();
            state.in_flight = false;
            std::mem::take(&mut state.waiters)
        };
        if !waiters.is_empty() {
            debug!(waiters = waiters.len(), "Releasing refresh waiters");
        }
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}

impl Drop for InFlightGate<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.release(&Settled::Abandoned);
        }
    }
}
