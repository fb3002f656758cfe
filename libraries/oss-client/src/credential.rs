//! The current access credential and its refresh alarm.

use chrono::Utc;
use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A bearer token together with its validity window.
///
/// Credentials are replaced wholesale on login and refresh, never mutated.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    issued_at: i64,
    expires_at: i64,
}

impl Credential {
    pub fn new(token: impl Into<String>, issued_at: i64, expires_at: i64) -> Self {
        Self {
            token: token.into(),
            issued_at,
            expires_at,
        }
    }

    /// A credential issued now and valid for `lifetime_secs`.
    pub fn issued_now(token: impl Into<String>, lifetime_secs: u64) -> Self {
        let now = Utc::now().timestamp();
        let lifetime = i64::try_from(lifetime_secs).unwrap_or(i64::MAX);
        Self::new(token, now, now.saturating_add(lifetime))
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Issue time in epoch seconds.
    pub fn issued_at(&self) -> i64 {
        self.issued_at
    }

    /// Expiry time in epoch seconds.
    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at <= now
    }

    /// How long to wait before refreshing, `skew_secs` ahead of expiry.
    /// `None` when that moment has already passed.
    pub fn refresh_delay(&self, skew_secs: u64, now: i64) -> Option<Duration> {
        let skew = i64::try_from(skew_secs).unwrap_or(i64::MAX);
        let delay = self.expires_at.saturating_sub(skew).saturating_sub(now);
        u64::try_from(delay)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Default)]
struct StoreState {
    credential: Option<Credential>,
    alarm: Option<JoinHandle<()>>,
}

/// Holds the one current [`Credential`] and the alarm that refreshes it.
pub struct CredentialStore {
    refresh_skew_secs: u64,
    state: Mutex<StoreState>,
}

impl CredentialStore {
    pub fn new(refresh_skew_secs: u64) -> Self {
        Self {
            refresh_skew_secs,
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Replace the current credential.
    ///
    /// Any previously scheduled alarm is cancelled. A new one is scheduled to
    /// run `on_alarm` `refresh_skew_secs` before expiry; nothing is scheduled
    /// when that moment has already passed. The alarm only owns the wait:
    /// once it fires, `on_alarm` runs as its own task and is unaffected by
    /// later cancellations.
    pub fn set<F>(&self, credential: Credential, on_alarm: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = credential.refresh_delay(self.refresh_skew_secs, Utc::now().timestamp());

        let alarm = match (delay, Handle::try_current()) {
            (Some(delay), Ok(handle)) => {
                debug!(
                    delay_secs = delay.as_secs(),
                    expires_at = credential.expires_at(),
                    "Scheduling credential refresh"
                );
                Some(handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    tokio::spawn(on_alarm);
                }))
            }
            (Some(_), Err(_)) => {
                warn!("No async runtime available, credential will refresh on demand");
                None
            }
            (None, _) => {
                debug!("Credential is inside the refresh window, no alarm scheduled");
                None
            }
        };

        let mut state = self.state.lock();
        if let Some(previous) = state.alarm.take() {
            previous.abort();
        }
        state.credential = Some(credential);
        state.alarm = alarm;
    }

    /// The current credential, if any.
    pub fn get(&self) -> Option<Credential> {
        self.state.lock().credential.clone()
    }

    /// Cancel the alarm and drop the credential.
    ///
    /// Returns whether a credential was present.
    pub fn clear(&self) -> bool {
        let mut state = self.state.lock();
        if let Some(alarm) = state.alarm.take() {
            alarm.abort();
        }
        state.credential.take().is_some()
    }

    pub fn has_alarm(&self) -> bool {
        self.state
            .lock()
            .alarm
            .as_ref()
            .is_some_and(|alarm| !alarm.is_finished())
    }
}

impl Drop for CredentialStore {
    fn drop(&mut self) {
        if let Some(alarm) = self.state.get_mut().alarm.take() {
            alarm.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::oneshot;

    #[test]
    fn test_refresh_delay_respects_skew() {
        let credential = Credential::new("t", 1_000, 2_000);
        assert_eq!(
            credential.refresh_delay(60, 1_000),
            Some(Duration::from_secs(940))
        );
        // Inside the skew window
        assert_eq!(credential.refresh_delay(60, 1_950), None);
        // Exactly at the refresh moment
        assert_eq!(credential.refresh_delay(60, 1_940), None);
        // Already expired
        assert_eq!(credential.refresh_delay(60, 3_000), None);
    }

    #[test]
    fn test_expiry_check() {
        let credential = Credential::new("t", 0, 100);
        assert!(!credential.is_expired_at(99));
        assert!(credential.is_expired_at(100));
    }

    #[test]
    fn test_debug_redacts_token() {
        let credential = Credential::new("super-secret", 0, 100);
        assert!(!format!("{:?}", credential).contains("super-secret"));
    }

    #[test]
    fn test_set_without_runtime_still_stores() {
        let store = CredentialStore::new(60);
        store.set(Credential::issued_now("abc", 3600), async {});
        assert_eq!(store.get().unwrap().token(), "abc");
        assert!(!store.has_alarm());
    }

    #[tokio::test(start_paused = true)]
    async fn test_alarm_fires_before_expiry() {
        let store = CredentialStore::new(60);
        let (tx, rx) = oneshot::channel();

        store.set(Credential::issued_now("abc", 120), async move {
            let _ = tx.send(Utc::now().timestamp());
        });
        assert!(store.has_alarm());

        // Paused clock auto-advances through the sleep
        rx.await.expect("alarm should fire");
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_cancels_previous_alarm() {
        let store = CredentialStore::new(60);
        let fired = Arc::new(AtomicUsize::new(0));

        let first = Arc::clone(&fired);
        store.set(Credential::issued_now("first", 120), async move {
            first.fetch_add(1, Ordering::SeqCst);
        });

        let (tx, rx) = oneshot::channel();
        store.set(Credential::issued_now("second", 180), async move {
            let _ = tx.send(());
        });

        rx.await.expect("second alarm should fire");
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(store.get().unwrap().token(), "second");
    }

    #[tokio::test]
    async fn test_no_alarm_inside_skew_window() {
        let store = CredentialStore::new(60);
        store.set(Credential::issued_now("short", 30), async {});
        assert!(!store.has_alarm());
        assert!(store.get().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cancels_alarm() {
        let store = CredentialStore::new(60);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        store.set(Credential::issued_now("abc", 120), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(store.clear());
        assert!(store.get().is_none());
        assert!(!store.clear());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
