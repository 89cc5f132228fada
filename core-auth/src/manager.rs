//! # Token Manager
//!
//! Single-flight refresh of the access token.
//!
//! ## Overview
//!
//! [`TokenManager::refresh_token`] may be called from any number of tasks at
//! once. The first caller becomes the leader and performs the refresh; every
//! caller arriving while it is in flight is parked on a one-shot channel and
//! receives a clone of the leader's outcome. At most one refresh call is
//! outstanding at any time.
//!
//! The leader retries retryable failures with capped exponential backoff
//! (see [`TokenRefreshConfig`]). Each attempt is bounded by its own timeout.
//!
//! ## Usage
//!
//! ```no_run
//! use core_auth::{CredentialStore, HttpTokenRefresher, TokenManager};
//! use core_connectivity::NetworkMonitor;
//! use core_runtime::{config::TokenRefreshConfig, events::EventBus};
//! use std::sync::Arc;
//! # use bridge_traits::{http::HttpClient, storage::SecureStore};
//! # async fn demo(http: Arc<dyn HttpClient>, secure: Arc<dyn SecureStore>) -> core_auth::Result<()> {
//! let event_bus = EventBus::new(100);
//! let manager = TokenManager::new(
//!     CredentialStore::new(secure),
//!     Arc::new(HttpTokenRefresher::new(http, "https://api.grove.example")),
//!     NetworkMonitor::new(Some(event_bus.clone())),
//!     TokenRefreshConfig::default(),
//!     event_bus,
//! );
//!
//! let access_token = manager.refresh_token().await?;
//! # Ok(())
//! # }
//! ```

use crate::credential_store::CredentialStore;
use crate::error::{AuthError, Result};
use crate::refresh::TokenRefresher;
use core_async::sync::{oneshot, Mutex as AsyncMutex};
use core_async::time::{sleep, timeout};
use core_connectivity::NetworkMonitor;
use core_runtime::config::TokenRefreshConfig;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, instrument, warn};

type Waiter = oneshot::Sender<Result<String>>;

enum RefreshState {
    Idle,
    Refreshing { waiters: Vec<Waiter> },
}

enum Role {
    Leader,
    Waiter(oneshot::Receiver<Result<String>>),
}

struct Inner {
    store: CredentialStore,
    refresher: Arc<dyn TokenRefresher>,
    network: NetworkMonitor,
    config: TokenRefreshConfig,
    event_bus: EventBus,
    state: Mutex<RefreshState>,
    /// Bumped by every clear; a refresh that started under an older value
    /// must not write its tokens.
    generation: AtomicU64,
    /// Serializes the final credential write against `clear_auth_data`.
    store_lock: AsyncMutex<()>,
}

/// Coordinates access-token refreshes.
///
/// Cloning is cheap and every clone shares the same refresh state.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

impl TokenManager {
    pub fn new(
        store: CredentialStore,
        refresher: Arc<dyn TokenRefresher>,
        network: NetworkMonitor,
        config: TokenRefreshConfig,
        event_bus: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                refresher,
                network,
                config,
                event_bus,
                state: Mutex::new(RefreshState::Idle),
                generation: AtomicU64::new(0),
                store_lock: AsyncMutex::new(()),
            }),
        }
    }

    pub fn credential_store(&self) -> &CredentialStore {
        &self.inner.store
    }

    /// The stored access token, if any. Never triggers a refresh.
    pub async fn access_token(&self) -> Result<Option<String>> {
        self.inner.store.access_token().await
    }

    /// Whether a refresh is currently in flight.
    pub fn is_refreshing(&self) -> bool {
        matches!(*lock(&self.inner.state), RefreshState::Refreshing { .. })
    }

    /// Obtain a new access token.
    ///
    /// Joins the in-flight refresh when there is one. On success the new
    /// tokens are merged into the stored credential before any caller is
    /// released.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NoRefreshToken`] / [`AuthError::Offline`] immediately,
    ///   without calling the refresh endpoint
    /// - [`AuthError::RefreshRejected`] when the server refused the refresh
    ///   token (not retried)
    /// - [`AuthError::RefreshExhausted`] after every retry failed
    /// - [`AuthError::SessionCleared`] when credentials were cleared while the
    ///   refresh was in flight
    /// - [`AuthError::RefreshCancelled`] when the leading caller was dropped
    ///
    /// The stored credential is left untouched on failure; clearing it is the
    /// caller's decision.
    #[instrument(skip(self))]
    pub async fn refresh_token(&self) -> Result<String> {
        let role = {
            let mut state = lock(&self.inner.state);
            match &mut *state {
                RefreshState::Refreshing { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Role::Waiter(rx)
                }
                RefreshState::Idle => {
                    *state = RefreshState::Refreshing {
                        waiters: Vec::new(),
                    };
                    Role::Leader
                }
            }
        };

        match role {
            Role::Waiter(rx) => {
                debug!("Joining in-flight token refresh");
                rx.await.unwrap_or(Err(AuthError::RefreshCancelled))
            }
            Role::Leader => {
                let guard = SettleGuard {
                    inner: &self.inner,
                    settled: false,
                };

                let outcome = self.inner.run_refresh().await;
                if let Err(e) = &outcome {
                    let _ = self
                        .inner
                        .event_bus
                        .emit(CoreEvent::Auth(AuthEvent::TokenRefreshFailed {
                            message: e.to_string(),
                            recoverable: !e.requires_login(),
                        }));
                }

                guard.settle(outcome.clone());
                outcome
            }
        }
    }

    /// Remove the stored credential.
    ///
    /// Idempotent. A refresh in flight when this is called completes with
    /// [`AuthError::SessionCleared`] instead of writing its tokens back.
    pub async fn clear_auth_data(&self) -> Result<()> {
        let _store_guard = self.inner.store_lock.lock().await;
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.store.clear().await?;

        let _ = self
            .inner
            .event_bus
            .emit(CoreEvent::Auth(AuthEvent::SignedOut));
        Ok(())
    }
}

impl Inner {
    async fn run_refresh(&self) -> Result<String> {
        let generation = self.generation.load(Ordering::SeqCst);

        if !self.network.is_connected() {
            debug!("Skipping token refresh while offline");
            return Err(AuthError::Offline);
        }

        let refresh_token = self.store.refresh_token().await?.ok_or_else(|| {
            warn!("No refresh token stored");
            AuthError::NoRefreshToken
        })?;

        let _ = self
            .event_bus
            .emit(CoreEvent::Auth(AuthEvent::TokenRefreshing));

        let attempt_timeout_ms =
            u64::try_from(self.config.attempt_timeout.as_millis()).unwrap_or(u64::MAX);
        let mut attempt: u32 = 0;

        loop {
            let result = match timeout(
                self.config.attempt_timeout,
                self.refresher.refresh(&refresh_token),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(AuthError::Timeout {
                    timeout_ms: attempt_timeout_ms,
                }),
            };

            let error = match result {
                Ok(tokens) => {
                    let _store_guard = self.store_lock.lock().await;
                    if self.generation.load(Ordering::SeqCst) != generation {
                        info!("Discarding refreshed tokens, credentials were cleared");
                        return Err(AuthError::SessionCleared);
                    }

                    let merged = self
                        .store
                        .merge_tokens(tokens.access_token, tokens.refresh_token)
                        .await?;

                    let _ = self
                        .event_bus
                        .emit(CoreEvent::Auth(AuthEvent::TokenRefreshed));
                    info!(attempt, "Access token refreshed");
                    return Ok(merged.access_token);
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                warn!(error = %error, "Token refresh failed permanently");
                return Err(error);
            }

            if attempt >= self.config.max_retries {
                warn!(error = %error, attempts = attempt + 1, "Token refresh retries exhausted");
                return Err(AuthError::RefreshExhausted {
                    attempts: attempt + 1,
                    last_error: error.to_string(),
                });
            }

            let delay = self.config.delay_for_attempt(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, error = %error, "Retrying token refresh");
            sleep(delay).await;
            attempt += 1;

            if self.generation.load(Ordering::SeqCst) != generation {
                return Err(AuthError::SessionCleared);
            }
            if !self.network.is_connected() {
                debug!("Connectivity lost between refresh attempts");
                return Err(AuthError::Offline);
            }
        }
    }

    fn settle(&self, outcome: Result<String>) {
        let previous = std::mem::replace(&mut *lock(&self.state), RefreshState::Idle);
        if let RefreshState::Refreshing { waiters } = previous {
            if !waiters.is_empty() {
                debug!(waiters = waiters.len(), "Releasing refresh waiters");
            }
            for waiter in waiters {
                let _ = waiter.send(outcome.clone());
            }
        }
    }
}

/// Releases waiters if the leading caller is dropped mid-refresh.
struct SettleGuard<'a> {
    inner: &'a Inner,
    settled: bool,
}

impl SettleGuard<'_> {
    fn settle(mut self, outcome: Result<String>) {
        self.settled = true;
        self.inner.settle(outcome);
    }
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!("Token refresh abandoned by its caller");
            self.inner.settle(Err(AuthError::RefreshCancelled));
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Credentials, RefreshedTokens};
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::network::ConnectivityEvent;
    use bridge_traits::storage::SecureStore;
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::time::Instant;

    #[derive(Clone, Default)]
    struct MockSecureStore {
        storage: Arc<tokio::sync::Mutex<HashMap<String, Vec<u8>>>>,
    }

    #[async_trait]
    impl SecureStore for MockSecureStore {
        async fn set_secret(&self, key: &str, value: &[u8]) -> BridgeResult<()> {
            self.storage
                .lock()
                .await
                .insert(key.to_string(), value.to_vec());
            Ok(())
        }

        async fn get_secret(&self, key: &str) -> BridgeResult<Option<Vec<u8>>> {
            Ok(self.storage.lock().await.get(key).cloned())
        }

        async fn delete_secret(&self, key: &str) -> BridgeResult<()> {
            self.storage.lock().await.remove(key);
            Ok(())
        }
    }

    /// Answers refresh calls from a script after a fixed latency. When the
    /// script runs out the last answer repeats.
    struct ScriptedRefresher {
        script: Mutex<VecDeque<Result<RefreshedTokens>>>,
        last: Mutex<Option<Result<RefreshedTokens>>>,
        latency: Duration,
        calls: AtomicUsize,
        call_times: Mutex<Vec<Instant>>,
    }

    impl ScriptedRefresher {
        fn new(latency: Duration, script: Vec<Result<RefreshedTokens>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                last: Mutex::new(None),
                latency,
                calls: AtomicUsize::new(0),
                call_times: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenRefresher for ScriptedRefresher {
        async fn refresh(&self, _refresh_token: &str) -> Result<RefreshedTokens> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            lock(&self.call_times).push(Instant::now());
            if !self.latency.is_zero() {
                sleep(self.latency).await;
            }

            let next = lock(&self.script).pop_front();
            let mut last = lock(&self.last);
            if let Some(next) = next {
                *last = Some(next);
            }
            last.clone()
                .unwrap_or_else(|| Err(AuthError::RefreshFailed("no script".into())))
        }
    }

    fn tokens(access: &str, refresh: Option<&str>) -> Result<RefreshedTokens> {
        Ok(RefreshedTokens {
            access_token: access.to_string(),
            refresh_token: refresh.map(str::to_string),
        })
    }

    fn waiter_count(manager: &TokenManager) -> usize {
        match &*lock(&manager.inner.state) {
            RefreshState::Refreshing { waiters } => waiters.len(),
            RefreshState::Idle => 0,
        }
    }

    fn assert_millis(actual: Duration, expected: u64) {
        let actual = actual.as_millis() as u64;
        assert!(
            (expected..=expected + 2).contains(&actual),
            "expected ~{expected}ms, got {actual}ms"
        );
    }

    struct Harness {
        manager: TokenManager,
        store: CredentialStore,
        network: NetworkMonitor,
        event_bus: EventBus,
    }

    async fn harness(
        credentials: Option<Credentials>,
        refresher: Arc<ScriptedRefresher>,
        config: TokenRefreshConfig,
    ) -> Harness {
        let store = CredentialStore::new(Arc::new(MockSecureStore::default()));
        if let Some(credentials) = credentials {
            store.save(&credentials).await.unwrap();
        }
        let event_bus = EventBus::new(64);
        let network = NetworkMonitor::new(None);
        let manager = TokenManager::new(
            store.clone(),
            refresher,
            network.clone(),
            config,
            event_bus.clone(),
        );
        Harness {
            manager,
            store,
            network,
            event_bus,
        }
    }

    fn session() -> Option<Credentials> {
        Some(Credentials::new("a1", Some("r1".into())))
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_refresh() {
        let refresher = ScriptedRefresher::new(
            Duration::from_millis(50),
            vec![tokens("a2", Some("r2"))],
        );
        let h = harness(session(), refresher.clone(), TokenRefreshConfig::default()).await;

        let results = futures::future::join_all((0..5).map(|_| h.manager.refresh_token())).await;

        assert_eq!(refresher.calls(), 1);
        assert!(results.iter().all(|r| r.as_deref() == Ok("a2")));
        assert_eq!(h.store.access_token().await.unwrap().as_deref(), Some("a2"));
        assert_eq!(h.store.refresh_token().await.unwrap().as_deref(), Some("r2"));
        assert!(!h.manager.is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_failure() {
        let refresher = ScriptedRefresher::new(
            Duration::from_millis(50),
            vec![Err(AuthError::RefreshRejected { status: 401 })],
        );
        let h = harness(session(), refresher.clone(), TokenRefreshConfig::default()).await;

        let results = futures::future::join_all((0..3).map(|_| h.manager.refresh_token())).await;

        assert_eq!(refresher.calls(), 1);
        for result in results {
            assert_eq!(result, Err(AuthError::RefreshRejected { status: 401 }));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_refreshes_each_call_endpoint() {
        let refresher = ScriptedRefresher::new(
            Duration::from_millis(10),
            vec![tokens("a2", None), tokens("a3", None)],
        );
        let h = harness(session(), refresher.clone(), TokenRefreshConfig::default()).await;

        assert_eq!(h.manager.refresh_token().await.unwrap(), "a2");
        assert_eq!(h.manager.refresh_token().await.unwrap(), "a3");
        assert_eq!(refresher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_schedule() {
        let refresher = ScriptedRefresher::new(
            Duration::ZERO,
            vec![Err(AuthError::RefreshFailed("status 503".into()))],
        );
        let h = harness(session(), refresher.clone(), TokenRefreshConfig::default()).await;
        let started = Instant::now();

        let err = h.manager.refresh_token().await.unwrap_err();

        assert_eq!(
            err,
            AuthError::RefreshExhausted {
                attempts: 4,
                last_error: "Token refresh attempt failed: status 503".into()
            }
        );
        assert_eq!(refresher.calls(), 4);

        let times = lock(&refresher.call_times).clone();
        assert_millis(times[1] - times[0], 1000);
        assert_millis(times[2] - times[1], 2000);
        assert_millis(times[3] - times[2], 4000);

        // no delay after the final attempt
        assert_millis(started.elapsed(), 7000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_capped() {
        let refresher = ScriptedRefresher::new(
            Duration::ZERO,
            vec![Err(AuthError::RefreshFailed("reset".into()))],
        );
        let config = TokenRefreshConfig {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(1500),
            max_retries: 2,
            attempt_timeout: Duration::from_secs(10),
        };
        let h = harness(session(), refresher.clone(), config).await;

        h.manager.refresh_token().await.unwrap_err();

        let times = lock(&refresher.call_times).clone();
        assert_millis(times[1] - times[0], 1000);
        assert_millis(times[2] - times[1], 1500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let refresher = ScriptedRefresher::new(
            Duration::ZERO,
            vec![
                Err(AuthError::RefreshFailed("status 502".into())),
                tokens("a2", None),
            ],
        );
        let h = harness(session(), refresher.clone(), TokenRefreshConfig::default()).await;

        assert_eq!(h.manager.refresh_token().await.unwrap(), "a2");
        assert_eq!(refresher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retried() {
        let refresher = ScriptedRefresher::new(Duration::from_secs(60), vec![tokens("late", None)]);
        let config = TokenRefreshConfig {
            max_retries: 1,
            attempt_timeout: Duration::from_secs(2),
            ..TokenRefreshConfig::default()
        };
        let h = harness(session(), refresher.clone(), config).await;

        let err = h.manager.refresh_token().await.unwrap_err();

        assert!(matches!(err, AuthError::RefreshExhausted { attempts: 2, .. }));
        assert_eq!(refresher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_not_retried() {
        let refresher = ScriptedRefresher::new(
            Duration::ZERO,
            vec![Err(AuthError::RefreshRejected { status: 401 })],
        );
        let h = harness(session(), refresher.clone(), TokenRefreshConfig::default()).await;
        let started = Instant::now();

        let err = h.manager.refresh_token().await.unwrap_err();

        assert_eq!(err, AuthError::RefreshRejected { status: 401 });
        assert_eq!(refresher.calls(), 1);
        assert_millis(started.elapsed(), 0);
        // clearing is left to the caller
        assert!(h.store.load().await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_refresh_token_fails_fast() {
        let refresher = ScriptedRefresher::new(Duration::ZERO, vec![tokens("a2", None)]);
        let h = harness(
            Some(Credentials::new("a1", None)),
            refresher.clone(),
            TokenRefreshConfig::default(),
        )
        .await;
        let started = Instant::now();

        let err = h.manager.refresh_token().await.unwrap_err();

        assert_eq!(err, AuthError::NoRefreshToken);
        assert_eq!(refresher.calls(), 0);
        assert_millis(started.elapsed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_fails_fast() {
        let refresher = ScriptedRefresher::new(Duration::ZERO, vec![tokens("a2", None)]);
        let h = harness(session(), refresher.clone(), TokenRefreshConfig::default()).await;
        h.network.apply(ConnectivityEvent::offline());

        let err = h.manager.refresh_token().await.unwrap_err();

        assert_eq!(err, AuthError::Offline);
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_preserves_unrelated_fields() {
        let refresher = ScriptedRefresher::new(Duration::ZERO, vec![tokens("a2", None)]);
        let credentials = Credentials::new("a1", Some("r1".into()))
            .with_extra("userId", json!("u-42"))
            .with_extra("locale", json!("de-AT"));
        let h = harness(Some(credentials), refresher, TokenRefreshConfig::default()).await;

        h.manager.refresh_token().await.unwrap();

        let stored = h.store.load().await.unwrap().unwrap();
        assert_eq!(stored.access_token, "a2");
        assert_eq!(stored.refresh_token.as_deref(), Some("r1"));
        assert_eq!(stored.extra["userId"], json!("u-42"));
        assert_eq!(stored.extra["locale"], json!("de-AT"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_during_refresh_discards_tokens() {
        let refresher = ScriptedRefresher::new(Duration::from_millis(100), vec![tokens("a2", None)]);
        let h = harness(session(), refresher, TokenRefreshConfig::default()).await;

        let (outcome, cleared) = tokio::join!(h.manager.refresh_token(), async {
            sleep(Duration::from_millis(10)).await;
            h.manager.clear_auth_data().await
        });

        cleared.unwrap();
        assert_eq!(outcome, Err(AuthError::SessionCleared));
        assert!(h.store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dropped_leader_releases_waiters() {
        let refresher =
            ScriptedRefresher::new(Duration::from_secs(3600), vec![tokens("never", None)]);
        let h = harness(session(), refresher.clone(), TokenRefreshConfig::default()).await;

        let leader = {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.refresh_token().await })
        };
        while refresher.calls() == 0 {
            tokio::task::yield_now().await;
        }

        let waiter = {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.refresh_token().await })
        };
        while waiter_count(&h.manager) == 0 {
            tokio::task::yield_now().await;
        }

        leader.abort();

        assert_eq!(waiter.await.unwrap(), Err(AuthError::RefreshCancelled));
        assert!(!h.manager.is_refreshing());
    }

    #[tokio::test]
    async fn test_clear_auth_data_is_idempotent() {
        let refresher = ScriptedRefresher::new(Duration::ZERO, vec![]);
        let h = harness(session(), refresher, TokenRefreshConfig::default()).await;
        let mut events = h.event_bus.subscribe();

        h.manager.clear_auth_data().await.unwrap();
        h.manager.clear_auth_data().await.unwrap();

        assert!(h.manager.access_token().await.unwrap().is_none());
        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Auth(AuthEvent::SignedOut)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_events() {
        let refresher = ScriptedRefresher::new(Duration::ZERO, vec![tokens("a2", None)]);
        let h = harness(session(), refresher, TokenRefreshConfig::default()).await;
        let mut events = h.event_bus.subscribe();

        h.manager.refresh_token().await.unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Auth(AuthEvent::TokenRefreshing)
        );
        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Auth(AuthEvent::TokenRefreshed)
        );
    }
}
