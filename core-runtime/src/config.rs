//! # Core Configuration Module
//!
//! Provides configuration management for the Grove request layer.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! holding every host bridge and tuning knob the request layer needs. It
//! validates eagerly so a misconfigured client fails at startup instead of on
//! the first request.
//!
//! ## Required Dependencies
//!
//! - `SecureStore` - Credential persistence
//! - `HttpClient` - Transport for API and refresh calls
//!
//! When the `desktop-shims` feature is enabled, desktop-ready defaults for
//! both are injected automatically if not provided.
//!
//! ## Optional Dependencies
//!
//! - `ConnectivitySource` - OS connectivity feed. Without it the network
//!   monitor reports "connected" forever.
//! - `Navigator` - Redirect-to-login side effect
//! - `Clock` - Defaults to `SystemClock`
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, OfflineQueueConfig};
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .api_base_url("https://api.grove.example")
//!     .http_client(Arc::new(MyHttpClient))
//!     .secure_store(Arc::new(MySecureStore))
//!     .offline_queue(OfflineQueueConfig::default().with_max_queue_size(100))
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .api_base_url("not a url")
//!     .build()
//!     .expect("Should fail - invalid base URL");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{
    Clock, ConnectivitySource, HttpClient, Navigator, SecureStore, SystemClock,
};
use std::sync::Arc;
use std::time::Duration;

/// Environment variable consulted when no base URL is set on the builder.
pub const API_BASE_URL_ENV: &str = "GROVE_API_BASE_URL";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_REDIRECT_DEBOUNCE: Duration = Duration::from_secs(1);
const DEFAULT_EVENT_BUFFER: usize = 100;

/// Core configuration for the request layer.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Backend origin, without trailing slash (e.g. `https://api.grove.example`)
    pub api_base_url: String,

    /// Default per-request timeout; individual calls may override it
    pub request_timeout: Duration,

    /// HTTP transport
    pub http_client: Arc<dyn HttpClient>,

    /// Secure credential storage
    pub secure_store: Arc<dyn SecureStore>,

    /// OS connectivity feed (optional)
    pub connectivity_source: Option<Arc<dyn ConnectivitySource>>,

    /// Redirect-to-login collaborator (optional)
    pub navigator: Option<Arc<dyn Navigator>>,

    /// Time source for queue entry stamping
    pub clock: Arc<dyn Clock>,

    pub token_refresh: TokenRefreshConfig,

    pub offline_queue: OfflineQueueConfig,

    /// Window during which repeated login redirects are coalesced into one
    pub redirect_debounce: Duration,

    /// Capacity of the event bus broadcast channel
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("api_base_url", &self.api_base_url)
            .field("request_timeout", &self.request_timeout)
            .field("http_client", &"HttpClient { ... }")
            .field("secure_store", &"SecureStore { ... }")
            .field(
                "connectivity_source",
                &self
                    .connectivity_source
                    .as_ref()
                    .map(|_| "ConnectivitySource { ... }"),
            )
            .field(
                "navigator",
                &self.navigator.as_ref().map(|_| "Navigator { ... }"),
            )
            .field("token_refresh", &self.token_refresh)
            .field("offline_queue", &self.offline_queue)
            .field("redirect_debounce", &self.redirect_debounce)
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

/// Retry and backoff settings for access-token refresh.
///
/// Attempts are numbered `0..=max_retries`, so `max_retries = 3` allows four
/// refresh calls in total. The delay after failed attempt `i` is
/// `min(base_delay * 2^i, max_delay)`; the final failure is not delayed.
///
/// # Example
///
/// ```
/// use core_runtime::config::TokenRefreshConfig;
/// use std::time::Duration;
///
/// let config = TokenRefreshConfig::default();
/// assert_eq!(config.delay_for_attempt(0), Duration::from_millis(1000));
/// assert_eq!(config.delay_for_attempt(2), Duration::from_millis(4000));
/// assert_eq!(config.delay_for_attempt(10), Duration::from_millis(10_000));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenRefreshConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
    /// Upper bound for a single refresh call; exceeding it fails that attempt
    pub attempt_timeout: Duration,
}

impl Default for TokenRefreshConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            max_retries: 3,
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl TokenRefreshConfig {
    /// Backoff to sleep after failed attempt `attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_delay > self.max_delay {
            return Err(Error::Config(format!(
                "Token refresh base delay ({:?}) exceeds max delay ({:?})",
                self.base_delay, self.max_delay
            )));
        }

        if self.attempt_timeout.is_zero() {
            return Err(Error::Config(
                "Token refresh attempt timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// What happens to an offline-queued request whose replay fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayFailurePolicy {
    /// Log and discard. The original caller already received a "queued"
    /// acknowledgement and is not told about the failure.
    #[default]
    Drop,
    /// Append the request to the queue again until it has been replayed
    /// `max_attempts` times. Its original enqueue time is kept, so `max_age`
    /// still bounds how long it can linger.
    Requeue { max_attempts: u32 },
}

/// Bounds for the offline request queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfflineQueueConfig {
    pub max_queue_size: usize,
    pub max_age: Duration,
    /// Number of queued requests replayed concurrently
    pub batch_size: usize,
    pub failure_policy: ReplayFailurePolicy,
}

impl Default for OfflineQueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 50,
            max_age: Duration::from_secs(24 * 60 * 60),
            batch_size: 5,
            failure_policy: ReplayFailurePolicy::Drop,
        }
    }
}

impl OfflineQueueConfig {
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_failure_policy(mut self, policy: ReplayFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_queue_size == 0 {
            return Err(Error::Config(
                "Offline queue size must be greater than 0".to_string(),
            ));
        }

        if self.batch_size == 0 {
            return Err(Error::Config(
                "Offline queue batch size must be greater than 0".to_string(),
            ));
        }

        if self.max_age.is_zero() {
            return Err(Error::Config(
                "Offline queue max age must be greater than zero".to_string(),
            ));
        }

        if let ReplayFailurePolicy::Requeue { max_attempts: 0 } = self.failure_policy {
            return Err(Error::Config(
                "Requeue policy needs at least one replay attempt".to_string(),
            ));
        }

        Ok(())
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Base URL is an absolute http(s) URL
    /// - Timeouts and buffer sizes are non-zero
    /// - Token refresh and offline queue settings are consistent
    pub fn validate(&self) -> Result<()> {
        let url = self.api_base_url.trim();
        if url.is_empty() {
            return Err(Error::Config("API base URL cannot be empty".to_string()));
        }

        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(Error::Config(format!(
                "API base URL must start with http:// or https://, got '{}'",
                url
            )));
        }

        if self.request_timeout.is_zero() {
            return Err(Error::Config(
                "Request timeout must be greater than zero".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        self.token_refresh.validate()?;
        self.offline_queue.validate()?;

        Ok(())
    }

    /// Joins `path` onto the base URL.
    ///
    /// ```
    /// # use core_runtime::config::CoreConfig;
    /// # fn demo(config: &CoreConfig) {
    /// let url = config.endpoint("/gardens");
    /// # }
    /// ```
    pub fn endpoint(&self, path: &str) -> String {
        join_url(&self.api_base_url, path)
    }
}

/// Joins a base URL and a path with exactly one slash between them.
/// Absolute URLs in `path` are returned unchanged.
pub fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(not(feature = "desktop-shims"))]
fn secure_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "SecureStore".to_string(),
        message: "SecureStore implementation is required for credential persistence. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default KeyringSecureStore. \
                 Mobile: inject platform-native secure storage (Keychain/Keystore)."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn http_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required for API calls. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default ReqwestHttpClient. \
                 Mobile: inject the platform-native transport."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    use bridge_desktop::KeyringSecureStore;

    let store: Arc<dyn SecureStore> = Arc::new(KeyringSecureStore::new());
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    Err(secure_store_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::new()
        .map_err(|e| Error::Internal(format!("Failed to build default HttpClient: {}", e)))?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(http_client_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_connectivity() -> Option<Arc<dyn ConnectivitySource>> {
    use bridge_desktop::DesktopConnectivitySource;

    Some(Arc::new(DesktopConnectivitySource::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_connectivity() -> Option<Arc<dyn ConnectivitySource>> {
    None
}

/// Builder for constructing [`CoreConfig`] instances.
///
/// Call [`build()`](CoreConfigBuilder::build) to validate and produce the
/// final config.
#[derive(Default)]
pub struct CoreConfigBuilder {
    api_base_url: Option<String>,
    request_timeout: Option<Duration>,
    http_client: Option<Arc<dyn HttpClient>>,
    secure_store: Option<Arc<dyn SecureStore>>,
    connectivity_source: Option<Arc<dyn ConnectivitySource>>,
    disable_default_connectivity: bool,
    navigator: Option<Arc<dyn Navigator>>,
    clock: Option<Arc<dyn Clock>>,
    token_refresh: Option<TokenRefreshConfig>,
    offline_queue: Option<OfflineQueueConfig>,
    redirect_debounce: Option<Duration>,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    /// Sets the backend origin.
    ///
    /// # Arguments
    ///
    /// * `url` - Absolute http(s) URL; a trailing slash is tolerated
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder()
    ///     .api_base_url("https://api.grove.example");
    /// ```
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self
    }

    pub fn connectivity_source(mut self, source: Arc<dyn ConnectivitySource>) -> Self {
        self.connectivity_source = Some(source);
        self
    }

    /// Opts out of the platform connectivity default so the monitor runs
    /// in always-connected mode.
    pub fn without_connectivity_source(mut self) -> Self {
        self.connectivity_source = None;
        self.disable_default_connectivity = true;
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn token_refresh(mut self, config: TokenRefreshConfig) -> Self {
        self.token_refresh = Some(config);
        self
    }

    pub fn offline_queue(mut self, config: OfflineQueueConfig) -> Self {
        self.offline_queue = Some(config);
        self
    }

    pub fn redirect_debounce(mut self, window: Duration) -> Self {
        self.redirect_debounce = Some(window);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when no base URL is set (and `GROVE_API_BASE_URL`
    ///   is absent) or any setting fails validation
    /// - [`Error::CapabilityMissing`] when a required bridge is absent and
    ///   no platform default is compiled in
    pub fn build(self) -> Result<CoreConfig> {
        let api_base_url = match self.api_base_url {
            Some(url) => url,
            None => std::env::var(API_BASE_URL_ENV).map_err(|_| {
                Error::Config(format!(
                    "API base URL is required. Use .api_base_url() or set {}.",
                    API_BASE_URL_ENV
                ))
            })?,
        };

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let secure_store = match self.secure_store {
            Some(store) => store,
            None => provide_default_secure_store()?,
        };

        let connectivity_source = match self.connectivity_source {
            Some(source) => Some(source),
            None if self.disable_default_connectivity => None,
            None => provide_default_connectivity(),
        };

        let config = CoreConfig {
            api_base_url: api_base_url.trim().trim_end_matches('/').to_string(),
            request_timeout: self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            http_client,
            secure_store,
            connectivity_source,
            navigator: self.navigator,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            token_refresh: self.token_refresh.unwrap_or_default(),
            offline_queue: self.offline_queue.unwrap_or_default(),
            redirect_debounce: self.redirect_debounce.unwrap_or(DEFAULT_REDIRECT_DEBOUNCE),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::{BridgeError, HttpRequest, HttpResponse};

    struct MockSecureStore;

    #[async_trait]
    impl SecureStore for MockSecureStore {
        async fn set_secret(
            &self,
            _key: &str,
            _value: &[u8],
        ) -> std::result::Result<(), BridgeError> {
            Ok(())
        }

        async fn get_secret(
            &self,
            _key: &str,
        ) -> std::result::Result<Option<Vec<u8>>, BridgeError> {
            Ok(None)
        }

        async fn delete_secret(&self, _key: &str) -> std::result::Result<(), BridgeError> {
            Ok(())
        }
    }

    struct MockHttpClient;

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn execute(
            &self,
            _request: HttpRequest,
        ) -> std::result::Result<HttpResponse, BridgeError> {
            Ok(HttpResponse::new(200, ""))
        }
    }

    fn builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .api_base_url("https://api.grove.example/")
            .http_client(Arc::new(MockHttpClient))
            .secure_store(Arc::new(MockSecureStore))
            .without_connectivity_source()
    }

    #[test]
    fn test_builder_applies_defaults() {
        let config = builder().build().unwrap();

        assert_eq!(config.api_base_url, "https://api.grove.example");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.token_refresh, TokenRefreshConfig::default());
        assert_eq!(config.offline_queue.max_queue_size, 50);
        assert_eq!(config.offline_queue.batch_size, 5);
        assert_eq!(config.offline_queue.max_age, Duration::from_secs(86_400));
        assert_eq!(config.offline_queue.failure_policy, ReplayFailurePolicy::Drop);
        assert_eq!(config.redirect_debounce, Duration::from_secs(1));
        assert!(config.connectivity_source.is_none());
        assert!(config.navigator.is_none());
    }

    #[test]
    fn test_builder_rejects_invalid_url() {
        let result = builder().api_base_url("ftp://example.com").build();

        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("http")));
    }

    #[test]
    fn test_builder_rejects_empty_queue() {
        let result = builder()
            .offline_queue(OfflineQueueConfig::default().with_max_queue_size(0))
            .build();

        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("queue size must be greater than 0"));
    }

    #[test]
    fn test_builder_rejects_zero_batch() {
        let result = builder()
            .offline_queue(OfflineQueueConfig::default().with_batch_size(0))
            .build();

        assert!(result.is_err());
    }

    #[test]
    fn test_builder_rejects_inverted_backoff() {
        let result = builder()
            .token_refresh(TokenRefreshConfig {
                base_delay: Duration::from_secs(20),
                max_delay: Duration::from_secs(10),
                ..TokenRefreshConfig::default()
            })
            .build();

        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_rejects_requeue_without_attempts() {
        let result = builder()
            .offline_queue(
                OfflineQueueConfig::default()
                    .with_failure_policy(ReplayFailurePolicy::Requeue { max_attempts: 0 }),
            )
            .build();

        assert!(result.is_err());
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_secure_store() {
        let result = CoreConfig::builder()
            .api_base_url("https://api.grove.example")
            .http_client(Arc::new(MockHttpClient))
            .build();

        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "SecureStore")
            }
            other => panic!("expected CapabilityMissing, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_backoff_schedule() {
        let config = TokenRefreshConfig::default();

        let delays: Vec<u64> = (0..3)
            .map(|i| config.delay_for_attempt(i).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000]);
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(10_000));
        assert_eq!(config.delay_for_attempt(40), Duration::from_millis(10_000));
    }

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("https://api.example", "/gardens"),
            "https://api.example/gardens"
        );
        assert_eq!(
            join_url("https://api.example/", "gardens/1"),
            "https://api.example/gardens/1"
        );
        assert_eq!(
            join_url("https://api.example", "https://cdn.example/x"),
            "https://cdn.example/x"
        );
    }

    #[test]
    fn test_debug_hides_bridges() {
        let config = builder().build().unwrap();
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("HttpClient { ... }"));
        assert!(rendered.contains("api.grove.example"));
    }
}
