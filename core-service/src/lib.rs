//! Core service façade.
//!
//! [`ClientContext`] assembles the request layer from a [`CoreConfig`]: one
//! event bus, one network monitor, one token manager, one offline queue and
//! the [`ApiClient`] that ties them together. Hosts build a context at
//! startup, call [`ClientContext::start`] from inside their async runtime and
//! hand [`ClientContext::client`] to domain services.
//!
//! Desktop builds enable the `desktop-shims` feature (on by default), which
//! fills in `bridge-desktop` implementations for any bridge the host does not
//! inject. Mobile hosts inject their own.
//!
//! ```ignore
//! use bridge_traits::http::HttpMethod;
//! use core_client::RequestOptions;
//! use core_runtime::CoreConfig;
//! use core_service::ClientContext;
//!
//! let config = CoreConfig::builder()
//!     .api_base_url("https://api.grove.example")
//!     .build()?;
//! let context = ClientContext::new(config)?;
//! context.start()?;
//!
//! let sensors = context
//!     .client()
//!     .request_json::<Vec<Sensor>>(HttpMethod::Get, "/sensors", None, RequestOptions::default())
//!     .await?;
//! ```

pub mod error;

pub use error::{CoreError, Result};

use core_async::runtime::Handle;
use core_auth::{CredentialStore, HttpTokenRefresher, TokenManager, TokenRefresher};
use core_client::{ApiClient, ClientSettings, LoginRedirect, OfflineQueueManager};
use core_connectivity::{ListenerHandle, NetworkMonitor};
use core_runtime::events::EventBus;
use core_runtime::CoreConfig;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info, warn};

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop as desktop;

/// Fully wired request layer.
///
/// Every component is shared: cloning the handles returned by the accessors
/// never duplicates state.
pub struct ClientContext {
    config: CoreConfig,
    event_bus: EventBus,
    network: NetworkMonitor,
    tokens: TokenManager,
    offline_queue: Arc<OfflineQueueManager>,
    client: Arc<ApiClient>,
    reconnect: Mutex<Option<ListenerHandle>>,
}

impl ClientContext {
    /// Builds every component from `config`.
    ///
    /// Nothing is spawned here; call [`start`](Self::start) once a runtime
    /// is available.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Runtime`] if the configuration fails validation.
    pub fn new(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let event_bus = EventBus::new(config.event_buffer_size);
        let network = NetworkMonitor::new(Some(event_bus.clone()));

        let refresher: Arc<dyn TokenRefresher> = Arc::new(HttpTokenRefresher::new(
            config.http_client.clone(),
            &config.api_base_url,
        ));
        let tokens = TokenManager::new(
            CredentialStore::new(config.secure_store.clone()),
            refresher,
            network.clone(),
            config.token_refresh,
            event_bus.clone(),
        );

        let offline_queue = Arc::new(OfflineQueueManager::new(
            config.offline_queue,
            config.clock.clone(),
            Some(event_bus.clone()),
        ));

        let redirect = LoginRedirect::new(
            config.navigator.clone(),
            config.redirect_debounce,
            event_bus.clone(),
        );

        let client = Arc::new(ApiClient::new(
            ClientSettings::from_config(&config),
            config.http_client.clone(),
            tokens.clone(),
            network.clone(),
            offline_queue.clone(),
            redirect,
        ));

        info!(api_base_url = %config.api_base_url, "Client context created");

        Ok(Self {
            config,
            event_bus,
            network,
            tokens,
            offline_queue,
            client,
            reconnect: Mutex::new(None),
        })
    }

    /// Starts following connectivity and replaying the offline queue on
    /// every transition back to connected.
    ///
    /// Calling `start` again restarts the connectivity pump and keeps a
    /// single reconnect listener.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InitializationFailed`] when called outside an
    /// async runtime.
    pub fn start(&self) -> Result<()> {
        let handle = Handle::try_current().map_err(|e| {
            CoreError::InitializationFailed(format!("no async runtime available: {}", e))
        })?;

        let mut reconnect = lock(&self.reconnect);
        if reconnect.is_none() {
            let client = Arc::downgrade(&self.client);
            *reconnect = Some(
                self.network
                    .add_listener(move |connected| replay_on_reconnect(&handle, &client, connected)),
            );
        }
        drop(reconnect);

        self.network.start(self.config.connectivity_source.clone());
        info!("Client context started");
        Ok(())
    }

    /// Stops connectivity monitoring and automatic replay.
    ///
    /// Queued requests stay queued; a later [`start`](Self::start) or an
    /// explicit [`ApiClient::replay_offline_queue`] picks them up.
    pub fn shutdown(&self) {
        self.network.stop();
        if let Some(listener) = lock(&self.reconnect).take() {
            listener.unsubscribe();
        }
        info!(
            pending = self.offline_queue.len(),
            "Client context shut down"
        );
    }

    pub fn client(&self) -> Arc<ApiClient> {
        self.client.clone()
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn offline_queue(&self) -> &Arc<OfflineQueueManager> {
        &self.offline_queue
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }
}

impl Drop for ClientContext {
    fn drop(&mut self) {
        self.network.stop();
    }
}

impl fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientContext")
            .field("api_base_url", &self.config.api_base_url)
            .field("connected", &self.network.is_connected())
            .field("queued", &self.offline_queue.len())
            .finish()
    }
}

/// Builds and starts a context in one step.
///
/// # Errors
///
/// See [`ClientContext::new`] and [`ClientContext::start`].
pub fn bootstrap(config: CoreConfig) -> Result<ClientContext> {
    let context = ClientContext::new(config)?;
    context.start()?;
    Ok(context)
}

fn replay_on_reconnect(handle: &Handle, client: &Weak<ApiClient>, connected: bool) {
    if !connected {
        return;
    }
    let Some(client) = client.upgrade() else {
        return;
    };
    if client.offline_queue().is_empty() {
        debug!("Reconnected with an empty offline queue");
        return;
    }

    handle.spawn(async move {
        let report = client.replay_offline_queue().await;
        if report.failed > 0 {
            warn!(
                failed = report.failed,
                succeeded = report.succeeded,
                "Offline replay finished with failures"
            );
        } else {
            info!(succeeded = report.succeeded, "Offline replay finished");
        }
    });
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
