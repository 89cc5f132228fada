//! Network Monitor
//!
//! Caches the current connectivity state and notifies listeners on
//! transitions only. Repeated identical reports from the OS are swallowed.
//!
//! ## Example
//!
//! ```no_run
//! use core_connectivity::NetworkMonitor;
//! use core_runtime::events::EventBus;
//!
//! # async fn example(source: std::sync::Arc<dyn bridge_traits::ConnectivitySource>) {
//! let monitor = NetworkMonitor::new(Some(EventBus::default()));
//! let handle = monitor.add_listener(|connected| {
//!     tracing::info!(connected, "connectivity changed");
//! });
//!
//! monitor.start(Some(source));
//! if !monitor.is_connected() {
//!     tracing::warn!("starting offline");
//! }
//! handle.unsubscribe();
//! # }
//! ```

use bridge_traits::network::{ConnectivityEvent, ConnectivitySource};
use core_async::sync::watch;
use core_async::task::{self, JoinHandle};
use core_runtime::events::{CoreEvent, EventBus, NetworkEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info, warn};

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

struct MonitorInner {
    state: watch::Sender<bool>,
    listeners: Mutex<HashMap<u64, Listener>>,
    next_listener_id: AtomicU64,
    event_bus: Option<EventBus>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cached connectivity state with transition listeners.
///
/// Cloning is cheap and every clone observes the same state.
///
/// The state starts out **connected** and stays that way until the first
/// report arrives. An app launched without connectivity therefore treats
/// its first requests as online; they fail at the transport and are then
/// classified (and, for writes, queued) like any other network failure.
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<MonitorInner>,
}

impl NetworkMonitor {
    /// Creates a monitor in the optimistic connected state.
    ///
    /// # Arguments
    ///
    /// * `event_bus` - Receives `NetworkEvent::Online`/`Offline` on transitions
    pub fn new(event_bus: Option<EventBus>) -> Self {
        let (state, _) = watch::channel(true);
        Self {
            inner: Arc::new(MonitorInner {
                state,
                listeners: Mutex::new(HashMap::new()),
                next_listener_id: AtomicU64::new(0),
                event_bus,
                pump: Mutex::new(None),
            }),
        }
    }

    /// Current cached connectivity. Never blocks.
    pub fn is_connected(&self) -> bool {
        *self.inner.state.borrow()
    }

    /// Registers `callback` to run on every connectivity transition.
    ///
    /// The callback receives the new state and runs on whichever task
    /// observed the change, so it must not block. The listener stays
    /// registered until the returned handle is unsubscribed or dropped.
    pub fn add_listener<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.listeners).insert(id, Arc::new(callback));
        debug!(listener_id = id, "Connectivity listener registered");

        ListenerHandle {
            id,
            monitor: Arc::downgrade(&self.inner),
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }

    /// Async view of the connectivity state.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.state.subscribe()
    }

    /// Feeds one report into the monitor.
    ///
    /// Returns `true` when the report flipped the cached state. Hosts that
    /// push connectivity themselves call this directly instead of
    /// [`start`](Self::start).
    pub fn apply(&self, event: ConnectivityEvent) -> bool {
        self.inner.apply(event)
    }

    /// Starts following `source`.
    ///
    /// With no source the monitor stays in its always-connected fallback.
    /// Calling `start` again replaces the previous pump.
    pub fn start(&self, source: Option<Arc<dyn ConnectivitySource>>) {
        let Some(source) = source else {
            warn!("No connectivity source available; assuming always connected");
            return;
        };

        let weak = Arc::downgrade(&self.inner);
        let handle = task::spawn(async move {
            match source.current().await {
                Ok(event) => {
                    let Some(inner) = weak.upgrade() else { return };
                    inner.apply(event);
                }
                Err(e) => warn!(error = %e, "Initial connectivity query failed"),
            }

            let mut stream = match source.subscribe().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "Connectivity subscription failed; state will not update");
                    return;
                }
            };

            while let Some(event) = stream.next().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.apply(event);
            }

            debug!("Connectivity stream ended");
        });

        if let Some(previous) = lock(&self.inner.pump).replace(handle) {
            previous.abort();
        }
        info!("Connectivity monitoring started");
    }

    /// Stops following the connectivity source. The cached state is kept.
    pub fn stop(&self) {
        if let Some(handle) = lock(&self.inner.pump).take() {
            handle.abort();
            info!("Connectivity monitoring stopped");
        }
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("connected", &self.is_connected())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl MonitorInner {
    fn apply(&self, event: ConnectivityEvent) -> bool {
        let online = event.is_online();
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if !changed {
            debug!(online, "Connectivity unchanged");
            return false;
        }

        info!(
            online,
            link_up = event.is_connected,
            internet_reachable = ?event.is_internet_reachable,
            "Connectivity changed"
        );

        if let Some(bus) = &self.event_bus {
            let event = if online {
                NetworkEvent::Online
            } else {
                NetworkEvent::Offline
            };
            let _ = bus.emit(CoreEvent::Network(event));
        }

        let listeners: Vec<Listener> = lock(&self.listeners).values().cloned().collect();
        for listener in listeners {
            listener(online);
        }

        true
    }

    fn remove_listener(&self, id: u64) {
        if lock(&self.listeners).remove(&id).is_some() {
            debug!(listener_id = id, "Connectivity listener removed");
        }
    }
}

impl Drop for MonitorInner {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.pump).take() {
            handle.abort();
        }
    }
}

/// Registration returned by [`NetworkMonitor::add_listener`].
///
/// Dropping the handle unsubscribes the listener.
#[must_use = "dropping the handle unsubscribes the listener immediately"]
pub struct ListenerHandle {
    id: u64,
    monitor: Weak<MonitorInner>,
}

impl ListenerHandle {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(inner) = self.monitor.upgrade() {
            inner.remove_listener(self.id);
        }
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle").field("id", &self.id).finish()
    }
}
