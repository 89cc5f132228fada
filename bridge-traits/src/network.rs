//! Connectivity Abstraction
//!
//! Feeds OS connectivity changes into the request layer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A single connectivity report from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityEvent {
    /// Whether a network link is up.
    pub is_connected: bool,
    /// Whether the internet is reachable over that link. `None` when the
    /// platform has not determined it yet.
    pub is_internet_reachable: Option<bool>,
}

impl ConnectivityEvent {
    pub fn online() -> Self {
        Self {
            is_connected: true,
            is_internet_reachable: Some(true),
        }
    }

    pub fn offline() -> Self {
        Self {
            is_connected: false,
            is_internet_reachable: Some(false),
        }
    }

    /// Collapses the report into a single usable/unusable flag.
    ///
    /// A link that is up but known to have no internet counts as offline.
    /// Unknown reachability defers to the link state.
    pub fn is_online(&self) -> bool {
        self.is_connected && self.is_internet_reachable != Some(false)
    }
}

/// OS connectivity API.
///
/// # Platform Support
///
/// - **Desktop**: Reachability probe (see `bridge-desktop`)
/// - **iOS**: Network framework `NWPathMonitor`
/// - **Android**: `ConnectivityManager.NetworkCallback`
#[async_trait]
pub trait ConnectivitySource: Send + Sync {
    /// Current connectivity, queried on demand.
    async fn current(&self) -> Result<ConnectivityEvent>;

    /// Subscribe to connectivity changes.
    ///
    /// Implementations may emit repeated identical events; consumers are
    /// expected to de-duplicate.
    async fn subscribe(&self) -> Result<Box<dyn ConnectivityStream>>;
}

/// Stream of connectivity reports
#[async_trait]
pub trait ConnectivityStream: Send {
    /// Returns `None` when the stream is closed.
    async fn next(&mut self) -> Option<ConnectivityEvent>;
}
