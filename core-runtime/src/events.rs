//! # Event Bus System
//!
//! Broadcasts what the request layer is doing (token refreshes, connectivity
//! flips, offline queue activity) so the UI and diagnostics can observe it
//! without being wired into the request path.
//!
//! ## Overview
//!
//! - **Event Types**: One enum per concern, wrapped in [`CoreEvent`]
//! - **EventBus**: Central `tokio::sync::broadcast` channel
//! - **EventStream**: Receiver wrapper with optional filtering
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐     emit      ┌───────────┐
//! │ TokenManager  ├──────────────>│           │
//! └───────────────┘               │           │
//!                                 │ EventBus  │     subscribe    ┌────────────┐
//! ┌───────────────┐     emit      │ (broadcast├─────────────────>│ Subscriber │
//! │NetworkMonitor ├──────────────>│  channel) │                  └────────────┘
//! └───────────────┘               │           │
//!                                 │           │     subscribe    ┌────────────┐
//! ┌───────────────┐     emit      │           ├─────────────────>│ Subscriber │
//! │ OfflineQueue  ├──────────────>│           │                  └────────────┘
//! └───────────────┘               └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{EventBus, CoreEvent, NetworkEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus.emit(CoreEvent::Network(NetworkEvent::Offline)).ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert_eq!(event, CoreEvent::Network(NetworkEvent::Offline));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   Non-fatal; keep receiving.
//! - **`RecvError::Closed`**: All senders have been dropped. Treat as shutdown.
//!
//! Emitting with no subscribers returns an error that callers ignore; events
//! are advisory and never block or fail a request.

use core_async::sync::broadcast;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use core_async::sync::broadcast::error::{RecvError, SendError};
pub use core_async::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Credential and session events
    Auth(AuthEvent),
    /// Connectivity transitions
    Network(NetworkEvent),
    /// Offline queue activity
    Queue(QueueEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Auth(e) => e.description(),
            CoreEvent::Network(e) => e.description(),
            CoreEvent::Queue(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Auth(AuthEvent::TokenRefreshFailed {
                recoverable: false, ..
            }) => EventSeverity::Error,
            CoreEvent::Auth(AuthEvent::TokenRefreshFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Auth(AuthEvent::LoginRequired { .. }) => EventSeverity::Warning,
            CoreEvent::Network(NetworkEvent::Offline) => EventSeverity::Warning,
            CoreEvent::Queue(QueueEvent::Evicted { .. }) => EventSeverity::Warning,
            CoreEvent::Queue(QueueEvent::ReplayCompleted { failed, .. }) if *failed > 0 => {
                EventSeverity::Warning
            }
            CoreEvent::Auth(AuthEvent::SignedOut) => EventSeverity::Info,
            CoreEvent::Network(NetworkEvent::Online) => EventSeverity::Info,
            CoreEvent::Queue(QueueEvent::ReplayCompleted { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Authentication Events
// ============================================================================

/// Events related to the stored credential and the user session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// A network refresh of the access token started.
    TokenRefreshing,
    /// The access token was refreshed and persisted.
    TokenRefreshed,
    /// A refresh ended without a new token.
    TokenRefreshFailed {
        message: String,
        /// `false` when the refresh token itself was rejected.
        recoverable: bool,
    },
    /// The stored credential was cleared.
    SignedOut,
    /// The user was sent back to the login screen.
    LoginRequired { reason: String },
}

impl AuthEvent {
    fn description(&self) -> &str {
        match self {
            AuthEvent::TokenRefreshing => "Refreshing access token",
            AuthEvent::TokenRefreshed => "Token refreshed successfully",
            AuthEvent::TokenRefreshFailed { .. } => "Token refresh failed",
            AuthEvent::SignedOut => "Credentials cleared",
            AuthEvent::LoginRequired { .. } => "Login required",
        }
    }
}

// ============================================================================
// Network Events
// ============================================================================

/// Connectivity transitions. Only emitted when the state flips.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum NetworkEvent {
    Online,
    Offline,
}

impl NetworkEvent {
    fn description(&self) -> &str {
        match self {
            NetworkEvent::Online => "Connectivity restored",
            NetworkEvent::Offline => "Connectivity lost",
        }
    }
}

// ============================================================================
// Queue Events
// ============================================================================

/// Offline queue activity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum QueueEvent {
    /// A mutating request was buffered for later replay.
    Enqueued {
        request_id: String,
        method: String,
        path: String,
        queue_len: usize,
    },
    /// A buffered request was discarded without being replayed.
    Evicted {
        request_id: String,
        /// `"expired"` or `"capacity"`
        reason: String,
    },
    /// A drain began.
    ReplayStarted { pending: usize },
    /// A drain finished.
    ReplayCompleted {
        succeeded: usize,
        failed: usize,
        requeued: usize,
    },
}

impl QueueEvent {
    fn description(&self) -> &str {
        match self {
            QueueEvent::Enqueued { .. } => "Request queued for replay",
            QueueEvent::Evicted { .. } => "Queued request evicted",
            QueueEvent::ReplayStarted { .. } => "Replaying offline queue",
            QueueEvent::ReplayCompleted { .. } => "Offline queue replay finished",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for broadcasting events to multiple subscribers.
///
/// Cloning is cheap; every clone publishes into the same channel.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
///
/// # #[tokio::main]
/// # async fn main() {
/// let event_bus = EventBus::new(100);
/// let mut first = event_bus.subscribe();
/// let mut second = event_bus.subscribe();
///
/// event_bus.emit(CoreEvent::Auth(AuthEvent::SignedOut)).ok();
///
/// assert!(first.recv().await.is_ok());
/// assert!(second.recv().await.is_ok());
/// # }
/// ```
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events to buffer per subscriber.
    ///   When a subscriber falls behind by more than this amount, it will
    ///   receive a `RecvError::Lagged` error.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{EventBus, EventStream, CoreEvent};
///
/// let event_bus = EventBus::new(100);
/// let queue_events = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Queue(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` will be returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter (if any).
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive a matching event without waiting.
    ///
    /// Returns `None` if no matching events are currently buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.matches(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }

    fn matches(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
