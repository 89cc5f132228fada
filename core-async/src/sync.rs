//! Synchronization primitives.
//!
//! Re-exports of `tokio::sync`. The single-flight token refresh fans its
//! outcome out over `oneshot` channels, connectivity is published on a
//! `watch` channel, and the event bus is a `broadcast` channel.

pub use tokio::sync::{
    broadcast, mpsc, oneshot, watch, Mutex, MutexGuard, Notify, RwLock, Semaphore,
};
