//! # Connectivity Module
//!
//! Tracks whether the device can currently reach the backend and tells
//! interested parties when that changes.
//!
//! The request layer consults [`NetworkMonitor::is_connected`] before every
//! call (offline writes are queued, offline reads fail fast) and replays the
//! offline queue when the monitor reports a transition back to connected.

pub mod monitor;

pub use monitor::{ListenerHandle, NetworkMonitor};
