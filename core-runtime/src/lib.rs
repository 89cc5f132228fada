//! # Core Runtime Module
//!
//! Foundational infrastructure shared by every request-layer crate:
//! - Configuration (`CoreConfig` builder, refresh and queue tuning)
//! - Event bus for observing auth, connectivity and queue activity
//! - Logging and tracing setup
//!
//! ## Overview
//!
//! Nothing here performs requests. This crate fixes the conventions the
//! other crates follow: how they are configured, how they report what they
//! are doing, and how failures in configuration surface.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{CoreConfig, OfflineQueueConfig, ReplayFailurePolicy, TokenRefreshConfig};
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus};
