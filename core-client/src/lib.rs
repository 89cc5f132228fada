//! # Request Client
//!
//! Authenticated HTTP for the app's domain services.
//!
//! ## Overview
//!
//! [`ApiClient`] wraps the host [`HttpClient`](bridge_traits::HttpClient)
//! with the recovery policy every domain call needs:
//!
//! - expired access tokens are refreshed once and the request is resent
//! - writes made without connectivity go to the [`OfflineQueueManager`] and
//!   are replayed on reconnect
//! - every failure is classified into a [`ClientError`] of one of four kinds
//!   (see [`ErrorKind`])
//! - a rejected session clears credentials and triggers a debounced
//!   [`LoginRedirect`]

pub mod client;
pub mod error;
pub mod offline_queue;
pub mod redirect;
pub mod request;

pub use client::{ApiClient, ClientSettings};
pub use error::{
    is_retryable_status, ClientError, ErrorKind, NetworkFailure, QueueError, Result,
    RETRYABLE_STATUSES,
};
pub use offline_queue::{
    OfflineQueueManager, QueuedRequest, QueuedRequestId, ReplayExecutor, ReplayReport,
};
pub use redirect::LoginRedirect;
pub use request::{ApiRequest, RequestOptions};
