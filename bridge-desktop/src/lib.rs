//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`
//! - `SecureStore` using the `keyring` crate
//! - `ConnectivitySource` using a polled TCP probe
//!
//! `core-runtime` injects these when its `desktop-shims` feature is enabled
//! and the host did not provide its own bridge.
//!
//! ## Feature Flags
//!
//! - `secure-store`: Enable OS keychain integration (default)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{DesktopConnectivitySource, KeyringSecureStore, ReqwestHttpClient};
//! use core_runtime::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .api_base_url("https://api.grove.example")
//!     .http_client(Arc::new(ReqwestHttpClient::new()?))
//!     .secure_store(Arc::new(KeyringSecureStore::with_service_name("grove-dev")))
//!     .connectivity_source(Arc::new(DesktopConnectivitySource::new()))
//!     .build()?;
//! ```

mod http;
mod network;

#[cfg(feature = "secure-store")]
mod secure_store;

pub use http::ReqwestHttpClient;
pub use network::DesktopConnectivitySource;

#[cfg(feature = "secure-store")]
pub use secure_store::KeyringSecureStore;
