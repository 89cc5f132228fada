//! # Authentication Module
//!
//! Owns the stored credential and keeps the access token fresh.
//!
//! ## Overview
//!
//! - [`CredentialStore`] persists `{accessToken, refreshToken?}` in the host
//!   secure store under a fixed key, merging on write so fields written by
//!   other parts of the app survive a refresh.
//! - [`TokenRefresher`] performs one refresh exchange. [`HttpTokenRefresher`]
//!   is the production implementation calling `POST /auth/refresh`.
//! - [`TokenManager`] coordinates refreshes: however many callers ask at
//!   once, at most one refresh exchange is in flight and every caller
//!   receives its outcome. Failed exchanges are retried with capped
//!   exponential backoff.

pub mod credential_store;
pub mod error;
pub mod manager;
pub mod refresh;
pub mod types;

pub use credential_store::{CredentialStore, CREDENTIALS_KEY};
pub use error::{AuthError, Result};
pub use manager::TokenManager;
pub use refresh::{HttpTokenRefresher, TokenRefresher, REFRESH_PATH};
pub use types::{Credentials, RefreshedTokens};
