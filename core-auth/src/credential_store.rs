//! Secure Credential Storage
//!
//! Persists the session credential in the host's secure store under a single
//! fixed key.
//!
//! ## Security Features
//!
//! - Token values are never logged or included in error messages
//! - Corrupted blobs are erased rather than retried forever
//!
//! ## Example
//!
//! ```no_run
//! use core_auth::{CredentialStore, Credentials};
//! use std::sync::Arc;
//! # use bridge_traits::storage::SecureStore;
//! # async fn example(secure_store: Arc<dyn SecureStore>) -> core_auth::Result<()> {
//! let store = CredentialStore::new(secure_store);
//!
//! store
//!     .save(&Credentials::new("access", Some("refresh".to_string())))
//!     .await?;
//!
//! let token = store.access_token().await?;
//! store.clear().await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::types::Credentials;
use bridge_traits::storage::SecureStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Secure-store key holding the serialized [`Credentials`].
pub const CREDENTIALS_KEY: &str = "grove.auth.credentials";

/// Read/write access to the stored credential.
///
/// The store itself does no locking. Concurrent refreshes are prevented by
/// [`TokenManager`](crate::TokenManager), and every token write goes through
/// [`merge_tokens`](Self::merge_tokens) so unrelated fields are preserved.
#[derive(Clone)]
pub struct CredentialStore {
    secure_store: Arc<dyn SecureStore>,
    key: String,
}

impl CredentialStore {
    /// Create a store using [`CREDENTIALS_KEY`].
    ///
    /// # Arguments
    ///
    /// * `secure_store` - Platform-specific secure storage implementation
    pub fn new(secure_store: Arc<dyn SecureStore>) -> Self {
        Self::with_key(secure_store, CREDENTIALS_KEY)
    }

    /// Create a store under a custom key (useful for isolating test runs).
    pub fn with_key(secure_store: Arc<dyn SecureStore>, key: impl Into<String>) -> Self {
        let key = key.into();
        debug!(key = %key, "Initializing CredentialStore");
        Self { secure_store, key }
    }

    /// Load the stored credential.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(credentials))` if a valid blob exists
    /// - `Ok(None)` if nothing is stored
    /// - `Err(CredentialCorrupted)` if the blob could not be parsed; the blob
    ///   is deleted before returning
    pub async fn load(&self) -> Result<Option<Credentials>> {
        let data = self
            .secure_store
            .get_secret(&self.key)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to read credentials from secure storage");
                AuthError::SecureStorageUnavailable(e.to_string())
            })?;

        let Some(data) = data else {
            debug!("No credentials stored");
            return Ok(None);
        };

        match serde_json::from_slice::<Credentials>(&data) {
            Ok(credentials) => Ok(Some(credentials)),
            Err(e) => {
                warn!(error = %e, "Stored credentials are corrupted, erasing");

                if let Err(delete_err) = self.secure_store.delete_secret(&self.key).await {
                    warn!(error = %delete_err, "Failed to erase corrupted credentials");
                }

                Err(AuthError::CredentialCorrupted(e.to_string()))
            }
        }
    }

    pub async fn access_token(&self) -> Result<Option<String>> {
        Ok(self
            .load()
            .await?
            .map(|credentials| credentials.access_token)
            .filter(|token| !token.is_empty()))
    }

    pub async fn refresh_token(&self) -> Result<Option<String>> {
        Ok(self
            .load()
            .await?
            .and_then(|credentials| credentials.refresh_token)
            .filter(|token| !token.is_empty()))
    }

    /// Overwrite the stored credential.
    pub async fn save(&self, credentials: &Credentials) -> Result<()> {
        let json = serde_json::to_vec(credentials)
            .map_err(|e| AuthError::CredentialCorrupted(e.to_string()))?;

        self.secure_store
            .set_secret(&self.key, &json)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to write credentials to secure storage");
                AuthError::SecureStorageUnavailable(e.to_string())
            })?;

        info!(
            has_refresh_token = credentials.has_refresh_token(),
            "Credentials stored securely"
        );
        Ok(())
    }

    /// Read-merge-write of new tokens.
    ///
    /// The access token is replaced. The refresh token is replaced only when
    /// the server rotated it. Every other stored field is kept.
    pub async fn merge_tokens(
        &self,
        access_token: String,
        refresh_token: Option<String>,
    ) -> Result<Credentials> {
        let existing = match self.load().await {
            Ok(existing) => existing,
            Err(AuthError::CredentialCorrupted(_)) => None,
            Err(e) => return Err(e),
        };

        let mut merged = existing.unwrap_or_default();
        merged.access_token = access_token;
        if let Some(refresh_token) = refresh_token {
            merged.refresh_token = Some(refresh_token);
        }

        self.save(&merged).await?;
        Ok(merged)
    }

    /// Erase the stored credential. Succeeds when nothing is stored.
    pub async fn clear(&self) -> Result<()> {
        self.secure_store
            .delete_secret(&self.key)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to delete credentials from secure storage");
                AuthError::SecureStorageUnavailable(e.to_string())
            })?;

        info!("Credentials cleared");
        Ok(())
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("key", &self.key)
            .finish()
    }
}
