use thiserror::Error;

/// Errors produced while reading credentials or refreshing the access token.
///
/// `Clone` so a single refresh outcome can be handed to every waiting caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("No refresh token stored")]
    NoRefreshToken,

    #[error("Cannot refresh token while offline")]
    Offline,

    #[error("Refresh token rejected by server (status {status})")]
    RefreshRejected { status: u16 },

    #[error("Token refresh attempt failed: {0}")]
    RefreshFailed(String),

    #[error("Token refresh attempt timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Token refresh failed after {attempts} attempts: {last_error}")]
    RefreshExhausted { attempts: u32, last_error: String },

    #[error("Invalid refresh response: {0}")]
    InvalidResponse(String),

    #[error("Token refresh was abandoned before completing")]
    RefreshCancelled,

    #[error("Credentials were cleared while the refresh was in flight")]
    SessionCleared,

    #[error("Secure storage unavailable: {0}")]
    SecureStorageUnavailable(String),

    #[error("Stored credentials are corrupted: {0}")]
    CredentialCorrupted(String),
}

impl AuthError {
    /// Whether another refresh attempt could succeed.
    ///
    /// Transport failures, timeouts and unexpected server statuses are
    /// retried; everything else ends the refresh immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::RefreshFailed(_) | AuthError::Timeout { .. })
    }

    /// Whether the session cannot continue without a new login.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            AuthError::NoRefreshToken
                | AuthError::RefreshRejected { .. }
                | AuthError::SessionCleared
                | AuthError::CredentialCorrupted(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AuthError::RefreshFailed("503".into()).is_retryable());
        assert!(AuthError::Timeout { timeout_ms: 10 }.is_retryable());
        assert!(!AuthError::RefreshRejected { status: 401 }.is_retryable());
        assert!(!AuthError::NoRefreshToken.is_retryable());
        assert!(!AuthError::Offline.is_retryable());
    }

    #[test]
    fn test_requires_login() {
        assert!(AuthError::RefreshRejected { status: 400 }.requires_login());
        assert!(AuthError::NoRefreshToken.requires_login());
        assert!(!AuthError::Offline.requires_login());
        assert!(!AuthError::RefreshExhausted {
            attempts: 4,
            last_error: "timeout".into()
        }
        .requires_login());
    }
}
