//! Error taxonomy.
//!
//! Every failure leaving [`ApiClient`](crate::ApiClient) is one of four
//! kinds. Domain code branches on [`ClientError::kind`] and never sees a raw
//! transport error, retry counter or queue state.

use crate::offline_queue::QueuedRequestId;
use bridge_traits::error::BridgeError;
use bridge_traits::http::{HttpMethod, HttpResponse};
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// HTTP statuses worth retrying by the caller's own policy.
pub const RETRYABLE_STATUSES: [u16; 5] = [408, 429, 502, 503, 504];

/// Longest response body excerpt carried in an [`ClientError::Api`] message.
const MAX_MESSAGE_LEN: usize = 200;

/// The four caller-facing error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Authentication,
    Permission,
    Api,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Permission => "permission",
            ErrorKind::Api => "api",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a request produced no HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkFailure {
    /// Not sent: the device is offline and the request is a read (or a
    /// replay that cannot be queued again).
    Offline,
    /// Not confirmed: the write was buffered and will be replayed on
    /// reconnect.
    Queued { request_id: QueuedRequestId },
    /// Sent, but no response arrived.
    Transport(String),
    Timeout,
}

impl fmt::Display for NetworkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkFailure::Offline => f.write_str("offline"),
            NetworkFailure::Queued { .. } => f.write_str("queued"),
            NetworkFailure::Transport(reason) => write!(f, "transport: {}", reason),
            NetworkFailure::Timeout => f.write_str("timeout"),
        }
    }
}

/// A classified request failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Network error: {reason}")]
    Network { reason: NetworkFailure },

    #[error("Authentication required: {message}")]
    Authentication { message: String },

    #[error("Permission denied: {message}")]
    Permission { message: String },

    #[error("API error (status {status}): {message}")]
    Api {
        status: u16,
        message: String,
        retryable: bool,
    },
}

impl ClientError {
    pub fn network(reason: NetworkFailure) -> Self {
        ClientError::Network { reason }
    }

    pub fn offline() -> Self {
        Self::network(NetworkFailure::Offline)
    }

    pub fn queued(request_id: QueuedRequestId) -> Self {
        Self::network(NetworkFailure::Queued { request_id })
    }

    /// Wraps a non-2xx status. The message is taken from the response body
    /// when it carries one.
    pub fn from_response(response: &HttpResponse) -> Self {
        ClientError::Api {
            status: response.status,
            message: response_message(response),
            retryable: is_retryable_status(response.status),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Network { .. } => ErrorKind::Network,
            ClientError::Authentication { .. } => ErrorKind::Authentication,
            ClientError::Permission { .. } => ErrorKind::Permission,
            ClientError::Api { .. } => ErrorKind::Api,
        }
    }

    /// HTTP status behind the error. `None` for network failures.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ClientError::Network { .. } => None,
            ClientError::Authentication { .. } => Some(401),
            ClientError::Permission { .. } => Some(403),
            ClientError::Api { status, .. } => Some(*status),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Network { .. } => true,
            ClientError::Authentication { .. } | ClientError::Permission { .. } => false,
            ClientError::Api { retryable, .. } => *retryable,
        }
    }

    /// `true` when the request was buffered for replay rather than sent.
    pub fn is_queued(&self) -> bool {
        matches!(
            self,
            ClientError::Network {
                reason: NetworkFailure::Queued { .. }
            }
        )
    }
}

impl From<BridgeError> for ClientError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::Timeout(_) => ClientError::network(NetworkFailure::Timeout),
            other => ClientError::network(NetworkFailure::Transport(other.to_string())),
        }
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(alias = "error", alias = "detail")]
    message: String,
}

pub(crate) fn response_message(response: &HttpResponse) -> String {
    if let Ok(body) = response.json::<ErrorBody>() {
        return body.message;
    }

    match response.text() {
        Ok(text) if !text.trim().is_empty() => {
            let text = text.trim();
            match text.char_indices().nth(MAX_MESSAGE_LEN) {
                Some((cut, _)) => format!("{}...", &text[..cut]),
                None => text.to_string(),
            }
        }
        _ => format!("HTTP {}", response.status),
    }
}

/// Rejections from the offline queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("{method} requests are never queued")]
    NotMutating { method: HttpMethod },
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        for status in RETRYABLE_STATUSES {
            let err = ClientError::from_response(&HttpResponse::new(status, ""));
            assert_eq!(err.kind(), ErrorKind::Api);
            assert!(err.is_retryable(), "{status} should be retryable");
        }

        for status in [400u16, 404, 409, 422, 500, 501] {
            let err = ClientError::from_response(&HttpResponse::new(status, ""));
            assert!(!err.is_retryable(), "{status} should not be retryable");
            assert_eq!(err.status_code(), Some(status));
        }
    }

    #[test]
    fn test_kinds() {
        assert_eq!(ClientError::offline().kind(), ErrorKind::Network);
        assert!(ClientError::offline().is_retryable());
        assert_eq!(ClientError::offline().status_code(), None);

        let auth = ClientError::Authentication {
            message: "expired".into(),
        };
        assert_eq!(auth.kind(), ErrorKind::Authentication);
        assert_eq!(auth.status_code(), Some(401));
        assert!(!auth.is_retryable());

        let permission = ClientError::Permission {
            message: "forbidden".into(),
        };
        assert_eq!(permission.status_code(), Some(403));
        assert!(!permission.is_retryable());
    }

    #[test]
    fn test_queued_display() {
        let err = ClientError::queued(QueuedRequestId::new());
        assert!(err.is_queued());
        assert_eq!(err.to_string(), "Network error: queued");
        assert_eq!(ClientError::offline().to_string(), "Network error: offline");
    }

    #[test]
    fn test_message_from_body() {
        let json = HttpResponse::new(422, r#"{"message":"name is required"}"#);
        assert_eq!(
            ClientError::from_response(&json),
            ClientError::Api {
                status: 422,
                message: "name is required".into(),
                retryable: false
            }
        );

        let alias = HttpResponse::new(400, r#"{"error":"bad sensor id"}"#);
        assert!(matches!(
            ClientError::from_response(&alias),
            ClientError::Api { message, .. } if message == "bad sensor id"
        ));

        let empty = HttpResponse::new(503, "");
        assert!(matches!(
            ClientError::from_response(&empty),
            ClientError::Api { message, .. } if message == "HTTP 503"
        ));

        let long = HttpResponse::new(500, "x".repeat(500));
        assert!(matches!(
            ClientError::from_response(&long),
            ClientError::Api { message, .. } if message.len() == MAX_MESSAGE_LEN + 3
        ));
    }

    #[test]
    fn test_from_bridge_error() {
        assert_eq!(
            ClientError::from(BridgeError::Timeout("30s".into())),
            ClientError::network(NetworkFailure::Timeout)
        );
        assert!(matches!(
            ClientError::from(BridgeError::Network("refused".into())),
            ClientError::Network {
                reason: NetworkFailure::Transport(_)
            }
        ));
    }
}
