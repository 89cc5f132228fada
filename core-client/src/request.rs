//! Request descriptor.

use bridge_traits::http::HttpMethod;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Per-call overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub headers: HashMap<String, String>,
    /// Replaces the client's default request timeout
    pub timeout: Option<Duration>,
    /// Send without an `Authorization` header. A 401 on such a request is
    /// reported as-is and never triggers a token refresh.
    pub skip_auth: bool,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn skip_auth(mut self) -> Self {
        self.skip_auth = true;
        self
    }
}

/// Everything needed to send (or re-send) one call.
///
/// The `Authorization` header is not part of the descriptor; it is attached
/// from the credential store each time the request is sent, so a replay
/// always carries the current token.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    /// Path relative to the API base URL
    pub path: String,
    pub body: Option<Value>,
    pub headers: HashMap<String, String>,
    pub timeout: Option<Duration>,
    pub skip_auth: bool,
    /// Set once the request has been replayed after a token refresh.
    pub auth_retried: bool,
    /// Set when the request is a replay from the offline queue.
    pub offline_retried: bool,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: HashMap::new(),
            timeout: None,
            skip_auth: false,
            auth_retried: false,
            offline_retried: false,
        }
    }

    pub fn with_body(mut self, body: Option<Value>) -> Self {
        self.body = body;
        self
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.headers.extend(options.headers);
        self.timeout = options.timeout.or(self.timeout);
        self.skip_auth = options.skip_auth;
        self
    }

    pub fn is_mutating(&self) -> bool {
        self.method.is_mutating()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_options_applied() {
        let request = ApiRequest::new(HttpMethod::Post, "/activities")
            .with_body(Some(json!({"kind": "watering"})))
            .with_options(
                RequestOptions::new()
                    .header("X-Garden", "g-1")
                    .timeout(Duration::from_secs(5)),
            );

        assert!(request.is_mutating());
        assert_eq!(request.headers["X-Garden"], "g-1");
        assert_eq!(request.timeout, Some(Duration::from_secs(5)));
        assert!(!request.skip_auth);
        assert!(!request.auth_retried && !request.offline_retried);
    }

    #[test]
    fn test_get_is_not_mutating() {
        assert!(!ApiRequest::new(HttpMethod::Get, "/gardens").is_mutating());
        assert!(ApiRequest::new(HttpMethod::Delete, "/gardens/1").is_mutating());
    }
}
