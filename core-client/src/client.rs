//! # API Client
//!
//! The one place every outbound call passes through.
//!
//! ## Request phase
//!
//! - Offline and mutating: the request is queued and the caller gets
//!   `Network(queued)`.
//! - Offline and a read: `Network(offline)`, nothing is sent.
//! - Otherwise the stored access token is attached and the request is sent.
//!
//! ## Response phase
//!
//! | Outcome | Action |
//! |---|---|
//! | No response, mutating, not a replay | queue, `Network(queued)` |
//! | No response otherwise | `Network` |
//! | Bridge failed before sending (bad header, bad URL) | `Network`, never queued |
//! | 401, first time | refresh once, resend once with the new token |
//! | 401 on the resend, or refresh failed | clear credentials, redirect, `Authentication` |
//! | 403 | clear credentials, redirect, `Permission` |
//! | any other non-2xx | `Api`, retryable for 408/429/502/503/504 |

use crate::error::{response_message, ClientError, NetworkFailure, Result};
use crate::offline_queue::{OfflineQueueManager, ReplayExecutor, ReplayReport};
use crate::redirect::LoginRedirect;
use crate::request::{ApiRequest, RequestOptions};
use async_trait::async_trait;
use bridge_traits::error::BridgeError;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use core_auth::{AuthError, TokenManager};
use core_connectivity::NetworkMonitor;
use core_runtime::config::{join_url, CoreConfig};
use core_runtime::logging::redact_headers;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Static settings for [`ApiClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub api_base_url: String,
    pub request_timeout: Duration,
}

impl ClientSettings {
    pub fn from_config(config: &CoreConfig) -> Self {
        Self {
            api_base_url: config.api_base_url.clone(),
            request_timeout: config.request_timeout,
        }
    }
}

pub struct ApiClient {
    settings: ClientSettings,
    http_client: Arc<dyn HttpClient>,
    tokens: TokenManager,
    network: NetworkMonitor,
    offline_queue: Arc<OfflineQueueManager>,
    redirect: LoginRedirect,
}

impl ApiClient {
    pub fn new(
        settings: ClientSettings,
        http_client: Arc<dyn HttpClient>,
        tokens: TokenManager,
        network: NetworkMonitor,
        offline_queue: Arc<OfflineQueueManager>,
        redirect: LoginRedirect,
    ) -> Self {
        Self {
            settings,
            http_client,
            tokens,
            network,
            offline_queue,
            redirect,
        }
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub fn offline_queue(&self) -> &Arc<OfflineQueueManager> {
        &self.offline_queue
    }

    pub fn login_redirect(&self) -> &LoginRedirect {
        &self.redirect
    }

    /// Send one request through the full policy.
    ///
    /// # Errors
    ///
    /// Always a [`ClientError`]; see the module docs for which kind each
    /// outcome maps to.
    #[instrument(skip(self, body, options), fields(method = %method, path = %path))]
    pub async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<HttpResponse> {
        let request = ApiRequest::new(method, path)
            .with_body(body)
            .with_options(options);
        self.dispatch(request).await
    }

    /// [`request`](Self::request) and decode the body as JSON.
    ///
    /// A body that does not decode is reported as a non-retryable `Api`
    /// error carrying the response status.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<T> {
        let response = self.request(method, path, body, options).await?;
        response.json::<T>().map_err(|e| ClientError::Api {
            status: response.status,
            message: format!("Invalid response body: {}", e),
            retryable: false,
        })
    }

    pub async fn get(&self, path: &str) -> Result<HttpResponse> {
        self.request(HttpMethod::Get, path, None, RequestOptions::default())
            .await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<HttpResponse> {
        self.request(HttpMethod::Post, path, Some(body), RequestOptions::default())
            .await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<HttpResponse> {
        self.request(HttpMethod::Put, path, Some(body), RequestOptions::default())
            .await
    }

    pub async fn patch(&self, path: &str, body: Value) -> Result<HttpResponse> {
        self.request(HttpMethod::Patch, path, Some(body), RequestOptions::default())
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<HttpResponse> {
        self.request(HttpMethod::Delete, path, None, RequestOptions::default())
            .await
    }

    /// Drain the offline queue through this client.
    pub async fn replay_offline_queue(&self) -> ReplayReport {
        self.offline_queue.process_queue(self).await
    }

    /// Clear stored credentials without redirecting.
    pub async fn logout(&self) -> core_auth::Result<()> {
        info!("Logging out");
        self.tokens.clear_auth_data().await
    }

    async fn dispatch(&self, mut request: ApiRequest) -> Result<HttpResponse> {
        let mut fresh_token: Option<String> = None;

        loop {
            if !self.network.is_connected() {
                return Err(self.offline_failure(&request));
            }

            let token = match fresh_token.take() {
                Some(token) => Some(token),
                None => self.stored_token(&request).await,
            };

            let response = match self.send(&request, token.as_deref()).await {
                Ok(response) => response,
                Err(e) => return Err(self.transport_failure(&request, e)),
            };

            match response.status {
                status if response.is_success() => {
                    debug!(status, "Request succeeded");
                    return Ok(response);
                }
                401 if request.skip_auth => {
                    return Err(ClientError::Authentication {
                        message: response_message(&response),
                    });
                }
                401 if request.auth_retried => {
                    warn!("Request rejected again after token refresh");
                    return Err(self
                        .end_session(ClientError::Authentication {
                            message: "Session expired".to_string(),
                        })
                        .await);
                }
                401 => {
                    debug!("Access token rejected, refreshing");
                    match self.tokens.refresh_token().await {
                        Ok(token) => {
                            request.auth_retried = true;
                            fresh_token = Some(token);
                        }
                        Err(AuthError::Offline) => return Err(self.offline_failure(&request)),
                        Err(e) => {
                            return Err(self
                                .end_session(ClientError::Authentication {
                                    message: format!("Session expired: {}", e),
                                })
                                .await);
                        }
                    }
                }
                403 => {
                    warn!("Request forbidden");
                    return Err(self
                        .end_session(ClientError::Permission {
                            message: response_message(&response),
                        })
                        .await);
                }
                status => {
                    debug!(status, "Request failed");
                    return Err(ClientError::from_response(&response));
                }
            }
        }
    }

    async fn stored_token(&self, request: &ApiRequest) -> Option<String> {
        if request.skip_auth {
            return None;
        }
        match self.tokens.access_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Could not read access token; sending unauthenticated");
                None
            }
        }
    }

    async fn send(
        &self,
        request: &ApiRequest,
        token: Option<&str>,
    ) -> std::result::Result<HttpResponse, BridgeError> {
        let url = join_url(&self.settings.api_base_url, &request.path);
        let mut http_request = HttpRequest::new(request.method, url)
            .header("Accept", "application/json")
            .headers(request.headers.clone())
            .timeout(request.timeout.unwrap_or(self.settings.request_timeout));

        if let Some(token) = token {
            http_request = http_request.bearer_token(token);
        }
        if let Some(body) = &request.body {
            http_request = http_request.json(body)?;
        }

        debug!(
            url = %http_request.url,
            headers = %redact_headers(&http_request.headers),
            "Sending request"
        );
        self.http_client.execute(http_request).await
    }

    /// Queue a write or fail a read when there is no connectivity.
    fn offline_failure(&self, request: &ApiRequest) -> ClientError {
        if request.is_mutating() && !request.offline_retried {
            self.enqueue(request)
        } else {
            debug!("Offline, not sending");
            ClientError::offline()
        }
    }

    /// Only "no response" failures are queued; a request the bridge could
    /// not even build would fail the same way on replay.
    fn transport_failure(&self, request: &ApiRequest, error: BridgeError) -> ClientError {
        warn!(error = %error, "No response received");
        if error.is_transport() && request.is_mutating() && !request.offline_retried {
            self.enqueue(request)
        } else {
            ClientError::from(error)
        }
    }

    fn enqueue(&self, request: &ApiRequest) -> ClientError {
        match self.offline_queue.add_to_queue(request.clone()) {
            Ok(id) => ClientError::queued(id),
            Err(e) => {
                warn!(error = %e, "Request could not be queued");
                ClientError::network(NetworkFailure::Offline)
            }
        }
    }

    async fn end_session(&self, error: ClientError) -> ClientError {
        if let Err(e) = self.tokens.clear_auth_data().await {
            warn!(error = %e, "Failed to clear credentials");
        }
        self.redirect.trigger(error.kind().as_str());
        error
    }
}

#[async_trait]
impl ReplayExecutor for ApiClient {
    async fn replay(&self, request: ApiRequest) -> Result<()> {
        let request = ApiRequest {
            offline_retried: true,
            ..request
        };
        self.dispatch(request).await.map(|_| ())
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("settings", &self.settings)
            .field("connected", &self.network.is_connected())
            .field("queued", &self.offline_queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::time::SystemClock;
    use core_auth::{CredentialStore, Credentials, RefreshedTokens, TokenRefresher};
    use core_runtime::config::{OfflineQueueConfig, TokenRefreshConfig};
    use core_runtime::events::EventBus;
    use mockall::mock;
    use serde::Deserialize;
    use serde_json::json;
    use std::collections::HashMap;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> std::result::Result<HttpResponse, BridgeError>;
        }
    }

    #[derive(Default)]
    struct MemoryStore(std::sync::Mutex<HashMap<String, Vec<u8>>>);

    #[async_trait]
    impl bridge_traits::storage::SecureStore for MemoryStore {
        async fn set_secret(&self, key: &str, value: &[u8]) -> bridge_traits::error::Result<()> {
            self.0.lock().unwrap().insert(key.into(), value.to_vec());
            Ok(())
        }
        async fn get_secret(&self, key: &str) -> bridge_traits::error::Result<Option<Vec<u8>>> {
            Ok(self.0.lock().unwrap().get(key).cloned())
        }
        async fn delete_secret(&self, key: &str) -> bridge_traits::error::Result<()> {
            self.0.lock().unwrap().remove(key);
            Ok(())
        }
    }

    struct RejectingRefresher;

    #[async_trait]
    impl TokenRefresher for RejectingRefresher {
        async fn refresh(&self, _refresh_token: &str) -> core_auth::Result<RefreshedTokens> {
            Err(AuthError::RefreshRejected { status: 401 })
        }
    }

    async fn client(http: MockHttpClient) -> ApiClient {
        let bus = EventBus::new(16);
        let store = CredentialStore::new(Arc::new(MemoryStore::default()));
        store
            .save(&Credentials::new("a1", Some("r1".into())))
            .await
            .unwrap();
        let network = NetworkMonitor::new(None);
        let tokens = TokenManager::new(
            store,
            Arc::new(RejectingRefresher),
            network.clone(),
            TokenRefreshConfig::default(),
            bus.clone(),
        );
        ApiClient::new(
            ClientSettings {
                api_base_url: "https://api.grove.test".into(),
                request_timeout: Duration::from_secs(30),
            },
            Arc::new(http),
            tokens,
            network,
            Arc::new(OfflineQueueManager::new(
                OfflineQueueConfig::default(),
                Arc::new(SystemClock),
                Some(bus.clone()),
            )),
            LoginRedirect::new(None, Duration::from_secs(1), bus),
        )
    }

    #[tokio::test]
    async fn test_attaches_token_and_options() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .withf(|request| {
                request.url == "https://api.grove.test/gardens"
                    && request.header_value("authorization") == Some("Bearer a1")
                    && request.header_value("x-trace") == Some("t-1")
                    && request.timeout == Some(Duration::from_secs(5))
            })
            .times(1)
            .returning(|_| Ok(HttpResponse::new(200, "[]")));
        let client = client(http).await;

        let options = RequestOptions::new()
            .header("X-Trace", "t-1")
            .timeout(Duration::from_secs(5));
        let response = client
            .request(HttpMethod::Get, "/gardens", None, options)
            .await
            .unwrap();

        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn test_skip_auth_sends_no_token() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .withf(|request| request.header_value("authorization").is_none())
            .times(1)
            .returning(|_| Ok(HttpResponse::new(401, r#"{"message":"bad password"}"#)));
        let client = client(http).await;

        let err = client
            .request(
                HttpMethod::Post,
                "/auth/login",
                Some(json!({"user": "fern"})),
                RequestOptions::new().skip_auth(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), crate::error::ErrorKind::Authentication);
        // credentials of the current session are untouched
        assert!(client.tokens().access_token().await.unwrap().is_some());
        assert!(!client.login_redirect().is_redirecting());
    }

    #[tokio::test]
    async fn test_api_error_classification() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .returning(|_| Ok(HttpResponse::new(429, r#"{"message":"slow down"}"#)));
        let client = client(http).await;

        let err = client.get("/sensors").await.unwrap_err();

        assert_eq!(
            err,
            ClientError::Api {
                status: 429,
                message: "slow down".into(),
                retryable: true
            }
        );
    }

    #[tokio::test]
    async fn test_transport_failure_on_read_is_network() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .returning(|_| Err(BridgeError::Timeout("30s".into())));
        let client = client(http).await;

        let err = client.get("/sensors").await.unwrap_err();

        assert_eq!(err, ClientError::network(NetworkFailure::Timeout));
        assert!(client.offline_queue().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_on_write_is_queued() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .returning(|_| Err(BridgeError::Network("connection reset".into())));
        let client = client(http).await;

        let err = client
            .post("/activities", json!({"kind": "harvest"}))
            .await
            .unwrap_err();

        assert!(err.is_queued());
        assert_eq!(client.offline_queue().len(), 1);
    }

    #[tokio::test]
    async fn test_bridge_failure_on_write_is_not_queued() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Err(BridgeError::OperationFailed("invalid header name".into())));
        let client = client(http).await;

        let err = client
            .post("/activities", json!({"kind": "harvest"}))
            .await
            .unwrap_err();

        assert!(!err.is_queued());
        assert!(matches!(
            err,
            ClientError::Network {
                reason: NetworkFailure::Transport(ref reason)
            } if reason.contains("invalid header name")
        ));
        assert!(client.offline_queue().is_empty());
    }

    #[tokio::test]
    async fn test_server_error_on_write_is_surfaced() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(503, r#"{"message":"maintenance"}"#)));
        let client = client(http).await;

        let err = client
            .put("/gardens/7", json!({"name": "herbs"}))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ClientError::Api {
                status: 503,
                message: "maintenance".into(),
                retryable: true
            }
        );
        assert!(client.offline_queue().is_empty());
    }

    #[tokio::test]
    async fn test_failed_replay_is_not_queued_again() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .returning(|_| Err(BridgeError::Network("connection reset".into())));
        let client = client(http).await;

        let result = client
            .replay(ApiRequest::new(HttpMethod::Post, "/activities"))
            .await;

        assert!(matches!(
            result,
            Err(ClientError::Network {
                reason: NetworkFailure::Transport(_)
            })
        ));
        assert!(client.offline_queue().is_empty());
    }

    #[tokio::test]
    async fn test_forbidden_ends_session() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(403, "")));
        let client = client(http).await;

        let err = client.delete("/gardens/7").await.unwrap_err();

        assert_eq!(err.kind(), crate::error::ErrorKind::Permission);
        assert!(client.tokens().access_token().await.unwrap().is_none());
        assert!(client.login_redirect().is_redirecting());
    }

    #[tokio::test]
    async fn test_request_json() {
        #[derive(Debug, Deserialize)]
        struct Garden {
            name: String,
        }

        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(2)
            .returning(|request| {
                if request.url.ends_with("/gardens/1") {
                    Ok(HttpResponse::new(200, r#"{"name":"Allotment"}"#))
                } else {
                    Ok(HttpResponse::new(200, "not json"))
                }
            });
        let client = client(http).await;

        let garden: Garden = client
            .request_json(HttpMethod::Get, "/gardens/1", None, RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(garden.name, "Allotment");

        let err = client
            .request_json::<Garden>(HttpMethod::Get, "/gardens/2", None, RequestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Api {
                status: 200,
                retryable: false,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_logout_clears_without_redirect() {
        let client = client(MockHttpClient::new()).await;

        client.logout().await.unwrap();

        assert!(client.tokens().access_token().await.unwrap().is_none());
        assert!(!client.login_redirect().is_redirecting());
    }
}
