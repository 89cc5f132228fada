//! The refresh exchange.
//!
//! [`TokenRefresher`] performs exactly one call; retries, timeouts and
//! single-flight coordination belong to [`TokenManager`](crate::TokenManager).

use crate::error::{AuthError, Result};
use crate::types::RefreshedTokens;
use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
use core_runtime::config::join_url;
use std::sync::Arc;
use tracing::{debug, warn};

/// Path of the refresh endpoint, relative to the API base URL.
pub const REFRESH_PATH: &str = "/auth/refresh";

/// One refresh exchange against the backend.
///
/// Implementations classify failures so the caller can decide whether to
/// retry: [`AuthError::RefreshRejected`] ends the session,
/// [`AuthError::RefreshFailed`] is retried.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens>;
}

/// `POST /auth/refresh` with the refresh token as bearer credential.
pub struct HttpTokenRefresher {
    http_client: Arc<dyn HttpClient>,
    url: String,
}

impl HttpTokenRefresher {
    pub fn new(http_client: Arc<dyn HttpClient>, api_base_url: &str) -> Self {
        Self {
            http_client,
            url: join_url(api_base_url, REFRESH_PATH),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens> {
        let request = HttpRequest::new(HttpMethod::Post, self.url.clone())
            .bearer_token(refresh_token)
            .header("Accept", "application/json");

        let response = self.http_client.execute(request).await.map_err(|e| {
            debug!(error = %e, "Refresh request did not complete");
            AuthError::RefreshFailed(e.to_string())
        })?;

        match response.status {
            400 | 401 | 403 => {
                warn!(status = response.status, "Refresh token rejected");
                Err(AuthError::RefreshRejected {
                    status: response.status,
                })
            }
            status if !response.is_success() => {
                Err(AuthError::RefreshFailed(format!("status {status}")))
            }
            _ => response
                .json::<RefreshedTokens>()
                .map_err(|e| AuthError::InvalidResponse(e.to_string())),
        }
    }
}
