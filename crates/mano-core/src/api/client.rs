//! API client for communicating with the Mano analytics backend.
//!
//! This module provides the `ApiClient` struct plus the narrow trait seams
//! the session manager and query controller are written against. Every
//! request goes through [`ApiClient::authorize`], which reads the
//! credential store and attaches the bearer token when one is present.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::auth::CredentialStore;
use crate::config::Config;
use crate::models::{DashboardMetrics, MetricsSnapshot, QueryRequest, QueryResponse, TokenResponse};

use super::{ApiError, ApiResult};

// ============================================================================
// Constants
// ============================================================================

/// Login endpoint (form-encoded username/password, unauthenticated)
const TOKEN_PATH: &str = "/token";

/// Free-text query endpoint
const QUERY_PATH: &str = "/api/query";

/// Dashboard overview metrics endpoint
const METRICS_PATH: &str = "/api/dashboard/metrics";

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

// ============================================================================
// Seams
// ============================================================================

/// The unauthenticated login call the session manager depends on.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> ApiResult<TokenResponse>;
}

/// The query call the query controller depends on.
///
/// Implementations must return `ApiError::Cancelled` promptly once `cancel`
/// fires.
#[async_trait]
pub trait QueryApi: Send + Sync {
    async fn submit_query(&self, text: &str, cancel: &CancellationToken) -> ApiResult<QueryResponse>;
}

// ============================================================================
// Client
// ============================================================================

/// API client for the Mano backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    store: Arc<dyn CredentialStore>,
}

impl ApiClient {
    /// Create a new API client with the default request timeout
    pub fn new(base_url: impl Into<String>, store: Arc<dyn CredentialStore>) -> ApiResult<Self> {
        Self::with_timeout(base_url, store, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        store: Arc<dyn CredentialStore>,
        timeout: Duration,
    ) -> ApiResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self {
            client,
            base_url,
            store,
        })
    }

    /// Build a client from the resolved configuration
    pub fn from_config(config: &Config, store: Arc<dyn CredentialStore>) -> ApiResult<Self> {
        Self::with_timeout(config.base_url(), store, config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Request interceptor: attach the stored bearer token, if any.
    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.store.load() {
            Some(credential) => builder.bearer_auth(credential.token),
            None => builder,
        }
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(response: Response) -> ApiResult<Option<Response>> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse_json<T: DeserializeOwned>(response: Response, path: &str) -> ApiResult<T> {
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse response from {}: {}", path, e)))
    }

    /// Send a request built by `build`, retrying with exponential backoff on 429.
    async fn send_with_retry<T, F>(&self, path: &str, build: F) -> ApiResult<T>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self.authorize(build()).send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Self::parse_json(response, path).await,
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(path, retry = retries, backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let url = self.url(path);
        self.send_with_retry(path, || self.client.get(&url)).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + Sync>(&self, path: &str, body: &B) -> ApiResult<T> {
        let url = self.url(path);
        self.send_with_retry(path, || self.client.post(&url).json(body)).await
    }

    // ===== Endpoints =====

    /// Exchange email and password for a bearer token.
    ///
    /// Any non-2xx answer means the server rejected the credentials.
    pub async fn login(&self, email: &str, password: &str) -> ApiResult<TokenResponse> {
        let response = self
            .client
            .post(self.url(TOKEN_PATH))
            .form(&[("username", email), ("password", password)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(%status, body = %ApiError::truncate_body(&body), "Login rejected");
            return Err(ApiError::AuthRejected { status });
        }

        Self::parse_json(response, TOKEN_PATH).await
    }

    /// Submit a free-text query. Resolves to `ApiError::Cancelled` as soon as
    /// `cancel` fires, dropping the in-flight request.
    pub async fn submit_query(&self, text: &str, cancel: &CancellationToken) -> ApiResult<QueryResponse> {
        let body = QueryRequest { query: text };
        tokio::select! {
            _ = cancel.cancelled() => Err(ApiError::Cancelled),
            result = self.post(QUERY_PATH, &body) => result,
        }
    }

    /// Fetch the overview metrics. Never cached.
    pub async fn fetch_metrics(&self) -> ApiResult<DashboardMetrics> {
        self.get(METRICS_PATH).await
    }

    /// Fetch the overview metrics stamped with the fetch time.
    pub async fn fetch_metrics_snapshot(&self) -> ApiResult<MetricsSnapshot> {
        Ok(MetricsSnapshot::new(self.fetch_metrics().await?))
    }
}

#[async_trait]
impl AuthApi for ApiClient {
    async fn login(&self, email: &str, password: &str) -> ApiResult<TokenResponse> {
        ApiClient::login(self, email, password).await
    }
}

#[async_trait]
impl QueryApi for ApiClient {
    async fn submit_query(&self, text: &str, cancel: &CancellationToken) -> ApiResult<QueryResponse> {
        ApiClient::submit_query(self, text, cancel).await
    }
}
