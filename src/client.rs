//! Authenticated HTTP client for Microsoft Graph.
//!
//! `GraphClient` wraps a `reqwest::Client` and a `TokenProvider` behind a
//! `Mutex`. It issues one GET at a time and classifies the response status
//! into the crate's error taxonomy; following `@odata.nextLink` cursors is
//! left to [`crate::paging`].
//!
//! Token lifecycle:
//! - Every request asks the provider for a token right before it is signed,
//!   so a token that expired while a previous page was downloading is
//!   refreshed rather than reused.
//! - One-shot 401 retry: if Graph rejects the token anyway (revocation,
//!   clock skew), the cached token is invalidated, a fresh one is acquired,
//!   and the request is retried exactly once. A second 401 becomes
//!   `ExplorerError::Permission`.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::auth::TokenProvider;
use crate::config::{Config, DEFAULT_GRAPH_BASE_URL};
use crate::error::{ExplorerError, Result, condense_graph_error};
use crate::paging::ResourcePage;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn build_api_client(connect_timeout: Duration, request_timeout: Duration) -> Result<Client> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(request_timeout)
        .build()
        .map_err(|e| ExplorerError::Config(format!("failed to build HTTP client: {e}")))
}

/// Authenticated HTTP client for the Graph REST API.
///
/// `auth` sits behind a `Mutex` because refreshing needs `&mut` while API
/// methods only take `&self`. The lock covers the token check and refresh,
/// never an API round-trip.
pub struct GraphClient {
    client: Client,
    base_url: String,
    auth: Mutex<TokenProvider>,
    max_pages: usize,
}

impl GraphClient {
    /// Creates a client against the public Graph beta endpoint.
    pub fn new(auth: TokenProvider) -> Result<Self> {
        Self::with_base_url(auth, DEFAULT_GRAPH_BASE_URL)
    }

    /// Constructor with a custom base URL, used by tests to point at a
    /// local mock server instead of Graph.
    pub fn with_base_url(auth: TokenProvider, base_url: &str) -> Result<Self> {
        Ok(GraphClient {
            client: build_api_client(DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth: Mutex::new(auth),
            max_pages: Config::default().max_pages,
        })
    }

    /// Builds the token provider and client from a validated configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let auth = TokenProvider::new(&config.tenant_id, &config.client_id, &config.client_secret)
            .with_authority(&config.authority_url)
            .with_refresh_margin(config.token_refresh_margin());
        Ok(GraphClient {
            client: build_api_client(config.connect_timeout(), config.request_timeout())?,
            base_url: config.graph_base_url.trim_end_matches('/').to_string(),
            auth: Mutex::new(auth),
            max_pages: config.max_pages,
        })
    }

    /// Overrides the request timeout; mainly for tests.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = build_api_client(DEFAULT_CONNECT_TIMEOUT, timeout)?;
        Ok(self)
    }

    /// Caps how many pages one collection read may follow.
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// The page cap applied by [`crate::paging::fetch_all`].
    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    /// Turns a path relative to the Graph base URL into an absolute URL.
    /// Absolute URLs (such as next links) pass through untouched.
    pub fn resolve_url(&self, path_or_url: &str) -> String {
        if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            path_or_url.to_string()
        } else {
            format!("{}/{}", self.base_url, path_or_url.trim_start_matches('/'))
        }
    }

    async fn bearer_token(&self) -> Result<String> {
        let mut auth = self.auth.lock().await;
        Ok(auth.get_token().await?.value)
    }

    async fn force_refresh(&self) -> Result<String> {
        let mut auth = self.auth.lock().await;
        auth.invalidate();
        Ok(auth.get_token().await?.value)
    }

    /// Sends an authenticated GET, retrying once with a fresh token on 401.
    async fn send_get(&self, url: &str) -> Result<Response> {
        let token = self.bearer_token().await?;
        debug!(%url, "GET");
        let resp = self.client.get(url).bearer_auth(&token).send().await?;

        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        warn!(%url, "token rejected with 401, refreshing once");
        let fresh = self.force_refresh().await?;
        Ok(self.client.get(url).bearer_auth(&fresh).send().await?)
    }

    /// Fetches one page of a Graph collection.
    ///
    /// # Errors
    ///
    /// - `Retryable` on 429 or 5xx, with the `Retry-After` hint when sent.
    /// - `Permission` on 403, or on 401 after the one-shot refresh.
    /// - `NotFound` on 404; `Api` on any other non-success status.
    /// - `Parse` when the body is not a `{"value": [...]}` collection.
    /// - `Timeout`, `Network` or `Auth` for transport and token failures.
    pub async fn get_page(&self, path_or_url: &str) -> Result<ResourcePage> {
        let url = self.resolve_url(path_or_url);
        let resp = check_status(&url, self.send_get(&url).await?).await?;
        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Fetches a single JSON object (e.g. `groups/{id}`).
    pub async fn get_json(&self, path_or_url: &str) -> Result<serde_json::Value> {
        let url = self.resolve_url(path_or_url);
        let resp = check_status(&url, self.send_get(&url).await?).await?;
        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Maps a non-success response onto the error taxonomy, consuming the body
/// for diagnostics. Success responses are handed back untouched.
async fn check_status(url: &str, resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let retry_after = parse_retry_after(resp.headers());
    let body = condense_graph_error(&resp.text().await.unwrap_or_default());

    Err(match status {
        StatusCode::TOO_MANY_REQUESTS => ExplorerError::Retryable {
            status,
            retry_after,
            body,
        },
        s if s.is_server_error() => ExplorerError::Retryable {
            status,
            retry_after,
            body,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ExplorerError::Permission { status, body }
        }
        StatusCode::NOT_FOUND => ExplorerError::NotFound {
            resource: url.to_string(),
        },
        _ => ExplorerError::Api { status, body },
    })
}

/// Reads `Retry-After` as delta-seconds. Graph never sends the HTTP-date
/// form, so that form is ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
