//! Cursor-following collection reads.
//!
//! Graph returns collections in pages:
//!
//! ```json
//! { "value": [ ... ], "@odata.nextLink": "https://graph.microsoft.com/..." }
//! ```
//!
//! [`fetch_all`] keeps requesting the next link until a page arrives
//! without one, concatenating items in page order. [`fetch_all_with_retry`]
//! wraps it in a bounded retry loop for throttling and server errors,
//! restarting the read from the first page each time.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::GraphClient;
use crate::error::{ExplorerError, Result};

/// One page of a Graph collection. Lives only inside a single `fetch_all`.
#[derive(Debug, Deserialize)]
pub struct ResourcePage {
    /// The items on this page, in server order.
    #[serde(rename = "value")]
    pub items: Vec<Value>,
    /// Absolute URL of the next page, absent on the last page.
    #[serde(rename = "@odata.nextLink", default)]
    pub next_link: Option<String>,
}

/// Bounded retry for paged fetches that hit HTTP 429 or 5xx.
///
/// Before retry `n` (0-based) the fetch waits for the server's
/// `Retry-After` hint when present, otherwise `initial_backoff * 2^n`,
/// never longer than `max_backoff`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub max_retries: u32,
    /// Wait before the first retry when the server gives no hint.
    pub initial_backoff: Duration,
    /// Ceiling on any single wait.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        }
    }

    /// How long to wait before retry number `retry` (0-based).
    pub fn backoff(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let wait = retry_after.unwrap_or_else(|| {
            self.initial_backoff
                .saturating_mul(2u32.saturating_pow(retry))
        });
        wait.min(self.max_backoff)
    }
}

/// Reads every page of the collection at `path_or_url`.
///
/// `path_or_url` may be relative to the Graph base URL; next links are
/// followed verbatim. Items come back in page order with nothing dropped
/// or repeated by the client itself.
///
/// # Errors
///
/// Whatever [`GraphClient::get_page`] returns for any page, and
/// `ExplorerError::PageLimit` when the collection runs past the client's page cap
/// (a server handing out next links forever).
pub async fn fetch_all(client: &GraphClient, path_or_url: &str) -> Result<Vec<Value>> {
    let mut items = Vec::new();
    let mut next = Some(client.resolve_url(path_or_url));
    let mut pages = 0usize;

    while let Some(url) = next {
        if pages == client.max_pages() {
            return Err(ExplorerError::PageLimit {
                resource: path_or_url.to_string(),
                pages,
            });
        }
        let page = client.get_page(&url).await?;
        pages += 1;
        debug!(page = pages, items = page.items.len(), "received page");
        items.extend(page.items);
        next = page.next_link;
    }

    Ok(items)
}

/// [`fetch_all`] with bounded retries on `ExplorerError::Retryable`.
///
/// Each retry re-reads the collection from its first page. Non-retryable
/// errors return immediately; once the retry budget is spent the last
/// `Retryable` error is returned.
pub async fn fetch_all_with_retry(
    client: &GraphClient,
    path_or_url: &str,
    policy: &RetryPolicy,
) -> Result<Vec<Value>> {
    with_retry(policy, path_or_url, || fetch_all(client, path_or_url)).await
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// policy's retry budget is spent.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, resource: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry = 0;
    loop {
        match op().await {
            Err(ExplorerError::Retryable {
                status,
                retry_after,
                body,
            }) if retry < policy.max_retries => {
                let wait = policy.backoff(retry, retry_after);
                warn!(
                    %status,
                    resource,
                    attempt = retry + 1,
                    max = policy.max_retries,
                    "transient error, retrying in {wait:?}: {body}"
                );
                tokio::time::sleep(wait).await;
                retry += 1;
            }
            other => return other,
        }
    }
}
