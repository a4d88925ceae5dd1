//! OAuth2 client-credentials authentication for Microsoft Graph.
//!
//! Acquires bearer tokens from Azure AD's `/oauth2/v2.0/token` endpoint using
//! the client_credentials grant. `TokenProvider` caches one [`AccessToken`]
//! and hands it out from [`TokenProvider::get_token`] until it comes within
//! the refresh margin of its expiry; then the next call fetches a new one.
//! A token is replaced wholesale on refresh and never reused once stale.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::DEFAULT_AUTHORITY_URL;
use crate::error::{ExplorerError, Result};

/// Scope requesting every application permission granted to the app
/// registration on Microsoft Graph.
pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Default safety margin before expiry at which the cached token is refreshed.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Longest lifetime taken from a token response. Azure AD never issues
/// tokens valid for more than a day; larger `expires_in` values are clamped.
pub const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Token requests are tiny; anything slower than this means the identity
/// endpoint is in trouble.
const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Form body sent to the token endpoint.
/// Serialized as `application/x-www-form-urlencoded` by reqwest's `.form()`.
#[derive(Serialize)]
pub struct TokenRequest<'a> {
    client_id: &'a str,
    scope: &'a str,
    client_secret: &'a str,
    grant_type: &'a str,
}

/// Subset of the Azure AD token response that we need. Extra fields such as
/// `ext_expires_in` are ignored.
#[derive(Deserialize)]
pub struct TokenResponse {
    /// The bearer token itself.
    pub access_token: String,
    /// Always `Bearer` for this grant.
    pub token_type: String,
    /// Lifetime in seconds, counted from when the response was issued.
    pub expires_in: u64,
}

/// A bearer token and the instant it stops being valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    /// Raw token sent in the `Authorization` header.
    pub value: String,
    /// When Azure AD stops accepting the token.
    pub expires_at: Instant,
}

impl AccessToken {
    /// Returns `true` when the token expires within `margin` of now. A margin
    /// too large to add to the clock counts as stale.
    pub fn is_stale(&self, margin: Duration) -> bool {
        Instant::now()
            .checked_add(margin)
            .is_none_or(|deadline| deadline >= self.expires_at)
    }
}

/// Expiry instant for a token that lives `expires_in` seconds from now.
fn expiry_after(expires_in: u64) -> Instant {
    let lifetime = Duration::from_secs(expires_in).min(MAX_TOKEN_LIFETIME);
    let now = Instant::now();
    now.checked_add(lifetime).unwrap_or(now)
}

/// Manages client-credentials token acquisition and caching.
///
/// Invariants:
/// - `cached` is `None` until the first successful refresh.
/// - `get_token` never returns a token that is within `refresh_margin` of
///   its expiry.
pub struct TokenProvider {
    client: reqwest::Client,
    authority_url: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    scope: String,
    refresh_margin: Duration,
    cached: Option<AccessToken>,
}

impl TokenProvider {
    /// Creates a provider for the given app registration against the public
    /// Azure AD authority. No request is made until [`get_token`](Self::get_token).
    pub fn new(tenant_id: &str, client_id: &str, client_secret: &str) -> Self {
        TokenProvider {
            client: build_token_client(),
            authority_url: DEFAULT_AUTHORITY_URL.to_string(),
            tenant_id: tenant_id.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            scope: GRAPH_SCOPE.to_string(),
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            cached: None,
        }
    }

    /// Points the provider at a different authority (sovereign clouds, or a
    /// mock server in tests).
    pub fn with_authority(mut self, authority_url: &str) -> Self {
        self.authority_url = authority_url.trim_end_matches('/').to_string();
        self
    }

    /// Sets how close to expiry a cached token may get before it is
    /// replaced.
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// Creates a `TokenProvider` with a pre-set token, bypassing Azure AD.
    /// Used by tests to avoid real HTTP calls during token acquisition.
    /// The token is treated as freshly acquired with a one-hour lifetime.
    pub fn with_token(token: &str) -> Self {
        let mut provider = TokenProvider::new("", "", "");
        provider.cached = Some(AccessToken {
            value: token.to_string(),
            expires_at: expiry_after(3600),
        });
        provider
    }

    fn token_url(&self) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.authority_url, self.tenant_id)
    }

    /// Returns a valid token, refreshing first when none is cached or the
    /// cached one is about to expire.
    ///
    /// # Errors
    ///
    /// - `ExplorerError::Auth` when the token endpoint is unreachable, rejects
    ///   the credentials, or returns a body that is not a token response.
    pub async fn get_token(&mut self) -> Result<AccessToken> {
        if let Some(token) = self
            .cached
            .as_ref()
            .filter(|t| !t.is_stale(self.refresh_margin))
        {
            return Ok(token.clone());
        }
        self.refresh().await
    }

    /// Drops the cached token so the next `get_token` goes to Azure AD.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    /// Fetches a new token from Azure AD and caches it.
    ///
    /// The body is read as text before the status check so Azure AD's AADSTS
    /// diagnostics end up in the error.
    async fn refresh(&mut self) -> Result<AccessToken> {
        let body = TokenRequest {
            client_id: &self.client_id,
            scope: &self.scope,
            client_secret: &self.client_secret,
            grant_type: "client_credentials",
        };
        let url = self.token_url();
        debug!(%url, "requesting access token");

        let response = self
            .client
            .post(&url)
            .form(&body)
            .send()
            .await
            .map_err(|e| ExplorerError::Auth {
                message: format!("token endpoint unreachable: {url}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| ExplorerError::Auth {
            message: "failed to read token response".to_string(),
            source: Some(Box::new(e)),
        })?;

        if !status.is_success() {
            return Err(ExplorerError::Auth {
                message: format!("token request failed ({status}): {text}"),
                source: None,
            });
        }

        let resp: TokenResponse =
            serde_json::from_str(&text).map_err(|e| ExplorerError::Auth {
                message: "failed to parse token response".to_string(),
                source: Some(Box::new(e)),
            })?;

        let token = AccessToken {
            value: resp.access_token,
            expires_at: expiry_after(resp.expires_in),
        };
        info!(expires_in = resp.expires_in, "acquired access token");
        self.cached = Some(token.clone());
        Ok(token)
    }
}

fn build_token_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(TOKEN_REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}
