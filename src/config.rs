//! Run configuration.
//!
//! Settings come from three layers, each overriding the previous one:
//! built-in defaults, an optional TOML file, and `INTUNE_*` environment
//! variables. The binary applies the positional group argument last.
//! [`Config::validate`] runs once before any network call.
//!
//! ```toml
//! tenant_id = "00000000-0000-0000-0000-000000000000"
//! client_id = "11111111-1111-1111-1111-111111111111"
//! client_secret = "..."
//! group = "Finance-Laptops"
//! request_timeout_secs = 30
//! max_retries = 3
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::error::{ExplorerError, Result};
use crate::paging::RetryPolicy;

/// Graph endpoint used by default. The beta surface exposes built-in apps
/// (Office, Edge) that v1.0 omits.
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/beta";

/// Azure AD authority hosting the `/{tenant}/oauth2/v2.0/token` endpoint.
pub const DEFAULT_AUTHORITY_URL: &str = "https://login.microsoftonline.com";

/// Path of the TOML configuration file.
pub const ENV_CONFIG_PATH: &str = "INTUNE_EXPLORER_CONFIG";
/// Overrides `tenant_id`.
pub const ENV_TENANT_ID: &str = "INTUNE_TENANT_ID";
/// Overrides `client_id`.
pub const ENV_CLIENT_ID: &str = "INTUNE_CLIENT_ID";
/// Overrides `client_secret`.
pub const ENV_CLIENT_SECRET: &str = "INTUNE_CLIENT_SECRET";
/// Overrides `group`.
pub const ENV_GROUP: &str = "INTUNE_GROUP";
/// Overrides `graph_base_url`.
pub const ENV_GRAPH_BASE_URL: &str = "INTUNE_GRAPH_BASE_URL";
/// Overrides `authority_url`.
pub const ENV_AUTHORITY_URL: &str = "INTUNE_AUTHORITY_URL";

/// Largest accepted `token_refresh_margin_secs`. Graph tokens live about an
/// hour, so a bigger margin would refresh before every request.
pub const MAX_TOKEN_REFRESH_MARGIN_SECS: u64 = 3600;

/// Everything a run needs to know, validated up front.
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Azure AD tenant (directory) id.
    pub tenant_id: String,
    /// Application (client) id of the app registration.
    pub client_id: String,
    /// Client secret of the app registration.
    pub client_secret: String,
    /// Display name or object id of the group to report on.
    pub group: String,
    /// Graph endpoint root, e.g. `https://graph.microsoft.com/beta`.
    pub graph_base_url: String,
    /// Azure AD authority the token endpoint hangs off.
    pub authority_url: String,
    /// Whole-request timeout for every HTTP call.
    pub request_timeout_secs: u64,
    /// TCP and TLS connect timeout.
    pub connect_timeout_secs: u64,
    /// A cached token is refreshed once it is this close to expiry.
    pub token_refresh_margin_secs: u64,
    /// Extra attempts for a paged fetch that hit 429/5xx.
    pub max_retries: u32,
    /// Wait before the first retry; doubles on each further one.
    pub initial_backoff_ms: u64,
    /// Ceiling on any single wait, including `Retry-After`.
    pub max_backoff_ms: u64,
    /// Upper bound on pages followed for one collection.
    pub max_pages: usize,
    /// Also report objects assigned to groups that contain the target group.
    pub include_inherited: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            group: String::new(),
            graph_base_url: DEFAULT_GRAPH_BASE_URL.to_string(),
            authority_url: DEFAULT_AUTHORITY_URL.to_string(),
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            token_refresh_margin_secs: 60,
            max_retries: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            max_pages: 10_000,
            include_inherited: true,
        }
    }
}

// Hand-written so the client secret never ends up in logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("group", &self.group)
            .field("graph_base_url", &self.graph_base_url)
            .field("authority_url", &self.authority_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("token_refresh_margin_secs", &self.token_refresh_margin_secs)
            .field("max_retries", &self.max_retries)
            .field("initial_backoff_ms", &self.initial_backoff_ms)
            .field("max_backoff_ms", &self.max_backoff_ms)
            .field("max_pages", &self.max_pages)
            .field("include_inherited", &self.include_inherited)
            .finish()
    }
}

impl Config {
    /// Loads defaults, then the TOML file at `path` (if any), then the
    /// process environment. Does not validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    ExplorerError::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                Self::from_toml_str(&contents)?
            }
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parses a TOML document; keys that are absent keep their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| ExplorerError::Config(format!("invalid TOML: {e}")))
    }

    /// Overrides fields from environment-style lookups. Empty values are ignored.
    ///
    /// Takes a lookup function rather than reading `std::env` directly so
    /// tests don't have to mutate the process environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let overrides: [(&str, &mut String); 6] = [
            (ENV_TENANT_ID, &mut self.tenant_id),
            (ENV_CLIENT_ID, &mut self.client_id),
            (ENV_CLIENT_SECRET, &mut self.client_secret),
            (ENV_GROUP, &mut self.group),
            (ENV_GRAPH_BASE_URL, &mut self.graph_base_url),
            (ENV_AUTHORITY_URL, &mut self.authority_url),
        ];
        for (key, field) in overrides {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *field = value;
            }
        }
    }

    /// Checks that every required field is present and well-formed.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("tenant_id", &self.tenant_id, ENV_TENANT_ID),
            ("client_id", &self.client_id, ENV_CLIENT_ID),
            ("client_secret", &self.client_secret, ENV_CLIENT_SECRET),
            ("group", &self.group, ENV_GROUP),
        ];
        for (name, value, env) in required {
            if value.trim().is_empty() {
                return Err(ExplorerError::Config(format!(
                    "{name} is not set (config file key `{name}` or {env})"
                )));
            }
        }

        check_http_url("graph_base_url", &self.graph_base_url)?;
        check_http_url("authority_url", &self.authority_url)?;

        if self.request_timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return Err(ExplorerError::Config(
                "timeouts must be at least one second".to_string(),
            ));
        }
        if self.token_refresh_margin_secs > MAX_TOKEN_REFRESH_MARGIN_SECS {
            return Err(ExplorerError::Config(format!(
                "token_refresh_margin_secs ({}) exceeds {MAX_TOKEN_REFRESH_MARGIN_SECS}",
                self.token_refresh_margin_secs
            )));
        }
        if self.max_pages == 0 {
            return Err(ExplorerError::Config("max_pages must be positive".to_string()));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(ExplorerError::Config(format!(
                "initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.initial_backoff_ms, self.max_backoff_ms
            )));
        }
        Ok(())
    }

    /// `request_timeout_secs` as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// `connect_timeout_secs` as a `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// `token_refresh_margin_secs` as a `Duration`.
    pub fn token_refresh_margin(&self) -> Duration {
        Duration::from_secs(self.token_refresh_margin_secs)
    }

    /// Retry behaviour for paged fetches.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

fn check_http_url(name: &str, value: &str) -> Result<()> {
    let url = Url::parse(value)
        .map_err(|e| ExplorerError::Config(format!("{name} '{value}' is not a valid URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ExplorerError::Config(format!(
            "{name} must use http or https, got '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn complete() -> Config {
        Config {
            tenant_id: "tenant".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            group: "Finance-Laptops".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn defaults_point_at_graph_beta() {
        let config = Config::default();
        assert_eq!(config.graph_base_url, DEFAULT_GRAPH_BASE_URL);
        assert_eq!(config.authority_url, DEFAULT_AUTHORITY_URL);
        assert_eq!(config.max_retries, 3);
        assert!(config.include_inherited);
    }

    #[test]
    fn toml_overrides_only_given_keys() {
        let config = Config::from_toml_str(
            r#"
            tenant_id = "t-1"
            group = "Finance-Laptops"
            request_timeout_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.tenant_id, "t-1");
        assert_eq!(config.group, "Finance-Laptops");
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.connect_timeout_secs, 10, "default kept");
    }

    #[test]
    fn toml_rejects_unknown_keys() {
        let err = Config::from_toml_str("tenant = \"typo\"").unwrap_err();
        assert!(matches!(err, ExplorerError::Config(_)));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = Config::from_toml_str("tenant_id = \"from-file\"").unwrap();
        let env: HashMap<&str, &str> = [
            (ENV_TENANT_ID, "from-env"),
            (ENV_CLIENT_SECRET, "s3cret"),
            (ENV_GROUP, "   "),
        ]
        .into_iter()
        .collect();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.tenant_id, "from-env");
        assert_eq!(config.client_secret, "s3cret");
        assert!(config.group.is_empty(), "blank env values are ignored");
    }

    #[test]
    fn complete_config_validates() {
        complete().validate().unwrap();
    }

    #[test]
    fn missing_secret_names_the_env_var() {
        let config = Config {
            client_secret: String::new(),
            ..complete()
        };
        let msg = config.validate().unwrap_err().to_string();
        assert!(msg.contains("client_secret"), "got: {msg}");
        assert!(msg.contains(ENV_CLIENT_SECRET), "got: {msg}");
    }

    #[test]
    fn non_http_base_url_is_rejected() {
        let config = Config {
            graph_base_url: "ftp://graph.example".to_string(),
            ..complete()
        };
        assert!(config.validate().is_err());

        let config = Config {
            authority_url: "not a url".to_string(),
            ..complete()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = Config {
            request_timeout_secs: 0,
            ..complete()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_refresh_margin_is_rejected() {
        let config = Config {
            token_refresh_margin_secs: u64::MAX,
            ..complete()
        };
        let msg = config.validate().unwrap_err().to_string();
        assert!(msg.contains("token_refresh_margin_secs"), "got: {msg}");

        let config = Config {
            token_refresh_margin_secs: MAX_TOKEN_REFRESH_MARGIN_SECS,
            ..complete()
        };
        config.validate().unwrap();
    }

    #[test]
    fn debug_output_redacts_secret() {
        let config = Config {
            client_secret: "hunter2".to_string(),
            ..complete()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"), "got: {rendered}");
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn retry_policy_mirrors_config() {
        let policy = complete().retry_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_backoff, Duration::from_secs(1));
        assert_eq!(policy.max_backoff, Duration::from_secs(30));
    }
}
