//! Typed error hierarchy for the intune-explorer crate.
//!
//! `ExplorerError` maps each failure to the boundary it happened at: the
//! Azure AD token endpoint, a Graph resource, the transport, or local
//! configuration. Besides `Display` and `source()` chaining (derived by
//! thiserror), every error can say two things about itself:
//!
//! - [`ExplorerError::is_retryable`]: whether re-running the whole paged
//!   fetch may succeed (HTTP 429 and 5xx).
//! - [`ExplorerError::is_resource_scoped`]: whether the failure concerns a
//!   single Graph collection, so the report can carry on with the others.
//!   Everything else (auth, timeout, network, configuration, ambiguous
//!   group) aborts the run.

use std::time::Duration;

use reqwest::StatusCode;

/// Unified error type for all intune-explorer operations.
#[derive(Debug, thiserror::Error)]
pub enum ExplorerError {
    /// Authentication failure at the Azure AD token endpoint.
    ///
    /// Covers rejected credentials (the `message` carries Azure AD's AADSTS
    /// body), an unreachable identity endpoint, and an unparseable token
    /// response. Always fatal for the run.
    #[error("authentication failed: {message}")]
    Auth {
        /// Human-readable description including HTTP status and body when available.
        message: String,
        /// The underlying transport or parse error, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Graph throttled the request (429) or failed server-side (5xx).
    ///
    /// `retry_after` is the server's suggested backoff from the
    /// `Retry-After` header, when it sent one.
    #[error("transient API error {status}: {body}")]
    Retryable {
        /// The HTTP status code (429 or 5xx).
        status: StatusCode,
        /// Suggested wait before retrying, parsed from `Retry-After`.
        retry_after: Option<Duration>,
        /// Condensed response body.
        body: String,
    },

    /// The app registration is not allowed to read the resource (401 after a
    /// token refresh, or 403).
    #[error("permission denied ({status}): {body}")]
    Permission {
        /// The HTTP status code (401 or 403).
        status: StatusCode,
        /// Condensed response body, usually naming the missing permission.
        body: String,
    },

    /// The resource (or the group being looked up) does not exist.
    #[error("not found: {resource}")]
    NotFound {
        /// Description of what was looked up.
        resource: String,
    },

    /// A group display name matched more than one group.
    #[error("group name '{name}' is ambiguous; matching ids: {}", candidates.join(", "))]
    AmbiguousGroup {
        /// The display name that was searched for.
        name: String,
        /// Object ids of every matching group.
        candidates: Vec<String>,
    },

    /// An HTTP request exceeded the configured timeout.
    #[error("request timed out: {url}")]
    Timeout {
        /// The URL that was being requested.
        url: String,
    },

    /// Any other non-success, non-retryable HTTP status (400, 405, 409, ...).
    #[error("API error {status}: {body}")]
    Api {
        /// The HTTP status code returned by Graph.
        status: StatusCode,
        /// Condensed response body.
        body: String,
    },

    /// A collection kept handing out next links past the configured page cap.
    #[error("{resource} exceeded {pages} pages")]
    PageLimit {
        /// The collection being read.
        resource: String,
        /// Pages read before giving up.
        pages: usize,
    },

    /// A response body could not be deserialized.
    #[error("failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),

    /// A transport-level failure (DNS, TCP, TLS) with no HTTP status.
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    /// Missing or invalid configuration, detected before any network call.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ExplorerError>;

impl ExplorerError {
    /// Returns `true` when re-running the failed fetch may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExplorerError::Retryable { .. })
    }

    /// Returns `true` when the failure is confined to one Graph resource.
    ///
    /// Retryable errors count as resource-scoped once the retry budget is
    /// spent: the server is struggling with that collection, not with us.
    pub fn is_resource_scoped(&self) -> bool {
        matches!(
            self,
            ExplorerError::Retryable { .. }
                | ExplorerError::Permission { .. }
                | ExplorerError::NotFound { .. }
                | ExplorerError::Api { .. }
                | ExplorerError::PageLimit { .. }
                | ExplorerError::Parse(_)
        )
    }
}

/// Transport errors are split so that timeouts surface as their own variant.
impl From<reqwest::Error> for ExplorerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExplorerError::Timeout {
                url: err
                    .url()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| "<unknown>".to_string()),
            }
        } else {
            ExplorerError::Network(err)
        }
    }
}

/// Condenses a Graph error body to `code: message`.
///
/// Graph wraps errors as `{"error": {"code": "...", "message": "..."}}`.
/// Bodies that don't follow that shape are returned unchanged.
pub fn condense_graph_error(body: &str) -> String {
    let Ok(json) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.to_string();
    };
    let Some(error) = json.get("error") else {
        return body.to_string();
    };
    let code = error
        .get("code")
        .and_then(|c| c.as_str())
        .unwrap_or("Unknown");
    let message = error
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("No message");
    format!("{code}: {message}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn auth_error_displays_message() {
        let err = ExplorerError::Auth {
            message: "token request failed (401): AADSTS7000215".to_string(),
            source: None,
        };
        let msg = err.to_string();
        assert!(msg.contains("AADSTS7000215"));
        assert!(msg.contains("authentication failed"));
    }

    #[test]
    fn auth_error_with_source_chains_correctly() {
        let json_err = serde_json::from_str::<String>("not-json").unwrap_err();
        let err = ExplorerError::Auth {
            message: "failed to parse token response".to_string(),
            source: Some(Box::new(json_err)),
        };
        assert!(err.source().is_some());
    }

    #[test]
    fn ambiguous_group_lists_candidates() {
        let err = ExplorerError::AmbiguousGroup {
            name: "Finance".to_string(),
            candidates: vec!["id-1".to_string(), "id-2".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("'Finance'"));
        assert!(msg.contains("id-1, id-2"));
    }

    #[test]
    fn only_throttling_and_server_errors_are_retryable() {
        let retryable = ExplorerError::Retryable {
            status: StatusCode::TOO_MANY_REQUESTS,
            retry_after: Some(Duration::from_secs(2)),
            body: String::new(),
        };
        assert!(retryable.is_retryable());

        let forbidden = ExplorerError::Permission {
            status: StatusCode::FORBIDDEN,
            body: String::new(),
        };
        assert!(!forbidden.is_retryable());
        assert!(!ExplorerError::Config("x".into()).is_retryable());
    }

    #[test]
    fn resource_scope_classification() {
        assert!(
            ExplorerError::NotFound {
                resource: "mobileApps".into()
            }
            .is_resource_scoped()
        );
        assert!(
            ExplorerError::Api {
                status: StatusCode::BAD_REQUEST,
                body: String::new()
            }
            .is_resource_scoped()
        );
        assert!(
            !ExplorerError::Auth {
                message: String::new(),
                source: None
            }
            .is_resource_scoped()
        );
        assert!(
            !ExplorerError::Timeout {
                url: "https://graph".into()
            }
            .is_resource_scoped()
        );
        assert!(
            !ExplorerError::AmbiguousGroup {
                name: "g".into(),
                candidates: vec![]
            }
            .is_resource_scoped()
        );
    }

    #[test]
    fn condense_graph_error_extracts_code_and_message() {
        let body = r#"{"error":{"code":"Authorization_RequestDenied","message":"Insufficient privileges to complete the operation."}}"#;
        assert_eq!(
            condense_graph_error(body),
            "Authorization_RequestDenied: Insufficient privileges to complete the operation."
        );
    }

    #[test]
    fn condense_graph_error_passes_through_plain_text() {
        assert_eq!(condense_graph_error("Service Unavailable"), "Service Unavailable");
        assert_eq!(condense_graph_error(r#"{"other":1}"#), r#"{"other":1}"#);
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ExplorerError>();
    }
}
