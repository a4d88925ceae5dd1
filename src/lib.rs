//! Async Rust client for listing what Intune deploys to an Azure AD group.
//!
//! Provides OAuth2 client-credentials authentication, an authenticated
//! Graph client that follows `@odata.nextLink` cursors, group resolution,
//! and an aggregator that cross-references Intune apps, configuration
//! profiles, managed devices and enrollment configurations against a group.
//!
//! # Modules
//!
//! - [`auth`]: OAuth2 client credentials token provider with expiry tracking.
//! - [`client`]: Authenticated HTTP wrapper for Microsoft Graph.
//! - [`config`]: Run configuration from TOML and environment.
//! - [`error`]: Typed error hierarchy (`ExplorerError`).
//! - [`groups`]: Group lookup by name or id, member devices, parent groups.
//! - [`intune`]: Assignment matching and the per-group summary.
//! - [`paging`]: Cursor-following collection reads with bounded retry.
//! - [`report`]: Plain-text rendering of a summary.
//!
//! # Quick Start
//!
//! ```ignore
//! use intune_explorer::client::GraphClient;
//! use intune_explorer::config::Config;
//! use intune_explorer::groups::resolve_group;
//! use intune_explorer::intune::{SummarizeOptions, summarize};
//!
//! let config = Config::load(None)?;
//! config.validate()?;
//! let client = GraphClient::from_config(&config)?;
//! let group = resolve_group(&client, &config.group, &config.retry_policy()).await?;
//! let summary = summarize(&client, &group, &SummarizeOptions::default()).await?;
//! print!("{}", intune_explorer::report::render(&summary));
//! ```

#![warn(missing_docs)]

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod groups;
pub mod intune;
pub mod paging;
pub mod report;
