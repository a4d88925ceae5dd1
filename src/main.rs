//! CLI entry point for intune-explorer. Shows which Intune objects apply to
//! an Azure AD group.
//!
//! Loads and validates the configuration, authenticates with client
//! credentials, resolves the group, reads the Intune collections one request
//! at a time, and prints the report to stdout. Logs go to stderr.
//!
//! Exit codes:
//! - 0: success (collections that could not be read are marked in the report)
//! - 1: runtime error (configuration, auth failure, ambiguous group, timeout, etc.)
//! - 2: argument validation error (clap handles this automatically)

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use intune_explorer::client::GraphClient;
use intune_explorer::config::{Config, ENV_CONFIG_PATH};
use intune_explorer::error::Result;
use intune_explorer::groups::resolve_group;
use intune_explorer::intune::{SummarizeOptions, summarize};
use intune_explorer::report;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Group display name or object id. Overrides `group` from the
    /// configuration file and INTUNE_GROUP.
    group: Option<String>,

    /// TOML configuration file. Credentials can also come from
    /// INTUNE_TENANT_ID, INTUNE_CLIENT_ID and INTUNE_CLIENT_SECRET.
    #[arg(long, env = ENV_CONFIG_PATH)]
    config: Option<PathBuf>,

    /// Log requests and pages to stderr.
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "intune_explorer=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<String> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(group) = cli.group {
        config.group = group;
    }
    config.validate()?;
    info!(?config, "configuration loaded");

    let client = GraphClient::from_config(&config)?;
    let policy = config.retry_policy();
    let group = resolve_group(&client, &config.group, &policy).await?;

    let options = SummarizeOptions {
        include_inherited: config.include_inherited,
        retry: policy,
    };
    let summary = summarize(&client, &group, &options).await?;
    Ok(report::render(&summary))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(text) => {
            print!("{text}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "run aborted");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
