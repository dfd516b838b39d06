//! branchsync daemon entry point.
//!
//! Loads configuration, prepares the workspace directory, starts the web
//! server and stops it gracefully on SIGINT / SIGTERM.

mod signals;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use branchsync_core::config::AppConfig;
use branchsync_core::git::set_transport_timeouts;
use branchsync_core::progress::ProgressSink;
use branchsync_core::sync_engine::SyncEngine;
use branchsync_web::WebServer;

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// branchsync service daemon.
#[derive(Parser, Debug)]
#[command(
    name = "branchsync-daemon",
    version,
    about = "Merge, diff and conflict service for remote Git repositories"
)]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address from the config file.
    #[arg(long)]
    listen: Option<String>,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load_from_file(path).context("failed to load configuration file")?,
        None => AppConfig::default(),
    };
    if let Some(listen) = &args.listen {
        config.web.listen = listen.clone();
    }
    if let Some(level) = &args.log_level {
        config.daemon.log_level = level.clone();
    }
    config
        .validate()
        .context("configuration validation failed")?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let filter = EnvFilter::try_new(&config.daemon.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .init();

    // SAFETY: no other thread exists yet, the runtime is built below.
    let timeouts = unsafe { set_transport_timeouts(config.git.network_timeout()) };
    timeouts.context("failed to configure git transport timeouts")?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?
        .block_on(run(args, config))
}

async fn run(args: Args, config: AppConfig) -> Result<()> {
    info!("========================================");
    info!("  branchsync daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    match &args.config {
        Some(path) => info!("Config file      : {}", path.display()),
        None => info!("Config file      : <defaults>"),
    }
    info!("Workspace dir    : {}", config.daemon.workspace_dir.display());
    info!("Web listen       : {}", config.web.listen);
    info!("Push after merge : {}", config.git.push_after_merge);
    info!("Network timeout  : {}s", config.git.network_timeout_secs);
    info!("Log level        : {}", config.daemon.log_level);
    info!("========================================");

    std::fs::create_dir_all(&config.daemon.workspace_dir)
        .context("failed to create workspace directory")?;

    let engine = Arc::new(SyncEngine::new(config.clone()));
    let progress = Arc::new(ProgressSink::new());
    let listen_addr = config.web.listen.clone();
    let web_server = WebServer::new(config, engine, progress);

    web_server
        .start(&listen_addr, signals::shutdown_signal())
        .await
        .context("web server failed")?;

    info!("branchsync daemon stopped.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let args = Args::parse_from([
            "branchsync-daemon",
            "--listen",
            "0.0.0.0:9999",
            "--log-level",
            "debug",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.web.listen, "0.0.0.0:9999");
        assert_eq!(config.daemon.log_level, "debug");
    }

    #[test]
    fn test_invalid_listen_is_rejected() {
        let args = Args::parse_from(["branchsync-daemon", "--listen", "nowhere"]);
        assert!(load_config(&args).is_err());
    }
}
