//! TOML-based configuration for branchsync.
//!
//! Every section is optional; a missing file section falls back to the
//! defaults below. Tokens are never part of the configuration: each request
//! carries its own.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Process-level settings (logging, scratch directory).
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Git engine behaviour.
    #[serde(default)]
    pub git: GitConfig,

    /// HTTP listener settings.
    #[serde(default)]
    pub web: WebConfig,
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Root directory holding one working copy per repository name.
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: PathBuf,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_workspace_dir() -> PathBuf {
    std::env::temp_dir().join("git-manager")
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            workspace_dir: default_workspace_dir(),
        }
    }
}

// ---------------------------------------------------------------------------
// Git
// ---------------------------------------------------------------------------

/// Git engine settings shared by every orchestration call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Username sent alongside the token for HTTPS basic auth.
    #[serde(default = "default_credential_username")]
    pub credential_username: String,

    /// Deadline for each clone / fetch / push, in seconds.
    #[serde(default = "default_network_timeout")]
    pub network_timeout_secs: u64,

    /// Push the target branch to origin after a successful merge.
    #[serde(default)]
    pub push_after_merge: bool,

    /// Also bring the local source branch up to date before merging.
    #[serde(default)]
    pub reconcile_source: bool,

    /// Name recorded on merge commits.
    #[serde(default = "default_committer_name")]
    pub committer_name: String,

    /// Email recorded on merge commits.
    #[serde(default = "default_committer_email")]
    pub committer_email: String,
}

fn default_credential_username() -> String {
    "x-access-token".into()
}
fn default_network_timeout() -> u64 {
    300
}
fn default_committer_name() -> String {
    "branchsync".into()
}
fn default_committer_email() -> String {
    "branchsync@localhost".into()
}

impl GitConfig {
    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            credential_username: default_credential_username(),
            network_timeout_secs: default_network_timeout(),
            push_after_merge: false,
            reconcile_source: false,
            committer_name: default_committer_name(),
            committer_email: default_committer_email(),
        }
    }
}

// ---------------------------------------------------------------------------
// Web
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Listen address (default `127.0.0.1:8080`).
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Origins allowed by the CORS layer.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

fn default_listen() -> String {
    "127.0.0.1:8080".into()
}
fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:5173".into()]
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Validate that all fields are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.workspace_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "daemon.workspace_dir".into(),
                detail: "workspace directory must not be empty".into(),
            });
        }
        if self.git.network_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "git.network_timeout_secs".into(),
                detail: "network timeout must be > 0".into(),
            });
        }
        if self.git.credential_username.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "git.credential_username".into(),
                detail: "credential username must not be empty".into(),
            });
        }
        if self.git.committer_name.trim().is_empty() || self.git.committer_email.trim().is_empty()
        {
            return Err(ConfigError::InvalidValue {
                field: "git.committer_name".into(),
                detail: "committer name and email must not be empty".into(),
            });
        }
        if self.web.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::InvalidValue {
                field: "web.listen".into(),
                detail: format!("'{}' is not a socket address", self.web.listen),
            });
        }

        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }
}
