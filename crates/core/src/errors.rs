//! Error types for the branchsync core library.
//!
//! Each layer has its own error type derived with `thiserror`: [`GitError`]
//! for the git engine adapter, [`ValidationError`] for request checks,
//! [`EngineError`] for the classified failures an entry point can report,
//! and [`ConfigError`] for configuration loading.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from local Git (git2) operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, remote-tracking branch, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// The local branch has commits the remote branch does not.
    #[error("local branch '{0}' has diverged from its remote counterpart")]
    Diverged(String),

    /// The working copy has an in-progress operation or modified files.
    #[error("working copy is not clean: {0}")]
    DirtyWorkingCopy(String),

    /// The remote rejected the supplied token.
    #[error("authentication failed for '{0}'")]
    AuthenticationFailed(String),

    /// A network operation ran past its deadline and was aborted.
    #[error("git {operation} timed out after {secs}s")]
    TimedOut { operation: String, secs: u64 },

    /// Push was rejected (e.g. non-fast-forward).
    #[error("git push rejected for branch '{branch}': {detail}")]
    PushRejected { branch: String, detail: String },

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Request validation
// ---------------------------------------------------------------------------

/// A request parameter was missing or malformed. Raised before any git work.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} is not a valid branch name: '{value}'")]
    InvalidBranchName { field: &'static str, value: String },

    #[error("repository URL has no repository name: '{0}'")]
    InvalidRepositoryUrl(String),
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

/// Classified failure of a diff / conflicts call, or the reason carried by a
/// failed merge outcome.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The remote could not be cloned (network, auth, bad URL).
    #[error("failed to clone repository '{url}': {source}")]
    Clone { url: String, source: GitError },

    /// An existing working copy could not be opened.
    #[error("failed to open working copy at '{path}': {source}")]
    Open { path: String, source: GitError },

    /// The working copy on disk was cloned from a different remote.
    #[error("working copy at '{path}' tracks '{found}', not '{expected}'")]
    OriginMismatch {
        path: String,
        expected: String,
        found: String,
    },

    /// Fetching from origin failed.
    #[error("failed to fetch from origin: {0}")]
    Fetch(GitError),

    /// Every reconciliation strategy failed for the branch.
    #[error("could not reconcile branch '{branch}': {}", .causes.join("; "))]
    Reconcile { branch: String, causes: Vec<String> },

    /// Publishing the merged branch failed.
    #[error("failed to push branch '{branch}': {source}")]
    Push { branch: String, source: GitError },

    /// Any other fault raised by the git engine.
    #[error("git operation failed: {0}")]
    Git(#[from] GitError),

    /// A fault that is not a git error (worker panic, poisoned state).
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Short machine-readable classification used by the request layer.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Clone { .. } => "clone",
            Self::Open { .. } | Self::OriginMismatch { .. } => "working_copy",
            Self::Fetch(_) => "fetch",
            Self::Reconcile { .. } => "reconcile",
            Self::Push { .. } => "push",
            Self::Git(_) | Self::Internal(_) => "internal",
        }
    }

    /// Whether the failure happened while talking to the remote.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Clone { .. } | Self::Fetch(_) | Self::Push { .. })
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
