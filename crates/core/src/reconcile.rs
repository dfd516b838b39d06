//! Branch reconciliation.
//!
//! Brings a named local branch to `origin/<name>` whatever state the working
//! copy was left in. Recovery is an ordered list of [`Strategy`] values: the
//! first one that succeeds wins, and when all fail their causes are reported
//! together.

use std::fmt;

use tracing::{debug, info, instrument, warn};

use crate::errors::{EngineError, GitError};
use crate::git::{GitClient, RemoteAuth};
use crate::models::BranchRef;
use crate::progress::ProgressTracker;

/// Progress label of the fetch phase.
pub const FETCH_TASK: &str = "fetch";

/// Progress label used while reconciling `branch`.
pub fn reconcile_task(branch: &str) -> String {
    format!("reconcile {}", branch)
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// One way of bringing a local branch up to its remote tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Check out the existing local branch and fast-forward it. Requires a
    /// clean working copy and a local branch the remote tip descends from.
    FastForwardExisting,
    /// Discard local state, delete the branch and recreate it at the remote
    /// tip with upstream tracking.
    ResetAndRecreate,
}

impl Strategy {
    /// Attempt order.
    pub const ORDERED: [Strategy; 2] = [Strategy::FastForwardExisting, Strategy::ResetAndRecreate];

    fn attempt(self, client: &GitClient, branch: &str) -> Result<(), GitError> {
        match self {
            Self::FastForwardExisting => {
                client.ensure_clean()?;
                client.checkout_local_branch(branch)?;
                client.fast_forward_to_remote(branch)?;
                if client.upstream_of(branch).is_none() {
                    client.set_upstream(branch)?;
                }
                Ok(())
            }
            Self::ResetAndRecreate => {
                let target = client.remote_tip(branch)?;
                client.detach_and_hard_reset(&target)?;
                if let Err(e) = client.delete_local_branch(branch) {
                    debug!(branch, error = %e, "no local branch to delete");
                }
                client.create_tracking_branch(branch, &target)
            }
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FastForwardExisting => write!(f, "fast-forward"),
            Self::ResetAndRecreate => write!(f, "reset-and-recreate"),
        }
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Reconciles branches of one working copy.
pub struct BranchReconciler<'a> {
    client: &'a GitClient,
    progress: &'a ProgressTracker,
}

impl<'a> BranchReconciler<'a> {
    pub fn new(client: &'a GitClient, progress: &'a ProgressTracker) -> Self {
        Self { client, progress }
    }

    /// Fetch from origin, then reconcile `branch`.
    pub fn reconcile(&self, branch: &str, auth: &RemoteAuth) -> Result<BranchRef, EngineError> {
        self.fetch(auth)?;
        self.reconcile_fetched(branch)
    }

    /// Fetch every remote branch with pruning. Nothing local can be trusted
    /// when this fails.
    pub fn fetch(&self, auth: &RemoteAuth) -> Result<(), EngineError> {
        self.progress.start(FETCH_TASK);
        self.client.fetch(auth, self.progress).map_err(EngineError::Fetch)?;
        self.progress.finish(FETCH_TASK);
        Ok(())
    }

    /// Reconcile `branch` against the remote-tracking refs of the last fetch.
    #[instrument(skip(self))]
    pub fn reconcile_fetched(&self, branch: &str) -> Result<BranchRef, EngineError> {
        let task = reconcile_task(branch);
        self.progress.start(&task);

        let mut causes = Vec::new();
        for strategy in Strategy::ORDERED {
            match strategy.attempt(self.client, branch) {
                Ok(()) => {
                    let resolved = self.resolve(branch)?;
                    info!(%strategy, commit = %resolved.commit, "branch reconciled");
                    self.progress.finish(&task);
                    return Ok(resolved);
                }
                Err(e) => {
                    warn!(%strategy, error = %e, "reconcile strategy failed");
                    causes.push(format!("{}: {}", strategy, e));
                }
            }
        }

        Err(EngineError::Reconcile {
            branch: branch.to_string(),
            causes,
        })
    }

    fn resolve(&self, branch: &str) -> Result<BranchRef, EngineError> {
        let commit = self.client.local_tip(branch)?;
        Ok(BranchRef {
            name: branch.to_string(),
            commit: commit.id().to_string(),
            tree: commit.tree_id().to_string(),
            upstream: self.client.upstream_of(branch),
        })
    }
}
