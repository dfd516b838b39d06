//! Merge orchestration.
//!
//! One merge call runs: obtain working copy -> fetch -> reconcile source
//! (optional) -> reconcile target -> merge `origin/<source>` into the target
//! with an explicit merge commit -> push (optional). Every failure along the
//! way ends up in the returned [`MergeReport`] rather than an error.

use git2::Signature;
use tracing::{info, instrument, warn};

use crate::cache::RepositoryLease;
use crate::config::GitConfig;
use crate::errors::{EngineError, GitError};
use crate::git::{GitClient, MergeStatus, RemoteAuth};
use crate::models::{MergeOutcome, MergeReport};
use crate::progress::ProgressTracker;
use crate::reconcile::BranchReconciler;

pub const MERGE_TASK: &str = "merge";
pub const PUSH_TASK: &str = "push";

/// Commit message of every merge commit this engine records.
pub fn merge_message(source: &str, target: &str) -> String {
    format!("Merge {} into {}", source, target)
}

/// Behaviour switches for a merge call.
#[derive(Debug, Clone)]
pub struct MergePolicy {
    /// Push the target branch to origin after a new merge commit.
    pub push_after_merge: bool,
    /// Reconcile the local source branch as well as the target.
    pub reconcile_source: bool,
    pub committer_name: String,
    pub committer_email: String,
}

impl From<&GitConfig> for MergePolicy {
    fn from(git: &GitConfig) -> Self {
        Self {
            push_after_merge: git.push_after_merge,
            reconcile_source: git.reconcile_source,
            committer_name: git.committer_name.clone(),
            committer_email: git.committer_email.clone(),
        }
    }
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self::from(&GitConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct MergeOrchestrator<'a> {
    policy: &'a MergePolicy,
    progress: &'a ProgressTracker,
}

impl<'a> MergeOrchestrator<'a> {
    pub fn new(policy: &'a MergePolicy, progress: &'a ProgressTracker) -> Self {
        Self { policy, progress }
    }

    /// Merge `source` into `target` in the leased working copy.
    #[instrument(skip(self, lease, auth))]
    pub fn run(
        &self,
        lease: &RepositoryLease,
        source: &str,
        target: &str,
        auth: &RemoteAuth,
    ) -> MergeReport {
        match self.try_run(lease, source, target, auth) {
            Ok(report) => {
                info!(outcome = %report.outcome, "merge finished");
                report
            }
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "merge failed");
                MergeReport::new(source, target, MergeOutcome::failed(&e))
            }
        }
    }

    fn try_run(
        &self,
        lease: &RepositoryLease,
        source: &str,
        target: &str,
        auth: &RemoteAuth,
    ) -> Result<MergeReport, EngineError> {
        let client = lease.obtain(auth, self.progress)?;
        let reconciler = BranchReconciler::new(&client, self.progress);

        reconciler.fetch(auth)?;
        if self.policy.reconcile_source && source != target {
            reconciler.reconcile_fetched(source)?;
        }
        // The target is reconciled last so it stays checked out.
        reconciler.reconcile_fetched(target)?;

        let source_tip = client.remote_tip(source)?;
        let signature = Signature::now(&self.policy.committer_name, &self.policy.committer_email)
            .map_err(GitError::from)?;

        self.progress.start(MERGE_TASK);
        let status = client.merge_no_ff(&source_tip, &merge_message(source, target), &signature)?;
        self.progress.finish(MERGE_TASK);

        let mut report = MergeReport::new(source, target, MergeOutcome::Success);
        match status {
            MergeStatus::UpToDate => {}
            MergeStatus::Merged(oid) => {
                report.merge_commit = Some(oid.to_string());
                if self.policy.push_after_merge {
                    self.publish(&client, target, auth, &mut report);
                }
            }
            MergeStatus::Conflicting(paths) => {
                report.outcome = MergeOutcome::Conflicting { paths };
            }
            MergeStatus::Blocked(reason) => {
                report.outcome = MergeOutcome::Aborted { reason };
            }
        }
        Ok(report)
    }

    /// Push the merged target. A failure becomes a warning on the report.
    fn publish(&self, client: &GitClient, target: &str, auth: &RemoteAuth, report: &mut MergeReport) {
        self.progress.start(PUSH_TASK);
        match client.push(target, auth, self.progress) {
            Ok(()) => self.progress.finish(PUSH_TASK),
            Err(source) => {
                let err = EngineError::Push {
                    branch: target.to_string(),
                    source,
                };
                warn!(error = %err, "merge succeeded but push failed");
                report.warnings.push(err.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_message() {
        assert_eq!(
            merge_message("feature/x", "main"),
            "Merge feature/x into main"
        );
    }

    #[test]
    fn test_policy_from_config() {
        let mut git = GitConfig::default();
        let policy = MergePolicy::from(&git);
        assert!(!policy.push_after_merge);
        assert!(!policy.reconcile_source);
        assert_eq!(policy.committer_name, "branchsync");

        git.push_after_merge = true;
        git.committer_email = "bot@example.com".into();
        let policy = MergePolicy::from(&git);
        assert!(policy.push_after_merge);
        assert_eq!(policy.committer_email, "bot@example.com");
    }
}
