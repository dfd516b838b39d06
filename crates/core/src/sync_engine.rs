//! Public entry points of the engine.
//!
//! The [`SyncEngine`] validates each request, leases the working copy for its
//! repository and runs the blocking git work on tokio's blocking pool. Every
//! call gets its own operation id, carried by the tracing span all of its
//! log lines are recorded under, and its own [`ProgressTracker`] over the
//! sink the caller passes in.
//!
//! 1. Validate the request. Nothing touches disk or network before this.
//! 2. Lease the working copy (one lock per repository directory).
//! 3. Obtain, fetch and reconcile, then merge / diff / inspect.
//! 4. Emit the final `complete = 100` progress event.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::cache::{RepositoryCache, RepositoryLease};
use crate::config::AppConfig;
use crate::conflict::ConflictInspector;
use crate::diff::{DiffReport, DiffReporter};
use crate::errors::{EngineError, ValidationError};
use crate::git::remote_url::redact_url;
use crate::git::RemoteAuth;
use crate::merge::{MergeOrchestrator, MergePolicy};
use crate::models::{ConflictsRequest, DiffRequest, MergeOutcome, MergeReport, MergeRequest};
use crate::progress::{ProgressSink, ProgressTracker};

/// The merge / diff / conflicts engine.
pub struct SyncEngine {
    config: AppConfig,
    cache: RepositoryCache,
    policy: MergePolicy,
}

impl SyncEngine {
    pub fn new(config: AppConfig) -> Self {
        info!(
            workspace = %config.daemon.workspace_dir.display(),
            push_after_merge = config.git.push_after_merge,
            "initializing sync engine"
        );
        Self {
            cache: RepositoryCache::new(config.daemon.workspace_dir.clone()),
            policy: MergePolicy::from(&config.git),
            config,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn cache(&self) -> &RepositoryCache {
        &self.cache
    }

    fn auth(&self, token: &str) -> RemoteAuth {
        RemoteAuth::new(
            self.config.git.credential_username.clone(),
            token,
            self.config.git.network_timeout(),
        )
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Merge `source_branch` into `target_branch`.
    ///
    /// Only request validation is reported as an error. Anything that goes
    /// wrong afterwards is classified into the report's outcome.
    pub async fn merge(
        &self,
        request: &MergeRequest,
        progress: Arc<ProgressSink>,
    ) -> Result<MergeReport, ValidationError> {
        request.validate()?;
        let span = info_span!(
            "merge",
            op_id = %Uuid::new_v4(),
            repo = %redact_url(&request.repository_url),
            source = %request.source_branch,
            target = %request.target_branch,
        );
        let lease = self
            .cache
            .lease(&request.repository_url)
            .instrument(span.clone())
            .await?;

        let tracker = Arc::new(ProgressTracker::new(progress));
        let policy = self.policy.clone();
        let auth = self.auth(&request.token);
        let source = request.source_branch.clone();
        let target = request.target_branch.clone();
        let worker_tracker = Arc::clone(&tracker);

        let result = run_blocking(span, lease, move |lease| {
            Ok(MergeOrchestrator::new(&policy, &worker_tracker).run(lease, &source, &target, &auth))
        })
        .await;
        tracker.complete();

        Ok(result.unwrap_or_else(|e| {
            MergeReport::new(
                &request.source_branch,
                &request.target_branch,
                MergeOutcome::failed(&e),
            )
        }))
    }

    /// Diff the trees of two branches after reconciling both.
    pub async fn diff(
        &self,
        request: &DiffRequest,
        progress: Arc<ProgressSink>,
    ) -> Result<DiffReport, EngineError> {
        request.validate()?;
        let span = info_span!(
            "diff",
            op_id = %Uuid::new_v4(),
            repo = %redact_url(&request.repository_url),
            source = %request.source_branch,
            target = %request.target_branch,
        );
        let lease = self
            .cache
            .lease(&request.repository_url)
            .instrument(span.clone())
            .await?;

        let tracker = Arc::new(ProgressTracker::new(progress));
        let auth = self.auth(&request.token);
        let source = request.source_branch.clone();
        let target = request.target_branch.clone();
        let worker_tracker = Arc::clone(&tracker);

        let result = run_blocking(span, lease, move |lease| {
            let client = lease.obtain(&auth, &worker_tracker)?;
            DiffReporter::new(&client, &worker_tracker).diff(&source, &target, &auth)
        })
        .await;
        tracker.complete();

        if let Err(e) = &result {
            warn!(kind = e.kind(), error = %e, "diff failed");
        }
        result
    }

    /// Paths currently conflicted in the repository's working copy.
    pub async fn conflicts(
        &self,
        request: &ConflictsRequest,
        progress: Arc<ProgressSink>,
    ) -> Result<BTreeSet<String>, EngineError> {
        request.validate()?;
        let span = info_span!(
            "conflicts",
            op_id = %Uuid::new_v4(),
            repo = %redact_url(&request.repository_url),
        );
        let lease = self
            .cache
            .lease(&request.repository_url)
            .instrument(span.clone())
            .await?;

        let tracker = Arc::new(ProgressTracker::new(progress));
        let auth = self.auth(&request.token);
        let worker_tracker = Arc::clone(&tracker);

        let result = run_blocking(span, lease, move |lease| {
            let client = lease.obtain(&auth, &worker_tracker)?;
            ConflictInspector::new(&client, &worker_tracker).inspect(&auth)
        })
        .await;
        tracker.complete();

        if let Err(e) = &result {
            warn!(kind = e.kind(), error = %e, "conflict inspection failed");
        }
        result
    }
}

/// Run `work` on the blocking pool while holding `lease`, inside `span`.
/// A panicking worker is reported as [`EngineError::Internal`].
async fn run_blocking<T, F>(span: Span, lease: RepositoryLease, work: F) -> Result<T, EngineError>
where
    T: Send + 'static,
    F: FnOnce(&RepositoryLease) -> Result<T, EngineError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || span.in_scope(|| work(&lease)))
        .await
        .map_err(|e| EngineError::Internal(format!("worker task failed: {}", e)))?
}
