//! Reports conflicted paths left in a working copy.

use std::collections::BTreeSet;

use tracing::info;

use crate::errors::EngineError;
use crate::git::{GitClient, RemoteAuth};
use crate::progress::ProgressTracker;
use crate::reconcile::BranchReconciler;

/// Reads the conflict state of a working copy as it is. It never checks
/// out or resets anything, so the result reflects the last merge left there.
pub struct ConflictInspector<'a> {
    client: &'a GitClient,
    progress: &'a ProgressTracker,
}

impl<'a> ConflictInspector<'a> {
    pub fn new(client: &'a GitClient, progress: &'a ProgressTracker) -> Self {
        Self { client, progress }
    }

    /// Fetch, then list conflicted paths in sorted order.
    pub fn inspect(&self, auth: &RemoteAuth) -> Result<BTreeSet<String>, EngineError> {
        BranchReconciler::new(self.client, self.progress).fetch(auth)?;
        let paths = self.client.conflicted_paths()?;
        info!(count = paths.len(), "conflicts inspected");
        Ok(paths)
    }
}
