//! Tree-level diff between two reconciled branches.
//!
//! The old side of the comparison is the source branch and the new side is
//! the target branch. Every changed path lands in exactly one bucket of the
//! [`DiffSummary`]; [`DiffReport::files`] lists the same paths in bucket order
//! (added, modified, deleted), sorted within each bucket, with a unified diff
//! body using three lines of context.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use git2::{Delta, DiffOptions, Oid, Patch};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{EngineError, GitError};
use crate::git::{GitClient, RemoteAuth};
use crate::models::BranchRef;
use crate::progress::ProgressTracker;
use crate::reconcile::BranchReconciler;

/// Progress label of the diff computation.
pub const DIFF_TASK: &str = "diff";

const CONTEXT_LINES: u32 = 3;
const RULE: &str = "----------------------------------------";

/// Classification of one changed path. Variant order is bucket order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

impl ChangeKind {
    fn from_delta(delta: Delta) -> Option<Self> {
        match delta {
            Delta::Added => Some(Self::Added),
            Delta::Modified | Delta::Typechange => Some(Self::Modified),
            Delta::Deleted => Some(Self::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => write!(f, "ADD"),
            Self::Modified => write!(f, "MODIFY"),
            Self::Deleted => write!(f, "DELETE"),
        }
    }
}

/// Changed paths grouped by kind, each set sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub added: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }

    fn insert(&mut self, kind: ChangeKind, path: String) {
        match kind {
            ChangeKind::Added => self.added.insert(path),
            ChangeKind::Modified => self.modified.insert(path),
            ChangeKind::Deleted => self.deleted.insert(path),
        };
    }
}

/// One changed path with its unified diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub change: ChangeKind,
    pub patch: String,
}

/// Result of a diff call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffReport {
    pub source: String,
    pub target: String,
    pub summary: DiffSummary,
    pub files: Vec<FileDiff>,
}

impl DiffReport {
    /// Human-readable rendering: a header followed by one block per file.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DiffReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Diff between {} and {}", self.source, self.target)?;
        writeln!(f, "{}", RULE)?;
        writeln!(f)?;
        for file in &self.files {
            writeln!(f, "File: {}", file.path)?;
            writeln!(f, "Change Type: {}", file.change)?;
            writeln!(f, "{}", RULE)?;
            write!(f, "{}", file.patch)?;
            writeln!(f)?;
            writeln!(f)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reporter
// ---------------------------------------------------------------------------

pub struct DiffReporter<'a> {
    client: &'a GitClient,
    progress: &'a ProgressTracker,
}

impl<'a> DiffReporter<'a> {
    pub fn new(client: &'a GitClient, progress: &'a ProgressTracker) -> Self {
        Self { client, progress }
    }

    /// Fetch, reconcile both branches and compare their trees.
    pub fn diff(
        &self,
        source: &str,
        target: &str,
        auth: &RemoteAuth,
    ) -> Result<DiffReport, EngineError> {
        let reconciler = BranchReconciler::new(self.client, self.progress);
        reconciler.fetch(auth)?;
        let source = reconciler.reconcile_fetched(source)?;
        let target = reconciler.reconcile_fetched(target)?;
        self.compare(&source, &target)
    }

    /// Compare two already-resolved branches.
    pub fn compare(&self, source: &BranchRef, target: &BranchRef) -> Result<DiffReport, EngineError> {
        self.progress.start(DIFF_TASK);
        let files = self.changed_files(&source.tree, &target.tree)?;

        let mut summary = DiffSummary::default();
        for file in &files {
            summary.insert(file.change, file.path.clone());
        }
        info!(
            source = %source.name,
            target = %target.name,
            added = summary.added.len(),
            modified = summary.modified.len(),
            deleted = summary.deleted.len(),
            "diff computed"
        );
        self.progress.finish(DIFF_TASK);

        Ok(DiffReport {
            source: source.name.clone(),
            target: target.name.clone(),
            summary,
            files,
        })
    }

    fn changed_files(&self, old_tree: &str, new_tree: &str) -> Result<Vec<FileDiff>, GitError> {
        let repo = self.client.repo();
        let old_tree = repo.find_tree(Oid::from_str(old_tree)?)?;
        let new_tree = repo.find_tree(Oid::from_str(new_tree)?)?;

        let mut opts = DiffOptions::new();
        opts.context_lines(CONTEXT_LINES);
        let diff = repo.diff_tree_to_tree(Some(&old_tree), Some(&new_tree), Some(&mut opts))?;

        let mut ordered: BTreeMap<(ChangeKind, String), String> = BTreeMap::new();
        for (idx, delta) in diff.deltas().enumerate() {
            let Some(kind) = ChangeKind::from_delta(delta.status()) else {
                debug!(status = ?delta.status(), "skipping delta");
                continue;
            };
            let file = match kind {
                ChangeKind::Deleted => delta.old_file(),
                _ => delta.new_file(),
            };
            let Some(path) = file.path().map(|p| p.to_string_lossy().into_owned()) else {
                continue;
            };
            let patch = match Patch::from_diff(&diff, idx)? {
                Some(mut patch) => {
                    let buf = patch.to_buf()?;
                    String::from_utf8_lossy(&buf).into_owned()
                }
                None => String::new(),
            };
            ordered.insert((kind, path), patch);
        }

        Ok(ordered
            .into_iter()
            .map(|((change, path), patch)| FileDiff {
                path,
                change,
                patch,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use git2::{Repository, Signature};

    use crate::progress::ProgressSink;

    fn tree_of(repo: &Repository, files: &[(&str, &str)]) -> Oid {
        let mut builder = repo.treebuilder(None).unwrap();
        for (path, content) in files {
            let blob = repo.blob(content.as_bytes()).unwrap();
            builder.insert(*path, blob, 0o100644).unwrap();
        }
        builder.write().unwrap()
    }

    fn branch(name: &str, tree: Oid) -> BranchRef {
        BranchRef {
            name: name.into(),
            commit: Oid::zero().to_string(),
            tree: tree.to_string(),
            upstream: None,
        }
    }

    fn fixture() -> (tempfile::TempDir, GitClient) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let sig = Signature::now("Test", "test@test.com").unwrap();
        let tree = repo.find_tree(tree_of(&repo, &[])).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
            .unwrap();
        let client = GitClient::new(dir.path()).unwrap();
        (dir, client)
    }

    #[test]
    fn test_buckets_are_sorted_and_ordered() {
        let (_dir, client) = fixture();
        let repo = client.repo();
        let old = tree_of(
            repo,
            &[
                ("keep.txt", "same\n"),
                ("m.txt", "one\ntwo\nthree\n"),
                ("z-gone.txt", "bye\n"),
                ("a-gone.txt", "bye\n"),
            ],
        );
        let new = tree_of(
            repo,
            &[
                ("keep.txt", "same\n"),
                ("m.txt", "one\n2\nthree\n"),
                ("c.txt", "new\n"),
                ("b.txt", "new\n"),
            ],
        );

        let tracker = ProgressTracker::new(Arc::new(ProgressSink::new()));
        let report = DiffReporter::new(&client, &tracker)
            .compare(&branch("feature", old), &branch("main", new))
            .unwrap();

        let order: Vec<(ChangeKind, &str)> = report
            .files
            .iter()
            .map(|f| (f.change, f.path.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                (ChangeKind::Added, "b.txt"),
                (ChangeKind::Added, "c.txt"),
                (ChangeKind::Modified, "m.txt"),
                (ChangeKind::Deleted, "a-gone.txt"),
                (ChangeKind::Deleted, "z-gone.txt"),
            ]
        );
        assert_eq!(report.summary.len(), 5);
        assert!(report.summary.modified.contains("m.txt"));

        let patch = &report.files[2].patch;
        assert!(patch.contains("-two"));
        assert!(patch.contains("+2"));
        assert!(patch.contains(" one"));
    }

    #[test]
    fn test_identical_trees_are_empty() {
        let (_dir, client) = fixture();
        let tree = tree_of(client.repo(), &[("a.txt", "x\n")]);
        let tracker = ProgressTracker::new(Arc::new(ProgressSink::new()));
        let report = DiffReporter::new(&client, &tracker)
            .compare(&branch("a", tree), &branch("b", tree))
            .unwrap();
        assert!(report.summary.is_empty());
        assert!(report.files.is_empty());
        assert_eq!(
            report.render(),
            format!("Diff between a and b\n{}\n\n", RULE)
        );
    }

    #[test]
    fn test_render_blocks() {
        let (_dir, client) = fixture();
        let repo = client.repo();
        let old = tree_of(repo, &[]);
        let new = tree_of(repo, &[("a.txt", "hello\n")]);
        let tracker = ProgressTracker::new(Arc::new(ProgressSink::new()));
        let report = DiffReporter::new(&client, &tracker)
            .compare(&branch("main-before", old), &branch("main", new))
            .unwrap();

        let text = report.render();
        assert!(text.starts_with("Diff between main-before and main\n"));
        assert!(text.contains("File: a.txt\nChange Type: ADD\n"));
        assert!(text.contains("+hello"));
        assert!(text.ends_with("\n\n"));
    }

    #[test]
    fn test_repeated_compare_is_deterministic() {
        let (_dir, client) = fixture();
        let repo = client.repo();
        let old = tree_of(repo, &[("x", "1\n"), ("y", "1\n")]);
        let new = tree_of(repo, &[("y", "2\n"), ("w", "1\n")]);
        let tracker = ProgressTracker::new(Arc::new(ProgressSink::new()));
        let reporter = DiffReporter::new(&client, &tracker);
        let first = reporter
            .compare(&branch("s", old), &branch("t", new))
            .unwrap();
        let second = reporter
            .compare(&branch("s", old), &branch("t", new))
            .unwrap();
        assert_eq!(first, second);
    }
}
