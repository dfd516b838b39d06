//! Local Git repository operations via `git2`.

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    AutotagOption, BranchType, Commit, Cred, CredentialType, ErrorCode, FetchOptions, FetchPrune,
    Index, MergeOptions, Oid, PushOptions, RemoteCallbacks, Repository, RepositoryState,
    ResetType, Signature, StatusOptions,
};
use tracing::{debug, info, instrument, warn};

use crate::errors::GitError;
use crate::git::remote_url::redact_url;
use crate::progress::ProgressTracker;

/// The only remote this engine works with.
pub const ORIGIN: &str = "origin";

pub fn local_ref(branch: &str) -> String {
    format!("refs/heads/{}", branch)
}

pub fn remote_ref(branch: &str) -> String {
    format!("refs/remotes/{}/{}", ORIGIN, branch)
}

// ---------------------------------------------------------------------------
// Remote auth
// ---------------------------------------------------------------------------

/// Token credentials plus the per-operation deadline for network calls.
#[derive(Clone)]
pub struct RemoteAuth {
    username: String,
    token: String,
    timeout: Duration,
}

impl RemoteAuth {
    pub fn new(username: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Self {
        Self {
            username: username.into(),
            token: token.into(),
            timeout,
        }
    }
}

impl fmt::Debug for RemoteAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteAuth")
            .field("username", &self.username)
            .field("token", &"***")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Build callbacks for one network operation.
///
/// The credential callback answers once; libgit2 asks again only when the
/// remote rejected the first answer, and we fail instead of looping. Transfer
/// callbacks report progress under `<phase>: ...` labels and abort the
/// transfer once `deadline` has passed.
fn remote_callbacks<'a>(
    auth: &'a RemoteAuth,
    deadline: Instant,
    progress: &'a ProgressTracker,
    phase: &str,
    auth_failed: &'a Cell<bool>,
) -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();

    let mut attempts = 0u32;
    callbacks.credentials(move |_url, _username, allowed| {
        attempts += 1;
        if attempts > 1 || !allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
            auth_failed.set(true);
            return Err(git2::Error::from_str("credentials rejected by remote"));
        }
        Cred::userpass_plaintext(&auth.username, &auth.token)
    });

    let receiving = format!("{}: receiving objects", phase);
    let resolving = format!("{}: resolving deltas", phase);
    callbacks.transfer_progress(move |stats| {
        progress.transfer(&receiving, stats.received_objects(), stats.total_objects());
        if stats.total_deltas() > 0 {
            progress.transfer(&resolving, stats.indexed_deltas(), stats.total_deltas());
        }
        Instant::now() < deadline
    });
    callbacks.sideband_progress(move |_| Instant::now() < deadline);

    callbacks
}

/// Translate a failed network call into the most specific [`GitError`].
fn classify_remote_error(
    err: git2::Error,
    operation: &str,
    url: &str,
    auth: &RemoteAuth,
    deadline: Instant,
    auth_failed: bool,
) -> GitError {
    if auth_failed || err.code() == ErrorCode::Auth {
        GitError::AuthenticationFailed(redact_url(url))
    } else if err.code() == ErrorCode::User && Instant::now() >= deadline {
        GitError::TimedOut {
            operation: operation.to_string(),
            secs: auth.timeout.as_secs(),
        }
    } else {
        GitError::Git2Error(err)
    }
}

/// Connect and per-read timeout handed to libgit2's transports, clamped to
/// what its `int` option accepts.
pub fn transport_timeout_millis(timeout: Duration) -> i32 {
    i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX).max(1)
}

/// Bound how long libgit2 waits for a server to accept a connection and to
/// answer each read. The transfer callbacks only fire once data flows, so a
/// remote that stalls before that is cut off here.
///
/// # Safety
///
/// Writes libgit2 globals without synchronization. Call it before any thread
/// that may use git2 is spawned.
pub unsafe fn set_transport_timeouts(timeout: Duration) -> Result<(), GitError> {
    let millis = transport_timeout_millis(timeout);
    git2::opts::set_server_connect_timeout_in_milliseconds(millis)?;
    git2::opts::set_server_timeout_in_milliseconds(millis)?;
    debug!(millis, "transport timeouts set");
    Ok(())
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Result of merging a commit into the checked-out branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeStatus {
    /// The branch already contains the commit; nothing was written.
    UpToDate,
    /// A merge commit was created.
    Merged(Oid),
    /// The merge stopped with conflicts, left in the working copy.
    Conflicting(BTreeSet<String>),
    /// Local files prevented the merge from being checked out. The working
    /// copy was reset to HEAD and untracked files were removed.
    Blocked(String),
}

/// High-level Git client wrapping a `git2::Repository`.
pub struct GitClient {
    repo: Repository,
    repo_path: PathBuf,
}

impl fmt::Debug for GitClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitClient")
            .field("repo_path", &self.repo_path)
            .finish()
    }
}

impl GitClient {
    /// Open an existing Git repository at `repo_path`.
    pub fn new<P: AsRef<Path>>(repo_path: P) -> Result<Self, GitError> {
        let path = repo_path.as_ref();
        debug!(path = %path.display(), "opening git repository");
        let repo = Repository::open(path)
            .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
        Ok(Self {
            repo,
            repo_path: path.to_path_buf(),
        })
    }

    /// Clone a remote repository to `path`, streaming transfer progress.
    #[instrument(skip_all, fields(url = %redact_url(url), path = %path.display()))]
    pub fn clone_repo(
        url: &str,
        path: &Path,
        auth: &RemoteAuth,
        progress: &ProgressTracker,
    ) -> Result<Self, GitError> {
        info!("cloning git repository");
        let deadline = Instant::now() + auth.timeout;
        let auth_failed = Cell::new(false);

        let result = {
            let callbacks = remote_callbacks(auth, deadline, progress, "clone", &auth_failed);
            let mut fetch_opts = FetchOptions::new();
            fetch_opts.remote_callbacks(callbacks);
            let mut builder = RepoBuilder::new();
            builder.fetch_options(fetch_opts);
            builder.clone(url, path)
        };

        let repo = result.map_err(|e| {
            classify_remote_error(e, "clone", url, auth, deadline, auth_failed.get())
        })?;
        info!("clone completed");
        Ok(Self {
            repo,
            repo_path: path.to_path_buf(),
        })
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// URL configured for `origin`, if any.
    pub fn origin_url(&self) -> Result<Option<String>, GitError> {
        let remote = self.repo.find_remote(ORIGIN)?;
        Ok(remote.url().map(str::to_string))
    }

    /// Fetch every branch from origin, pruning remote-tracking refs whose
    /// branch was deleted upstream.
    #[instrument(skip(self, auth, progress))]
    pub fn fetch(&self, auth: &RemoteAuth, progress: &ProgressTracker) -> Result<(), GitError> {
        let mut remote = self.repo.find_remote(ORIGIN)?;
        let url = remote.url().unwrap_or_default().to_string();
        info!(remote = ORIGIN, url = %redact_url(&url), "fetching");

        let deadline = Instant::now() + auth.timeout;
        let auth_failed = Cell::new(false);

        let result = {
            let callbacks = remote_callbacks(auth, deadline, progress, "fetch", &auth_failed);
            let mut fetch_opts = FetchOptions::new();
            fetch_opts
                .remote_callbacks(callbacks)
                .prune(FetchPrune::On)
                .download_tags(AutotagOption::All);
            remote.fetch(&[] as &[&str], Some(&mut fetch_opts), Some("branchsync: fetch"))
        };

        result.map_err(|e| {
            classify_remote_error(e, "fetch", &url, auth, deadline, auth_failed.get())
        })?;
        debug!("fetch completed");
        Ok(())
    }

    /// Push a local branch to origin.
    #[instrument(skip(self, auth, progress))]
    pub fn push(
        &self,
        branch: &str,
        auth: &RemoteAuth,
        progress: &ProgressTracker,
    ) -> Result<(), GitError> {
        let mut remote = self.repo.find_remote(ORIGIN)?;
        let url = remote.url().unwrap_or_default().to_string();
        info!(remote = ORIGIN, branch, "pushing");

        let deadline = Instant::now() + auth.timeout;
        let auth_failed = Cell::new(false);
        let rejection: RefCell<Option<String>> = RefCell::new(None);

        let result = {
            let mut callbacks = remote_callbacks(auth, deadline, progress, "push", &auth_failed);
            callbacks.push_transfer_progress(move |current, total, _bytes| {
                progress.transfer("push: writing objects", current, total);
            });
            callbacks.push_update_reference(|refname, status| {
                if let Some(msg) = status {
                    warn!(refname, msg, "push rejected");
                    *rejection.borrow_mut() = Some(msg.to_string());
                }
                Ok(())
            });
            let mut push_opts = PushOptions::new();
            push_opts.remote_callbacks(callbacks);
            let refspec = format!("{0}:{0}", local_ref(branch));
            remote.push(&[refspec.as_str()], Some(&mut push_opts))
        };

        result.map_err(|e| {
            classify_remote_error(e, "push", &url, auth, deadline, auth_failed.get())
        })?;
        if let Some(detail) = rejection.borrow_mut().take() {
            return Err(GitError::PushRejected {
                branch: branch.to_string(),
                detail,
            });
        }
        info!("push completed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Refs
    // -----------------------------------------------------------------------

    /// Tip of `origin/<branch>` as of the last fetch.
    pub fn remote_tip(&self, branch: &str) -> Result<Commit<'_>, GitError> {
        let name = remote_ref(branch);
        let reference = self
            .repo
            .find_reference(&name)
            .map_err(|_| GitError::RefNotFound(name.clone()))?;
        Ok(reference.peel_to_commit()?)
    }

    /// Tip of the local branch `<branch>`.
    pub fn local_tip(&self, branch: &str) -> Result<Commit<'_>, GitError> {
        let name = local_ref(branch);
        let reference = self
            .repo
            .find_reference(&name)
            .map_err(|_| GitError::RefNotFound(name.clone()))?;
        Ok(reference.peel_to_commit()?)
    }

    /// Short name of the checked-out branch, `None` when HEAD is detached or
    /// unborn.
    pub fn current_branch(&self) -> Option<String> {
        let head = self.repo.head().ok()?;
        if !head.is_branch() {
            return None;
        }
        head.shorthand().map(str::to_string)
    }

    /// Upstream of a local branch, as `origin/<name>`.
    pub fn upstream_of(&self, branch: &str) -> Option<String> {
        let local = self.repo.find_branch(branch, BranchType::Local).ok()?;
        let upstream = local.upstream().ok()?;
        let name = upstream.name().ok()??;
        Some(name.to_string())
    }

    pub fn set_upstream(&self, branch: &str) -> Result<(), GitError> {
        let mut local = self.repo.find_branch(branch, BranchType::Local)?;
        local.set_upstream(Some(&format!("{}/{}", ORIGIN, branch)))?;
        Ok(())
    }

    /// Switch to an existing local branch without creating it.
    pub fn checkout_local_branch(&self, branch: &str) -> Result<(), GitError> {
        let refname = local_ref(branch);
        let commit = self.local_tip(branch)?;
        let mut checkout = CheckoutBuilder::new();
        checkout.safe();
        self.repo
            .checkout_tree(commit.as_object(), Some(&mut checkout))?;
        self.repo.set_head(&refname)?;
        debug!(branch, "checked out existing branch");
        Ok(())
    }

    /// Move the checked-out local branch forward to `origin/<branch>`.
    ///
    /// Fails with [`GitError::Diverged`] when the local branch has commits
    /// the remote does not, since it could then never equal the remote tip.
    pub fn fast_forward_to_remote(&self, branch: &str) -> Result<Oid, GitError> {
        let target = self.remote_tip(branch)?;
        let local_oid = self.local_tip(branch)?.id();
        if local_oid == target.id() {
            return Ok(local_oid);
        }
        if !self.repo.graph_descendant_of(target.id(), local_oid)? {
            return Err(GitError::Diverged(branch.to_string()));
        }

        let mut checkout = CheckoutBuilder::new();
        checkout.safe();
        self.repo
            .checkout_tree(target.as_object(), Some(&mut checkout))?;
        let mut local = self.repo.find_reference(&local_ref(branch))?;
        local.set_target(
            target.id(),
            &format!("branchsync: fast-forward to {}", remote_ref(branch)),
        )?;
        debug!(branch, from = %local_oid, to = %target.id(), "fast-forwarded");
        Ok(target.id())
    }

    /// Fail unless no operation is in progress and the working tree has no
    /// changes. Untracked files count as changes since they can block a
    /// later checkout; ignored files do not.
    pub fn ensure_clean(&self) -> Result<(), GitError> {
        let state = self.repo.state();
        if state != RepositoryState::Clean {
            return Err(GitError::DirtyWorkingCopy(format!(
                "{:?} in progress",
                state
            )));
        }
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut opts))?;
        if let Some(entry) = statuses.iter().next() {
            return Err(GitError::DirtyWorkingCopy(format!(
                "'{}' has uncommitted changes",
                entry.path().unwrap_or("<non-utf8 path>")
            )));
        }
        Ok(())
    }

    /// Detach HEAD at `target` and discard every local change, including an
    /// interrupted merge and untracked files.
    pub fn detach_and_hard_reset(&self, target: &Commit<'_>) -> Result<(), GitError> {
        self.repo.set_head_detached(target.id())?;
        let mut checkout = CheckoutBuilder::new();
        checkout.force().remove_untracked(true);
        self.repo
            .reset(target.as_object(), ResetType::Hard, Some(&mut checkout))?;
        self.repo.cleanup_state()?;
        Ok(())
    }

    /// Delete a local branch.
    pub fn delete_local_branch(&self, branch: &str) -> Result<(), GitError> {
        let mut local = self.repo.find_branch(branch, BranchType::Local)?;
        local.delete()?;
        debug!(branch, "deleted local branch");
        Ok(())
    }

    /// Create (or overwrite) `<branch>` at `target`, track `origin/<branch>`
    /// and check it out.
    pub fn create_tracking_branch(&self, branch: &str, target: &Commit<'_>) -> Result<(), GitError> {
        self.repo.branch(branch, target, true)?;
        self.set_upstream(branch)?;
        self.repo.set_head(&local_ref(branch))?;
        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        self.repo.checkout_head(Some(&mut checkout))?;
        debug!(branch, tip = %target.id(), "created tracking branch");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Merge & status
    // -----------------------------------------------------------------------

    /// Merge `source` into the checked-out branch, always recording a merge
    /// commit when there is anything to merge.
    #[instrument(skip_all, fields(source_commit = %source.id()))]
    pub fn merge_no_ff(
        &self,
        source: &Commit<'_>,
        message: &str,
        signature: &Signature<'_>,
    ) -> Result<MergeStatus, GitError> {
        let annotated = self.repo.find_annotated_commit(source.id())?;
        let (analysis, _) = self.repo.merge_analysis(&[&annotated])?;
        if analysis.is_up_to_date() {
            info!("target already contains source");
            return Ok(MergeStatus::UpToDate);
        }

        let head = self.repo.head()?.peel_to_commit()?;
        let mut merge_opts = MergeOptions::new();
        let mut checkout = CheckoutBuilder::new();
        checkout.safe().allow_conflicts(true).conflict_style_merge(true);

        if let Err(e) = self
            .repo
            .merge(&[&annotated], Some(&mut merge_opts), Some(&mut checkout))
        {
            if e.code() == ErrorCode::Conflict {
                warn!(error = %e, "merge blocked by local files, resetting to HEAD");
                self.repo.cleanup_state()?;
                let mut reset = CheckoutBuilder::new();
                reset.force().remove_untracked(true);
                self.repo
                    .reset(head.as_object(), ResetType::Hard, Some(&mut reset))?;
                return Ok(MergeStatus::Blocked(e.message().to_string()));
            }
            return Err(e.into());
        }

        let mut index = self.repo.index()?;
        if index.has_conflicts() {
            let paths = index_conflict_paths(&index)?;
            info!(count = paths.len(), "merge stopped with conflicts");
            return Ok(MergeStatus::Conflicting(paths));
        }

        let tree_oid = index.write_tree()?;
        let tree = self.repo.find_tree(tree_oid)?;
        let oid = self
            .repo
            .commit(Some("HEAD"), signature, signature, message, &tree, &[&head, source])?;
        self.repo.cleanup_state()?;
        info!(sha = %oid, "created merge commit");
        Ok(MergeStatus::Merged(oid))
    }

    /// Paths `git status` currently reports as conflicted.
    pub fn conflicted_paths(&self) -> Result<BTreeSet<String>, GitError> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(false).include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut opts))?;
        Ok(statuses
            .iter()
            .filter(|entry| entry.status().is_conflicted())
            .filter_map(|entry| entry.path().map(str::to_string))
            .collect())
    }
}

fn index_conflict_paths(index: &Index) -> Result<BTreeSet<String>, GitError> {
    let mut paths = BTreeSet::new();
    for conflict in index.conflicts()? {
        let conflict = conflict?;
        if let Some(entry) = conflict.our.or(conflict.their).or(conflict.ancestor) {
            paths.insert(String::from_utf8_lossy(&entry.path).into_owned());
        }
    }
    Ok(paths)
}
