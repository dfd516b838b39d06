//! Working copies under the workspace root, one per repository name.
//!
//! A remote lives at `<root>/<name>` where `<name>` comes from
//! [`working_copy_name`]. Callers first take a [`RepositoryLease`] for the
//! URL, which serializes every call touching the same directory, and then
//! [`RepositoryLease::obtain`] a client for it: the existing clone is reused
//! when its origin matches, otherwise the remote is cloned.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::errors::{EngineError, ValidationError};
use crate::git::remote_url::{redact_url, same_remote, working_copy_name};
use crate::git::{GitClient, RemoteAuth};
use crate::progress::ProgressTracker;

/// Progress label of the clone phase.
pub const CLONE_TASK: &str = "clone";

/// Root of all working copies plus the per-directory locks.
#[derive(Debug)]
pub struct RepositoryCache {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RepositoryCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory a remote's working copy lives in.
    pub fn working_copy_path(&self, url: &str) -> Result<PathBuf, ValidationError> {
        let name = working_copy_name(url)
            .ok_or_else(|| ValidationError::InvalidRepositoryUrl(url.to_string()))?;
        Ok(self.root.join(name))
    }

    /// Wait for exclusive use of the working copy for `url`.
    pub async fn lease(&self, url: &str) -> Result<RepositoryLease, ValidationError> {
        let path = self.working_copy_path(url)?;
        let key = path.display().to_string();
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.clone()).or_default())
        };

        if lock.try_lock().is_err() {
            debug!(working_copy = %key, "waiting for working copy");
        }
        let guard = lock.lock_owned().await;
        debug!(working_copy = %key, "working copy leased");

        Ok(RepositoryLease {
            url: url.trim().to_string(),
            path,
            _guard: guard,
        })
    }
}

/// Exclusive access to one working copy, released on drop.
#[derive(Debug)]
pub struct RepositoryLease {
    url: String,
    path: PathBuf,
    _guard: OwnedMutexGuard<()>,
}

impl RepositoryLease {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the working copy, cloning it first when it does not exist yet.
    ///
    /// A directory without `.git` is treated as the leftover of an
    /// interrupted clone and removed. A clone that fails removes its
    /// directory again so the next call starts from scratch.
    pub fn obtain(
        &self,
        auth: &RemoteAuth,
        progress: &ProgressTracker,
    ) -> Result<GitClient, EngineError> {
        if self.path.join(".git").exists() {
            return self.open_existing();
        }

        if self.path.exists() {
            warn!(path = %self.path.display(), "removing incomplete working copy");
            std::fs::remove_dir_all(&self.path).map_err(|e| EngineError::Clone {
                url: redact_url(&self.url),
                source: e.into(),
            })?;
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::Clone {
                url: redact_url(&self.url),
                source: e.into(),
            })?;
        }

        progress.start(CLONE_TASK);
        match GitClient::clone_repo(&self.url, &self.path, auth, progress) {
            Ok(client) => {
                progress.finish(CLONE_TASK);
                Ok(client)
            }
            Err(source) => {
                if self.path.exists() {
                    if let Err(e) = std::fs::remove_dir_all(&self.path) {
                        warn!(path = %self.path.display(), error = %e, "failed to remove partial clone");
                    }
                }
                Err(EngineError::Clone {
                    url: redact_url(&self.url),
                    source,
                })
            }
        }
    }

    fn open_existing(&self) -> Result<GitClient, EngineError> {
        let display = self.path.display().to_string();
        let client = GitClient::new(&self.path).map_err(|source| EngineError::Open {
            path: display.clone(),
            source,
        })?;
        let found = client
            .origin_url()
            .map_err(|source| EngineError::Open {
                path: display.clone(),
                source,
            })?
            .unwrap_or_default();

        if !same_remote(&found, &self.url) {
            return Err(EngineError::OriginMismatch {
                path: display,
                expected: redact_url(&self.url),
                found: redact_url(&found),
            });
        }
        info!(path = %self.path.display(), "reusing working copy");
        Ok(client)
    }
}
