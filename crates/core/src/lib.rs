//! branchsync core library.
//!
//! Keeps one working copy per remote repository, brings named branches to
//! their remote tips whatever state the copy was left in, and merges, diffs
//! and inspects conflicts on top of that, reporting progress as it goes.

pub mod cache;
pub mod config;
pub mod conflict;
pub mod diff;
pub mod errors;
pub mod git;
pub mod merge;
pub mod models;
pub mod progress;
pub mod reconcile;
pub mod sync_engine;

// Re-exports for convenience.
pub use config::AppConfig;
pub use diff::{ChangeKind, DiffReport, DiffSummary, FileDiff};
pub use errors::{EngineError, ValidationError};
pub use models::{BranchRef, ConflictsRequest, DiffRequest, MergeOutcome, MergeReport, MergeRequest};
pub use progress::{ProgressEvent, ProgressSink, ProgressStream};
pub use sync_engine::SyncEngine;
