//! Git engine adapter for branchsync.

pub mod client;
pub mod remote_url;

pub use client::{set_transport_timeouts, GitClient, MergeStatus, RemoteAuth, ORIGIN};
