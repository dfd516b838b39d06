//! Request and result types shared by the engine and the request layer.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, ValidationError};
use crate::git::remote_url::working_copy_name;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Parameters of a merge or diff call.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchPairRequest {
    #[serde(default)]
    pub source_branch: String,
    #[serde(default)]
    pub target_branch: String,
    #[serde(default)]
    pub repository_url: String,
    #[serde(default)]
    pub token: String,
}

pub type MergeRequest = BranchPairRequest;
pub type DiffRequest = BranchPairRequest;

impl BranchPairRequest {
    pub fn new(
        source_branch: impl Into<String>,
        target_branch: impl Into<String>,
        repository_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            source_branch: source_branch.into(),
            target_branch: target_branch.into(),
            repository_url: repository_url.into(),
            token: token.into(),
        }
    }

    /// Reject missing or malformed parameters before any git work starts.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_branch("sourceBranch", &self.source_branch)?;
        require_branch("targetBranch", &self.target_branch)?;
        require_repository_url(&self.repository_url)?;
        require("token", &self.token)
    }
}

impl fmt::Debug for BranchPairRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BranchPairRequest")
            .field("source_branch", &self.source_branch)
            .field("target_branch", &self.target_branch)
            .field("repository_url", &self.repository_url)
            .field("token", &"***")
            .finish()
    }
}

/// Parameters of a conflicts call.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictsRequest {
    #[serde(default)]
    pub repository_url: String,
    #[serde(default)]
    pub token: String,
}

impl ConflictsRequest {
    pub fn new(repository_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            repository_url: repository_url.into(),
            token: token.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_repository_url(&self.repository_url)?;
        require("token", &self.token)
    }
}

impl fmt::Debug for ConflictsRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflictsRequest")
            .field("repository_url", &self.repository_url)
            .field("token", &"***")
            .finish()
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Empty { field });
    }
    Ok(())
}

fn require_branch(field: &'static str, value: &str) -> Result<(), ValidationError> {
    require(field, value)?;
    if !git2::Reference::is_valid_name(&format!("refs/heads/{}", value)) {
        return Err(ValidationError::InvalidBranchName {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn require_repository_url(value: &str) -> Result<(), ValidationError> {
    require("repositoryUrl", value)?;
    if working_copy_name(value).is_none() {
        return Err(ValidationError::InvalidRepositoryUrl(value.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Branches
// ---------------------------------------------------------------------------

/// A local branch after reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRef {
    pub name: String,
    /// Commit the branch points at.
    pub commit: String,
    /// Tree of that commit.
    pub tree: String,
    /// Remote-tracking branch it follows, e.g. `origin/main`.
    pub upstream: Option<String>,
}

// ---------------------------------------------------------------------------
// Merge outcome
// ---------------------------------------------------------------------------

/// Result classification of one merge call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MergeOutcome {
    Success,
    Conflicting { paths: BTreeSet<String> },
    Aborted { reason: String },
    /// `kind` is [`EngineError::kind`]; `remote` marks failures talking to
    /// origin (clone, fetch).
    Failed {
        kind: String,
        remote: bool,
        reason: String,
    },
}

impl MergeOutcome {
    pub fn failed(err: &EngineError) -> Self {
        Self::Failed {
            kind: err.kind().to_string(),
            remote: err.is_remote(),
            reason: err.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for MergeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Conflicting { paths } => write!(f, "conflicting ({} paths)", paths.len()),
            Self::Aborted { reason } => write!(f, "aborted: {}", reason),
            Self::Failed { kind, reason, .. } => write!(f, "failed ({}): {}", kind, reason),
        }
    }
}

/// Everything a merge call reports back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeReport {
    pub source_branch: String,
    pub target_branch: String,
    pub outcome: MergeOutcome,
    /// Merge commit created by this call, if any.
    pub merge_commit: Option<String>,
    /// Secondary problems that did not change the outcome (e.g. push failures).
    pub warnings: Vec<String>,
}

impl MergeReport {
    pub fn new(source_branch: &str, target_branch: &str, outcome: MergeOutcome) -> Self {
        Self {
            source_branch: source_branch.to_string(),
            target_branch: target_branch.to_string(),
            outcome,
            merge_commit: None,
            warnings: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> BranchPairRequest {
        BranchPairRequest::new(
            "feature/x",
            "main",
            "https://github.com/acme/widgets.git",
            "ghp_token",
        )
    }

    #[test]
    fn test_valid_request() {
        request().validate().unwrap();
        ConflictsRequest::new("https://github.com/acme/widgets.git", "t")
            .validate()
            .unwrap();
    }

    #[test]
    fn test_empty_fields_are_rejected_in_order() {
        let mut req = request();
        req.source_branch = String::new();
        req.token = String::new();
        assert_eq!(
            req.validate(),
            Err(ValidationError::Empty {
                field: "sourceBranch"
            })
        );

        let mut req = request();
        req.target_branch = "   ".into();
        assert_eq!(
            req.validate(),
            Err(ValidationError::Empty {
                field: "targetBranch"
            })
        );

        let mut req = request();
        req.token = String::new();
        assert_eq!(req.validate(), Err(ValidationError::Empty { field: "token" }));
    }

    #[test]
    fn test_invalid_branch_name() {
        let mut req = request();
        req.source_branch = "bad..name".into();
        assert!(matches!(
            req.validate(),
            Err(ValidationError::InvalidBranchName { field: "sourceBranch", .. })
        ));
    }

    #[test]
    fn test_url_without_name() {
        let req = ConflictsRequest::new("https://example.com/", "t");
        assert!(matches!(
            req.validate(),
            Err(ValidationError::InvalidRepositoryUrl(_))
        ));
    }

    #[test]
    fn test_request_from_camel_case_json() {
        let req: BranchPairRequest = serde_json::from_str(
            r#"{"sourceBranch":"dev","targetBranch":"main","repositoryUrl":"https://h/r.git","token":"t"}"#,
        )
        .unwrap();
        assert_eq!(req.source_branch, "dev");
        assert_eq!(req.target_branch, "main");

        let partial: BranchPairRequest = serde_json::from_str(r#"{"sourceBranch":"dev"}"#).unwrap();
        assert!(partial.validate().is_err());
    }

    #[test]
    fn test_debug_hides_token() {
        let rendered = format!("{:?}", request());
        assert!(!rendered.contains("ghp_token"));
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = MergeOutcome::Conflicting {
            paths: ["conflict.txt".to_string()].into_iter().collect(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "conflicting");
        assert_eq!(json["paths"][0], "conflict.txt");
        assert_eq!(
            serde_json::to_value(MergeOutcome::Success).unwrap()["status"],
            "success"
        );
    }

    #[test]
    fn test_failed_outcome_keeps_error_class() {
        let err = EngineError::Fetch(crate::errors::GitError::RefNotFound("origin".into()));
        let outcome = MergeOutcome::failed(&err);
        assert_eq!(
            outcome,
            MergeOutcome::Failed {
                kind: "fetch".into(),
                remote: true,
                reason: err.to_string(),
            }
        );
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["kind"], "fetch");
        assert_eq!(json["remote"], true);

        let outcome = MergeOutcome::failed(&EngineError::Internal("worker panicked".into()));
        assert!(matches!(outcome, MergeOutcome::Failed { remote: false, .. }));
    }
}
