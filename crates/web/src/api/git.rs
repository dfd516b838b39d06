//! Merge, diff and conflict endpoints.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::info;

use branchsync_core::models::{ConflictsRequest, DiffRequest, MergeOutcome, MergeReport, MergeRequest};

use crate::api::status::AppError;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/git/merge", post(merge_branches))
        .route("/api/git/diff", get(get_diff))
        .route("/api/git/conflicts", get(get_conflicts))
}

async fn merge_branches(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MergeRequest>,
) -> Result<Response, AppError> {
    info!(
        source = %request.source_branch,
        target = %request.target_branch,
        "merge requested"
    );
    let report = state
        .engine
        .merge(&request, Arc::clone(&state.progress))
        .await?;
    Ok(merge_response(report))
}

fn merge_response(report: MergeReport) -> Response {
    let MergeReport {
        source_branch,
        target_branch,
        outcome,
        merge_commit,
        warnings,
    } = report;

    match outcome {
        MergeOutcome::Success => Json(json!({
            "status": "Success",
            "success": true,
            "message": format!("Successfully merged {} into {}", source_branch, target_branch),
            "mergeCommit": merge_commit,
            "warnings": warnings,
        }))
        .into_response(),
        MergeOutcome::Conflicting { paths } => Json(json!({
            "status": "Conflict",
            "success": false,
            "message": "Merge conflicts detected",
            "conflicts": paths,
        }))
        .into_response(),
        MergeOutcome::Aborted { reason } => Json(json!({
            "status": "Aborted",
            "success": false,
            "message": format!("Merge aborted: {}", reason),
        }))
        .into_response(),
        MergeOutcome::Failed {
            kind,
            remote,
            reason,
        } => {
            let status = if remote {
                StatusCode::BAD_GATEWAY
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (
                status,
                Json(json!({
                    "status": "Failed",
                    "success": false,
                    "kind": kind,
                    "error": reason,
                })),
            )
                .into_response()
        }
    }
}

async fn get_diff(
    State(state): State<Arc<AppState>>,
    Query(request): Query<DiffRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let report = state
        .engine
        .diff(&request, Arc::clone(&state.progress))
        .await?;
    Ok(Json(json!({
        "diff": report.render(),
        "summary": report.summary,
    })))
}

async fn get_conflicts(
    State(state): State<Arc<AppState>>,
    Query(request): Query<ConflictsRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let conflicts = state
        .engine
        .conflicts(&request, Arc::clone(&state.progress))
        .await?;
    Ok(Json(json!({ "conflicts": conflicts })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    use axum::body::Body;
    use axum::http::Request;
    use git2::{Repository, Signature};
    use tower::ServiceExt;

    use branchsync_core::config::AppConfig;
    use branchsync_core::progress::ProgressSink;
    use branchsync_core::sync_engine::SyncEngine;

    use crate::WebServer;

    fn server(workspace: &Path) -> WebServer {
        let mut config = AppConfig::default();
        config.daemon.workspace_dir = workspace.to_path_buf();
        config.git.network_timeout_secs = 30;
        let engine = Arc::new(SyncEngine::new(config.clone()));
        WebServer::new(config, engine, Arc::new(ProgressSink::new()))
    }

    /// Bare `origin.git` with `main` and a `feature` branch adding a file.
    fn init_origin(root: &Path) -> PathBuf {
        let path = root.join("remote").join("origin.git");
        let repo = Repository::init_bare(&path).unwrap();
        let sig = Signature::now("Test", "test@test.com").unwrap();

        let mut builder = repo.treebuilder(None).unwrap();
        builder
            .insert("README.md", repo.blob(b"hello\n").unwrap(), 0o100644)
            .unwrap();
        let base_tree = repo.find_tree(builder.write().unwrap()).unwrap();
        let base = repo
            .commit(Some("refs/heads/main"), &sig, &sig, "init", &base_tree, &[])
            .unwrap();
        let base = repo.find_commit(base).unwrap();

        let mut builder = repo.treebuilder(Some(&base_tree)).unwrap();
        builder
            .insert("feature.txt", repo.blob(b"feature\n").unwrap(), 0o100644)
            .unwrap();
        let tree = repo.find_tree(builder.write().unwrap()).unwrap();
        repo.commit(Some("refs/heads/feature"), &sig, &sig, "feature", &tree, &[&base])
            .unwrap();
        repo.set_head("refs/heads/main").unwrap();
        path
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_merge_rejects_missing_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let app = server(&dir.path().join("work")).router();

        let (status, body) = send(
            app,
            post_json(
                "/api/git/merge",
                json!({ "targetBranch": "main", "repositoryUrl": "https://h/r.git", "token": "t" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "sourceBranch must not be empty");
        assert!(!dir.path().join("work").exists());
    }

    #[tokio::test]
    async fn test_conflicts_requires_token() {
        let dir = tempfile::tempdir().unwrap();
        let app = server(dir.path()).router();
        let (status, body) = send(app, get("/api/git/conflicts?repositoryUrl=https://h/r.git")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "token must not be empty");
    }

    #[tokio::test]
    async fn test_unreachable_remote_is_bad_gateway() {
        let dir = tempfile::tempdir().unwrap();
        let app = server(&dir.path().join("work")).router();
        let missing = dir.path().join("missing.git");
        let uri = format!(
            "/api/git/diff?sourceBranch=dev&targetBranch=main&repositoryUrl={}&token=t",
            missing.display()
        );
        let (status, body) = send(app, get(&uri)).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().contains("failed to clone"));
    }

    #[tokio::test]
    async fn test_merge_with_unreachable_remote_is_bad_gateway() {
        let dir = tempfile::tempdir().unwrap();
        let app = server(&dir.path().join("work")).router();
        let missing = dir.path().join("missing.git");

        let (status, body) = send(
            app,
            post_json(
                "/api/git/merge",
                json!({
                    "sourceBranch": "feature",
                    "targetBranch": "main",
                    "repositoryUrl": missing.display().to_string(),
                    "token": "t",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY, "{body}");
        assert_eq!(body["status"], "Failed");
        assert_eq!(body["success"], false);
        assert_eq!(body["kind"], "clone");
        assert!(body["error"].as_str().unwrap().contains("failed to clone"));
    }

    #[tokio::test]
    async fn test_merge_of_missing_branch_is_internal_error() {
        let dir = tempfile::tempdir().unwrap();
        let origin = init_origin(dir.path());
        let app = server(&dir.path().join("work")).router();

        let (status, body) = send(
            app,
            post_json(
                "/api/git/merge",
                json!({
                    "sourceBranch": "nope",
                    "targetBranch": "main",
                    "repositoryUrl": origin.display().to_string(),
                    "token": "t",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "{body}");
        assert_eq!(body["status"], "Failed");
        assert_eq!(body["kind"], "internal");
    }

    #[tokio::test]
    async fn test_merge_diff_and_conflicts_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let origin = init_origin(dir.path());
        let url = origin.display().to_string();
        let server = server(&dir.path().join("work"));

        let (status, body) = send(
            server.router(),
            post_json(
                "/api/git/merge",
                json!({
                    "sourceBranch": "feature",
                    "targetBranch": "main",
                    "repositoryUrl": url,
                    "token": "t",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["status"], "Success");
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Successfully merged feature into main");
        assert!(body["mergeCommit"].is_string());

        let uri = format!(
            "/api/git/diff?sourceBranch=feature&targetBranch=main&repositoryUrl={}&token=t",
            url
        );
        let (status, body) = send(server.router(), get(&uri)).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert!(body["diff"]
            .as_str()
            .unwrap()
            .starts_with("Diff between feature and main\n"));
        assert_eq!(body["summary"]["added"], json!([]));

        let uri = format!("/api/git/conflicts?repositoryUrl={}&token=t", url);
        let (status, body) = send(server.router(), get(&uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["conflicts"], json!([]));
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let app = server(dir.path()).router();
        let (status, body) = send(app, get("/api/status/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }
}
