//! Admin control operations (C9, spec §4.9).
//!
//! `/cmd/clear` drops the transform cache and the resolver's memo.
//! `/cmd/gitupdate` (the "pull" operation, spec §4.9/§6) pulls the image
//! root's git working tree forward, via `git2` with a shell-out-to-`git`
//! fallback for repository states `git2` does not drive well (e.g.
//! credential helpers). Any other `/cmd/<name>` is a reserved, unrecognized
//! command.

use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, State},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::ServerError;
use crate::AppState;

pub async fn clear(State(state): State<Arc<AppState>>) -> Response {
    match state.cache.clear_all().await {
        Ok(cleared) => {
            state.resolver.invalidate_memo();
            tracing::info!(cleared, "admin clear completed");
            Json(json!({ "success": true, "cleared_files": cleared })).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "admin clear failed");
            ServerError::Processing(e.to_string()).into_response()
        }
    }
}

pub async fn gitupdate(State(state): State<Arc<AppState>>) -> Response {
    let images_dir = state.config.images_dir.clone();
    let result = tokio::task::spawn_blocking(move || pull_latest(&images_dir)).await;

    match result {
        Ok(Ok(summary)) => {
            state.resolver.invalidate_memo();
            tracing::info!(%summary, "source refresh completed");
            Json(json!({ "status": "ok", "summary": summary })).into_response()
        }
        Ok(Err(RefreshError::NotARepository)) => {
            ServerError::Validation("images_dir is not a git repository".into()).into_response()
        }
        Ok(Err(RefreshError::PullFailed(msg))) => {
            tracing::error!(error = %msg, "source refresh pull failed");
            ServerError::Processing(msg).into_response()
        }
        Err(join_err) => {
            tracing::error!(error = %join_err, "source refresh task panicked");
            ServerError::Processing("source refresh task panicked".into()).into_response()
        }
    }
}

pub async fn unknown_command(AxumPath(name): AxumPath<String>) -> Response {
    ServerError::Validation(format!("unrecognized admin command: {name}")).into_response()
}

enum RefreshError {
    NotARepository,
    PullFailed(String),
}

/// Pull the images_dir's git working tree via `git2`; if that fails for a
/// reason other than "not a repository" (most commonly missing credential
/// helper support), fall back to shelling out to the system `git` binary,
/// which inherits the operator's configured credentials.
fn pull_latest(images_dir: &Path) -> Result<String, RefreshError> {
    let repo = git2::Repository::open(images_dir).map_err(|_| RefreshError::NotARepository)?;

    match pull_via_git2(&repo) {
        Ok(summary) => Ok(summary),
        Err(git2_err) => {
            tracing::warn!(error = %git2_err, "git2 pull failed, falling back to shell-out");
            pull_via_shell(images_dir)
        }
    }
}

fn pull_via_git2(repo: &git2::Repository) -> Result<String, git2::Error> {
    let mut remote = repo.find_remote("origin")?;
    remote.fetch(&[] as &[&str], None, None)?;

    let fetch_head = repo.find_reference("FETCH_HEAD")?;
    let fetch_commit = repo.reference_to_annotated_commit(&fetch_head)?;

    let analysis = repo.merge_analysis(&[&fetch_commit])?;
    if analysis.0.is_up_to_date() {
        return Ok("already up to date".to_string());
    }
    if !analysis.0.is_fast_forward() {
        return Err(git2::Error::from_str(
            "local branch has diverged; fast-forward pull only",
        ));
    }

    let refname = "refs/heads/main";
    let mut reference = repo
        .find_reference(refname)
        .or_else(|_| repo.head())?;
    reference.set_target(fetch_commit.id(), "fast-forward pull")?;
    repo.set_head(refname)?;
    repo.checkout_head(Some(git2::build::CheckoutBuilder::default().force()))?;

    Ok(format!("fast-forwarded to {}", fetch_commit.id()))
}

fn pull_via_shell(images_dir: &Path) -> Result<String, RefreshError> {
    let output = std::process::Command::new("git")
        .arg("-C")
        .arg(images_dir)
        .arg("pull")
        .arg("--ff-only")
        .output()
        .map_err(|e| RefreshError::PullFailed(e.to_string()))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(RefreshError::PullFailed(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }
}
