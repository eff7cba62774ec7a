//! Checks that the local repository is fit to release from: clean, in sync
//! with its upstream and green on CI. Each check fails fast and repairs
//! nothing.

use crate::error::ReleaseError;
use crate::git::GitClient;
use crate::github::GithubApi;

pub async fn verify_no_uncommitted_changes(git: &dyn GitClient) -> Result<(), ReleaseError> {
    if git
        .has_uncommitted_changes()
        .await
        .map_err(ReleaseError::collaborator)?
    {
        return Err(ReleaseError::UncommittedChanges);
    }
    Ok(())
}

/// Any difference between `HEAD` and the remote tracking branch fails, whether
/// the remote is ahead, behind or diverged.
pub async fn verify_local_commits_match_upstream(
    git: &dyn GitClient,
    branch: &str,
) -> Result<(), ReleaseError> {
    let upstream = git
        .remote_commit_sha(branch)
        .await
        .map_err(ReleaseError::collaborator)?;
    let local = git
        .local_commit_sha("HEAD")
        .await
        .map_err(ReleaseError::collaborator)?;
    if upstream != local {
        tracing::debug!("status: {} local={} upstream={}", branch, local, upstream);
        return Err(ReleaseError::LocalUpstreamMismatch(branch.to_string()));
    }
    Ok(())
}

/// Require a `success` combined status for the local `HEAD` commit.
pub async fn verify_passing_github_status(
    git: &dyn GitClient,
    github: &dyn GithubApi,
    branch: &str,
) -> Result<(), ReleaseError> {
    let sha = git
        .local_commit_sha("HEAD")
        .await
        .map_err(ReleaseError::collaborator)?;
    let status = github
        .combined_status(&sha)
        .await
        .map_err(ReleaseError::collaborator)?;
    tracing::info!("status: commit {} is {}", sha, status.state);
    match status.state.as_str() {
        "success" => Ok(()),
        "pending" => Err(ReleaseError::StatusPending {
            commits_url: github.commits_url(branch),
            sha,
        }),
        other => Err(ReleaseError::StatusFailed {
            state: other.to_string(),
            sha,
        }),
    }
}
