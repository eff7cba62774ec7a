use crate::error::ReleaseError;
use crate::git::GitClient;
use crate::github::{CreatePullPayload, GithubApi, PullResponse};

/// Annotated tag at `HEAD` carrying the release notes as its message.
pub async fn create_release_tag(
    git: &dyn GitClient,
    tag: &str,
    notes: &str,
) -> Result<(), ReleaseError> {
    let failed = |reason: String| ReleaseError::TagCreation {
        tag: tag.to_string(),
        reason,
    };
    if git
        .tag_exists(tag)
        .await
        .map_err(|e| failed(format!("{:#}", e)))?
    {
        return Err(failed("tag already exists".to_string()));
    }
    git.create_annotated_tag(tag, notes)
        .await
        .map_err(|e| failed(format!("{:#}", e)))
}

/// Push a previously created tag. On failure the local tag stays in place.
pub async fn push_release_tag(git: &dyn GitClient, tag: &str) -> Result<(), ReleaseError> {
    git.push_to_remote(&format!("refs/tags/{}", tag))
        .await
        .map_err(|e| ReleaseError::TagPush {
            tag: tag.to_string(),
            reason: format!("{:#}", e),
        })
}

pub async fn create_staging_pull_request(
    github: &dyn GithubApi,
    payload: &CreatePullPayload<'_>,
) -> Result<PullResponse, ReleaseError> {
    let failed = |reason: String| ReleaseError::PrCreation {
        branch: payload.head.to_string(),
        title: payload.title.to_string(),
        reason,
    };
    let pull = github
        .create_pull(payload)
        .await
        .map_err(|e| failed(format!("{:#}", e)))?;
    if pull.state == "failure" {
        return Err(failed("the API reported state failure".to_string()));
    }
    tracing::info!("github: created pull request {} ({})", payload.title, pull.html_url);
    Ok(pull)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeGit, FakeGithub};

    #[tokio::test]
    async fn creates_annotated_tag_with_notes() {
        let git = FakeGit::default();
        create_release_tag(&git, "4.15.3", "### Bug Fixes").await.unwrap();
        assert_eq!(git.calls(), vec!["create_annotated_tag 4.15.3: ### Bug Fixes"]);
    }

    #[tokio::test]
    async fn existing_tag_is_not_touched() {
        let git = FakeGit {
            existing_tags: vec!["4.15.3".into()],
            ..FakeGit::default()
        };
        let err = create_release_tag(&git, "4.15.3", "notes").await.unwrap_err();
        assert!(matches!(err, ReleaseError::TagCreation { ref tag, .. } if tag == "4.15.3"));
        assert!(git.calls().is_empty());
    }

    #[tokio::test]
    async fn push_failure_keeps_local_tag() {
        let git = FakeGit {
            fail_push: true,
            ..FakeGit::default()
        };
        create_release_tag(&git, "1.0.0", "notes").await.unwrap();
        let err = push_release_tag(&git, "1.0.0").await.unwrap_err();
        assert!(matches!(err, ReleaseError::TagPush { .. }));
        assert_eq!(
            git.calls(),
            vec!["create_annotated_tag 1.0.0: notes", "push refs/tags/1.0.0"]
        );
    }

    #[tokio::test]
    async fn failure_state_is_a_pr_error() {
        let github = FakeGithub {
            pull_state: "failure".into(),
            ..FakeGithub::with_status("success")
        };
        let payload = CreatePullPayload {
            title: "Update changelog for 1.0.1",
            head: "release-stage/1.0.1",
            base: "master",
            body: "",
        };
        let err = create_staging_pull_request(&github, &payload)
            .await
            .unwrap_err();
        match err {
            ReleaseError::PrCreation { branch, title, .. } => {
                assert_eq!(branch, "release-stage/1.0.1");
                assert_eq!(title, "Update changelog for 1.0.1");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let github = FakeGithub::with_status("success");
        let pull = create_staging_pull_request(&github, &payload).await.unwrap();
        assert_eq!(pull.state, "open");
        assert_eq!(
            github.pulls(),
            vec!["release-stage/1.0.1 -> master: Update changelog for 1.0.1"]
        );
    }
}
