use anyhow::{Context, Result};
use async_trait::async_trait;
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct CombinedStatus {
    pub state: String,
}

#[derive(Debug, Serialize)]
pub struct CreatePullPayload<'a> {
    pub title: &'a str,
    pub head: &'a str,
    pub base: &'a str,
    pub body: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullResponse {
    pub state: String,
    #[serde(default)]
    pub html_url: String,
}

#[async_trait]
pub trait GithubApi: Send + Sync {
    /// Combined status for a commit of the release repository.
    async fn combined_status(&self, sha: &str) -> Result<CombinedStatus>;
    async fn create_pull(&self, payload: &CreatePullPayload<'_>) -> Result<PullResponse>;
    /// Web page listing the commits of `branch`.
    fn commits_url(&self, branch: &str) -> String;
}

pub struct OctocrabApi {
    gh: Octocrab,
    owner: String,
    repo: String,
}

impl OctocrabApi {
    /// Anonymous access works for public repositories; pull requests need a token.
    pub fn new(owner: &str, repo: &str, token: Option<&str>) -> Result<Self> {
        let builder = Octocrab::builder();
        let builder = match token {
            Some(token) => builder.personal_token(token.to_string()),
            None => builder,
        };
        let gh = builder.build().context("failed to build GitHub client")?;
        Ok(Self {
            gh,
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }
}

#[async_trait]
impl GithubApi for OctocrabApi {
    async fn combined_status(&self, sha: &str) -> Result<CombinedStatus> {
        self.gh
            .get(
                format!("repos/{}/{}/commits/{}/status", self.owner, self.repo, sha),
                None::<&()>,
            )
            .await
            .with_context(|| {
                format!(
                    "failed to load combined status of {} in {}/{}",
                    sha, self.owner, self.repo
                )
            })
    }

    async fn create_pull(&self, payload: &CreatePullPayload<'_>) -> Result<PullResponse> {
        self.gh
            .post(
                format!("repos/{}/{}/pulls", self.owner, self.repo),
                Some(payload),
            )
            .await
            .with_context(|| {
                format!(
                    "failed to create pull request in {}/{}",
                    self.owner, self.repo
                )
            })
    }

    fn commits_url(&self, branch: &str) -> String {
        commits_url(&self.owner, &self.repo, branch)
    }
}

pub fn commits_url(owner: &str, repo: &str, branch: &str) -> String {
    format!("https://github.com/{}/{}/commits/{}", owner, repo, branch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commits_url_points_at_branch() {
        assert_eq!(
            commits_url("acme", "widgets", "4.15.x"),
            "https://github.com/acme/widgets/commits/4.15.x"
        );
    }

    #[test]
    fn pull_response_tolerates_missing_url() {
        let resp: PullResponse = serde_json::from_str(r#"{"state": "open"}"#).unwrap();
        assert_eq!(resp.state, "open");
        assert!(resp.html_url.is_empty());
    }
}
