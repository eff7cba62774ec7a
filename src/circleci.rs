use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha512};
use tokio::io::AsyncWriteExt;
use urlencoding::encode as url_encode;

/// A build artifact as listed by the CI provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArtifactRef {
    pub path: String,
    #[serde(default)]
    pub node_index: u32,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
    pub path: PathBuf,
    pub size: u64,
    pub sha512: String,
}

#[async_trait]
pub trait CiClient: Send + Sync {
    /// Artifacts of the latest successful build of `branch`, in provider order.
    async fn artifacts_for_branch(&self, branch: &str) -> Result<Vec<ArtifactRef>>;
    /// Stream `artifact` into `dest`, replacing any existing file. A failed
    /// download may leave a partial file behind.
    async fn download_artifact(&self, artifact: &ArtifactRef, dest: &Path) -> Result<Downloaded>;
}

pub struct CircleCiClient {
    http: Client,
    api_base: String,
    owner: String,
    repo: String,
    token: Option<String>,
}

impl CircleCiClient {
    pub fn new(api_base: &str, owner: &str, repo: &str, token: Option<&str>) -> Self {
        Self {
            http: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            token: token.map(str::to_string),
        }
    }

    fn artifacts_url(&self, branch: &str) -> String {
        format!(
            "{}/project/github/{}/{}/latest/artifacts?branch={}&filter=successful",
            self.api_base,
            self.owner,
            self.repo,
            url_encode(branch)
        )
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.http.get(url);
        match &self.token {
            Some(token) => req.header("Circle-Token", token),
            None => req,
        }
    }
}

#[async_trait]
impl CiClient for CircleCiClient {
    async fn artifacts_for_branch(&self, branch: &str) -> Result<Vec<ArtifactRef>> {
        let url = self.artifacts_url(branch);
        tracing::debug!("circleci: listing artifacts branch={}", branch);
        let resp = self
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .with_context(|| format!("failed to request artifacts for {}", branch))?;
        if !resp.status().is_success() {
            bail!("artifact listing for {} failed: {}", branch, resp.status());
        }
        let body = resp.bytes().await?;
        let artifacts: Vec<ArtifactRef> =
            serde_json::from_slice(&body).context("failed to parse artifact listing")?;
        Ok(artifacts)
    }

    async fn download_artifact(&self, artifact: &ArtifactRef, dest: &Path) -> Result<Downloaded> {
        tracing::info!("circleci: downloading {} to {}", artifact.path, dest.display());
        let mut resp = self
            .get(&artifact.url)
            .send()
            .await
            .with_context(|| format!("failed to request {}", artifact.url))?;
        if !resp.status().is_success() {
            bail!("failed to download {}: {}", artifact.path, resp.status());
        }
        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("failed to create {}", dest.display()))?;
        let mut hasher = Sha512::new();
        let mut size = 0u64;
        while let Some(chunk) = resp.chunk().await? {
            hasher.update(&chunk);
            size += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(Downloaded {
            path: dest.to_path_buf(),
            size,
            sha512: hex::encode(hasher.finalize()),
        })
    }
}
