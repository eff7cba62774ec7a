//! In-memory collaborators for unit tests. Each one records what was asked
//! of it so tests can check that nothing happened after a failure.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;

use crate::circleci::{ArtifactRef, CiClient, Downloaded};
use crate::git::GitClient;
use crate::github::{self, CombinedStatus, CreatePullPayload, GithubApi, PullResponse};
use crate::npm::PackageRegistry;
use crate::prompt::Confirm;

/// Side-effecting git calls are journaled; plain reads are not.
pub struct FakeGit {
    pub branch: String,
    pub dirty: bool,
    pub local_sha: String,
    pub remote_sha: String,
    pub existing_tags: Vec<String>,
    pub subjects: Vec<String>,
    pub fail_checkout: bool,
    pub fail_push: bool,
    pub checked_out: Mutex<Option<String>>,
    pub journal: Mutex<Vec<String>>,
}

impl Default for FakeGit {
    fn default() -> Self {
        Self {
            branch: "4.15.x".into(),
            dirty: false,
            local_sha: "1234".into(),
            remote_sha: "1234".into(),
            existing_tags: Vec::new(),
            subjects: Vec::new(),
            fail_checkout: false,
            fail_push: false,
            checked_out: Mutex::new(None),
            journal: Mutex::new(Vec::new()),
        }
    }
}

impl FakeGit {
    pub fn calls(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.journal.lock().unwrap().push(call);
    }
}

#[async_trait]
impl GitClient for FakeGit {
    async fn current_branch(&self) -> Result<String> {
        let checked_out = self.checked_out.lock().unwrap().clone();
        Ok(checked_out.unwrap_or_else(|| self.branch.clone()))
    }

    async fn local_commit_sha(&self, _rev: &str) -> Result<String> {
        Ok(self.local_sha.clone())
    }

    async fn remote_commit_sha(&self, _branch: &str) -> Result<String> {
        Ok(self.remote_sha.clone())
    }

    async fn has_uncommitted_changes(&self) -> Result<bool> {
        Ok(self.dirty)
    }

    async fn checkout_branch(&self, name: &str) -> Result<()> {
        self.record(format!("checkout {}", name));
        if self.fail_checkout {
            bail!("pathspec '{}' did not match", name);
        }
        *self.checked_out.lock().unwrap() = Some(name.to_string());
        Ok(())
    }

    async fn checkout_new_branch(&self, name: &str) -> Result<()> {
        self.record(format!("checkout_new {}", name));
        *self.checked_out.lock().unwrap() = Some(name.to_string());
        Ok(())
    }

    async fn stage_all_changes(&self) -> Result<()> {
        self.record("stage_all".into());
        Ok(())
    }

    async fn create_commit(&self, message: &str) -> Result<String> {
        self.record(format!("commit {}", message));
        Ok("abcd".into())
    }

    async fn tag_exists(&self, name: &str) -> Result<bool> {
        Ok(self.existing_tags.iter().any(|t| t == name))
    }

    async fn create_annotated_tag(&self, name: &str, message: &str) -> Result<()> {
        self.record(format!("create_annotated_tag {}: {}", name, message));
        Ok(())
    }

    async fn push_to_remote(&self, refspec: &str) -> Result<()> {
        self.record(format!("push {}", refspec));
        if self.fail_push {
            bail!("remote rejected {}", refspec);
        }
        Ok(())
    }

    async fn commit_subjects_since(&self, _tag: Option<&str>) -> Result<Vec<String>> {
        Ok(self.subjects.clone())
    }
}

pub struct FakeGithub {
    pub status: String,
    pub pull_state: String,
    pub status_log: Mutex<Vec<String>>,
    pub pull_log: Mutex<Vec<String>>,
}

impl FakeGithub {
    pub fn with_status(status: &str) -> Self {
        Self {
            status: status.into(),
            pull_state: "open".into(),
            status_log: Mutex::new(Vec::new()),
            pull_log: Mutex::new(Vec::new()),
        }
    }

    pub fn status_queries(&self) -> Vec<String> {
        self.status_log.lock().unwrap().clone()
    }

    pub fn pulls(&self) -> Vec<String> {
        self.pull_log.lock().unwrap().clone()
    }
}

#[async_trait]
impl GithubApi for FakeGithub {
    async fn combined_status(&self, sha: &str) -> Result<CombinedStatus> {
        self.status_log.lock().unwrap().push(sha.to_string());
        Ok(CombinedStatus {
            state: self.status.clone(),
        })
    }

    async fn create_pull(&self, payload: &CreatePullPayload<'_>) -> Result<PullResponse> {
        self.pull_log.lock().unwrap().push(format!(
            "{} -> {}: {}",
            payload.head, payload.base, payload.title
        ));
        Ok(PullResponse {
            state: self.pull_state.clone(),
            html_url: "https://github.com/acme/widgets/pull/1".into(),
        })
    }

    fn commits_url(&self, branch: &str) -> String {
        github::commits_url("acme", "widgets", branch)
    }
}

/// Serves `archive` for every download; `None` makes downloads fail.
pub struct FakeCi {
    pub artifacts: Vec<ArtifactRef>,
    pub archive: Option<Vec<u8>>,
    pub journal: Mutex<Vec<String>>,
}

impl FakeCi {
    pub fn serving(archive: Vec<u8>) -> Self {
        Self {
            artifacts: vec![artifact("https://ci.example.com/0/bundle.tar.gz")],
            archive: Some(archive),
            journal: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }
}

pub fn artifact(url: &str) -> ArtifactRef {
    ArtifactRef {
        path: "dist/bundle.tar.gz".into(),
        node_index: 0,
        url: url.into(),
    }
}

#[async_trait]
impl CiClient for FakeCi {
    async fn artifacts_for_branch(&self, branch: &str) -> Result<Vec<ArtifactRef>> {
        self.journal.lock().unwrap().push(format!("list {}", branch));
        Ok(self.artifacts.clone())
    }

    async fn download_artifact(&self, artifact: &ArtifactRef, dest: &Path) -> Result<Downloaded> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("download {}", artifact.url));
        let bytes = self
            .archive
            .as_ref()
            .ok_or_else(|| anyhow!("connection reset"))?;
        std::fs::write(dest, bytes)?;
        Ok(Downloaded {
            path: dest.to_path_buf(),
            size: bytes.len() as u64,
            sha512: "fake".into(),
        })
    }
}

pub struct FakeRegistry {
    pub output: Option<String>,
    pub journal: Mutex<Vec<PathBuf>>,
}

impl FakeRegistry {
    pub fn accepting() -> Self {
        Self {
            output: None,
            journal: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(output: &str) -> Self {
        Self {
            output: Some(output.into()),
            journal: Mutex::new(Vec::new()),
        }
    }

    pub fn published(&self) -> Vec<PathBuf> {
        self.journal.lock().unwrap().clone()
    }
}

#[async_trait]
impl PackageRegistry for FakeRegistry {
    async fn publish(&self, package_dir: &Path) -> Result<Option<String>> {
        self.journal.lock().unwrap().push(package_dir.to_path_buf());
        Ok(self.output.clone())
    }
}

pub struct FakeConfirm {
    pub answer: bool,
    pub journal: Mutex<Vec<String>>,
}

impl FakeConfirm {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            journal: Mutex::new(Vec::new()),
        }
    }

    pub fn questions(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }
}

#[async_trait]
impl Confirm for FakeConfirm {
    async fn confirm(&self, question: &str) -> Result<bool> {
        self.journal.lock().unwrap().push(question.to_string());
        Ok(self.answer)
    }
}

/// A gzip tarball holding a `package.json` with `version`.
pub fn bundle_archive(version: &str) -> Vec<u8> {
    let manifest = format!(r#"{{"name": "widgets", "version": "{}"}}"#, version);
    let mut tar = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let mut header = tar::Header::new_gnu();
    header.set_path("package.json").unwrap();
    header.set_size(manifest.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    tar.append(&header, manifest.as_bytes()).unwrap();
    let mut enc = tar.into_inner().unwrap();
    enc.flush().unwrap();
    enc.finish().unwrap()
}
