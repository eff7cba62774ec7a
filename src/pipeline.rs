//! The publish run as an explicit state machine.
//!
//! Every transition either produces the input of the next state or fails with
//! exactly one [`ReleaseError`]. Nothing is retried and nothing is rolled back:
//! the first failure stops the run and reports the last state reached.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::archive::{extract_archive, recreate_dir};
use crate::branch::{allowed_publish_branch, should_release};
use crate::bundle::verify_bundle;
use crate::changelog::extract_release_notes;
use crate::circleci::{CiClient, Downloaded};
use crate::config::ReleaseConfig;
use crate::error::ReleaseError;
use crate::git::GitClient;
use crate::github::GithubApi;
use crate::npm::{PackageRegistry, publish_package_to_npm};
use crate::prompt::Confirm;
use crate::status::{
    verify_local_commits_match_upstream, verify_no_uncommitted_changes,
    verify_passing_github_status,
};
use crate::tagging::{create_release_tag, push_release_tag};
use crate::version::{Version, determine_version};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    TokensChecked,
    VersionResolved,
    EligibilityChecked,
    StatusVerified,
    UncommittedChecked,
    UpstreamChecked,
    ArtifactFetched,
    ArtifactExtracted,
    BundleVerified,
    NotesExtracted,
    Tagged,
    TagPushed,
    ConfirmedByOperator,
    Published,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Failure of a run, with the last state it reached.
#[derive(Debug, Error)]
#[error("release aborted after {stage}")]
pub struct Aborted {
    pub stage: Stage,
    #[source]
    pub reason: ReleaseError,
}

pub struct Collaborators<'a> {
    pub git: &'a dyn GitClient,
    pub ci: &'a dyn CiClient,
    pub github: &'a dyn GithubApi,
    pub registry: &'a dyn PackageRegistry,
    pub confirm: &'a dyn Confirm,
}

/// What one run has learned so far. Dropped when the run ends.
#[derive(Debug, Default)]
pub struct ReleaseContext {
    pub version: Option<Version>,
    pub branch: Option<String>,
    pub archive: Option<Downloaded>,
    pub bundle_dir: Option<PathBuf>,
    pub notes: Option<String>,
    pub tag: Option<String>,
}

#[derive(Debug)]
pub struct PublishReport {
    pub version: Version,
    pub branch: String,
    pub tag: Option<String>,
    pub archive_sha512: Option<String>,
    pub dry_run: bool,
    pub visited: Vec<Stage>,
}

pub struct PublishPipeline<'a> {
    config: &'a ReleaseConfig,
    deps: Collaborators<'a>,
    dry_run: bool,
    stage: Stage,
    ctx: ReleaseContext,
    visited: Vec<Stage>,
}

impl<'a> PublishPipeline<'a> {
    pub fn new(config: &'a ReleaseConfig, deps: Collaborators<'a>, dry_run: bool) -> Self {
        Self {
            config,
            deps,
            dry_run,
            stage: Stage::Idle,
            ctx: ReleaseContext::default(),
            visited: vec![Stage::Idle],
        }
    }

    /// A dry run stops once the release notes are known, before anything is
    /// tagged.
    fn finished(&self) -> bool {
        self.stage == Stage::Done || (self.dry_run && self.stage == Stage::NotesExtracted)
    }

    pub async fn run(mut self) -> Result<PublishReport, Aborted> {
        while !self.finished() {
            if let Err(reason) = self.advance().await {
                tracing::warn!("publish: aborted after {}: {}", self.stage, reason);
                return Err(Aborted {
                    stage: self.stage,
                    reason,
                });
            }
        }
        let version = self.version().map_err(|reason| Aborted {
            stage: self.stage,
            reason,
        })?;
        Ok(PublishReport {
            version,
            branch: self.ctx.branch.unwrap_or_default(),
            tag: self.ctx.tag,
            archive_sha512: self.ctx.archive.map(|a| a.sha512),
            dry_run: self.dry_run,
            visited: self.visited,
        })
    }

    /// Perform the transition out of the current state.
    pub async fn advance(&mut self) -> Result<Stage, ReleaseError> {
        let next = match self.stage {
            Stage::Idle => {
                self.config.check_publish_tokens()?;
                Stage::TokensChecked
            }
            Stage::TokensChecked => {
                self.ctx.version = Some(determine_version(&self.config.workspace_root).await?);
                Stage::VersionResolved
            }
            Stage::VersionResolved => {
                self.check_eligibility().await?;
                Stage::EligibilityChecked
            }
            Stage::EligibilityChecked => {
                verify_passing_github_status(self.deps.git, self.deps.github, self.branch()?)
                    .await?;
                Stage::StatusVerified
            }
            Stage::StatusVerified => {
                verify_no_uncommitted_changes(self.deps.git).await?;
                Stage::UncommittedChecked
            }
            Stage::UncommittedChecked => {
                verify_local_commits_match_upstream(self.deps.git, self.branch()?).await?;
                Stage::UpstreamChecked
            }
            Stage::UpstreamChecked => {
                self.fetch_artifact().await?;
                Stage::ArtifactFetched
            }
            Stage::ArtifactFetched => {
                self.extract_artifact().await?;
                Stage::ArtifactExtracted
            }
            Stage::ArtifactExtracted => {
                verify_bundle(&self.version()?, self.bundle_dir()?).await?;
                Stage::BundleVerified
            }
            Stage::BundleVerified => {
                let version = self.version()?.to_string();
                let notes =
                    extract_release_notes(&self.config.changelog_path(), &version).await?;
                self.ctx.notes = Some(notes);
                Stage::NotesExtracted
            }
            Stage::NotesExtracted => {
                let tag = self.config.tag_name(&self.version()?);
                let notes = self.ctx.notes.as_deref().unwrap_or_default();
                create_release_tag(self.deps.git, &tag, notes).await?;
                self.ctx.tag = Some(tag);
                Stage::Tagged
            }
            Stage::Tagged => {
                push_release_tag(self.deps.git, self.tag()?).await?;
                Stage::TagPushed
            }
            Stage::TagPushed => {
                self.confirm_publish().await?;
                Stage::ConfirmedByOperator
            }
            Stage::ConfirmedByOperator => {
                publish_package_to_npm(self.deps.registry, self.bundle_dir()?).await?;
                Stage::Published
            }
            Stage::Published | Stage::Done => Stage::Done,
        };
        tracing::debug!("publish: {} -> {}", self.stage, next);
        self.stage = next;
        self.visited.push(next);
        Ok(next)
    }

    async fn check_eligibility(&mut self) -> Result<(), ReleaseError> {
        let version = self.version()?;
        let branch = self
            .deps
            .git
            .current_branch()
            .await
            .map_err(ReleaseError::collaborator)?;
        if !should_release(&branch, &version) {
            return Err(ReleaseError::NoValidReleaseBranch {
                branch,
                version: version.to_string(),
                expected: allowed_publish_branch(&version),
            });
        }
        tracing::info!("publish: releasing {} from {}", version, branch);
        self.ctx.branch = Some(branch);
        Ok(())
    }

    async fn fetch_artifact(&mut self) -> Result<(), ReleaseError> {
        let temp_dir = self.config.temp_dir();
        recreate_dir(&temp_dir).await.map_err(|e| {
            ReleaseError::Download(format!("cannot prepare {}: {:#}", temp_dir.display(), e))
        })?;

        let branch = self.branch()?;
        let artifacts = self
            .deps
            .ci
            .artifacts_for_branch(branch)
            .await
            .map_err(|e| ReleaseError::Download(format!("{:#}", e)))?;
        // Provider order is taken as is; there is no documented ordering.
        let Some(artifact) = artifacts.first() else {
            return Err(ReleaseError::Download(format!(
                "no artifacts found for branch {}",
                branch
            )));
        };
        if artifacts.len() > 1 {
            tracing::warn!(
                "publish: {} artifacts for {}, taking the first one ({} from node {})",
                artifacts.len(),
                branch,
                artifact.path,
                artifact.node_index
            );
        }

        let dest = temp_dir.join(&self.config.settings.bundle_name);
        let downloaded = self
            .deps
            .ci
            .download_artifact(artifact, &dest)
            .await
            .map_err(|e| ReleaseError::Download(format!("{:#}", e)))?;
        tracing::info!(
            "publish: downloaded {} size={} sha512={}",
            downloaded.path.display(),
            downloaded.size,
            downloaded.sha512
        );
        self.ctx.archive = Some(downloaded);
        Ok(())
    }

    async fn extract_artifact(&mut self) -> Result<(), ReleaseError> {
        let archive = self
            .ctx
            .archive
            .as_ref()
            .map(|a| a.path.clone())
            .ok_or_else(|| missing("downloaded archive"))?;
        let extracted = self.config.temp_dir().join("extracted");
        extract_archive(&archive, &extracted).await?;
        self.ctx.bundle_dir = Some(extracted.join(&self.config.settings.bundle_dir));
        Ok(())
    }

    async fn confirm_publish(&self) -> Result<(), ReleaseError> {
        let question = format!(
            "Tag {} is pushed. Publish {} to the registry now?",
            self.tag()?,
            self.bundle_dir()?.display()
        );
        let confirmed = self
            .deps
            .confirm
            .confirm(&question)
            .await
            .map_err(ReleaseError::collaborator)?;
        if !confirmed {
            return Err(ReleaseError::OperatorAborted);
        }
        Ok(())
    }

    fn version(&self) -> Result<Version, ReleaseError> {
        self.ctx.version.ok_or_else(|| missing("version"))
    }

    fn branch(&self) -> Result<&str, ReleaseError> {
        self.ctx.branch.as_deref().ok_or_else(|| missing("branch"))
    }

    fn bundle_dir(&self) -> Result<&std::path::Path, ReleaseError> {
        self.ctx.bundle_dir.as_deref().ok_or_else(|| missing("bundle directory"))
    }

    fn tag(&self) -> Result<&str, ReleaseError> {
        self.ctx.tag.as_deref().ok_or_else(|| missing("tag"))
    }
}

fn missing(what: &str) -> ReleaseError {
    ReleaseError::Collaborator(format!("{} is not known yet at this point of the run", what))
}
