//! Preparing a release: bump `package.json`, write the changelog section and
//! open a pull request from a staging branch. Publishing happens later, from
//! the publish branch, once that pull request is merged.

use anyhow::anyhow;
use tera::{Context as TeraContext, Tera};

use crate::branch::{
    allowed_publish_branch, changelog_commit_message, release_commit_message, staging_branch,
    staging_pr_title,
};
use crate::changelog::{classify_commits, has_section, insert_section, render_section};
use crate::config::ReleaseConfig;
use crate::error::ReleaseError;
use crate::git::GitClient;
use crate::github::{CreatePullPayload, GithubApi};
use crate::prompt::Confirm;
use crate::status::{
    verify_local_commits_match_upstream, verify_no_uncommitted_changes,
    verify_passing_github_status,
};
use crate::tagging::create_staging_pull_request;
use crate::version::{Bump, Version, determine_version, update_package_json_version};

const PR_TEMPLATE: &str = include_str!("../templates/staging_pr.md");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetVersion {
    /// Keep the current version, only the changelog is updated.
    Current,
    Bump(Bump),
    Exact(Version),
}

impl TargetVersion {
    fn resolve(self, current: Version) -> Result<Version, ReleaseError> {
        match self {
            TargetVersion::Current => Ok(current),
            TargetVersion::Bump(bump) => {
                current.bump(bump).ok_or_else(|| ReleaseError::VersionOverflow {
                    version: current.to_string(),
                    bump: format!("{:?}", bump).to_lowercase(),
                })
            }
            TargetVersion::Exact(version) => Ok(version),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StageRequest {
    pub target: TargetVersion,
    pub dry_run: bool,
    /// Date printed in the changelog heading, `YYYY-MM-DD`.
    pub today: String,
}

#[derive(Debug)]
pub struct StageReport {
    pub previous: Version,
    pub version: Version,
    pub publish_branch: String,
    pub staging_branch: String,
    pub needs_version_bump: bool,
    /// The section written to the changelog, `None` when one already existed.
    pub changelog_section: Option<String>,
    pub commit: Option<String>,
    pub pull_url: Option<String>,
    pub dry_run: bool,
}

pub struct StageCollaborators<'a> {
    pub git: &'a dyn GitClient,
    pub github: &'a dyn GithubApi,
    pub confirm: &'a dyn Confirm,
}

pub async fn stage_release(
    config: &ReleaseConfig,
    deps: StageCollaborators<'_>,
    request: &StageRequest,
) -> Result<StageReport, ReleaseError> {
    let git = deps.git;
    let previous = determine_version(&config.workspace_root).await?;
    let version = request.target.resolve(previous)?;
    let needs_version_bump = version != previous;
    let publish_branch = allowed_publish_branch(&version);
    let staging = staging_branch(&version);
    tracing::info!(
        "stage: {} -> {} via {} into {}",
        previous,
        version,
        staging,
        publish_branch
    );

    verify_no_uncommitted_changes(git).await?;
    switch_to_publish_branch(git, &publish_branch).await?;
    verify_local_commits_match_upstream(git, &publish_branch).await?;
    verify_passing_github_status(git, deps.github, &publish_branch).await?;

    let section = changelog_section(config, git, previous, version, &request.today).await?;
    let mut report = StageReport {
        previous,
        version,
        publish_branch,
        staging_branch: staging,
        needs_version_bump,
        changelog_section: section,
        commit: None,
        pull_url: None,
        dry_run: request.dry_run,
    };
    if request.dry_run {
        tracing::info!("stage: dry run, leaving {} untouched", report.publish_branch);
        return Ok(report);
    }

    git.checkout_new_branch(&report.staging_branch)
        .await
        .map_err(|e| ReleaseError::StagingBranch {
            branch: report.staging_branch.clone(),
            reason: format!("{:#}", e),
        })?;

    if needs_version_bump {
        let path = update_package_json_version(&config.workspace_root, version).await?;
        tracing::info!("stage: wrote version {} to {}", version, path.display());
    }
    if let Some(section) = &report.changelog_section {
        write_changelog_section(config, section).await?;
    }

    let proceed = deps
        .confirm
        .confirm("Do you want to proceed and commit the changes?")
        .await
        .map_err(ReleaseError::collaborator)?;
    if !proceed {
        return Err(ReleaseError::OperatorAborted);
    }

    let message = if needs_version_bump {
        release_commit_message(&version)
    } else {
        changelog_commit_message(&version)
    };
    git.stage_all_changes()
        .await
        .map_err(|e| ReleaseError::StagingCommit(format!("{:#}", e)))?;
    let commit = git
        .create_commit(&message)
        .await
        .map_err(|e| ReleaseError::StagingCommit(format!("{:#}", e)))?;
    tracing::info!("stage: committed {} ({})", commit, message);
    report.commit = Some(commit);

    git.push_to_remote(&report.staging_branch)
        .await
        .map_err(|e| ReleaseError::BranchPush {
            branch: report.staging_branch.clone(),
            reason: format!("{:#}", e),
        })?;

    let title = staging_pr_title(&version, needs_version_bump);
    let body = render_pr_body(config, &report).map_err(|e| ReleaseError::PrCreation {
        branch: report.staging_branch.clone(),
        title: title.clone(),
        reason: format!("{:#}", e),
    })?;
    let payload = CreatePullPayload {
        title: &title,
        head: &report.staging_branch,
        base: &config.settings.integration_branch,
        body: &body,
    };
    let pull = create_staging_pull_request(deps.github, &payload).await?;
    report.pull_url = Some(pull.html_url);
    Ok(report)
}

async fn switch_to_publish_branch(git: &dyn GitClient, branch: &str) -> Result<(), ReleaseError> {
    let switch_error = |e: anyhow::Error| ReleaseError::BranchSwitch {
        branch: branch.to_string(),
        reason: format!("{:#}", e),
    };
    let current = git.current_branch().await.map_err(switch_error)?;
    if current == branch {
        return Ok(());
    }
    tracing::info!("stage: switching from {} to {}", current, branch);
    git.checkout_branch(branch).await.map_err(switch_error)
}

/// The section to add for `version`, or `None` when the changelog already has one.
async fn changelog_section(
    config: &ReleaseConfig,
    git: &dyn GitClient,
    previous: Version,
    version: Version,
    today: &str,
) -> Result<Option<String>, ReleaseError> {
    let existing = read_changelog(config).await?;
    if has_section(&existing, &version.to_string()) {
        tracing::info!("stage: changelog already has a section for {}", version);
        return Ok(None);
    }

    let previous_tag = config.tag_name(&previous);
    let since = if previous != version
        && git
            .tag_exists(&previous_tag)
            .await
            .map_err(ReleaseError::collaborator)?
    {
        Some(previous_tag.as_str())
    } else {
        None
    };
    let subjects = git
        .commit_subjects_since(since)
        .await
        .map_err(ReleaseError::collaborator)?;
    let entries = classify_commits(&subjects);
    tracing::debug!(
        "stage: {} commits since {}, {} features {} fixes",
        subjects.len(),
        since.unwrap_or("<start>"),
        entries.features.len(),
        entries.fixes.len()
    );
    if entries.features.is_empty() && entries.fixes.is_empty() {
        tracing::warn!(
            "stage: no feat or fix commits for {}, review the placeholder section in {}",
            version,
            config.settings.changelog
        );
    }
    render_section(&version, today, &entries)
        .map(Some)
        .map_err(|e| ReleaseError::StagingCommit(format!("{:#}", e)))
}

async fn read_changelog(config: &ReleaseConfig) -> Result<String, ReleaseError> {
    let path = config.changelog_path();
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(ReleaseError::StagingCommit(format!(
            "read {}: {}",
            path.display(),
            e
        ))),
    }
}

async fn write_changelog_section(
    config: &ReleaseConfig,
    section: &str,
) -> Result<(), ReleaseError> {
    let existing = read_changelog(config).await?;
    let path = config.changelog_path();
    tokio::fs::write(&path, insert_section(&existing, section))
        .await
        .map_err(|e| ReleaseError::StagingCommit(format!("write {}: {}", path.display(), e)))
}

fn render_pr_body(config: &ReleaseConfig, report: &StageReport) -> anyhow::Result<String> {
    let mut ctx = TeraContext::new();
    ctx.insert("version", &report.version.to_string());
    ctx.insert("previous_version", &report.previous.to_string());
    ctx.insert("publish_branch", &report.publish_branch);
    ctx.insert("needs_version_bump", &report.needs_version_bump);
    ctx.insert("changelog", &config.settings.changelog);
    Tera::one_off(PR_TEMPLATE, &ctx, false)
        .map_err(|err| anyhow!("failed to render pull request body: {}", err))
}
