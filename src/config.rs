use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::ReleaseError;
use crate::git;
use crate::version::Version;

pub const CONFIG_FILE: &str = ".npmship.toml";
pub const WORKSPACE_ROOT_ENV: &str = "WORKSPACE_ROOT";
pub const CI_TOKEN_ENV: &str = "NPMSHIP_CI_TOKEN";
pub const NPM_TOKEN_ENV: &str = "NPMSHIP_NPM_TOKEN";
pub const GITHUB_TOKEN_ENV: &str = "NPMSHIP_GITHUB_TOKEN";

/// Optional per-repository settings from `.npmship.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub remote: String,
    pub integration_branch: String,
    pub changelog: String,
    pub bundle_name: String,
    pub bundle_dir: String,
    pub temp_dir: String,
    pub tag_prefix: String,
    pub ci_api_base: String,
    pub npm_registry: Option<String>,
    pub npm_access: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            owner: None,
            repo: None,
            remote: "origin".into(),
            integration_branch: "master".into(),
            changelog: "CHANGELOG.md".into(),
            bundle_name: "bundle.tar.gz".into(),
            bundle_dir: String::new(),
            temp_dir: "tmp".into(),
            tag_prefix: String::new(),
            ci_api_base: "https://circleci.com/api/v1.1".into(),
            npm_registry: None,
            npm_access: None,
        }
    }
}

pub async fn load_settings(repo_root: &Path) -> Result<Settings> {
    let path = repo_root.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let settings: Settings =
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(settings)
}

/// Everything a run needs from the process environment, gathered once at
/// start-up. Pipeline stages never look at the environment themselves.
#[derive(Debug, Clone)]
pub struct ReleaseConfig {
    pub workspace_root: PathBuf,
    pub owner: String,
    pub repo: String,
    pub settings: Settings,
    pub ci_token: Option<String>,
    pub npm_token: Option<String>,
    pub github_token: Option<String>,
}

impl ReleaseConfig {
    /// `workspace` wins over `WORKSPACE_ROOT`, which wins over the repository
    /// around the current directory.
    pub async fn load<F>(workspace: Option<PathBuf>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let workspace_root =
            workspace.or_else(|| non_empty(&lookup, WORKSPACE_ROOT_ENV).map(PathBuf::from));
        let workspace_root = match workspace_root {
            Some(root) => root,
            None => git::repo_root(Path::new("."))
                .await
                .context("failed to discover the git repository")?,
        };
        let settings = load_settings(&workspace_root).await?;
        let (owner, repo) = match (&settings.owner, &settings.repo) {
            (Some(owner), Some(repo)) => (owner.clone(), repo.clone()),
            _ => {
                let (owner, repo) = git::infer_remote(&workspace_root, &settings.remote)
                    .await
                    .context("set owner and repo in .npmship.toml or add a GitHub remote")?;
                (
                    settings.owner.clone().unwrap_or(owner),
                    settings.repo.clone().unwrap_or(repo),
                )
            }
        };
        tracing::debug!(
            "config: root={} repo={}/{}",
            workspace_root.display(),
            owner,
            repo
        );
        Ok(Self {
            ci_token: non_empty(&lookup, CI_TOKEN_ENV),
            npm_token: non_empty(&lookup, NPM_TOKEN_ENV),
            github_token: non_empty(&lookup, GITHUB_TOKEN_ENV),
            workspace_root,
            owner,
            repo,
            settings,
        })
    }

    /// Both the CI and the npm token must be present before a publish run
    /// talks to anything.
    pub fn check_publish_tokens(&self) -> Result<(), ReleaseError> {
        require_publish_tokens(self.ci_token.is_some(), self.npm_token.is_some())
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.workspace_root.join(&self.settings.temp_dir)
    }

    pub fn changelog_path(&self) -> PathBuf {
        self.workspace_root.join(&self.settings.changelog)
    }

    pub fn tag_name(&self, version: &Version) -> String {
        format!("{}{}", self.settings.tag_prefix, version)
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).filter(|v| !v.trim().is_empty())
}

/// Token check straight from the environment, before anything else is loaded.
pub fn check_publish_env<F>(lookup: &F) -> Result<(), ReleaseError>
where
    F: Fn(&str) -> Option<String>,
{
    require_publish_tokens(
        non_empty(lookup, CI_TOKEN_ENV).is_some(),
        non_empty(lookup, NPM_TOKEN_ENV).is_some(),
    )
}

fn require_publish_tokens(has_ci: bool, has_npm: bool) -> Result<(), ReleaseError> {
    let mut missing = Vec::new();
    if !has_ci {
        missing.push(CI_TOKEN_ENV);
    }
    if !has_npm {
        missing.push(NPM_TOKEN_ENV);
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ReleaseError::NoTokensProvided { missing })
    }
}
