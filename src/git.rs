use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use git2::build::CheckoutBuilder;
use git2::{BranchType, IndexAddOption, Repository, StatusOptions};
use regex::Regex;

use crate::runner::{CommandLine, CommandRunner};

/// The high-level git operations a release run needs.
#[async_trait]
pub trait GitClient: Send + Sync {
    async fn current_branch(&self) -> Result<String>;
    async fn local_commit_sha(&self, rev: &str) -> Result<String>;
    /// Commit of the remote tracking branch for `branch`.
    async fn remote_commit_sha(&self, branch: &str) -> Result<String>;
    async fn has_uncommitted_changes(&self) -> Result<bool>;
    async fn checkout_branch(&self, name: &str) -> Result<()>;
    async fn checkout_new_branch(&self, name: &str) -> Result<()>;
    async fn stage_all_changes(&self) -> Result<()>;
    async fn create_commit(&self, message: &str) -> Result<String>;
    async fn tag_exists(&self, name: &str) -> Result<bool>;
    /// Annotated tag at `HEAD`. Fails when the tag already exists.
    async fn create_annotated_tag(&self, name: &str, message: &str) -> Result<()>;
    /// Push a branch name or a full `refs/tags/...` ref to the remote.
    async fn push_to_remote(&self, refspec: &str) -> Result<()>;
    /// Commit subjects reachable from `HEAD` but not from `tag`, newest first.
    async fn commit_subjects_since(&self, tag: Option<&str>) -> Result<Vec<String>>;
}

/// `git2` for everything local, the `git` binary for pushes so the user's
/// credential helpers apply.
pub struct Git2Client {
    root: PathBuf,
    remote: String,
    runner: Arc<dyn CommandRunner>,
}

impl Git2Client {
    pub fn new(root: &Path, remote: &str, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            root: root.to_path_buf(),
            remote: remote.to_string(),
            runner,
        }
    }

    async fn with_repo<T, F>(&self, what: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Repository) -> Result<T> + Send + 'static,
    {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            let repo = Repository::discover(root)?;
            f(&repo)
        })
        .await
        .map_err(|e| anyhow!("{} task join error: {}", what, e))?
    }
}

#[async_trait]
impl GitClient for Git2Client {
    async fn current_branch(&self) -> Result<String> {
        self.with_repo("current_branch", |repo| {
            let head = repo.head()?;
            if !head.is_branch() {
                bail!("HEAD is detached");
            }
            head.shorthand()
                .map(str::to_string)
                .ok_or_else(|| anyhow!("HEAD has no shorthand name"))
        })
        .await
    }

    async fn local_commit_sha(&self, rev: &str) -> Result<String> {
        let rev = rev.to_string();
        self.with_repo("local_commit_sha", move |repo| {
            let commit = repo.revparse_single(&rev)?.peel_to_commit()?;
            Ok(commit.id().to_string())
        })
        .await
    }

    async fn remote_commit_sha(&self, branch: &str) -> Result<String> {
        let refname = format!("refs/remotes/{}/{}", self.remote, branch);
        self.with_repo("remote_commit_sha", move |repo| {
            let commit = repo.find_reference(&refname)?.peel_to_commit()?;
            Ok(commit.id().to_string())
        })
        .await
    }

    async fn has_uncommitted_changes(&self) -> Result<bool> {
        self.with_repo("has_uncommitted_changes", |repo| {
            let mut opts = StatusOptions::new();
            opts.include_untracked(true).recurse_untracked_dirs(true);
            let statuses = repo.statuses(Some(&mut opts))?;
            Ok(statuses.iter().any(|s| {
                s.status().intersects(
                    git2::Status::INDEX_NEW
                        | git2::Status::INDEX_MODIFIED
                        | git2::Status::INDEX_DELETED
                        | git2::Status::INDEX_RENAMED
                        | git2::Status::INDEX_TYPECHANGE
                        | git2::Status::WT_NEW
                        | git2::Status::WT_MODIFIED
                        | git2::Status::WT_DELETED
                        | git2::Status::WT_RENAMED
                        | git2::Status::WT_TYPECHANGE
                        | git2::Status::CONFLICTED,
                )
            }))
        })
        .await
    }

    async fn checkout_branch(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        let remote = self.remote.clone();
        self.with_repo("checkout_branch", move |repo| {
            if repo.find_branch(&name, BranchType::Local).is_err() {
                // Only known remotely: create the local branch tracking it.
                let upstream = format!("{}/{}", remote, name);
                let commit = repo
                    .find_reference(&format!("refs/remotes/{}", upstream))?
                    .peel_to_commit()?;
                let mut branch = repo.branch(&name, &commit, false)?;
                branch.set_upstream(Some(&upstream))?;
            }
            let refname = format!("refs/heads/{}", name);
            let target = repo.revparse_single(&refname)?;
            repo.checkout_tree(&target, Some(CheckoutBuilder::new().safe()))?;
            repo.set_head(&refname)?;
            Ok(())
        })
        .await
    }

    async fn checkout_new_branch(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.with_repo("checkout_new_branch", move |repo| {
            let head = repo.head()?.peel_to_commit()?;
            repo.branch(&name, &head, false)?;
            repo.set_head(&format!("refs/heads/{}", name))?;
            Ok(())
        })
        .await
    }

    async fn stage_all_changes(&self) -> Result<()> {
        self.with_repo("stage_all_changes", |repo| {
            let mut index = repo.index()?;
            index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
            index.update_all(["*"].iter(), None)?;
            index.write()?;
            Ok(())
        })
        .await
    }

    async fn create_commit(&self, message: &str) -> Result<String> {
        let message = message.to_string();
        self.with_repo("create_commit", move |repo| {
            let mut index = repo.index()?;
            let tree = repo.find_tree(index.write_tree()?)?;
            let parent = repo.head()?.peel_to_commit()?;
            let sig = signature(repo)?;
            let oid = repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &[&parent])?;
            Ok(oid.to_string())
        })
        .await
    }

    async fn tag_exists(&self, name: &str) -> Result<bool> {
        let refname = format!("refs/tags/{}", name);
        self.with_repo("tag_exists", move |repo| {
            Ok(repo.refname_to_id(&refname).is_ok())
        })
        .await
    }

    async fn create_annotated_tag(&self, name: &str, message: &str) -> Result<()> {
        let tag_name = name.to_string();
        let message = message.to_string();
        self.with_repo("create_annotated_tag", move |repo| {
            let target = repo.head()?.peel(git2::ObjectType::Commit)?;
            let sig = signature(repo)?;
            repo.tag(&tag_name, &target, &sig, &message, false)?;
            Ok(())
        })
        .await?;
        tracing::info!("git: created annotated tag {}", name);
        Ok(())
    }

    async fn push_to_remote(&self, refspec: &str) -> Result<()> {
        tracing::info!("git: pushing {} to {}", refspec, self.remote);
        let cmd = CommandLine::new("git")
            .current_dir(&self.root)
            .arg("push")
            .arg(&self.remote)
            .arg(refspec);
        let output = self.runner.run(&cmd).await?;
        if !output.success() {
            bail!(
                "git push {} {} failed ({:?}): {}",
                self.remote,
                refspec,
                output.exit_code,
                output.error_output()
            );
        }
        Ok(())
    }

    async fn commit_subjects_since(&self, tag: Option<&str>) -> Result<Vec<String>> {
        let tag_ref = tag.map(|t| format!("refs/tags/{}", t));
        self.with_repo("commit_subjects_since", move |repo| {
            let mut walk = repo.revwalk()?;
            walk.push_head()?;
            if let Some(tag_ref) = tag_ref
                && let Ok(obj) = repo.revparse_single(&tag_ref)
            {
                walk.hide(obj.peel_to_commit()?.id())?;
            }
            let mut subjects = Vec::new();
            for oid in walk {
                let commit = repo.find_commit(oid?)?;
                if let Some(summary) = commit.summary() {
                    subjects.push(summary.to_string());
                }
            }
            Ok(subjects)
        })
        .await
    }
}

fn signature(repo: &Repository) -> Result<git2::Signature<'static>> {
    Ok(repo
        .signature()
        .or_else(|_| git2::Signature::now("npmship", "npmship@users.noreply.github.com"))?)
}

/// Root of the git work tree containing `start`.
pub async fn repo_root(start: &Path) -> Result<PathBuf> {
    let start = start.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let repo = Repository::discover(start)?;
        Ok::<_, anyhow::Error>(repo.workdir().unwrap_or(repo.path()).to_path_buf())
    })
    .await
    .map_err(|e| anyhow!("repo_root task join error: {}", e))?
}

/// GitHub `(owner, name)` of `remote`, parsed from its SSH or HTTPS URL.
pub async fn infer_remote(root: &Path, remote: &str) -> Result<(String, String)> {
    let root = root.to_path_buf();
    let remote = remote.to_string();
    tokio::task::spawn_blocking(move || {
        let repo = Repository::discover(root)?;
        let found = repo.find_remote(&remote)?;
        let url = found
            .url()
            .ok_or_else(|| anyhow!("remote {} has no URL", remote))?;
        parse_github_url(url)
    })
    .await
    .map_err(|e| anyhow!("infer_remote task join error: {}", e))?
}

fn parse_github_url(url: &str) -> Result<(String, String)> {
    let ssh = Regex::new(r"^git@github\.com:(?P<owner>[^/]+)/(?P<repo>[^/]+?)(?:\.git)?$")?;
    let https = Regex::new(r"^https?://github\.com/(?P<owner>[^/]+)/(?P<repo>[^/]+?)(?:\.git)?$")?;
    let caps = ssh
        .captures(url)
        .or_else(|| https.captures(url))
        .ok_or_else(|| anyhow!("unsupported remote URL (expected GitHub): {}", url))?;
    Ok((caps["owner"].to_string(), caps["repo"].to_string()))
}
