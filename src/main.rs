mod archive;
mod branch;
mod bundle;
mod changelog;
mod circleci;
mod config;
mod error;
mod git;
mod github;
mod npm;
mod pipeline;
mod prompt;
mod runner;
mod stage;
mod status;
mod tagging;
#[cfg(test)]
mod testing;
mod version;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::circleci::CircleCiClient;
use crate::config::ReleaseConfig;
use crate::git::Git2Client;
use crate::github::OctocrabApi;
use crate::npm::NpmRegistry;
use crate::pipeline::{Aborted, Collaborators, PublishPipeline, Stage};
use crate::prompt::{AssumeYes, Confirm, TerminalConfirm};
use crate::runner::{CommandRunner, SystemRunner};
use crate::stage::{StageCollaborators, StageRequest, TargetVersion};
use crate::version::{Bump, Version, parse_version};

#[derive(Parser, Debug)]
#[command(
    name = "npmship",
    version,
    about = "Release helper for npm packages built on CI",
    long_about = None
)]
struct Cli {
    /// Repository to release from (defaults to WORKSPACE_ROOT, then the current git repository)
    #[arg(global = true, long = "workspace", value_name = "DIR")]
    workspace: Option<PathBuf>,

    /// Answer every confirmation prompt with yes
    #[arg(global = true, long = "yes", short = 'y', default_value_t = false)]
    yes: bool,

    /// Run every check without tagging, pushing or publishing
    #[arg(global = true, long = "dry-run", default_value_t = false)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Verify the CI bundle, tag the release and publish it to npm
    Publish,
    /// Bump the version, update the changelog and open a staging pull request
    Stage(StageArgs),
}

#[derive(Args, Debug)]
#[group(multiple = false)]
struct StageArgs {
    /// Increment the current version
    #[arg(long, value_enum)]
    bump: Option<Bump>,

    /// Stage exactly this version
    #[arg(long = "version", id = "exact", value_name = "X.Y.Z", value_parser = parse_version_arg)]
    exact: Option<Version>,
}

impl StageArgs {
    fn target(&self) -> TargetVersion {
        match (self.bump, self.exact) {
            (_, Some(version)) => TargetVersion::Exact(version),
            (Some(bump), None) => TargetVersion::Bump(bump),
            (None, None) => TargetVersion::Current,
        }
    }
}

fn parse_version_arg(value: &str) -> Result<Version, String> {
    parse_version(value).ok_or_else(|| format!("`{}` is not a major.minor.patch version", value))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("npmship=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let lookup = |key: &str| std::env::var(key).ok();
    if matches!(cli.command, Commands::Publish) {
        config::check_publish_env(&lookup).map_err(|reason| Aborted {
            stage: Stage::Idle,
            reason,
        })?;
    }
    let config = ReleaseConfig::load(cli.workspace.clone(), lookup)
        .await
        .context("failed to load release configuration")?;

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let git = Git2Client::new(&config.workspace_root, &config.settings.remote, runner.clone());
    let github = OctocrabApi::new(&config.owner, &config.repo, config.github_token.as_deref())?;
    let confirm: Box<dyn Confirm> = if cli.yes {
        Box::new(AssumeYes)
    } else {
        Box::new(TerminalConfirm)
    };

    match cli.command {
        Commands::Publish => {
            let ci = CircleCiClient::new(
                &config.settings.ci_api_base,
                &config.owner,
                &config.repo,
                config.ci_token.as_deref(),
            );
            let registry = NpmRegistry::new(
                runner,
                config.npm_token.as_deref(),
                config.settings.npm_registry.as_deref(),
                config.settings.npm_access.as_deref(),
            );
            let deps = Collaborators {
                git: &git,
                ci: &ci,
                github: &github,
                registry: &registry,
                confirm: confirm.as_ref(),
            };
            let report = PublishPipeline::new(&config, deps, cli.dry_run)
                .run()
                .await?;
            tracing::debug!("publish: visited {:?}", report.visited);
            if report.dry_run {
                println!(
                    "publish: dry run ok (version={} branch={} sha512={})",
                    report.version,
                    report.branch,
                    report.archive_sha512.as_deref().unwrap_or("<none>")
                );
            } else {
                println!(
                    "publish: released {} (tag={} branch={})",
                    report.version,
                    report.tag.as_deref().unwrap_or("<none>"),
                    report.branch
                );
            }
        }
        Commands::Stage(args) => {
            let deps = StageCollaborators {
                git: &git,
                github: &github,
                confirm: confirm.as_ref(),
            };
            let request = StageRequest {
                target: args.target(),
                dry_run: cli.dry_run,
                today: chrono::Local::now().format("%Y-%m-%d").to_string(),
            };
            let report = stage::stage_release(&config, deps, &request).await?;
            if report.dry_run {
                println!(
                    "stage: dry run ok (version={} publish_branch={} staging_branch={} changelog={})",
                    report.version,
                    report.publish_branch,
                    report.staging_branch,
                    if report.changelog_section.is_some() { "new section" } else { "unchanged" }
                );
            } else {
                println!(
                    "stage: staged {} (branch={} commit={} pr={})",
                    report.version,
                    report.staging_branch,
                    report.commit.as_deref().unwrap_or("<none>"),
                    report.pull_url.as_deref().unwrap_or("<none>")
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn stage_target_from_flags() {
        let cli = Cli::try_parse_from(["npmship", "stage", "--bump", "minor"]).unwrap();
        let Commands::Stage(args) = cli.command else {
            panic!("expected stage");
        };
        assert_eq!(args.target(), TargetVersion::Bump(Bump::Minor));

        let cli = Cli::try_parse_from(["npmship", "--yes", "stage", "--version", "5.0.0"]).unwrap();
        assert!(cli.yes);
        let Commands::Stage(args) = cli.command else {
            panic!("expected stage");
        };
        assert_eq!(args.target(), TargetVersion::Exact(Version::new(5, 0, 0)));

        assert!(Cli::try_parse_from(["npmship", "stage", "--version", "5.0"]).is_err());
        assert!(
            Cli::try_parse_from(["npmship", "stage", "--bump", "patch", "--version", "5.0.0"])
                .is_err()
        );
    }
}
