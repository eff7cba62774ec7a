use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::ReleaseError;
use crate::runner::{CommandLine, CommandRunner};

#[async_trait]
pub trait PackageRegistry: Send + Sync {
    /// Publish the package directory. `Ok(Some(output))` is a refusal by the
    /// registry tool, carrying what it printed.
    async fn publish(&self, package_dir: &Path) -> Result<Option<String>>;
}

/// Publishes through the `npm` CLI. The token is handed over as
/// `NODE_AUTH_TOKEN`/`NPM_TOKEN` for an `.npmrc` to pick up.
pub struct NpmRegistry {
    runner: Arc<dyn CommandRunner>,
    token: Option<String>,
    registry: Option<String>,
    access: Option<String>,
}

impl NpmRegistry {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        token: Option<&str>,
        registry: Option<&str>,
        access: Option<&str>,
    ) -> Self {
        Self {
            runner,
            token: token.map(str::to_string),
            registry: registry.map(str::to_string),
            access: access.map(str::to_string),
        }
    }

    fn command(&self, package_dir: &Path) -> CommandLine {
        let mut cmd = CommandLine::new("npm")
            .arg("publish")
            .arg(package_dir.as_os_str());
        if let Some(registry) = &self.registry {
            cmd = cmd.arg("--registry").arg(registry);
        }
        if let Some(access) = &self.access {
            cmd = cmd.arg("--access").arg(access);
        }
        if let Some(token) = &self.token {
            cmd = cmd
                .env("NODE_AUTH_TOKEN", token.as_str())
                .env("NPM_TOKEN", token.as_str());
        }
        cmd
    }
}

#[async_trait]
impl PackageRegistry for NpmRegistry {
    async fn publish(&self, package_dir: &Path) -> Result<Option<String>> {
        let output = self.runner.run(&self.command(package_dir)).await?;
        if output.success() {
            Ok(None)
        } else {
            Ok(Some(output.error_output()))
        }
    }
}

pub async fn publish_package_to_npm(
    registry: &dyn PackageRegistry,
    package_dir: &Path,
) -> Result<(), ReleaseError> {
    let failed = |output: String| ReleaseError::Publish {
        path: PathBuf::from(package_dir),
        output,
    };
    tracing::info!("npm: publishing {}", package_dir.display());
    match registry.publish(package_dir).await {
        Ok(None) => {
            tracing::info!("npm: published {}", package_dir.display());
            Ok(())
        }
        Ok(Some(output)) => Err(failed(output)),
        Err(err) => Err(failed(format!("{:#}", err))),
    }
}
