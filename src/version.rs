use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde_json::Value;

use crate::error::ReleaseError;

// Leading zeros are rejected so that formatting always reproduces the input.
static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)$").expect("valid version regex")
});

pub const PACKAGE_JSON: &str = "package.json";

/// A plain `major.minor.patch` version. Pre-release and build metadata are
/// not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Bump {
    Patch,
    Minor,
    Major,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// The next version for `bump`; `None` when a number would overflow.
    pub fn bump(self, bump: Bump) -> Option<Self> {
        Some(match bump {
            Bump::Patch => Self::new(self.major, self.minor, self.patch.checked_add(1)?),
            Bump::Minor => Self::new(self.major, self.minor.checked_add(1)?, 0),
            Bump::Major => Self::new(self.major.checked_add(1)?, 0, 0),
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Parse `major.minor.patch`. A mismatch is not an error here; callers decide
/// whether a missing version is fatal.
pub fn parse_version(text: &str) -> Option<Version> {
    let caps = VERSION_RE.captures(text)?;
    Some(Version::new(
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
    ))
}

pub async fn read_package_json(path: &Path) -> Result<Value, ReleaseError> {
    let metadata_read = |reason: String| ReleaseError::MetadataRead {
        path: path.to_path_buf(),
        reason,
    };
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| metadata_read(e.to_string()))?;
    serde_json::from_str(&content).map_err(|e| metadata_read(e.to_string()))
}

/// Parse the `version` field of an already loaded `package.json`.
pub fn version_of(package_json: &Value) -> Option<Version> {
    package_json
        .get("version")
        .and_then(Value::as_str)
        .and_then(parse_version)
}

/// Read `package.json` in `base_dir` and parse its version.
pub async fn determine_version(base_dir: &Path) -> Result<Version, ReleaseError> {
    let path = base_dir.join(PACKAGE_JSON);
    let package_json = read_package_json(&path).await?;
    match version_of(&package_json) {
        Some(version) => {
            tracing::debug!("version: resolved {} from {}", version, path.display());
            Ok(version)
        }
        None => Err(ReleaseError::InvalidVersion {
            metadata: package_json,
        }),
    }
}

/// Rewrite the `version` field of `package.json` in `base_dir`, keeping every
/// other key and its order.
pub async fn update_package_json_version(
    base_dir: &Path,
    version: Version,
) -> Result<PathBuf, ReleaseError> {
    let path = base_dir.join(PACKAGE_JSON);
    let mut package_json = read_package_json(&path).await?;
    let Some(fields) = package_json.as_object_mut() else {
        return Err(ReleaseError::InvalidVersion {
            metadata: package_json,
        });
    };
    fields.insert("version".into(), Value::String(version.to_string()));
    let rendered = serde_json::to_string_pretty(&package_json)
        .map_err(|e| ReleaseError::StagingCommit(e.to_string()))?;
    tokio::fs::write(&path, format!("{}\n", rendered))
        .await
        .map_err(|e| ReleaseError::StagingCommit(format!("write {}: {}", path.display(), e)))?;
    Ok(path)
}
