use std::path::PathBuf;

use thiserror::Error;

/// Every way a release run can stop.
///
/// Stages return exactly one of these kinds; none of them is retried by the
/// tool itself.
#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error(
        "no tokens provided: set NPMSHIP_CI_TOKEN and NPMSHIP_NPM_TOKEN before publishing (missing: {})",
        missing.join(", ")
    )]
    NoTokensProvided { missing: Vec<&'static str> },

    #[error("Error while parsing json file at {}: {reason}", path.display())]
    MetadataRead { path: PathBuf, reason: String },

    #[error("cannot parse version from package.json: {metadata}")]
    InvalidVersion { metadata: serde_json::Value },

    #[error(
        "branch {branch} is not a valid release branch for {version} (expected {expected})"
    )]
    NoValidReleaseBranch {
        branch: String,
        version: String,
        expected: String,
    },

    #[error("there are uncommitted changes in the working tree, commit or stash them first")]
    UncommittedChanges,

    #[error("local branch {0} does not match its upstream, push or pull first")]
    LocalUpstreamMismatch(String),

    #[error("the github status for commit {sha} is still pending, check {commits_url} and retry later")]
    StatusPending { sha: String, commits_url: String },

    #[error("the github status for commit {sha} is {state}, expected success")]
    StatusFailed { sha: String, state: String },

    #[error("failed to download the release artifact: {0}")]
    Download(String),

    #[error("failed to extract {} into {}: {reason}", archive.display(), dest.display())]
    Extraction {
        archive: PathBuf,
        dest: PathBuf,
        reason: String,
    },

    #[error("bundle version {found} does not match release version {expected}")]
    BundleVersionMismatch { expected: String, found: String },

    #[error("could not extract release notes for {version} from {}", path.display())]
    ChangelogParse { path: PathBuf, version: String },

    #[error("failed to create tag {tag}: {reason}")]
    TagCreation { tag: String, reason: String },

    #[error("failed to push tag {tag}: {reason} (the local tag was kept)")]
    TagPush { tag: String, reason: String },

    #[error("failed to create pull request \"{title}\" for {branch}: {reason}")]
    PrCreation {
        branch: String,
        title: String,
        reason: String,
    },

    #[error("failed to publish {}: {output}", path.display())]
    Publish { path: PathBuf, output: String },

    #[error("release aborted by the operator")]
    OperatorAborted,

    #[error("could not switch to publish branch {branch}: {reason}")]
    BranchSwitch { branch: String, reason: String },

    #[error("could not create staging branch {branch}: {reason}")]
    StagingBranch { branch: String, reason: String },

    #[error("could not create the staging commit: {0}")]
    StagingCommit(String),

    #[error("could not push branch {branch}: {reason}")]
    BranchPush { branch: String, reason: String },

    #[error("cannot bump {version} ({bump}): a version number would overflow")]
    VersionOverflow { version: String, bump: String },

    /// A collaborator failed somewhere no dedicated kind applies, such as
    /// reading the current branch.
    #[error("{0}")]
    Collaborator(String),
}

impl ReleaseError {
    pub fn collaborator(err: anyhow::Error) -> Self {
        ReleaseError::Collaborator(format!("{:#}", err))
    }
}
