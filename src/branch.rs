use crate::version::Version;

/// The only branch allowed to publish the version line of `version`.
pub fn allowed_publish_branch(version: &Version) -> String {
    format!("{}.{}.x", version.major, version.minor)
}

pub fn should_release(current_branch: &str, version: &Version) -> bool {
    current_branch == allowed_publish_branch(version)
}

pub fn staging_branch(version: &Version) -> String {
    format!("release-stage/{}", version)
}

pub fn release_commit_message(version: &Version) -> String {
    format!("chore: Bump version to {} w/ changelog", version)
}

pub fn changelog_commit_message(version: &Version) -> String {
    format!("chore: Update changelog for {}", version)
}

pub fn staging_pr_title(version: &Version, needs_version_bump: bool) -> String {
    if needs_version_bump {
        format!("Bump version to {} w/ changelog", version)
    } else {
        format!("Update changelog for {}", version)
    }
}
