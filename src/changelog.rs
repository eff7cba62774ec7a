use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use regex::Regex;
use serde::Serialize;
use tera::{Context as TeraContext, Tera};

use crate::error::ReleaseError;
use crate::version::{Version, parse_version};

const SECTION_TEMPLATE: &str = include_str!("../templates/changelog_section.md");

static CONVENTIONAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<kind>feat|fix)(?:\((?P<scope>[^)]+)\))?!?: (?P<desc>.+)$")
        .expect("valid conventional commit regex")
});

/// The version named by a `# <version>` or `## <version>` heading. Link-style
/// headings such as `## [1.2.3](https://...)` are accepted too.
fn heading_token(line: &str) -> Option<&str> {
    let rest = line
        .strip_prefix("## ")
        .or_else(|| line.strip_prefix("# "))?;
    let token = rest.split_whitespace().next()?;
    Some(match token.strip_prefix('[') {
        Some(linked) => linked.split_once(']').map_or(linked, |(v, _)| v),
        None => token,
    })
}

fn is_version_heading(line: &str) -> bool {
    heading_token(line).and_then(parse_version).is_some()
}

/// Text between the heading for `version` and the next version heading (or
/// the end), trimmed. `None` when the heading is missing or the section is empty.
pub fn release_notes_from_str(changelog: &str, version: &str) -> Option<String> {
    let mut lines = changelog.lines();
    lines.find(|line| heading_token(line) == Some(version))?;
    let body: Vec<&str> = lines.take_while(|line| !is_version_heading(line)).collect();
    let notes = body.join("\n");
    let notes = notes.trim();
    (!notes.is_empty()).then(|| notes.to_string())
}

pub async fn extract_release_notes(path: &Path, version: &str) -> Result<String, ReleaseError> {
    let parse_error = || ReleaseError::ChangelogParse {
        path: path.to_path_buf(),
        version: version.to_string(),
    };
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        tracing::debug!("changelog: cannot read {}: {}", path.display(), e);
        parse_error()
    })?;
    release_notes_from_str(&content, version).ok_or_else(parse_error)
}

pub fn has_section(changelog: &str, version: &str) -> bool {
    changelog
        .lines()
        .any(|line| heading_token(line) == Some(version))
}

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct SectionEntries {
    pub features: Vec<String>,
    pub fixes: Vec<String>,
}

/// Sort `feat` and `fix` subjects into their sections; anything else is left out.
pub fn classify_commits<S: AsRef<str>>(subjects: &[S]) -> SectionEntries {
    let mut entries = SectionEntries::default();
    for subject in subjects {
        let Some(caps) = CONVENTIONAL_RE.captures(subject.as_ref()) else {
            continue;
        };
        let line = match caps.name("scope") {
            Some(scope) => format!("**{}:** {}", scope.as_str(), &caps["desc"]),
            None => caps["desc"].to_string(),
        };
        match &caps["kind"] {
            "feat" => entries.features.push(line),
            _ => entries.fixes.push(line),
        }
    }
    entries
}

pub fn render_section(version: &Version, date: &str, entries: &SectionEntries) -> Result<String> {
    let mut ctx = TeraContext::new();
    ctx.insert("version", &version.to_string());
    ctx.insert("date", date);
    ctx.insert("features", &entries.features);
    ctx.insert("fixes", &entries.fixes);
    Tera::one_off(SECTION_TEMPLATE, &ctx, false)
        .map_err(|err| anyhow!("failed to render changelog section: {}", err))
}

/// Put `section` above the newest version heading, keeping any preamble
/// (such as a `# Changelog` title) on top.
pub fn insert_section(existing: &str, section: &str) -> String {
    let mut offset = existing.len();
    let mut pos = 0;
    for line in existing.split_inclusive('\n') {
        if is_version_heading(line.trim_end()) {
            offset = pos;
            break;
        }
        pos += line.len();
    }
    let (head, tail) = existing.split_at(offset);

    let mut out = String::with_capacity(existing.len() + section.len() + 2);
    out.push_str(head);
    if !head.is_empty() && !head.ends_with("\n\n") {
        out.push_str(if head.ends_with('\n') { "\n" } else { "\n\n" });
    }
    out.push_str(section.trim_end());
    out.push('\n');
    if !tail.is_empty() {
        out.push('\n');
        out.push_str(tail);
    }
    out
}
