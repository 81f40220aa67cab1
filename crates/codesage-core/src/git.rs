//! Best-effort git history summary.
//!
//! Every failure is folded into `GitSummary { available: false, reason }`;
//! nothing here returns an error to the pipeline.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, warn};

/// Number of recent commits included in a summary.
pub const RECENT_COMMITS: usize = 10;

const NOT_A_REPOSITORY: &str = "Not a git repository";

/// Separator between `git log` fields; cannot occur in commit metadata.
const FIELD_SEP: char = '\u{1f}';

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Contributor {
    pub name: String,
    pub commits: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    pub hash: String,
    pub author: String,
    pub date: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSummary {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_count: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contributors: Vec<Contributor>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recent_commits: Vec<CommitInfo>,
}

impl GitSummary {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            reason: Some(reason.into()),
            commit_count: None,
            contributors: Vec::new(),
            recent_commits: Vec::new(),
        }
    }
}

pub struct GitHistory {
    repo: PathBuf,
}

impl GitHistory {
    /// `path` may be a file; its parent directory is used then.
    pub fn new(path: &Path) -> Self {
        let repo = if path.is_file() {
            path.parent().map(Path::to_path_buf).unwrap_or_default()
        } else {
            path.to_path_buf()
        };
        Self { repo }
    }

    pub async fn summarize(&self) -> GitSummary {
        if !self.is_repository().await {
            debug!("{} is not inside a git work tree", self.repo.display());
            return GitSummary::unavailable(NOT_A_REPOSITORY);
        }

        match self.collect().await {
            Ok(summary) => summary,
            Err(e) => {
                warn!("Git history unavailable for {}: {:#}", self.repo.display(), e);
                GitSummary::unavailable(format!("{:#}", e))
            }
        }
    }

    async fn is_repository(&self) -> bool {
        matches!(
            self.git(&["rev-parse", "--is-inside-work-tree"]).await,
            Ok(out) if out.trim() == "true"
        )
    }

    async fn collect(&self) -> Result<GitSummary> {
        // A fresh repository has no HEAD yet
        let commit_count = match self.git(&["rev-list", "--count", "HEAD"]).await {
            Ok(out) => out
                .trim()
                .parse::<u64>()
                .context("Unexpected output from git rev-list")?,
            Err(_) => 0,
        };
        if commit_count == 0 {
            return Ok(GitSummary {
                available: true,
                reason: None,
                commit_count: Some(0),
                contributors: Vec::new(),
                recent_commits: Vec::new(),
            });
        }

        let shortlog = self.git(&["shortlog", "-sn", "HEAD"]).await?;
        let format = format!("--format=%H{0}%an{0}%aI{0}%s", FIELD_SEP);
        let count = format!("-{}", RECENT_COMMITS);
        let log = self.git(&["log", &count, &format]).await?;

        Ok(GitSummary {
            available: true,
            reason: None,
            commit_count: Some(commit_count),
            contributors: parse_shortlog(&shortlog),
            recent_commits: parse_log(&log),
        })
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo)
            .output()
            .await
            .with_context(|| "Failed to execute 'git'. Is git installed?")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git {} failed: {}", args.join(" "), stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Parse `git shortlog -sn` lines of the form `   12\tJane Doe`.
fn parse_shortlog(output: &str) -> Vec<Contributor> {
    output
        .lines()
        .filter_map(|line| {
            let (count, name) = line.trim().split_once('\t')?;
            Some(Contributor {
                name: name.trim().to_string(),
                commits: count.trim().parse().ok()?,
            })
        })
        .collect()
}

fn parse_log(output: &str) -> Vec<CommitInfo> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.splitn(4, FIELD_SEP);
            Some(CommitInfo {
                hash: fields.next()?.to_string(),
                author: fields.next()?.to_string(),
                date: fields.next()?.to_string(),
                message: fields.next().unwrap_or_default().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_shortlog() {
        let contributors = parse_shortlog("    12\tJane Doe\n     3\tsam\n\ngarbage\n");
        assert_eq!(
            contributors,
            vec![
                Contributor {
                    name: "Jane Doe".into(),
                    commits: 12
                },
                Contributor {
                    name: "sam".into(),
                    commits: 3
                },
            ]
        );
    }

    #[test]
    fn test_parse_log_keeps_separators_in_subject() {
        let line = format!("abc123{0}Jane{0}2024-01-02T03:04:05+00:00{0}fix: a | b", FIELD_SEP);
        let commits = parse_log(&line);
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].hash, "abc123");
        assert_eq!(commits[0].message, "fix: a | b");
    }

    #[tokio::test]
    async fn test_plain_directory_is_unavailable() {
        let dir = tempdir().unwrap();
        let summary = GitHistory::new(dir.path()).summarize().await;
        assert!(!summary.available);
        assert_eq!(summary.reason.as_deref(), Some("Not a git repository"));

        let json = serde_json::to_value(&summary).unwrap();
        assert!(json.get("commitCount").is_none());
    }
}
