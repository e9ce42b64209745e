use std::path::PathBuf;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use tokio::process::Command;

use crate::error::{Result, SupervisorError};

/// State of the working tree, as reported by `health_check`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryStatus {
    /// `.git` is absent; serializes as the string `"not_cloned"`
    NotCloned,
    Healthy {
        last_commit: String,
        last_commit_date: String,
    },
    Error {
        message: String,
    },
}

impl Serialize for RepositoryStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            RepositoryStatus::NotCloned => serializer.serialize_str("not_cloned"),
            RepositoryStatus::Healthy {
                last_commit,
                last_commit_date,
            } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("status", "healthy")?;
                map.serialize_entry("last_commit", last_commit)?;
                map.serialize_entry("last_commit_date", last_commit_date)?;
                map.end()
            }
            RepositoryStatus::Error { message } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("status", "error")?;
                map.serialize_entry("message", message)?;
                map.end()
            }
        }
    }
}

/// Keeps the working tree reconciled with the remote repository.
///
/// The Git client is the system `git` binary; every failure is wrapped as
/// a `Git` error and surfaced to the scheduler, which keeps the previously
/// registered jobs running.
#[derive(Debug, Clone)]
pub struct RepoSync {
    repo_url: String,
    jobs_dir: PathBuf,
}

impl RepoSync {
    pub fn new(repo_url: impl Into<String>, jobs_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_url: repo_url.into(),
            jobs_dir: jobs_dir.into(),
        }
    }

    /// Fast-forward pull when the working tree is a clone already,
    /// otherwise wipe the directory and clone fresh.
    pub async fn sync(&self) -> Result<()> {
        if self.jobs_dir.join(".git").exists() {
            tracing::info!(dir = %self.jobs_dir.display(), "Pulling repository");
            run_git(&[
                "-C",
                &self.jobs_dir.to_string_lossy(),
                "pull",
                "--ff-only",
            ])
            .await?;
        } else {
            tracing::info!(
                repo = %self.repo_url,
                dir = %self.jobs_dir.display(),
                "Cloning repository"
            );
            if self.jobs_dir.exists() {
                std::fs::remove_dir_all(&self.jobs_dir)
                    .map_err(|e| SupervisorError::Git(e.to_string()))?;
            }
            run_git(&["clone", &self.repo_url, &self.jobs_dir.to_string_lossy()]).await?;
        }
        Ok(())
    }

    /// Shape of the working tree for the health report.
    pub async fn status(&self) -> RepositoryStatus {
        if !self.jobs_dir.join(".git").exists() {
            return RepositoryStatus::NotCloned;
        }
        match run_git(&[
            "-C",
            &self.jobs_dir.to_string_lossy(),
            "log",
            "-1",
            "--format=%h%n%cI",
        ])
        .await
        {
            Ok(output) => {
                let mut lines = output.lines();
                RepositoryStatus::Healthy {
                    last_commit: lines.next().unwrap_or_default().to_string(),
                    last_commit_date: lines.next().unwrap_or_default().to_string(),
                }
            }
            Err(e) => RepositoryStatus::Error {
                message: e.to_string(),
            },
        }
    }
}

async fn run_git(args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .output()
        .await
        .map_err(|e| SupervisorError::Git(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SupervisorError::Git(stderr.trim().to_string()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
