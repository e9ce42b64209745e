use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SupervisorError};

/// URL schemes accepted for the source repository.
const ALLOWED_SCHEMES: [&str; 4] = ["http", "https", "git", "ssh"];

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Remote repository the working tree is kept in sync with
    pub repo_url: String,
    /// Local working tree; each child directory is one job
    pub jobs_dir: PathBuf,
    /// Cadence of the reserved sync + reload entry
    pub sync_interval: Duration,
    /// Execution history file (JSON array)
    pub history_file: PathBuf,
    /// Encrypted secrets document
    pub secrets_file: PathBuf,
    /// Base64-encoded 256-bit secrets key
    pub key_file: PathBuf,
    /// Interpreter command used to run job scripts
    pub interpreter: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            repo_url: String::new(),
            jobs_dir: PathBuf::from("./jobs"),
            sync_interval: Duration::from_secs(15 * 60),
            history_file: PathBuf::from("./job_history.json"),
            secrets_file: PathBuf::from("./secrets.json.enc"),
            key_file: PathBuf::from("./secrets.key"),
            interpreter: "ruby".to_string(),
        }
    }
}

impl SupervisorConfig {
    pub fn new(repo_url: impl Into<String>, jobs_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_url: repo_url.into(),
            jobs_dir: jobs_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    /// Validate the repository URL and jobs directory, once at construction.
    pub fn validate(&self) -> Result<()> {
        validate_repo_url(&self.repo_url)?;
        validate_jobs_dir(&self.jobs_dir)?;
        Ok(())
    }
}

/// Accepts `scheme://...` for the allowed schemes, or the SSH shorthand
/// `user@host:path`.
pub fn validate_repo_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(SupervisorError::Validation(
            "Repository URL must not be empty".to_string(),
        ));
    }

    if let Some((scheme, rest)) = url.split_once("://") {
        if ALLOWED_SCHEMES.contains(&scheme) && !rest.is_empty() {
            return Ok(());
        }
        return Err(SupervisorError::Validation(format!(
            "Invalid repository URL scheme: {url}"
        )));
    }

    // SSH shorthand: user@host:path
    if let Some((user_host, path)) = url.split_once(':') {
        if let Some((user, host)) = user_host.split_once('@') {
            if !user.is_empty() && !host.is_empty() && !path.is_empty() {
                return Ok(());
            }
        }
    }

    Err(SupervisorError::Validation(format!(
        "Invalid repository URL: {url}"
    )))
}

/// Reject any `..` segment in the input form, before expansion.
pub fn validate_jobs_dir(dir: &Path) -> Result<()> {
    if dir.as_os_str().is_empty() {
        return Err(SupervisorError::Validation(
            "Jobs directory must not be empty".to_string(),
        ));
    }
    if dir.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(SupervisorError::Validation(format!(
            "Jobs directory must not contain '..': {}",
            dir.display()
        )));
    }
    Ok(())
}
