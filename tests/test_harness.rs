//! Shared helpers for the integration suites.
//!
//! Jobs are written as plain `sh` scripts (still named `execute.rb`, the
//! canonical name at the loader boundary) so the suite runs without the
//! job runtime installed; the executor's interpreter is configurable.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use gitcron::config::SupervisorConfig;
use gitcron::history::ExecutionHistory;
use gitcron::job::JobDescriptor;
use gitcron::secrets::SecretsStore;

/// Interpreter used for test jobs.
pub const TEST_INTERPRETER: &str = "sh";

/// Write one job directory (config.yml + execute.rb) under `jobs_dir`.
pub fn write_job(jobs_dir: &Path, name: &str, config: &str, script: &str) -> PathBuf {
    let dir = jobs_dir.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("config.yml"), config).unwrap();
    fs::write(dir.join("execute.rb"), script).unwrap();
    dir
}

/// Load a descriptor from a freshly written job directory.
pub fn load_job(jobs_dir: &Path, name: &str, config: &str, script: &str) -> JobDescriptor {
    let dir = write_job(jobs_dir, name, config, script);
    JobDescriptor::load(name, &dir).unwrap()
}

/// A secrets store rooted in its own scratch directory.
pub struct TestStore {
    pub store: SecretsStore,
    pub dir: TempDir,
}

pub fn test_store() -> TestStore {
    let dir = TempDir::new().unwrap();
    let store = SecretsStore::new(
        dir.path().join("secrets.json.enc"),
        dir.path().join("secrets.key"),
    );
    TestStore { store, dir }
}

/// Supervisor config pointing at a scratch jobs directory, with `sh` jobs.
pub fn test_config(jobs_dir: &Path) -> SupervisorConfig {
    SupervisorConfig::new("https://example.com/jobs.git", jobs_dir)
        .with_interpreter(TEST_INTERPRETER)
}

/// History + secrets pair for injection into a supervisor.
pub fn test_components(scratch: &Path) -> (Arc<SecretsStore>, Arc<ExecutionHistory>) {
    let secrets = Arc::new(SecretsStore::new(
        scratch.join("secrets.json.enc"),
        scratch.join("secrets.key"),
    ));
    let history = Arc::new(ExecutionHistory::new(scratch.join("job_history.json")));
    (secrets, history)
}
