//! Scheduler core: cron dispatch, periodic sync + reload, and
//! active-execution tracking.
//!
//! The [`Supervisor`] owns the entry registry and the active-executions
//! map. One tick loop drives everything: due entries fire on their own
//! spawned tasks, so overlapping schedules run concurrently and nothing
//! blocks the dispatcher.

pub mod entry;

use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::SupervisorConfig;
use crate::error::{Result, SupervisorError};
use crate::executor::JobExecutor;
use crate::history::{ExecutionHistory, FailureSummary, HistoryStats, JobStats};
use crate::job::JobDescriptor;
use crate::secrets::SecretsStore;
use crate::sync::{RepoSync, RepositoryStatus};

pub use entry::{EntryAction, EntryInfo, EntrySchedule, ScheduledEntry};

/// One in-flight firing, keyed by execution id.
pub struct ActiveExecution {
    pub job: Arc<JobDescriptor>,
    pub started_at: DateTime<Utc>,
}

/// Snapshot returned by `health_check`.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub active_jobs: usize,
    pub total_executions: usize,
    pub recent_failures: usize,
    pub repository_status: RepositoryStatus,
}

/// The supervisor: owns every other component and runs the tick loop.
pub struct Supervisor {
    config: SupervisorConfig,
    sync: RepoSync,
    secrets: Arc<SecretsStore>,
    history: Arc<ExecutionHistory>,
    executor: JobExecutor,
    entries: Mutex<Vec<ScheduledEntry>>,
    active: Mutex<HashMap<Uuid, ActiveExecution>>,
}

impl Supervisor {
    /// Construct with components built from the configuration.
    pub fn new(config: SupervisorConfig) -> Result<Arc<Self>> {
        let secrets = Arc::new(SecretsStore::new(&config.secrets_file, &config.key_file));
        let history = Arc::new(ExecutionHistory::new(&config.history_file));
        Self::with_components(config, secrets, history)
    }

    /// Construct with injected history and secrets (used by tests).
    pub fn with_components(
        config: SupervisorConfig,
        secrets: Arc<SecretsStore>,
        history: Arc<ExecutionHistory>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        fs::create_dir_all(&config.jobs_dir).map_err(|e| {
            SupervisorError::Configuration(format!(
                "Cannot create jobs directory {}: {e}",
                config.jobs_dir.display()
            ))
        })?;

        let supervisor = Self {
            sync: RepoSync::new(config.repo_url.clone(), &config.jobs_dir),
            executor: JobExecutor::new(config.interpreter.clone()),
            entries: Mutex::new(vec![ScheduledEntry::reserved_sync(config.sync_interval)]),
            active: Mutex::new(HashMap::new()),
            secrets,
            history,
            config,
        };
        Ok(Arc::new(supervisor))
    }

    /// Run until the token is cancelled.
    ///
    /// Performs one immediate sync + reload, then ticks once per second
    /// looking for due entries. Each firing runs on its own task.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        tracing::info!(
            repo = %self.config.repo_url,
            jobs_dir = %self.config.jobs_dir.display(),
            "Supervisor starting"
        );

        if let Err(e) = self.sync_and_reload().await {
            tracing::error!(kind = e.kind(), error = %e, "Initial sync failed");
        }

        let mut tick = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = tick.tick() => Self::dispatch_due(&self),
                _ = shutdown.cancelled() => {
                    tracing::info!("Supervisor shutting down");
                    break;
                }
            }
        }
    }

    /// Fire every entry whose time has come, advancing its `next_at`.
    fn dispatch_due(supervisor: &Arc<Self>) {
        let now = Utc::now();
        let mut due = Vec::new();
        {
            let mut entries = supervisor.entries.lock().unwrap();
            for entry in entries.iter_mut() {
                if entry.next_at <= now {
                    match entry.schedule.next_after(now) {
                        Some(next) => entry.next_at = next,
                        // Expression has no future firing; park it.
                        None => entry.next_at = now + chrono::Duration::days(3650),
                    }
                    due.push(entry.action.clone());
                }
            }
        }

        for action in due {
            let supervisor = Arc::clone(supervisor);
            match action {
                EntryAction::RunJob(job) => {
                    tokio::spawn(async move {
                        supervisor.dispatch(job).await;
                    });
                }
                EntryAction::SyncAndReload => {
                    tokio::spawn(async move {
                        if let Err(e) = supervisor.sync_and_reload().await {
                            tracing::error!(kind = e.kind(), error = %e, "Periodic sync failed");
                        }
                    });
                }
            }
        }
    }

    /// Run one job firing and record the outcome.
    pub async fn dispatch(&self, job: Arc<JobDescriptor>) {
        let execution_id = Uuid::new_v4();
        self.active.lock().unwrap().insert(
            execution_id,
            ActiveExecution {
                job: Arc::clone(&job),
                started_at: Utc::now(),
            },
        );
        tracing::info!(job = %job.name, execution_id = %execution_id, "Dispatching job");

        match self.executor.execute(&job, &self.secrets).await {
            Ok(outcome) => {
                tracing::info!(
                    job = %job.name,
                    seconds = outcome.execution_time_seconds,
                    "Job completed"
                );
                self.history.add(
                    &job.name,
                    true,
                    outcome.execution_time_seconds,
                    &outcome.output,
                );
            }
            Err(e @ SupervisorError::Timeout(_)) => {
                tracing::error!(job = %job.name, error = %e, "Job timed out");
                self.history
                    .add(&job.name, false, job.timeout_seconds as f64, &e.to_string());
            }
            Err(SupervisorError::Execution(message)) => {
                tracing::error!(job = %job.name, "Job failed: {message}");
                self.history.add(&job.name, false, 0.0, &message);
            }
            Err(e) => {
                tracing::error!(kind = e.kind(), job = %job.name, error = %e, "Job dispatch failed");
                self.history.add(&job.name, false, 0.0, &e.to_string());
            }
        }

        self.active.lock().unwrap().remove(&execution_id);
    }

    /// Reconcile the working tree, then rebuild the entry registry.
    /// A sync failure aborts the pass; previously registered jobs stay.
    pub async fn sync_and_reload(&self) -> Result<()> {
        self.sync.sync().await?;
        self.reload()
    }

    /// Re-scan the jobs directory and replace every non-reserved entry.
    pub fn reload(&self) -> Result<()> {
        let read_dir = fs::read_dir(&self.config.jobs_dir).map_err(|e| {
            SupervisorError::Configuration(format!(
                "Cannot read jobs directory {}: {e}",
                self.config.jobs_dir.display()
            ))
        })?;

        let mut fresh = Vec::new();
        for dir_entry in read_dir.flatten() {
            let path = dir_entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = dir_entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            if !JobDescriptor::is_complete(&path) {
                tracing::debug!(job = %name, "Skipping incomplete job directory");
                continue;
            }

            match JobDescriptor::load(&name, &path)
                .and_then(|descriptor| ScheduledEntry::job(Arc::new(descriptor)))
            {
                Ok(entry) => {
                    tracing::info!(job = %name, schedule = %entry.spec, "Registered job");
                    fresh.push(entry);
                }
                Err(e) => match e.kind() {
                    "configuration" => {
                        tracing::error!(job = %name, "Invalid job configuration: {e}")
                    }
                    "security" => tracing::error!(job = %name, "Security violation in job: {e}"),
                    _ => tracing::error!(job = %name, "Failed to load job: {e}"),
                },
            }
        }

        let registered = fresh.len();
        {
            let mut entries = self.entries.lock().unwrap();
            entries.retain(|entry| entry.reserved);
            entries.extend(fresh);
        }
        tracing::info!(jobs = registered, "Reload complete");
        Ok(())
    }

    /// One synchronous sync + reload, on demand.
    pub async fn force_sync(&self) -> Result<()> {
        self.sync_and_reload().await
    }

    pub async fn health_check(&self) -> HealthReport {
        HealthReport {
            status: "healthy",
            active_jobs: self.active.lock().unwrap().len(),
            total_executions: self.history.total(),
            recent_failures: self.history.recent_failures(5).len(),
            repository_status: self.sync.status().await,
        }
    }

    pub fn job_stats(&self) -> HistoryStats {
        self.history.stats()
    }

    pub fn stats_for(&self, job_name: &str) -> JobStats {
        self.history.stats_for(job_name)
    }

    pub fn recent_failures(&self, n: usize) -> Vec<FailureSummary> {
        self.history.recent_failures(n)
    }

    /// Registered entries, reserved one included.
    pub fn scheduled_entries(&self) -> Vec<EntryInfo> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|entry| EntryInfo {
                spec: entry.spec.clone(),
                job_name: entry.job_name().map(str::to_string),
                reserved: entry.reserved,
            })
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    pub fn history(&self) -> &ExecutionHistory {
        &self.history
    }

    pub fn secrets(&self) -> &SecretsStore {
        &self.secrets
    }
}
