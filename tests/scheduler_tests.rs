mod test_harness;

use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;

use gitcron::job::JobDescriptor;
use gitcron::scheduler::{EntrySchedule, Supervisor};
use gitcron::sync::RepositoryStatus;
use test_harness::{test_components, test_config, write_job};

const SIMPLE_CONFIG: &str = "schedule: \"0 */6 * * *\"\n";
const SIMPLE_SCRIPT: &str = "echo ok\n";

fn test_supervisor(jobs_dir: &std::path::Path, scratch: &std::path::Path) -> Arc<Supervisor> {
    let (secrets, history) = test_components(scratch);
    Supervisor::with_components(test_config(jobs_dir), secrets, history).unwrap()
}

#[tokio::test]
async fn test_reserved_entry_registered_at_construction() {
    let scratch = TempDir::new().unwrap();
    let supervisor = test_supervisor(&scratch.path().join("jobs"), scratch.path());

    let entries = supervisor.scheduled_entries();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].reserved);
    assert_eq!(entries[0].spec, "15m");
    assert!(entries[0].job_name.is_none());
}

#[tokio::test]
async fn test_reload_registers_jobs_and_preserves_reserved_entry() {
    let scratch = TempDir::new().unwrap();
    let jobs_dir = scratch.path().join("jobs");
    let supervisor = test_supervisor(&jobs_dir, scratch.path());

    write_job(&jobs_dir, "alpha", SIMPLE_CONFIG, SIMPLE_SCRIPT);
    write_job(&jobs_dir, "beta", "schedule: \"*/5 * * * *\"\n", SIMPLE_SCRIPT);

    supervisor.reload().unwrap();
    let entries = supervisor.scheduled_entries();
    assert_eq!(entries.len(), 3);

    // Reload again: the reserved entry survives, job entries are fresh
    supervisor.reload().unwrap();
    let entries = supervisor.scheduled_entries();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries.iter().filter(|e| e.reserved).count(), 1);
    assert_eq!(
        entries.iter().find(|e| e.reserved).unwrap().spec,
        "15m"
    );

    let mut names: Vec<_> = entries.iter().filter_map(|e| e.job_name.clone()).collect();
    names.sort();
    assert_eq!(names, vec!["alpha", "beta"]);
}

#[tokio::test]
async fn test_reload_skips_incomplete_directories() {
    let scratch = TempDir::new().unwrap();
    let jobs_dir = scratch.path().join("jobs");
    let supervisor = test_supervisor(&jobs_dir, scratch.path());

    write_job(&jobs_dir, "complete", SIMPLE_CONFIG, SIMPLE_SCRIPT);
    // Missing execute.rb
    let half = jobs_dir.join("half-pushed");
    std::fs::create_dir_all(&half).unwrap();
    std::fs::write(half.join("config.yml"), SIMPLE_CONFIG).unwrap();

    supervisor.reload().unwrap();
    let names: Vec<_> = supervisor
        .scheduled_entries()
        .into_iter()
        .filter_map(|e| e.job_name)
        .collect();
    assert_eq!(names, vec!["complete"]);
}

#[tokio::test]
async fn test_reload_isolates_broken_jobs() {
    let scratch = TempDir::new().unwrap();
    let jobs_dir = scratch.path().join("jobs");
    let supervisor = test_supervisor(&jobs_dir, scratch.path());

    write_job(&jobs_dir, "good", SIMPLE_CONFIG, SIMPLE_SCRIPT);
    // Loads but fails validation: forbidden script construct
    write_job(&jobs_dir, "evil", SIMPLE_CONFIG, "system(\"echo x\")\n");
    // Fails cron parsing after the character-class check
    write_job(&jobs_dir, "unparseable", "schedule: \"* * * *\"\n", SIMPLE_SCRIPT);

    supervisor.reload().unwrap();
    let names: Vec<_> = supervisor
        .scheduled_entries()
        .into_iter()
        .filter_map(|e| e.job_name)
        .collect();
    assert_eq!(names, vec!["good"]);
}

#[tokio::test]
async fn test_dispatch_records_success_in_history() {
    let scratch = TempDir::new().unwrap();
    let jobs_dir = scratch.path().join("jobs");
    let supervisor = test_supervisor(&jobs_dir, scratch.path());

    let dir = write_job(&jobs_dir, "winner", "schedule: \"* * * * *\"\n", "echo done\n");
    let job = Arc::new(JobDescriptor::load("winner", &dir).unwrap());

    supervisor.dispatch(job).await;

    let stats = supervisor.job_stats();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.successful, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.success_rate, 100.0);
    assert!(supervisor.recent_failures(5).is_empty());
    assert_eq!(supervisor.active_count(), 0);
}

#[tokio::test]
async fn test_dispatch_records_failure_with_zero_time() {
    let scratch = TempDir::new().unwrap();
    let jobs_dir = scratch.path().join("jobs");
    let supervisor = test_supervisor(&jobs_dir, scratch.path());

    let dir = write_job(&jobs_dir, "loser", "schedule: \"* * * * *\"\n", "exit 1\n");
    let job = Arc::new(JobDescriptor::load("loser", &dir).unwrap());

    supervisor.dispatch(job).await;

    let records = supervisor.history().in_memory();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    assert_eq!(records[0].execution_time_seconds, 0.0);
    assert!(records[0].output.contains("failed with exit code 1"));

    let failures = supervisor.recent_failures(5);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].job_name, "loser");
}

#[tokio::test]
async fn test_dispatch_records_timeout_with_configured_seconds() {
    let scratch = TempDir::new().unwrap();
    let jobs_dir = scratch.path().join("jobs");
    let supervisor = test_supervisor(&jobs_dir, scratch.path());

    let config = "schedule: \"* * * * *\"\ntimeout: 1\n";
    let dir = write_job(&jobs_dir, "sleeper", config, "sleep 5\n");
    let job = Arc::new(JobDescriptor::load("sleeper", &dir).unwrap());

    supervisor.dispatch(job).await;

    let records = supervisor.history().in_memory();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    // Timeouts are logged with the configured budget as the elapsed time
    assert_eq!(records[0].execution_time_seconds, 1.0);
    assert!(records[0].output.contains("timed out after 1 seconds"));
}

#[tokio::test]
async fn test_health_check_on_fresh_tree() {
    let scratch = TempDir::new().unwrap();
    let jobs_dir = scratch.path().join("jobs");
    let supervisor = test_supervisor(&jobs_dir, scratch.path());

    let report = supervisor.health_check().await;
    assert_eq!(report.status, "healthy");
    assert_eq!(report.active_jobs, 0);
    assert_eq!(report.total_executions, 0);
    assert_eq!(report.recent_failures, 0);
    assert_eq!(report.repository_status, RepositoryStatus::NotCloned);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["repository_status"], "not_cloned");
}

#[test]
fn test_cron_schedule_accepts_five_fields() {
    let schedule = EntrySchedule::cron("0 */6 * * *").unwrap();
    let next = schedule.next_after(Utc::now()).unwrap();
    assert!(next > Utc::now());
}

#[test]
fn test_cron_schedule_rejects_wrong_field_count() {
    assert!(EntrySchedule::cron("* * * *").is_err());
    assert!(EntrySchedule::cron("0 * * * * *").is_err());
}

#[test]
fn test_jobs_dir_with_parent_traversal_rejected() {
    let config = gitcron::config::SupervisorConfig::new(
        "https://example.com/jobs.git",
        "../escape/jobs",
    );
    assert!(config.validate().is_err());
}
