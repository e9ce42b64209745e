use gitcron::history::ExecutionHistory;
use tempfile::TempDir;

fn scratch_history() -> (ExecutionHistory, TempDir) {
    let dir = TempDir::new().unwrap();
    let history = ExecutionHistory::new(dir.path().join("job_history.json"));
    (history, dir)
}

#[test]
fn test_add_returns_record() {
    let (history, _dir) = scratch_history();

    let record = history.add("backup", true, 1.25, "done\n");

    assert_eq!(record.job_name, "backup");
    assert!(record.success);
    assert_eq!(record.execution_time_seconds, 1.25);
    assert_eq!(record.output, "done\n");
    assert_eq!(history.total(), 1);
}

#[test]
fn test_in_memory_capped_at_1000_oldest_dropped() {
    let (history, _dir) = scratch_history();

    for i in 0..1005 {
        history.add(&format!("job-{i}"), true, 0.0, "");
    }

    assert_eq!(history.total(), 1005);
    let records = history.in_memory();
    assert_eq!(records.len(), 1000);
    // The five oldest were dropped
    assert_eq!(records.first().unwrap().job_name, "job-5");
    assert_eq!(records.last().unwrap().job_name, "job-1004");
}

#[test]
fn test_output_truncated_to_1000_chars_with_ellipsis() {
    let (history, _dir) = scratch_history();

    let long = "x".repeat(1500);
    let record = history.add("chatty", true, 0.1, &long);

    assert_eq!(record.output.chars().count(), 1000);
    assert!(record.output.ends_with("..."));
}

#[test]
fn test_output_at_exactly_1000_chars_is_untouched() {
    let (history, _dir) = scratch_history();

    let exact = "y".repeat(1000);
    let record = history.add("exact", true, 0.1, &exact);

    assert_eq!(record.output, exact);
    assert!(!record.output.ends_with("..."));
}

#[test]
fn test_output_just_over_the_limit_is_truncated() {
    let (history, _dir) = scratch_history();

    let over = "z".repeat(1001);
    let record = history.add("over", true, 0.1, &over);

    assert_eq!(record.output.chars().count(), 1000);
    assert!(record.output.ends_with("..."));
}

#[test]
fn test_stats_success_rate_and_avg() {
    let (history, _dir) = scratch_history();

    history.add("a", true, 1.0, "");
    history.add("a", true, 3.0, "");
    history.add("b", false, 99.0, "boom");

    let stats = history.stats();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.successful, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.success_rate, 66.67);
    // Failed records are excluded from the average
    assert_eq!(stats.avg_execution_time, 2.0);
}

#[test]
fn test_stats_empty_history() {
    let (history, _dir) = scratch_history();

    let stats = history.stats();
    assert_eq!(stats.total, 0);
    assert_eq!(stats.success_rate, 0.0);
    assert_eq!(stats.avg_execution_time, 0.0);
}

#[test]
fn test_stats_for_filters_by_job_and_tracks_last_execution() {
    let (history, _dir) = scratch_history();

    history.add("alpha", true, 2.0, "");
    history.add("beta", false, 0.0, "");
    history.add("alpha", false, 0.0, "");

    let stats = history.stats_for("alpha");
    assert_eq!(stats.stats.total, 2);
    assert_eq!(stats.stats.successful, 1);
    assert_eq!(stats.stats.failed, 1);
    assert_eq!(stats.stats.success_rate, 50.0);
    assert!(stats.last_execution.is_some());

    let missing = history.stats_for("nope");
    assert_eq!(missing.stats.total, 0);
    assert!(missing.last_execution.is_none());
}

#[test]
fn test_recent_failures_projection_and_order() {
    let (history, _dir) = scratch_history();

    history.add("a", false, 0.0, "first failure");
    history.add("b", true, 1.0, "");
    history.add("c", false, 0.0, "second failure");
    history.add("d", false, 0.0, "third failure");

    let failures = history.recent_failures(2);
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].job_name, "c");
    assert_eq!(failures[1].job_name, "d");
    assert_eq!(failures[1].output, "third failure");
}

#[test]
fn test_history_survives_reload_from_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("job_history.json");

    {
        let history = ExecutionHistory::new(&path);
        history.add("persisted", true, 0.5, "hello");
        history.add("persisted", false, 0.0, "boom");
    }

    let reloaded = ExecutionHistory::new(&path);
    assert_eq!(reloaded.total(), 2);
    let records = reloaded.in_memory();
    assert_eq!(records[0].job_name, "persisted");
    assert!(records[0].success);
    assert!(!records[1].success);
}

#[test]
fn test_unparseable_file_starts_empty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("job_history.json");
    std::fs::write(&path, "this is not json").unwrap();

    let history = ExecutionHistory::new(&path);
    assert_eq!(history.total(), 0);
    assert!(history.in_memory().is_empty());
}

#[test]
fn test_write_failure_does_not_abort_append() {
    let dir = TempDir::new().unwrap();
    // Parent directory does not exist, so every write fails
    let history = ExecutionHistory::new(dir.path().join("missing").join("history.json"));

    let record = history.add("job", true, 0.1, "ok");
    assert_eq!(record.job_name, "job");
    assert_eq!(history.total(), 1);
}
