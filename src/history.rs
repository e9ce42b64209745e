use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// In-memory window; the on-disk array holds the same window.
const MAX_RECORDS: usize = 1000;
/// Stored output is clipped to this many characters.
const MAX_OUTPUT_CHARS: usize = 1000;

/// One completed execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub job_name: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub execution_time_seconds: f64,
    pub output: String,
}

/// Projection of a failed record for operator queries.
#[derive(Debug, Clone, Serialize)]
pub struct FailureSummary {
    pub job_name: String,
    pub timestamp: DateTime<Utc>,
    pub output: String,
}

/// Aggregate statistics over the in-memory window.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HistoryStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Percentage, rounded to two decimals
    pub success_rate: f64,
    /// Mean over successful records only; zero when there are none
    pub avg_execution_time: f64,
}

/// Per-job statistics, with the most recent execution timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct JobStats {
    #[serde(flatten)]
    pub stats: HistoryStats,
    pub last_execution: Option<DateTime<Utc>>,
}

struct HistoryState {
    records: Vec<ExecutionRecord>,
    /// Appends over the instance lifetime, seeded with the loaded count.
    total: usize,
}

/// Append-only durable record of job executions.
///
/// The file is a JSON array rewritten after every append. A missing or
/// unparseable file yields an empty view; write failures warn and are
/// dropped so they never abort a job.
pub struct ExecutionHistory {
    path: PathBuf,
    state: Mutex<HistoryState>,
}

impl ExecutionHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = load_records(&path);
        let total = records.len();
        Self {
            path,
            state: Mutex::new(HistoryState { records, total }),
        }
    }

    /// Append one record, truncating `output` to 1000 characters.
    pub fn add(
        &self,
        job_name: &str,
        success: bool,
        execution_time_seconds: f64,
        output: &str,
    ) -> ExecutionRecord {
        let record = ExecutionRecord {
            job_name: job_name.to_string(),
            timestamp: Utc::now(),
            success,
            execution_time_seconds,
            output: truncate_output(output),
        };

        let mut state = self.state.lock().unwrap();
        state.records.push(record.clone());
        state.total += 1;
        if state.records.len() > MAX_RECORDS {
            let excess = state.records.len() - MAX_RECORDS;
            state.records.drain(..excess);
        }
        self.write(&state.records);
        record
    }

    /// Number of appends over this instance's lifetime (not capped).
    pub fn total(&self) -> usize {
        self.state.lock().unwrap().total
    }

    /// Records currently held in memory (at most 1000, oldest first).
    pub fn in_memory(&self) -> Vec<ExecutionRecord> {
        self.state.lock().unwrap().records.clone()
    }

    /// The last `n` failed records, oldest first.
    pub fn recent_failures(&self, n: usize) -> Vec<FailureSummary> {
        let state = self.state.lock().unwrap();
        let mut failures: Vec<FailureSummary> = state
            .records
            .iter()
            .rev()
            .filter(|r| !r.success)
            .take(n)
            .map(|r| FailureSummary {
                job_name: r.job_name.clone(),
                timestamp: r.timestamp,
                output: r.output.clone(),
            })
            .collect();
        failures.reverse();
        failures
    }

    pub fn stats(&self) -> HistoryStats {
        let state = self.state.lock().unwrap();
        compute_stats(&state.records)
    }

    pub fn stats_for(&self, job_name: &str) -> JobStats {
        let state = self.state.lock().unwrap();
        let records: Vec<&ExecutionRecord> = state
            .records
            .iter()
            .filter(|r| r.job_name == job_name)
            .collect();
        JobStats {
            stats: compute_stats_ref(&records),
            last_execution: records.last().map(|r| r.timestamp),
        }
    }

    fn write(&self, records: &[ExecutionRecord]) {
        let json = match serde_json::to_string_pretty(records) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode execution history");
                return;
            }
        };
        if let Err(e) = fs::write(&self.path, json) {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to write execution history"
            );
        }
    }
}

fn load_records(path: &Path) -> Vec<ExecutionRecord> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(_) => return Vec::new(),
    };
    match serde_json::from_str::<Vec<ExecutionRecord>>(&contents) {
        Ok(mut records) => {
            if records.len() > MAX_RECORDS {
                let excess = records.len() - MAX_RECORDS;
                records.drain(..excess);
            }
            records
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Execution history is unreadable, starting empty"
            );
            Vec::new()
        }
    }
}

fn truncate_output(output: &str) -> String {
    let mut chars = output.chars();
    let clipped: String = chars.by_ref().take(MAX_OUTPUT_CHARS).collect();
    if chars.next().is_none() {
        return clipped;
    }
    let kept: String = clipped.chars().take(MAX_OUTPUT_CHARS - 3).collect();
    format!("{kept}...")
}

fn compute_stats(records: &[ExecutionRecord]) -> HistoryStats {
    let refs: Vec<&ExecutionRecord> = records.iter().collect();
    compute_stats_ref(&refs)
}

fn compute_stats_ref(records: &[&ExecutionRecord]) -> HistoryStats {
    let total = records.len();
    let successful = records.iter().filter(|r| r.success).count();
    let failed = total - successful;

    let success_rate = if total == 0 {
        0.0
    } else {
        round2(successful as f64 / total as f64 * 100.0)
    };
    let avg_execution_time = if successful == 0 {
        0.0
    } else {
        let sum: f64 = records
            .iter()
            .filter(|r| r.success)
            .map(|r| r.execution_time_seconds)
            .sum();
        round2(sum / successful as f64)
    };

    HistoryStats {
        total,
        successful,
        failed,
        success_rate,
        avg_execution_time,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
