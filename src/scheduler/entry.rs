use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use uuid::Uuid;

use crate::error::{Result, SupervisorError};
use crate::job::JobDescriptor;

/// When an entry fires next.
#[derive(Debug, Clone)]
pub enum EntrySchedule {
    /// 5-field cron expression (widened internally with a seconds field)
    Cron(Schedule),
    /// Fixed cadence, used by the reserved sync entry
    Interval(chrono::Duration),
}

impl EntrySchedule {
    /// Parse an operator-facing 5-field cron expression.
    pub fn cron(expr: &str) -> Result<Self> {
        if expr.split_whitespace().count() != 5 {
            return Err(SupervisorError::Configuration(format!(
                "Invalid cron expression (expected 5 fields): {expr}"
            )));
        }
        // The cron engine wants a seconds field in front.
        let widened = format!("0 {expr}");
        let schedule = Schedule::from_str(&widened).map_err(|e| {
            SupervisorError::Configuration(format!("Invalid cron expression {expr:?}: {e}"))
        })?;
        Ok(EntrySchedule::Cron(schedule))
    }

    pub fn interval(interval: Duration) -> Self {
        let interval = chrono::Duration::from_std(interval)
            .unwrap_or_else(|_| chrono::Duration::seconds(15 * 60));
        EntrySchedule::Interval(interval)
    }

    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            EntrySchedule::Cron(schedule) => schedule.after(&after).next(),
            EntrySchedule::Interval(interval) => Some(after + *interval),
        }
    }
}

/// What a firing does.
#[derive(Clone)]
pub enum EntryAction {
    RunJob(Arc<JobDescriptor>),
    SyncAndReload,
}

/// Binding between a schedule and a dispatch action.
///
/// Job entries are rebuilt on every reload; the reserved sync entry is
/// created once at start and survives reloads.
pub struct ScheduledEntry {
    pub id: Uuid,
    /// Original schedule string (`"15m"` for the reserved entry)
    pub spec: String,
    pub schedule: EntrySchedule,
    pub action: EntryAction,
    pub reserved: bool,
    pub next_at: DateTime<Utc>,
}

impl ScheduledEntry {
    pub fn job(descriptor: Arc<JobDescriptor>) -> Result<Self> {
        let schedule = EntrySchedule::cron(&descriptor.schedule)?;
        let next_at = schedule.next_after(Utc::now()).ok_or_else(|| {
            SupervisorError::Configuration(format!(
                "Cron expression never fires: {}",
                descriptor.schedule
            ))
        })?;
        Ok(Self {
            id: Uuid::new_v4(),
            spec: descriptor.schedule.clone(),
            schedule,
            action: EntryAction::RunJob(descriptor),
            reserved: false,
            next_at,
        })
    }

    /// The always-present entry driving periodic sync + reload.
    pub fn reserved_sync(interval: Duration) -> Self {
        let schedule = EntrySchedule::interval(interval);
        let next_at = schedule
            .next_after(Utc::now())
            .unwrap_or_else(Utc::now);
        Self {
            id: Uuid::new_v4(),
            spec: interval_spec(interval),
            schedule,
            action: EntryAction::SyncAndReload,
            reserved: true,
            next_at,
        }
    }

    pub fn job_name(&self) -> Option<&str> {
        match &self.action {
            EntryAction::RunJob(descriptor) => Some(&descriptor.name),
            EntryAction::SyncAndReload => None,
        }
    }
}

/// Read-only view of a registered entry, for logs and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub spec: String,
    pub job_name: Option<String>,
    pub reserved: bool,
}

fn interval_spec(interval: Duration) -> String {
    let secs = interval.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}
