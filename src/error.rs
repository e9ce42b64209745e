use thiserror::Error;

/// Error taxonomy for the supervisor.
///
/// Each variant is a stable kind used for control flow: loader errors are
/// caught per-job at the reload boundary, execution errors are recorded as
/// failed runs, and `Security` is always surfaced at error level and never
/// retried.
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// Input violates a documented rule (bad name, schedule, timeout, ...)
    #[error("{0}")]
    Validation(String),

    /// A rule intended to prevent dangerous behaviour was violated
    #[error("{0}")]
    Security(String),

    /// Well-formed input that is inconsistent with the supervisor's invariants
    #[error("{0}")]
    Configuration(String),

    /// The job process signalled failure (non-zero exit, spawn failure)
    #[error("{0}")]
    Execution(String),

    /// The job exceeded its wall-clock budget
    #[error("Job timed out after {0} seconds")]
    Timeout(u64),

    /// Repository synchronization failed
    #[error("Failed to sync repository: {0}")]
    Git(String),
}

impl SupervisorError {
    /// Stable kind name, for log fields and matching.
    pub fn kind(&self) -> &'static str {
        match self {
            SupervisorError::Validation(_) => "validation",
            SupervisorError::Security(_) => "security",
            SupervisorError::Configuration(_) => "configuration",
            SupervisorError::Execution(_) => "execution",
            SupervisorError::Timeout(_) => "timeout",
            SupervisorError::Git(_) => "git",
        }
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
