use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use crate::error::{Result, SupervisorError};
use crate::job::{self, JobDescriptor, SCRIPT_FILE};
use crate::secrets::SecretsStore;

/// Per-stream capture cap; pipes are still drained to EOF past this.
const CAPTURE_LIMIT: usize = 64 * 1024;
/// Grace between SIGTERM and SIGKILL on timeout.
const KILL_GRACE: Duration = Duration::from_secs(2);
/// Supervisor-runtime variables never passed through to children.
const SANITIZED_PREFIXES: [&str; 2] = ["RUBY_", "GEM_"];

/// Result of one successful execution.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub success: bool,
    /// Combined stdout + stderr, capped
    pub output: String,
    /// Wall clock from just before spawn to just after reap
    pub execution_time_seconds: f64,
}

/// Runs one job descriptor as an isolated child process.
#[derive(Debug, Clone)]
pub struct JobExecutor {
    interpreter: String,
}

impl JobExecutor {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }

    /// Execute the job once.
    ///
    /// The script is re-scanned before spawning, guarding against a
    /// swap-out between load and fire. The child sees exactly the
    /// sanitized resolved environment plus `PATH`, runs inside the job
    /// directory, and is bounded by the descriptor's timeout.
    pub async fn execute(
        &self,
        descriptor: &JobDescriptor,
        secrets: &SecretsStore,
    ) -> Result<ExecutionOutcome> {
        let script = descriptor.script_path();
        if !script.is_file() {
            return Err(SupervisorError::Execution(format!(
                "Execution failed: script not found: {}",
                script.display()
            )));
        }
        job::scan_script(&script)?;

        let environment = secrets
            .resolve(&descriptor.environment)
            .map_err(|e| SupervisorError::Execution(format!("Execution failed: {e}")))?;
        let environment = sanitize_environment(environment);

        let started = Instant::now();

        let mut command = Command::new(&self.interpreter);
        command
            .arg(SCRIPT_FILE)
            .current_dir(&descriptor.path)
            .env_clear()
            .envs(environment.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // PATH passes through for the interpreter unless the job sets its own
        if !environment.iter().any(|(name, _)| name == "PATH") {
            if let Ok(path) = std::env::var("PATH") {
                command.env("PATH", path);
            }
        }

        let mut child = command
            .spawn()
            .map_err(|e| SupervisorError::Execution(format!("Execution failed: {e}")))?;

        let stdout_task = tokio::spawn(capture_limited(child.stdout.take()));
        let stderr_task = tokio::spawn(capture_limited(child.stderr.take()));

        let timeout = Duration::from_secs(descriptor.timeout_seconds);
        let status = tokio::select! {
            status = child.wait() => status
                .map_err(|e| SupervisorError::Execution(format!("Execution failed: {e}")))?,
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!(
                    job = %descriptor.name,
                    timeout_seconds = descriptor.timeout_seconds,
                    "Job exceeded its timeout, terminating"
                );
                terminate(&mut child).await;
                return Err(SupervisorError::Timeout(descriptor.timeout_seconds));
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let execution_time_seconds = started.elapsed().as_secs_f64();

        let mut output = stdout;
        if !stderr.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&stderr);
        }

        if status.success() {
            Ok(ExecutionOutcome {
                success: true,
                output,
                execution_time_seconds,
            })
        } else {
            let code = status.code().unwrap_or(-1);
            Err(SupervisorError::Execution(format!(
                "Job failed with exit code {code}: {output}"
            )))
        }
    }
}

/// Drop variables that would leak the supervisor's runtime configuration
/// into the child.
fn sanitize_environment(environment: Vec<(String, String)>) -> Vec<(String, String)> {
    environment
        .into_iter()
        .filter(|(name, _)| !SANITIZED_PREFIXES.iter().any(|p| name.starts_with(p)))
        .collect()
}

/// SIGTERM, then SIGKILL after a short grace period.
async fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        let _ = Command::new("kill")
            .arg("-15")
            .arg(pid.to_string())
            .status()
            .await;
        tokio::select! {
            _ = child.wait() => return,
            _ = tokio::time::sleep(KILL_GRACE) => {}
        }
    }
    let _ = child.kill().await;
}

/// Read a pipe to EOF, keeping at most `CAPTURE_LIMIT` bytes.
async fn capture_limited<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };

    let mut captured = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if captured.len() < CAPTURE_LIMIT {
                    let keep = n.min(CAPTURE_LIMIT - captured.len());
                    captured.extend_from_slice(&chunk[..keep]);
                }
            }
        }
    }
    String::from_utf8_lossy(&captured).into_owned()
}
