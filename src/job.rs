use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, SupervisorError};
use crate::secrets::SecretsStore;

/// Required files inside a job directory.
pub const CONFIG_FILE: &str = "config.yml";
pub const SCRIPT_FILE: &str = "execute.rb";

/// The static safety scan reads at most this many bytes of the script.
const SCRIPT_SCAN_BYTES: u64 = 1024;
/// Literal substrings that fail the script scan.
const FORBIDDEN_CALLS: [&str; 3] = ["`", "system(", "exec("];

const TIMEOUT_RANGE: std::ops::RangeInclusive<i64> = 1..=3600;
const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

/// Raw shape of `config.yml`. Only primitive scalars, mappings and
/// sequences deserialize; anything else fails the strict parse.
#[derive(Debug, Deserialize)]
struct JobConfigFile {
    schedule: Option<String>,
    description: Option<String>,
    timeout: Option<i64>,
    environment: Option<serde_yaml::Mapping>,
}

/// An executable description of one job directory.
///
/// Built once per reload pass and discarded on the next; construction
/// performs all validation, so a descriptor in hand is schedulable.
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    pub name: String,
    pub path: PathBuf,
    pub schedule: String,
    pub description: Option<String>,
    pub timeout_seconds: u64,
    /// Ordered name → value-expression pairs, resolved at execution time
    pub environment: Vec<(String, String)>,
}

impl JobDescriptor {
    /// Build a descriptor from a job directory, validating everything.
    pub fn load(name: &str, dir: &Path) -> Result<Self> {
        validate_name(name)?;

        let path = fs::canonicalize(dir).map_err(|_| {
            SupervisorError::Validation(format!("Job path is not a directory: {}", dir.display()))
        })?;
        if !path.is_dir() {
            return Err(SupervisorError::Validation(format!(
                "Job path is not a directory: {}",
                path.display()
            )));
        }

        let config_path = path.join(CONFIG_FILE);
        let raw = fs::read_to_string(&config_path).map_err(|_| {
            SupervisorError::Validation(format!(
                "Job is missing required file: {}",
                config_path.display()
            ))
        })?;

        // Tag scan runs on the raw text, before any parsing.
        scan_yaml_tags(&raw)?;

        let config: JobConfigFile = serde_yaml::from_str(&raw)
            .map_err(|e| SupervisorError::Configuration(format!("Invalid job config: {e}")))?;

        let schedule = config
            .schedule
            .ok_or_else(|| SupervisorError::Validation(format!("Missing schedule for job: {name}")))?;
        validate_schedule(&schedule)?;

        let timeout_seconds = match config.timeout {
            None => DEFAULT_TIMEOUT_SECONDS,
            Some(t) if TIMEOUT_RANGE.contains(&t) => t as u64,
            Some(t) => {
                return Err(SupervisorError::Validation(format!(
                    "Invalid timeout: {t} (must be 1-3600 seconds)"
                )))
            }
        };

        let environment = parse_environment(config.environment)?;

        let script_path = path.join(SCRIPT_FILE);
        if !script_path.is_file() {
            return Err(SupervisorError::Validation(format!(
                "Job is missing required file: {}",
                script_path.display()
            )));
        }
        scan_script(&script_path)?;

        Ok(Self {
            name: name.to_string(),
            path,
            schedule,
            description: config.description,
            timeout_seconds,
            environment,
        })
    }

    /// Cheap completeness probe: both required files exist and the config
    /// mentions a schedule. Used to skip directories mid-push.
    pub fn is_complete(dir: &Path) -> bool {
        let config = dir.join(CONFIG_FILE);
        if !config.is_file() || !dir.join(SCRIPT_FILE).is_file() {
            return false;
        }
        fs::read_to_string(config)
            .map(|raw| raw.contains("schedule"))
            .unwrap_or(false)
    }

    pub fn valid(&self) -> bool {
        Self::is_complete(&self.path)
    }

    pub fn script_path(&self) -> PathBuf {
        self.path.join(SCRIPT_FILE)
    }

    /// Environment with value expressions resolved through the store.
    ///
    /// Resolution failure does not fail the descriptor: the unresolved
    /// mapping is returned verbatim and a warning is emitted, so the
    /// scheduler keeps operating when secrets are unavailable.
    pub fn environment(&self, secrets: &SecretsStore) -> Vec<(String, String)> {
        match secrets.resolve(&self.environment) {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(
                    job = %self.name,
                    "Warning: Failed to resolve secrets: {e}"
                );
                self.environment.clone()
            }
        }
    }
}

/// Job identifiers: `^[A-Za-z0-9_-]+$`.
pub fn validate_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(SupervisorError::Validation(format!(
            "Invalid job name: {name:?}"
        )))
    }
}

/// Environment names: `^[A-Z_][A-Z0-9_]*$`.
pub fn validate_env_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let ok = matches!(chars.next(), Some(c) if c.is_ascii_uppercase() || c == '_')
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(SupervisorError::Validation(format!(
            "Invalid environment variable name: {name:?}"
        )))
    }
}

/// Cron expressions are restricted to `[0-9 */,-]` before any parsing.
pub fn validate_schedule(schedule: &str) -> Result<()> {
    let ok = !schedule.trim().is_empty()
        && schedule
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '*' | '/' | ',' | '-'));
    if ok {
        Ok(())
    } else {
        Err(SupervisorError::Validation(format!(
            "Invalid schedule: {schedule:?}"
        )))
    }
}

/// Standard YAML scalar/collection tags permitted after `!!`.
const STANDARD_TAGS: [&str; 11] = [
    "str",
    "int",
    "float",
    "bool",
    "null",
    "binary",
    "timestamp",
    "map",
    "seq",
    "omap",
    "set",
];

/// Reject non-standard `!!` type tags (e.g. `!!ruby/object`,
/// `!!python/object`) in the raw document text.
fn scan_yaml_tags(raw: &str) -> Result<()> {
    let mut rest = raw;
    while let Some(pos) = rest.find("!!") {
        let after = &rest[pos + 2..];
        let tag: String = after
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | ':'))
            .collect();
        if !STANDARD_TAGS.contains(&tag.as_str()) {
            return Err(SupervisorError::Security(format!(
                "Unsafe YAML tag in config: !!{tag}"
            )));
        }
        rest = &after[tag.len()..];
    }
    Ok(())
}

/// Scan the first 1024 bytes of the script for forbidden constructs.
/// A shallow check, not a sandbox; it catches the obvious cases before
/// anything is scheduled.
pub(crate) fn scan_script(path: &Path) -> Result<()> {
    let file = fs::File::open(path).map_err(|_| {
        SupervisorError::Validation(format!(
            "Job is missing required file: {}",
            path.display()
        ))
    })?;

    let mut head = Vec::with_capacity(SCRIPT_SCAN_BYTES as usize);
    file.take(SCRIPT_SCAN_BYTES)
        .read_to_end(&mut head)
        .map_err(|e| SupervisorError::Validation(format!("Cannot read job script: {e}")))?;

    let head = String::from_utf8_lossy(&head);
    for forbidden in FORBIDDEN_CALLS {
        if head.contains(forbidden) {
            return Err(SupervisorError::Security(format!(
                "Job script contains potentially unsafe system calls ({forbidden:?}): {}",
                path.display()
            )));
        }
    }
    Ok(())
}

fn parse_environment(mapping: Option<serde_yaml::Mapping>) -> Result<Vec<(String, String)>> {
    let Some(mapping) = mapping else {
        return Ok(Vec::new());
    };

    let mut environment = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let name = match key {
            serde_yaml::Value::String(name) => name,
            other => {
                return Err(SupervisorError::Validation(format!(
                    "Invalid environment variable name: {other:?}"
                )))
            }
        };
        validate_env_name(&name)?;

        let value = match value {
            serde_yaml::Value::String(value) => value,
            other => {
                return Err(SupervisorError::Configuration(format!(
                    "Invalid job config: environment value for {name} must be a string, got {other:?}"
                )))
            }
        };
        environment.push((name, value));
    }
    Ok(environment)
}
