use std::path::PathBuf;

use crate::error::{Result, SupervisorError};
use crate::secrets::SecretsStore;

/// A value expression from a job's `environment` mapping.
///
/// The prefix is matched exactly at the start of the raw string; anything
/// without a recognized prefix is a literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueRef {
    Literal(String),
    Secret(String),
    Env(String),
    File(PathBuf),
}

impl ValueRef {
    pub fn parse(raw: &str) -> Self {
        if let Some(key) = raw.strip_prefix("secret:") {
            ValueRef::Secret(key.to_string())
        } else if let Some(name) = raw.strip_prefix("env:") {
            ValueRef::Env(name.to_string())
        } else if let Some(path) = raw.strip_prefix("file:") {
            ValueRef::File(PathBuf::from(path))
        } else {
            ValueRef::Literal(raw.to_string())
        }
    }

    /// Resolve to a concrete string, consulting the store for `secret:` refs.
    pub fn resolve(&self, store: &SecretsStore) -> Result<String> {
        match self {
            ValueRef::Literal(value) => Ok(value.clone()),
            ValueRef::Secret(key) => store
                .get(key)?
                .ok_or_else(|| SupervisorError::Validation(format!("Secret not found: {key}"))),
            ValueRef::Env(name) => std::env::var(name).map_err(|_| {
                SupervisorError::Validation(format!("Environment variable not found: {name}"))
            }),
            ValueRef::File(path) => std::fs::read_to_string(path)
                // ASCII whitespace only; wider Unicode whitespace is payload
                .map(|contents| {
                    contents
                        .trim_matches(|c: char| c.is_ascii_whitespace())
                        .to_string()
                })
                .map_err(|_| {
                    SupervisorError::Validation(format!("Cannot read file: {}", path.display()))
                }),
        }
    }
}
