//! Runtime configuration from flags and environment.
//!
//! Numeric tuning knobs follow one rule: a flag wins over the environment,
//! the environment wins over the default, and an unparsable environment
//! value is logged and ignored.

use std::env;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::classify::{ClassifierConfig, DEFAULT_MAX_BYTES, DEFAULT_MAX_FILES, RuleSet};
use crate::error::ConfigError;
use crate::vcs::{Author, CommitMetadata};
use crate::watch::WatchConfig;

pub const DEBOUNCE_ENV_VAR: &str = "AUTO_GIT_DEBOUNCE_MS";
pub const HARD_STOP_ENV_VAR: &str = "AUTO_GIT_HARD_STOP_MS";
pub const SKEW_ENV_VAR: &str = "AUTO_GIT_SKEW_SECS";
pub const MAX_FILES_ENV_VAR: &str = "AUTO_GIT_MAX_FILES";
pub const MAX_BYTES_ENV_VAR: &str = "AUTO_GIT_MAX_BYTES";
pub const AUTHOR_NAME_ENV_VAR: &str = "AUTO_GIT_AUTHOR_NAME";
pub const AUTHOR_EMAIL_ENV_VAR: &str = "AUTO_GIT_AUTHOR_EMAIL";
pub const COMMIT_TIME_ENV_VAR: &str = "AUTO_GIT_COMMIT_TIME";

pub const DEFAULT_DEBOUNCE_MS: u64 = 2000;
pub const DEFAULT_HARD_STOP_MS: u64 = 10_000;
pub const DEFAULT_REMOTE: &str = "origin";

/// Read a positive integer from `var`, falling back to `default`.
///
/// Logs a warning if the variable is set but is not a positive integer.
fn env_positive(var: &str, default: u64) -> u64 {
    match env::var(var) {
        Ok(v) if !v.is_empty() => match v.parse::<u64>() {
            Ok(n) if n > 0 => n,
            _ => {
                warn!("Invalid {} value '{}', using default {}", var, v, default);
                default
            }
        },
        _ => default,
    }
}

/// Classifier thresholds from the environment.
pub fn classifier_config() -> ClassifierConfig {
    let defaults = ClassifierConfig::default();
    let max_files = env_positive(MAX_FILES_ENV_VAR, DEFAULT_MAX_FILES as u64);
    ClassifierConfig {
        skew_threshold: Duration::from_secs(env_positive(
            SKEW_ENV_VAR,
            defaults.skew_threshold.as_secs(),
        )),
        max_files: usize::try_from(max_files).unwrap_or(DEFAULT_MAX_FILES),
        max_bytes: env_positive(MAX_BYTES_ENV_VAR, DEFAULT_MAX_BYTES),
    }
}

/// Loop timings: flag, then environment, then default.
pub fn watch_config(debounce_ms: Option<u64>, hard_stop_ms: Option<u64>) -> WatchConfig {
    let debounce =
        debounce_ms.unwrap_or_else(|| env_positive(DEBOUNCE_ENV_VAR, DEFAULT_DEBOUNCE_MS));
    let hard_stop =
        hard_stop_ms.unwrap_or_else(|| env_positive(HARD_STOP_ENV_VAR, DEFAULT_HARD_STOP_MS));
    WatchConfig {
        debounce: Duration::from_millis(debounce),
        hard_stop: Duration::from_millis(hard_stop),
        ..WatchConfig::default()
    }
}

fn non_empty_var(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Commit author from the environment, filling gaps from git config.
pub fn resolve_author(configured: Option<Author>) -> Result<Author, ConfigError> {
    let name = non_empty_var(AUTHOR_NAME_ENV_VAR)
        .or_else(|| configured.as_ref().map(|a| a.name.clone()));
    let email = non_empty_var(AUTHOR_EMAIL_ENV_VAR)
        .or_else(|| configured.as_ref().map(|a| a.email.clone()));

    match (name, email) {
        (Some(name), Some(email)) => Ok(Author { name, email }),
        _ => Err(ConfigError::MissingAuthor),
    }
}

/// Pinned commit time, if `AUTO_GIT_COMMIT_TIME` is set.
pub fn commit_time() -> Result<Option<DateTime<Utc>>, ConfigError> {
    let Some(value) = non_empty_var(COMMIT_TIME_ENV_VAR) else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(&value)
        .map(|t| Some(t.with_timezone(&Utc)))
        .map_err(|source| ConfigError::InvalidCommitTime { value, source })
}

/// Check that the git executable is available. Only pushing needs it.
pub fn check_git_installed() -> Result<(), ConfigError> {
    which::which("git")
        .map(|_| ())
        .map_err(|_| ConfigError::GitNotInstalled)
}

/// Everything a pipeline needs besides the backend.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub rules: RuleSet,
    pub classifier: ClassifierConfig,
    pub author: Author,
    /// Fixed timestamp for every commit; the current time when `None`.
    pub commit_time: Option<DateTime<Utc>>,
    pub push_remote: Option<String>,
}

impl PipelineConfig {
    pub fn new(author: Author) -> Self {
        Self {
            rules: RuleSet::empty(),
            classifier: ClassifierConfig::default(),
            author,
            commit_time: None,
            push_remote: None,
        }
    }

    pub fn metadata(&self) -> CommitMetadata {
        CommitMetadata {
            author: self.author.clone(),
            timestamp: self.commit_time.unwrap_or_else(Utc::now),
        }
    }
}
