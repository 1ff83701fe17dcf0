//! Configuration types.

use crate::{BatonResult, ConfigError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Retry policy for external calls and retryable workflow roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// Base backoff delay in nanoseconds
    pub base_delay: Duration,
    /// Ceiling for exponential growth in nanoseconds
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Backoff delay for a zero-based attempt number, before jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        Duration::from_millis(scaled as u64).min(self.max_delay)
    }
}

/// Ages at which contexts descend the archival tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveAges {
    /// active -> dormant
    pub dormant_after: Duration,
    /// dormant -> sleeping
    pub sleeping_after: Duration,
    /// sleeping -> deep-sleep
    pub deep_sleep_after: Duration,
}

impl Default for ArchiveAges {
    fn default() -> Self {
        Self {
            dormant_after: Duration::from_secs(4 * 3600),
            sleeping_after: Duration::from_secs(7 * 86_400),
            deep_sleep_after: Duration::from_secs(30 * 86_400),
        }
    }
}

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatonConfig {
    /// Embedded database file; ":memory:" is accepted for tests
    pub db_path: PathBuf,
    /// Directory holding project identity documents
    pub projects_dir: PathBuf,

    // Token accounting
    pub session_token_budget: i32,
    pub project_token_budget: i32,
    /// Compression triggers when usage crosses budget * compress_at
    pub compress_at: f32,
    /// Target reduction ratio for session compression (0.70 = drop 70%)
    pub session_target_reduction: f32,
    /// Target reduction ratio for project compression
    pub project_target_reduction: f32,
    /// Number of most recent events kept verbatim through compression
    pub keep_window: usize,

    // Archival
    pub archive_ages: ArchiveAges,

    // Concurrency
    pub max_parallel_agents: usize,

    // Verification
    pub probe_timeout: Duration,

    // Retries
    pub retry: RetryConfig,
}

impl BatonConfig {
    /// Sane defaults rooted at the given database path and projects dir.
    pub fn rooted_at(db_path: impl Into<PathBuf>, projects_dir: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            projects_dir: projects_dir.into(),
            session_token_budget: 8_000,
            project_token_budget: 32_000,
            compress_at: 0.85,
            session_target_reduction: 0.70,
            project_target_reduction: 0.50,
            keep_window: 20,
            archive_ages: ArchiveAges::default(),
            max_parallel_agents: 4,
            probe_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }

    /// Apply environment overrides.
    ///
    /// Environment variables:
    /// - `BATON_DB_PATH`: database file path
    /// - `BATON_PROJECTS_DIR`: identity document directory
    /// - `BATON_SESSION_TOKEN_BUDGET` / `BATON_PROJECT_TOKEN_BUDGET`
    /// - `BATON_MAX_PARALLEL_AGENTS`
    /// - `BATON_PROBE_TIMEOUT_SECS`
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var("BATON_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("BATON_PROJECTS_DIR") {
            self.projects_dir = PathBuf::from(dir);
        }
        if let Some(budget) = env_parse("BATON_SESSION_TOKEN_BUDGET") {
            self.session_token_budget = budget;
        }
        if let Some(budget) = env_parse("BATON_PROJECT_TOKEN_BUDGET") {
            self.project_token_budget = budget;
        }
        if let Some(max) = env_parse("BATON_MAX_PARALLEL_AGENTS") {
            self.max_parallel_agents = max;
        }
        if let Some(secs) = env_parse::<u64>("BATON_PROBE_TIMEOUT_SECS") {
            self.probe_timeout = Duration::from_secs(secs);
        }
        self
    }

    /// Token budget for a fresh context of the given scope.
    pub fn budget_for(&self, scope: crate::ContextScope) -> i32 {
        match scope {
            crate::ContextScope::Session => self.session_token_budget,
            crate::ContextScope::Project => self.project_token_budget,
        }
    }

    /// Target reduction ratio for the given scope.
    pub fn target_reduction_for(&self, scope: crate::ContextScope) -> f32 {
        match scope {
            crate::ContextScope::Session => self.session_target_reduction,
            crate::ContextScope::Project => self.project_target_reduction,
        }
    }

    /// Validate the configuration. Invalid configuration fails fast.
    pub fn validate(&self) -> BatonResult<()> {
        if self.session_token_budget <= 0 {
            return Err(invalid(
                "session_token_budget",
                self.session_token_budget,
                "must be greater than 0",
            ));
        }
        if self.project_token_budget < self.session_token_budget {
            return Err(invalid(
                "project_token_budget",
                self.project_token_budget,
                "must be at least the session budget",
            ));
        }
        if !(0.0..=1.0).contains(&self.compress_at) {
            return Err(invalid(
                "compress_at",
                self.compress_at,
                "must be between 0.0 and 1.0",
            ));
        }
        for (field, value) in [
            ("session_target_reduction", self.session_target_reduction),
            ("project_target_reduction", self.project_target_reduction),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(invalid(field, value, "must be in [0.0, 1.0)"));
            }
        }
        if self.keep_window == 0 {
            return Err(invalid("keep_window", 0, "must keep at least one event"));
        }
        if self.max_parallel_agents == 0 {
            return Err(invalid("max_parallel_agents", 0, "must be at least 1"));
        }
        if self.probe_timeout.is_zero() {
            return Err(invalid("probe_timeout", 0, "must be positive"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", 0, "must be at least 1"));
        }
        if self.retry.multiplier <= 1.0 {
            return Err(invalid(
                "retry.multiplier",
                self.retry.multiplier,
                "must be greater than 1.0",
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn invalid(field: &str, value: impl std::fmt::Display, reason: &str) -> crate::BatonError {
    crate::BatonError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}
