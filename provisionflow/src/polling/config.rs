//! Configuration types for readiness polling.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed-interval polling budget.
///
/// The worst-case wait is `interval * max_attempts`; it is exposed so
/// callers can reason about total run time up front.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay between probes in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Maximum number of probe invocations. Zero is treated as one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_interval_ms() -> u64 {
    2_000
}

fn default_max_attempts() -> u32 {
    30
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl PollConfig {
    /// Creates a new poll configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Gets the interval as a Duration.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Effective attempt budget (at least one probe).
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Upper bound on time spent waiting: `interval * max_attempts`.
    #[must_use]
    pub fn worst_case_wait(&self) -> Duration {
        self.interval().saturating_mul(self.attempts())
    }
}

/// A labelled readiness wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSpec {
    /// What is being awaited, for logs and timeout messages.
    pub label: String,
    /// The polling budget.
    pub config: PollConfig,
}

impl PollSpec {
    /// Creates a poll spec.
    #[must_use]
    pub fn new(label: impl Into<String>, config: PollConfig) -> Self {
        Self {
            label: label.into(),
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PollConfig::default();
        assert_eq!(config.interval(), Duration::from_secs(2));
        assert_eq!(config.max_attempts, 30);
        assert_eq!(config.worst_case_wait(), Duration::from_secs(60));
    }

    #[test]
    fn test_builder() {
        let config = PollConfig::new()
            .with_interval(Duration::from_millis(250))
            .with_max_attempts(8);

        assert_eq!(config.interval_ms, 250);
        assert_eq!(config.worst_case_wait(), Duration::from_secs(2));
    }

    #[test]
    fn test_zero_attempts_means_one() {
        let config = PollConfig::new().with_max_attempts(0);
        assert_eq!(config.attempts(), 1);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: PollConfig = serde_json::from_str(r#"{"max_attempts": 5}"#).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.interval_ms, 2_000);
    }
}
