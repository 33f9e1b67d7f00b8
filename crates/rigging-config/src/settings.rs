//! Engine settings

use crate::error::{ConfigError, Result};
use rigging_core::{CallPolicy, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What apply does after a failed change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Stop starting new changes
    #[default]
    Halt,
    /// Keep running changes that do not depend on the failed one
    Continue,
}

/// Per-call timeout for one kind of collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutSettings {
    /// `0` disables the timeout
    pub timeout_secs: u64,
}

impl TimeoutSettings {
    fn secs(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Also retry calls that failed, not only those that timed out
    pub retry_errors: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            retry_errors: false,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        if self.max_attempts <= 1 {
            return RetryPolicy::none();
        }
        RetryPolicy::backoff(
            self.max_attempts,
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.multiplier,
        )
        .with_retry_errors(self.retry_errors)
    }
}

/// Contents of a settings file. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Where the state snapshot lives
    pub state_path: PathBuf,
    /// Hosts worked on at once by `run`
    pub forks: usize,
    /// Independent changes applied at once by `apply`
    pub parallelism: usize,
    pub failure_policy: FailureMode,
    pub provider: TimeoutSettings,
    pub executor: TimeoutSettings,
    pub retry: RetrySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from(".rigging/state.json"),
            forks: 5,
            parallelism: 1,
            failure_policy: FailureMode::Halt,
            provider: TimeoutSettings::secs(300),
            executor: TimeoutSettings::secs(600),
            retry: RetrySettings::default(),
        }
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self::secs(300)
    }
}

impl Settings {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        // An empty file is a valid, all-defaults document
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings = Self::from_yaml_str(&content)?;
        settings.validate().map_err(|message| ConfigError::Invalid {
            path: path.display().to_string(),
            message,
        })?;
        tracing::debug!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.forks == 0 {
            return Err("forks must be at least 1".to_string());
        }
        if self.parallelism == 0 {
            return Err("parallelism must be at least 1".to_string());
        }
        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".to_string());
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err("retry.multiplier must be at least 1.0".to_string());
        }
        Ok(())
    }

    pub fn provider_policy(&self) -> CallPolicy {
        CallPolicy::new(self.provider.timeout(), self.retry.policy())
    }

    pub fn executor_policy(&self) -> CallPolicy {
        CallPolicy::new(self.executor.timeout(), self.retry.policy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.forks, 5);
        assert_eq!(settings.parallelism, 1);
        assert_eq!(settings.state_path, PathBuf::from(".rigging/state.json"));
        assert_eq!(
            settings.provider_policy().timeout,
            Some(Duration::from_secs(300))
        );
        assert_eq!(
            settings.executor_policy().timeout,
            Some(Duration::from_secs(600))
        );
        assert_eq!(settings.provider_policy().retry, RetryPolicy::none());
    }

    #[test]
    fn test_partial_document() {
        let settings = Settings::from_yaml_str(
            r#"
forks: 20
failure_policy: continue
executor:
  timeout_secs: 0
retry:
  max_attempts: 3
  retry_errors: true
"#,
        )
        .unwrap();
        assert_eq!(settings.forks, 20);
        assert_eq!(settings.parallelism, 1);
        assert_eq!(settings.failure_policy, FailureMode::Continue);
        assert_eq!(settings.executor.timeout(), None);

        let retry = settings.retry.policy();
        assert_eq!(retry.max_attempts, 3);
        assert!(retry.retry_errors);
        assert_eq!(retry.initial_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_empty_document() {
        assert_eq!(Settings::from_yaml_str("\n").unwrap(), Settings::default());
    }

    #[test]
    fn test_unknown_key() {
        assert!(Settings::from_yaml_str("fork: 3").is_err());
    }

    #[test]
    fn test_invalid_values() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("rigging.yaml");
        std::fs::write(&path, "forks: 0").unwrap();
        let err = Settings::load(&path).unwrap_err();
        assert!(err.to_string().contains("forks must be at least 1"));
    }
}
