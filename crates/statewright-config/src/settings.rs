use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tuning knobs for the execution engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
  /// Maximum number of dispatch/resume tasks running at once.
  pub max_concurrency: usize,
  /// Timeout applied to states that do not declare one.
  pub default_state_timeout_ms: u64,
  /// Expiry granted to an instance while it is being discontinued.
  pub abort_expiry_buffer_ms: u64,
  /// Default expiry of a manual intervention pause.
  pub manual_intervention_timeout_ms: u64,
  /// Polling used while a resumed record is still being committed.
  pub resume_poll: RetryPolicy,
  /// Nesting limit for placeholders that resolve to further placeholders.
  pub max_expression_depth: usize,
}

impl Default for EngineSettings {
  fn default() -> Self {
    Self {
      max_concurrency: 16,
      default_state_timeout_ms: 4 * 60 * 60 * 1000,
      abort_expiry_buffer_ms: 10 * 60 * 1000,
      manual_intervention_timeout_ms: 14 * 24 * 60 * 60 * 1000,
      resume_poll: RetryPolicy::default(),
      max_expression_depth: 10,
    }
  }
}

impl EngineSettings {
  /// Read settings from a JSON file. Missing fields keep their defaults.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Ok(serde_json::from_str(&json)?)
  }
}

/// A bounded retry-with-backoff schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub backoff_ms: u64,
  pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 10,
      backoff_ms: 50,
      max_backoff_ms: 1000,
    }
  }
}

impl RetryPolicy {
  /// Delay before the given (zero-based) attempt. Doubles each attempt up to the cap.
  pub fn delay_for(&self, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
    let ms = self.backoff_ms.saturating_mul(factor).min(self.max_backoff_ms);
    Duration::from_millis(ms)
  }
}
