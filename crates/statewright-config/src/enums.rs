use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionType {
  Success,
  Failure,
}

impl TransitionType {
  pub(crate) fn success() -> Self {
    TransitionType::Success
  }
}

/// What happens when a state fails and no FAILURE edge leaves it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
  /// Finalize the execution as failed.
  #[default]
  Fail,
  /// Park the failed instance in WAITING for a manual interrupt.
  Pause,
}
