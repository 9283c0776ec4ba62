use serde::{Deserialize, Serialize};

/// Status of a state execution instance.
///
/// ```text
/// NEW → QUEUED → STARTING → RUNNING → {WAITING, PAUSED, DISCONTINUING} → final
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ExecutionStatus {
  New,
  Queued,
  Starting,
  Running,
  Waiting,
  Paused,
  Discontinuing,
  Success,
  Skipped,
  Failed,
  Error,
  Aborted,
  Expired,
}

impl ExecutionStatus {
  /// Statuses a record can still be written from by response handling.
  pub const ACTIVE: &'static [ExecutionStatus] = &[
    ExecutionStatus::New,
    ExecutionStatus::Queued,
    ExecutionStatus::Starting,
    ExecutionStatus::Running,
    ExecutionStatus::Paused,
    ExecutionStatus::Waiting,
  ];

  pub const POSITIVE: &'static [ExecutionStatus] =
    &[ExecutionStatus::Success, ExecutionStatus::Skipped];

  pub const BROKE: &'static [ExecutionStatus] = &[ExecutionStatus::Failed, ExecutionStatus::Error];

  pub const DISCONTINUE: &'static [ExecutionStatus] =
    &[ExecutionStatus::Aborted, ExecutionStatus::Expired];

  pub fn is_positive(self) -> bool {
    Self::POSITIVE.contains(&self)
  }

  pub fn is_broke(self) -> bool {
    Self::BROKE.contains(&self)
  }

  pub fn is_discontinued(self) -> bool {
    Self::DISCONTINUE.contains(&self)
  }

  /// Terminal statuses. A final record only moves again through an explicit retry.
  pub fn is_final(self) -> bool {
    self.is_positive() || self.is_broke() || self.is_discontinued()
  }

  pub fn is_active(self) -> bool {
    Self::ACTIVE.contains(&self)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      ExecutionStatus::New => "new",
      ExecutionStatus::Queued => "queued",
      ExecutionStatus::Starting => "starting",
      ExecutionStatus::Running => "running",
      ExecutionStatus::Waiting => "waiting",
      ExecutionStatus::Paused => "paused",
      ExecutionStatus::Discontinuing => "discontinuing",
      ExecutionStatus::Success => "success",
      ExecutionStatus::Skipped => "skipped",
      ExecutionStatus::Failed => "failed",
      ExecutionStatus::Error => "error",
      ExecutionStatus::Aborted => "aborted",
      ExecutionStatus::Expired => "expired",
    }
  }
}

impl std::fmt::Display for ExecutionStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}
