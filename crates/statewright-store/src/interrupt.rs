use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::instance::Params;

/// Control signals, plus the advice-only actions that share the vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionInterruptType {
  PauseAll,
  ResumeAll,
  Abort,
  AbortAll,
  MarkExpired,
  Retry,
  Ignore,
  Resume,
  MarkSuccess,
  MarkFailed,
  EndExecution,
  Rollback,
  RollbackDone,
  Pause,
  WaitingForManualIntervention,
  NextStep,
}

impl ExecutionInterruptType {
  /// Whether the interrupt addresses a whole execution rather than one instance.
  pub fn is_execution_scoped(self) -> bool {
    matches!(
      self,
      ExecutionInterruptType::PauseAll
        | ExecutionInterruptType::ResumeAll
        | ExecutionInterruptType::AbortAll
        | ExecutionInterruptType::EndExecution
        | ExecutionInterruptType::Rollback
    )
  }
}

/// A durable control-plane command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionInterrupt {
  pub id: String,
  pub execution_id: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub instance_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub env_id: Option<String>,
  pub interrupt_type: ExecutionInterruptType,
  /// Set once the interrupt is no longer in effect.
  #[serde(default)]
  pub seized: bool,
  /// Only instances created at or after this point are affected by
  /// execution-wide interrupts.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub since: Option<DateTime<Utc>>,
  #[serde(default)]
  pub properties: Params,
  pub created_at: DateTime<Utc>,
}

impl ExecutionInterrupt {
  pub fn for_execution(execution_id: impl Into<String>, interrupt_type: ExecutionInterruptType) -> Self {
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      execution_id: execution_id.into(),
      instance_id: None,
      env_id: None,
      interrupt_type,
      seized: false,
      since: None,
      properties: Params::new(),
      created_at: Utc::now(),
    }
  }

  pub fn for_instance(
    execution_id: impl Into<String>,
    instance_id: impl Into<String>,
    interrupt_type: ExecutionInterruptType,
  ) -> Self {
    let mut interrupt = Self::for_execution(execution_id, interrupt_type);
    interrupt.instance_id = Some(instance_id.into());
    interrupt
  }

  pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
    self.properties.insert(key.into(), value);
    self
  }

  pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
    self.since = Some(since);
    self
  }

  /// Replacement state parameters carried by a RETRY.
  pub fn state_params(&self) -> Option<Params> {
    self
      .properties
      .get("state_params")
      .and_then(|v| v.as_object())
      .cloned()
  }
}

/// Audit entry recording that an interrupt changed an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptEffect {
  pub interrupt_id: String,
  pub interrupt_type: ExecutionInterruptType,
  pub took_effect_at: DateTime<Utc>,
}

impl InterruptEffect {
  pub fn of(interrupt: &ExecutionInterrupt) -> Self {
    Self {
      interrupt_id: interrupt.id.clone(),
      interrupt_type: interrupt.interrupt_type,
      took_effect_at: Utc::now(),
    }
  }
}
