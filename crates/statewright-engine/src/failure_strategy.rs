//! Failure strategies expressed as an advisor.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use statewright_graph::FailureType;
use statewright_store::ExecutionInterruptType;
use tracing::debug;

use crate::advisor::{ExecutionEvent, ExecutionEventAdvice, ExecutionEventAdvisor};

/// Shortest manual intervention timeout honored.
const MIN_MANUAL_INTERVENTION_TIMEOUT_MS: u64 = 60_000;

/// State types that contain other states. Retries only apply to leaves.
const CONTAINER_STATE_TYPES: &[&str] = &["fork", "phase", "sub_workflow"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairAction {
  Retry,
  ManualIntervention,
  Ignore,
  Abort,
  EndExecution,
  Rollback,
  /// Follow the failure edge or error strategy.
  Fail,
}

/// How to react to a failure of matching states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureStrategy {
  /// Empty matches any failure.
  #[serde(default)]
  pub failure_types: Vec<FailureType>,
  /// Empty matches any state.
  #[serde(default)]
  pub states: Vec<String>,
  pub repair_action: RepairAction,
  #[serde(default)]
  pub retry_count: u32,
  #[serde(default)]
  pub retry_intervals_secs: Vec<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub action_after_retry: Option<RepairAction>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub manual_intervention_timeout_ms: Option<u64>,
  /// Redirect target for `Rollback`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub rollback_state: Option<String>,
}

impl FailureStrategy {
  pub fn new(repair_action: RepairAction) -> Self {
    Self {
      failure_types: Vec::new(),
      states: Vec::new(),
      repair_action,
      retry_count: 0,
      retry_intervals_secs: Vec::new(),
      action_after_retry: None,
      manual_intervention_timeout_ms: None,
      rollback_state: None,
    }
  }

  pub fn retry(retry_count: u32, retry_intervals_secs: Vec<u64>, action_after_retry: RepairAction) -> Self {
    Self {
      retry_count,
      retry_intervals_secs,
      action_after_retry: Some(action_after_retry),
      ..Self::new(RepairAction::Retry)
    }
  }

  pub fn for_states(mut self, states: &[&str]) -> Self {
    self.states = states.iter().map(|s| s.to_string()).collect();
    self
  }

  pub fn for_failures(mut self, failure_types: &[FailureType]) -> Self {
    self.failure_types = failure_types.to_vec();
    self
  }

  fn matches(&self, state_name: &str, failure_types: &[FailureType]) -> bool {
    let type_match = self.failure_types.is_empty()
      || failure_types.is_empty()
      || failure_types.iter().any(|t| self.failure_types.contains(t));
    let state_match = self.states.is_empty() || self.states.iter().any(|s| s == state_name);
    type_match && state_match
  }

  fn manual_intervention_timeout(&self) -> Option<u64> {
    self
      .manual_intervention_timeout_ms
      .filter(|t| *t >= MIN_MANUAL_INTERVENTION_TIMEOUT_MS)
  }
}

/// Applies the first matching [`FailureStrategy`] to failed results.
#[derive(Debug, Clone, Default)]
pub struct FailureStrategyAdvisor {
  strategies: Vec<FailureStrategy>,
}

impl FailureStrategyAdvisor {
  pub fn new(strategies: Vec<FailureStrategy>) -> Self {
    Self { strategies }
  }

  fn compute(
    &self,
    strategy: &FailureStrategy,
    action: RepairAction,
    event: &ExecutionEvent<'_>,
  ) -> Option<ExecutionEventAdvice> {
    match action {
      RepairAction::Fail => None,
      RepairAction::Ignore => Some(ExecutionEventAdvice::action(ExecutionInterruptType::Ignore)),
      RepairAction::Abort => Some(ExecutionEventAdvice::action(ExecutionInterruptType::Abort)),
      RepairAction::EndExecution => Some(ExecutionEventAdvice::action(ExecutionInterruptType::EndExecution)),
      RepairAction::Rollback => strategy.rollback_state.as_ref().map(|state| ExecutionEventAdvice {
        interrupt_type: Some(ExecutionInterruptType::Rollback),
        next_state_name: Some(state.clone()),
        ..Default::default()
      }),
      RepairAction::ManualIntervention => {
        if CONTAINER_STATE_TYPES.contains(&event.state.state_type()) {
          return None;
        }
        let mut advice = ExecutionEventAdvice::action(ExecutionInterruptType::WaitingForManualIntervention);
        advice.timeout_ms = strategy.manual_intervention_timeout();
        advice.state_params = event.context.state_params().cloned();
        Some(advice)
      }
      RepairAction::Retry => {
        let after_retry = strategy.action_after_retry.unwrap_or(RepairAction::Fail);
        if after_retry == RepairAction::Retry {
          return None;
        }
        if CONTAINER_STATE_TYPES.contains(&event.state.state_type()) {
          return self.compute(strategy, after_retry, event);
        }

        let attempts = event.context.instance().state_execution_data_history.len();
        if attempts >= strategy.retry_count as usize {
          return self.compute(strategy, after_retry, event);
        }
        let wait = match strategy.retry_intervals_secs.len() {
          0 => 0,
          n => strategy.retry_intervals_secs[attempts.min(n - 1)],
        };
        debug!(attempts, wait, state = %event.state.name(), "advising retry");
        Some(ExecutionEventAdvice::action(ExecutionInterruptType::Retry).with_wait_interval(wait))
      }
    }
  }
}

#[async_trait]
impl ExecutionEventAdvisor for FailureStrategyAdvisor {
  async fn on_execution_event(&self, event: &ExecutionEvent<'_>) -> Option<ExecutionEventAdvice> {
    if !event.status.is_broke() {
      return None;
    }
    let strategy = self
      .strategies
      .iter()
      .find(|s| s.matches(event.state.name(), event.failure_types))?;
    self.compute(strategy, strategy.repair_action, event)
  }
}

/// Skips states whose assertion expression evaluates to true.
///
/// An expression that fails to evaluate, or yields a non-boolean, still
/// skips the state but reports the problem as the skip error.
#[derive(Debug, Clone, Default)]
pub struct SkipConditionAdvisor {
  conditions: HashMap<String, String>,
}

impl SkipConditionAdvisor {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_condition(mut self, state_name: impl Into<String>, expression: impl Into<String>) -> Self {
    self.conditions.insert(state_name.into(), expression.into());
    self
  }
}

#[async_trait]
impl ExecutionEventAdvisor for SkipConditionAdvisor {
  async fn on_execution_event(&self, event: &ExecutionEvent<'_>) -> Option<ExecutionEventAdvice> {
    if !event.is_pre_execution() {
      return None;
    }
    let expression = self.conditions.get(event.state.name())?;
    match event.context.evaluate(expression) {
      Ok(serde_json::Value::Bool(true)) => Some(ExecutionEventAdvice::skip()),
      Ok(serde_json::Value::Bool(false)) => None,
      Ok(_) => Some(ExecutionEventAdvice {
        skip_error: Some(format!(
          "skip condition '{expression}' did not evaluate to a boolean"
        )),
        ..ExecutionEventAdvice::skip()
      }),
      Err(e) => Some(ExecutionEventAdvice {
        skip_error: Some(format!("error evaluating skip condition '{expression}': {e}")),
        ..ExecutionEventAdvice::skip()
      }),
    }
  }
}
