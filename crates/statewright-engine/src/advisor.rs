//! Execution event advisors.
//!
//! Advisors are consulted before a state executes and again after every
//! result. They may leave the default routing alone (`None`) or return an
//! [`ExecutionEventAdvice`] that redirects it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use statewright_context::ExecutionContext;
use statewright_graph::{ExecutionResponse, FailureType, State};
use statewright_store::{ExecutionInterruptType, ExecutionStatus, Params};
use tracing::debug;

/// What an advisor is asked about.
pub struct ExecutionEvent<'a> {
  pub context: &'a ExecutionContext,
  pub state: &'a dyn State,
  /// STARTING before execution, otherwise the result status.
  pub status: ExecutionStatus,
  pub failure_types: &'a [FailureType],
}

impl ExecutionEvent<'_> {
  /// Whether the event is consulted before the state runs.
  pub fn is_pre_execution(&self) -> bool {
    self.status == ExecutionStatus::Starting
  }
}

/// Advice overriding the default routing of an instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionEventAdvice {
  pub interrupt_type: Option<ExecutionInterruptType>,
  pub next_child_state_machine_id: Option<String>,
  pub next_state_name: Option<String>,
  pub next_state_display_name: Option<String>,
  pub rollback_phase_name: Option<String>,
  pub wait_interval_secs: Option<u64>,
  pub state_params: Option<Params>,
  /// Manual intervention timeout.
  pub timeout_ms: Option<u64>,
  /// Skip the state instead of executing it.
  pub skip_state: bool,
  /// Reported when a skip condition could not be evaluated.
  pub skip_error: Option<String>,
  /// Use this response instead of executing the state.
  pub execution_response: Option<ExecutionResponse>,
}

impl ExecutionEventAdvice {
  pub fn action(interrupt_type: ExecutionInterruptType) -> Self {
    Self {
      interrupt_type: Some(interrupt_type),
      ..Default::default()
    }
  }

  pub fn skip() -> Self {
    Self {
      skip_state: true,
      ..Default::default()
    }
  }

  pub fn next_step(state_name: impl Into<String>) -> Self {
    Self {
      interrupt_type: Some(ExecutionInterruptType::NextStep),
      next_state_name: Some(state_name.into()),
      ..Default::default()
    }
  }

  pub fn with_wait_interval(mut self, seconds: u64) -> Self {
    self.wait_interval_secs = Some(seconds);
    self
  }

  pub fn with_state_params(mut self, params: Params) -> Self {
    self.state_params = Some(params);
    self
  }

  pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
    self.timeout_ms = Some(timeout_ms);
    self
  }

  pub fn with_child_machine(mut self, machine_id: impl Into<String>) -> Self {
    self.next_child_state_machine_id = Some(machine_id.into());
    self
  }
}

#[async_trait]
pub trait ExecutionEventAdvisor: Send + Sync {
  async fn on_execution_event(&self, event: &ExecutionEvent<'_>) -> Option<ExecutionEventAdvice>;
}

/// Advisors keyed by the ids stored on instances.
#[derive(Clone, Default)]
pub struct AdvisorRegistry {
  advisors: HashMap<String, Arc<dyn ExecutionEventAdvisor>>,
}

impl AdvisorRegistry {
  pub fn insert(&mut self, id: impl Into<String>, advisor: Arc<dyn ExecutionEventAdvisor>) {
    self.advisors.insert(id.into(), advisor);
  }

  /// Consult the named advisors in order; the last non-empty advice wins.
  pub async fn advise(&self, ids: &[String], event: &ExecutionEvent<'_>) -> Option<ExecutionEventAdvice> {
    let mut advice = None;
    for id in ids {
      let Some(advisor) = self.advisors.get(id) else {
        debug!(advisor = %id, "advisor not registered");
        continue;
      };
      if let Some(next) = advisor.on_execution_event(event).await {
        advice = Some(next);
      }
    }
    advice
  }
}
