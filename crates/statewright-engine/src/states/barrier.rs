use async_trait::async_trait;
use statewright_context::ExecutionContext;
use statewright_graph::{ExecutionResponse, FailureType, State, StateError, StateInfo};

use super::list_param;

/// Fails unless every listed state has completed successfully.
///
/// Properties: `states`, display names of the states to check.
pub struct BarrierState {
  info: StateInfo,
}

impl BarrierState {
  pub fn new(info: StateInfo) -> Self {
    Self { info }
  }
}

#[async_trait]
impl State for BarrierState {
  fn info(&self) -> &StateInfo {
    &self.info
  }

  async fn execute(&self, context: &ExecutionContext) -> Result<ExecutionResponse, StateError> {
    for name in list_param(&self.info, context, "states")? {
      let failure = match context.state_execution_data_of(&name) {
        None => Some(format!("{name} has not run")),
        Some(data) if !data.status.is_positive() => Some(format!("{name} finished with status {}", data.status)),
        Some(_) => None,
      };
      if let Some(message) = failure {
        return Ok(ExecutionResponse::failed(message).with_failure_type(FailureType::Verification));
      }
    }
    Ok(ExecutionResponse::success())
  }
}
