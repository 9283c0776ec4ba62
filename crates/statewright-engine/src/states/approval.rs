use std::collections::HashMap;

use async_trait::async_trait;
use statewright_context::ExecutionContext;
use statewright_graph::{ExecutionResponse, FailureType, ResponseData, State, StateError, StateInfo};
use statewright_store::{ExecutionStatus, StateExecutionInstance};

/// Correlation id the current attempt of an approval is signalled on.
///
/// Each retry waits on a new id, so a signal answering an earlier attempt
/// is never replayed into a later one.
pub fn approval_correlation_id(instance: &StateExecutionInstance) -> String {
  format!("approval-{}-{}", instance.id, instance.retry_count)
}

/// Pauses until an approval signal arrives.
///
/// The signal carries `approved` (bool) and any extra fields, which become
/// the state's output.
pub struct ApprovalState {
  info: StateInfo,
}

impl ApprovalState {
  pub fn new(info: StateInfo) -> Self {
    Self { info }
  }
}

#[async_trait]
impl State for ApprovalState {
  fn info(&self) -> &StateInfo {
    &self.info
  }

  async fn execute(&self, context: &ExecutionContext) -> Result<ExecutionResponse, StateError> {
    let correlation_id = approval_correlation_id(context.instance());
    Ok(ExecutionResponse::async_wait(vec![correlation_id]).paused())
  }

  async fn handle_async_response(
    &self,
    _context: &ExecutionContext,
    responses: HashMap<String, ResponseData>,
  ) -> Result<ExecutionResponse, StateError> {
    let params = responses.into_values().find_map(|response| match response {
      ResponseData::Signal { params } => Some(params),
      _ => None,
    });
    let Some(params) = params else {
      return Err(StateError::execution("approval resumed without a signal"));
    };

    let approved = params
      .get("approved")
      .and_then(|v| v.as_bool())
      .unwrap_or(false);
    let output = serde_json::Value::Object(params);
    if approved {
      Ok(ExecutionResponse::sync(ExecutionStatus::Success).with_output(output))
    } else {
      Ok(
        ExecutionResponse::failed(format!("{} was rejected", self.info.name))
          .with_output(output)
          .with_failure_type(FailureType::Verification),
      )
    }
  }
}
