use std::collections::HashMap;

use async_trait::async_trait;
use statewright_config::StateDef;
use statewright_context::ExecutionContext;
use statewright_store::{ExecutionStatus, Params};

use crate::error::StateError;
use crate::response::{ExecutionResponse, FailureType, ResponseData};

/// Identity and static settings shared by every state variant.
#[derive(Debug, Clone, PartialEq)]
pub struct StateInfo {
  pub name: String,
  pub state_type: String,
  pub wait_interval_secs: Option<u64>,
  pub timeout_ms: Option<u64>,
  pub rollback: bool,
  pub properties: Params,
}

impl StateInfo {
  pub fn from_def(def: &StateDef) -> Self {
    Self {
      name: def.name.clone(),
      state_type: def.state_type.clone(),
      wait_interval_secs: def.wait_interval_secs,
      timeout_ms: def.timeout_ms,
      rollback: def.rollback,
      properties: def.properties.clone(),
    }
  }

  /// A property, overridden by replacement parameters on the instance.
  pub fn param<'a>(&'a self, context: &'a ExecutionContext, key: &str) -> Option<&'a serde_json::Value> {
    context
      .state_params()
      .and_then(|params| params.get(key))
      .or_else(|| self.properties.get(key))
  }

  /// A string property with its placeholders rendered.
  pub fn rendered_param(&self, context: &ExecutionContext, key: &str) -> Result<Option<String>, StateError> {
    match self.param(context, key) {
      Some(serde_json::Value::String(template)) => Ok(Some(context.render(template)?)),
      Some(other) => Ok(Some(other.to_string())),
      None => Ok(None),
    }
  }
}

/// The execution contract every state variant implements.
///
/// The orchestrator only ever calls through this trait; variant identity
/// matters solely when the registry builds a graph.
#[async_trait]
pub trait State: Send + Sync {
  fn info(&self) -> &StateInfo;

  fn name(&self) -> &str {
    &self.info().name
  }

  fn state_type(&self) -> &str {
    &self.info().state_type
  }

  /// Run the state. Returning `Err` is handled as a FAILED result.
  async fn execute(&self, context: &ExecutionContext) -> Result<ExecutionResponse, StateError>;

  /// Handle the results of every correlation id the state waited on.
  ///
  /// The default succeeds unless one of the results reports a failure.
  async fn handle_async_response(
    &self,
    _context: &ExecutionContext,
    responses: HashMap<String, ResponseData>,
  ) -> Result<ExecutionResponse, StateError> {
    let failure = responses
      .values()
      .find(|r| r.status().is_some_and(|s| s.is_broke() || s.is_discontinued()));
    match failure {
      Some(response) => Ok(
        ExecutionResponse::sync(response.status().unwrap_or(ExecutionStatus::Failed))
          .with_error(response.error_message().unwrap_or("async work failed"))
          .with_failure_type(FailureType::Application),
      ),
      None => Ok(ExecutionResponse::success()),
    }
  }

  /// Called when the instance is being aborted or expired.
  async fn handle_abort_event(&self, _context: &ExecutionContext) {}
}

impl std::fmt::Debug for dyn State {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("State")
      .field("name", &self.name())
      .field("type", &self.state_type())
      .finish()
  }
}
