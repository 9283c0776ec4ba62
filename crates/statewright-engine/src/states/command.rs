use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use statewright_context::ExecutionContext;
use statewright_graph::{ExecutionResponse, FailureType, ResponseData, State, StateError, StateInfo};
use statewright_store::{ContextElement, ContextElementType, ExecutionStatus, Params};
use tracing::info;

use crate::dispatcher::{DelegateTask, TaskDispatcher};

/// Runs a command on an external worker and waits for its completion.
///
/// Properties: `command` (template, required) and `env` (object of
/// templates). An object output is published as `context.<state name>`.
pub struct CommandState {
  info: StateInfo,
  dispatcher: Arc<dyn TaskDispatcher>,
}

impl CommandState {
  pub fn new(info: StateInfo, dispatcher: Arc<dyn TaskDispatcher>) -> Self {
    Self { info, dispatcher }
  }
}

#[async_trait]
impl State for CommandState {
  fn info(&self) -> &StateInfo {
    &self.info
  }

  async fn execute(&self, context: &ExecutionContext) -> Result<ExecutionResponse, StateError> {
    let command = self
      .info
      .rendered_param(context, "command")?
      .ok_or_else(|| StateError::InvalidParameters {
        message: "'command' is required".to_string(),
      })?;

    let mut params = Params::new();
    params.insert("command".to_string(), json!(command));
    if let Some(serde_json::Value::Object(env)) = self.info.param(context, "env") {
      let mut rendered = Params::new();
      for (key, value) in env {
        let value = match value {
          serde_json::Value::String(template) => json!(context.render(template)?),
          other => other.clone(),
        };
        rendered.insert(key.clone(), value);
      }
      params.insert("env".to_string(), serde_json::Value::Object(rendered));
    }

    let instance = context.instance();
    let task = DelegateTask {
      task_id: uuid::Uuid::new_v4().to_string(),
      execution_id: instance.execution_id.clone(),
      instance_id: instance.id.clone(),
      task_type: "command".to_string(),
      params,
      timeout_ms: self.info.timeout_ms,
    };
    let task_id = task.task_id.clone();
    let correlation_id = self
      .dispatcher
      .execute(task)
      .await
      .map_err(|e| StateError::execution(e.to_string()))?;
    info!(task_id = %task_id, command = %command, "command dispatched");

    Ok(
      ExecutionResponse::async_wait(vec![correlation_id])
        .with_delegate_task(task_id)
        .with_output(json!({ "command": command })),
    )
  }

  async fn handle_async_response(
    &self,
    _context: &ExecutionContext,
    responses: HashMap<String, ResponseData>,
  ) -> Result<ExecutionResponse, StateError> {
    let Some(response) = responses.into_values().next() else {
      return Err(StateError::execution("command finished without a result"));
    };

    let (status, output, error) = match response {
      ResponseData::Task { status, output, error } => (status, output, error),
      other => {
        let status = other.status().unwrap_or(ExecutionStatus::Success);
        return Ok(ExecutionResponse::sync(status));
      }
    };

    let mut result = ExecutionResponse::sync(status).with_output(output.clone());
    if let serde_json::Value::Object(params) = output {
      result = result.with_context_element(
        ContextElement::new(ContextElementType::Output, self.info.name.clone()).with_params(params),
      );
    }
    if let Some(error) = error {
      result = result.with_error(error);
    }
    if status.is_broke() {
      result = result.with_failure_type(FailureType::Application);
    }
    Ok(result)
  }
}
