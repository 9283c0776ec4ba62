use async_trait::async_trait;
use statewright_context::ExecutionContext;
use statewright_graph::{ExecutionResponse, FailureType, State, StateError, StateInfo};
use statewright_store::{ContextElement, ContextElementType, ExecutionStatus, Params};

/// Publishes rendered outputs and finishes with a configured status.
///
/// Properties: `outputs` (object of templates), `status` (template,
/// default `success`) and `error` (template).
pub struct NoopState {
  info: StateInfo,
}

impl NoopState {
  pub fn new(info: StateInfo) -> Self {
    Self { info }
  }
}

#[async_trait]
impl State for NoopState {
  fn info(&self) -> &StateInfo {
    &self.info
  }

  async fn execute(&self, context: &ExecutionContext) -> Result<ExecutionResponse, StateError> {
    let mut outputs = Params::new();
    if let Some(serde_json::Value::Object(templates)) = self.info.param(context, "outputs") {
      for (key, value) in templates {
        let rendered = match value {
          serde_json::Value::String(template) => serde_json::Value::String(context.render(template)?),
          other => other.clone(),
        };
        outputs.insert(key.clone(), rendered);
      }
    }

    let status = match self.info.rendered_param(context, "status")? {
      Some(status) => parse_final_status(&status)?,
      None => ExecutionStatus::Success,
    };

    let mut response = ExecutionResponse::sync(status).with_output(serde_json::Value::Object(outputs.clone()));
    if !outputs.is_empty() {
      response = response.with_context_element(
        ContextElement::new(ContextElementType::Output, self.info.name.clone()).with_params(outputs),
      );
    }
    if let Some(error) = self.info.rendered_param(context, "error")? {
      response = response.with_error(error);
    }
    if status.is_broke() {
      if response.error_message.is_none() {
        response = response.with_error(format!("{} finished with status {status}", self.info.name));
      }
      response = response.with_failure_type(FailureType::Application);
    }
    Ok(response)
  }
}

fn parse_final_status(value: &str) -> Result<ExecutionStatus, StateError> {
  let status: ExecutionStatus = serde_json::from_value(serde_json::Value::String(value.trim().to_lowercase()))
    .map_err(|_| StateError::InvalidParameters {
      message: format!("unknown status '{value}'"),
    })?;
  if !status.is_final() {
    return Err(StateError::InvalidParameters {
      message: format!("status '{value}' is not a final status"),
    });
  }
  Ok(status)
}
