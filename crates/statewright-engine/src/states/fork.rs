use std::collections::HashMap;

use async_trait::async_trait;
use statewright_context::ExecutionContext;
use statewright_graph::{ExecutionResponse, FailureType, GraphError, ResponseData, State, StateError, StateInfo};
use statewright_store::{ContextElement, ContextElementType, ExecutionStatus, StateExecutionInstance};

use super::list_param;

/// Runs several child machines in parallel.
///
/// Properties: `forks`, the child machine ids. Each child sees a FORK
/// element naming its branch.
pub struct ForkState {
  info: StateInfo,
}

impl ForkState {
  pub fn new(info: StateInfo) -> Result<Self, GraphError> {
    if !info.properties.contains_key("forks") {
      return Err(GraphError::InvalidDefinition {
        message: format!("fork '{}' lists no 'forks'", info.name),
      });
    }
    Ok(Self { info })
  }
}

#[async_trait]
impl State for ForkState {
  fn info(&self) -> &StateInfo {
    &self.info
  }

  async fn execute(&self, context: &ExecutionContext) -> Result<ExecutionResponse, StateError> {
    let branches = list_param(&self.info, context, "forks")?;
    if branches.is_empty() {
      return Ok(ExecutionResponse::success());
    }

    let mut notify_ids = Vec::with_capacity(branches.len());
    let mut children = Vec::with_capacity(branches.len());
    for branch in branches {
      let element = ContextElement::new(ContextElementType::Fork, branch.clone())
        .with_param("parent", serde_json::Value::String(self.info.name.clone()));
      let (notify_id, child) = spawn_into(context, &branch, element);
      notify_ids.push(notify_id);
      children.push(child);
    }
    Ok(ExecutionResponse::async_wait(notify_ids).with_spawned(children))
  }

  async fn handle_async_response(
    &self,
    _context: &ExecutionContext,
    responses: HashMap<String, ResponseData>,
  ) -> Result<ExecutionResponse, StateError> {
    Ok(aggregate_children(responses))
  }
}

/// A NEW child of the current instance bound to `machine_id`, with the
/// correlation id it reports completion on.
pub(crate) fn spawn_into(
  context: &ExecutionContext,
  machine_id: &str,
  element: ContextElement,
) -> (String, StateExecutionInstance) {
  let notify_id = format!("notify-{}", uuid::Uuid::new_v4());
  let mut child = context.instance().spawn_child(machine_id, notify_id.clone());
  child.context_elements.push(element);
  (notify_id, child)
}

/// Combine child completions: any failure fails, otherwise any abort
/// aborts. Elements the children published are passed on.
pub(crate) fn aggregate_children(responses: HashMap<String, ResponseData>) -> ExecutionResponse {
  let mut ids: Vec<&String> = responses.keys().collect();
  ids.sort();

  let total = ids.len();
  let mut failed = 0;
  let mut discontinued = None;
  let mut elements = Vec::new();
  for id in ids {
    let response = &responses[id];
    if let ResponseData::Child { elements: published, .. } = response {
      elements.extend(published.iter().cloned());
    }
    match response.status() {
      Some(status) if status.is_broke() => failed += 1,
      Some(status) if status.is_discontinued() => discontinued = discontinued.or(Some(status)),
      _ => {}
    }
  }

  let mut response = if failed > 0 {
    ExecutionResponse::failed(format!("{failed} of {total} children failed"))
      .with_failure_type(FailureType::Application)
  } else if let Some(status) = discontinued {
    ExecutionResponse::sync(status)
  } else {
    ExecutionResponse::sync(ExecutionStatus::Success)
  };
  for element in elements {
    response = response
      .with_context_element(element.clone())
      .with_notify_element(element);
  }
  response
}
