use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::json;
use statewright_context::ExecutionContext;
use statewright_graph::{ExecutionResponse, GraphError, ResponseData, State, StateError, StateInfo};
use statewright_store::{ContextElement, ContextElementType};

use super::fork::{aggregate_children, spawn_into};

/// Runs one child machine and completes with it.
///
/// Properties: `machine`, the child machine id. As a phase the child also
/// sees a PHASE element describing the phase.
pub struct SubWorkflowState {
  info: StateInfo,
  element_type: ContextElementType,
}

impl SubWorkflowState {
  pub fn new(info: StateInfo) -> Result<Self, GraphError> {
    Self::build(info, ContextElementType::Standard)
  }

  pub fn phase(info: StateInfo) -> Result<Self, GraphError> {
    Self::build(info, ContextElementType::Phase)
  }

  fn build(info: StateInfo, element_type: ContextElementType) -> Result<Self, GraphError> {
    if !info.properties.contains_key("machine") {
      return Err(GraphError::InvalidDefinition {
        message: format!("{} '{}' names no 'machine'", info.state_type, info.name),
      });
    }
    Ok(Self { info, element_type })
  }
}

#[async_trait]
impl State for SubWorkflowState {
  fn info(&self) -> &StateInfo {
    &self.info
  }

  async fn execute(&self, context: &ExecutionContext) -> Result<ExecutionResponse, StateError> {
    let machine = self.info.rendered_param(context, "machine")?.unwrap_or_default();

    let (notify_id, mut child) = if self.element_type == ContextElementType::Phase {
      let element = ContextElement::new(ContextElementType::Phase, self.info.name.clone())
        .with_param("phase_name", json!(self.info.name))
        .with_param("rollback", json!(self.info.rollback));
      spawn_into(context, &machine, element)
    } else {
      let notify_id = format!("notify-{}", uuid::Uuid::new_v4());
      let child = context.instance().spawn_child(machine.clone(), notify_id.clone());
      (notify_id, child)
    };
    if self.info.rollback {
      child.rollback_phase_name = Some(self.info.name.clone());
    }
    Ok(ExecutionResponse::async_wait(vec![notify_id]).with_spawned(vec![child]))
  }

  async fn handle_async_response(
    &self,
    _context: &ExecutionContext,
    responses: HashMap<String, ResponseData>,
  ) -> Result<ExecutionResponse, StateError> {
    Ok(aggregate_children(responses))
  }
}
