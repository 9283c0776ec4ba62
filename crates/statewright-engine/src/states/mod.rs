//! Built-in state types.

mod approval;
mod barrier;
mod command;
mod fork;
mod noop;
mod sub_workflow;

use std::sync::Arc;

use statewright_context::ExecutionContext;
use statewright_graph::{State, StateError, StateInfo, StateRegistry, StateTypeMetadata};

pub use approval::{ApprovalState, approval_correlation_id};
pub use barrier::BarrierState;
pub use command::CommandState;
pub use fork::ForkState;
pub use noop::NoopState;
pub use sub_workflow::SubWorkflowState;

use crate::dispatcher::TaskDispatcher;

/// A registry holding every built-in state type.
///
/// | type           | behavior                                               |
/// |----------------|--------------------------------------------------------|
/// | `noop`         | publishes rendered outputs, finishes with a set status |
/// | `command`      | runs a command on an external worker                   |
/// | `approval`     | pauses until an approval signal arrives                |
/// | `fork`         | runs several child machines in parallel                |
/// | `sub_workflow` | runs one child machine                                 |
/// | `phase`        | runs one child machine as a deployment phase           |
/// | `barrier`      | fails unless the listed states succeeded               |
pub fn builtin_registry(dispatcher: Arc<dyn TaskDispatcher>) -> StateRegistry {
  let mut registry = StateRegistry::new();
  registry.register("noop", StateTypeMetadata::any(), |info| {
    Ok(Arc::new(NoopState::new(info)) as Arc<dyn State>)
  });
  registry.register(
    "command",
    StateTypeMetadata::any().on_infrastructure(&["local", "ssh", "container"]),
    move |info| Ok(Arc::new(CommandState::new(info, dispatcher.clone())) as Arc<dyn State>),
  );
  registry.register("approval", StateTypeMetadata::any(), |info| {
    Ok(Arc::new(ApprovalState::new(info)) as Arc<dyn State>)
  });
  registry.register("fork", StateTypeMetadata::any(), |info| {
    Ok(Arc::new(ForkState::new(info)?) as Arc<dyn State>)
  });
  registry.register("sub_workflow", StateTypeMetadata::any(), |info| {
    Ok(Arc::new(SubWorkflowState::new(info)?) as Arc<dyn State>)
  });
  registry.register("phase", StateTypeMetadata::any(), |info| {
    Ok(Arc::new(SubWorkflowState::phase(info)?) as Arc<dyn State>)
  });
  registry.register("barrier", StateTypeMetadata::any(), |info| {
    Ok(Arc::new(BarrierState::new(info)) as Arc<dyn State>)
  });
  registry
}

/// A list-valued property: an array of templates or one comma-separated template.
pub(crate) fn list_param(info: &StateInfo, context: &ExecutionContext, key: &str) -> Result<Vec<String>, StateError> {
  match info.param(context, key) {
    None | Some(serde_json::Value::Null) => Ok(Vec::new()),
    Some(serde_json::Value::String(template)) => Ok(context.render_list(template)?),
    Some(serde_json::Value::Array(items)) => items
      .iter()
      .map(|item| match item {
        serde_json::Value::String(template) => Ok(context.render(template)?),
        other => Ok(other.to_string()),
      })
      .collect(),
    Some(other) => Err(StateError::InvalidParameters {
      message: format!("'{key}' must be a list, got {other}"),
    }),
  }
}
