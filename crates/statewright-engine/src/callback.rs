use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use statewright_context::ExecutionContext;
use statewright_store::ExecutionStatus;
use tokio::sync::mpsc;

/// Invoked when a root instance reaches the end of its machine.
#[async_trait]
pub trait ExecutionCallback: Send + Sync {
  async fn on_complete(&self, context: &ExecutionContext, status: ExecutionStatus);
}

/// Final outcome of an execution as reported by [`ChannelCallback`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
  pub execution_id: String,
  pub instance_id: String,
  pub state_name: String,
  pub status: ExecutionStatus,
  pub context: serde_json::Value,
}

/// A callback that sends outcomes to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelCallback {
  sender: mpsc::UnboundedSender<ExecutionOutcome>,
}

impl ChannelCallback {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionOutcome>) -> Self {
    Self { sender }
  }
}

#[async_trait]
impl ExecutionCallback for ChannelCallback {
  async fn on_complete(&self, context: &ExecutionContext, status: ExecutionStatus) {
    let instance = context.instance();
    let _ = self.sender.send(ExecutionOutcome {
      execution_id: instance.execution_id.clone(),
      instance_id: instance.id.clone(),
      state_name: instance.state_name.clone(),
      status,
      context: context.as_json(),
    });
  }
}

/// Completion callbacks keyed by the id stored on instances.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
  callbacks: HashMap<String, Arc<dyn ExecutionCallback>>,
}

impl CallbackRegistry {
  pub fn insert(&mut self, id: impl Into<String>, callback: Arc<dyn ExecutionCallback>) {
    self.callbacks.insert(id.into(), callback);
  }

  pub fn get(&self, id: &str) -> Option<&Arc<dyn ExecutionCallback>> {
    self.callbacks.get(id)
  }
}
