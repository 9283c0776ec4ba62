use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use statewright_graph::ResponseData;
use statewright_store::Params;

/// A unit of work handed to an external worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegateTask {
  pub task_id: String,
  pub execution_id: String,
  pub instance_id: String,
  pub task_type: String,
  #[serde(default)]
  pub params: Params,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
  #[error("dispatcher unavailable: {0}")]
  Unavailable(String),

  #[error("task not found: {0}")]
  TaskNotFound(String),

  #[error("task failed: {0}")]
  Failed(String),
}

/// Hands work to external workers.
///
/// Completion of an async task is reported through the wait/notify
/// collaborator under the correlation id returned by `execute`.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
  /// Queue a task and return its correlation id.
  async fn execute(&self, task: DelegateTask) -> Result<String, DispatchError>;

  /// Run a task to completion.
  async fn execute_sync(&self, task: DelegateTask) -> Result<ResponseData, DispatchError>;

  async fn abort_task(&self, task_id: &str) -> Result<(), DispatchError>;

  async fn expire_task(&self, task_id: &str) -> Result<(), DispatchError>;
}
