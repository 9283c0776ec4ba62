//! Executor error types.

use statewright_context::ContextError;
use statewright_graph::GraphError;
use statewright_store::{ExecutionStatus, StoreError};

use crate::dispatcher::DispatchError;
use crate::wait_notify::NotifyError;

/// Errors surfaced by the executor.
///
/// Step failures never show up here: they are recorded on the execution
/// record and drive the transition graph instead.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Context(#[from] ContextError),

  #[error(transparent)]
  Notify(#[from] NotifyError),

  #[error(transparent)]
  Dispatch(#[from] DispatchError),

  /// No state machine registered under this id.
  #[error("unknown state machine: {0}")]
  UnknownMachine(String),

  /// An advisor asked for something the executor cannot do.
  #[error("invalid advice for instance {instance_id}: {message}")]
  InvalidAdvice { instance_id: String, message: String },

  /// An interrupt is malformed or not applicable.
  #[error("invalid interrupt: {message}")]
  InvalidInterrupt { message: String },

  /// Retry was requested for an instance that is not failed or waiting.
  #[error("cannot retry instance {instance_id} in status {status}")]
  RetryFailed {
    instance_id: String,
    status: ExecutionStatus,
  },

  /// An async result arrived for an instance that never left startup.
  #[error("instance {instance_id} did not start in time to accept its async response")]
  ResumeTimedOut { instance_id: String },
}
