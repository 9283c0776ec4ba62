use thiserror::Error;

/// Errors raised while building or navigating a state machine.
#[derive(Debug, Error)]
pub enum GraphError {
  #[error("unknown child state machine: {0}")]
  UnknownChildMachine(String),

  #[error("state not found: {0}")]
  StateNotFound(String),

  #[error("transition references unknown state: from={from}, to={to}")]
  InvalidTransition { from: String, to: String },

  #[error("duplicate state: {0}")]
  DuplicateState(String),

  #[error("unknown state type: {0}")]
  UnknownStateType(String),

  #[error("state type '{state_type}' is not allowed in '{category}' phases")]
  StateNotAllowed { state_type: String, category: String },

  #[error("invalid state machine: {message}")]
  InvalidDefinition { message: String },
}

/// Failure raised by a state implementation while executing.
#[derive(Debug, Error)]
pub enum StateError {
  #[error("invalid state parameters: {message}")]
  InvalidParameters { message: String },

  #[error(transparent)]
  Context(#[from] statewright_context::ContextError),

  #[error("{message}")]
  Execution { message: String },
}

impl StateError {
  pub fn execution(message: impl Into<String>) -> Self {
    StateError::Execution {
      message: message.into(),
    }
  }
}
