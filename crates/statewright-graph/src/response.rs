use serde::{Deserialize, Serialize};
use statewright_store::{
  ContextElement, ExecutionStatus, Params, RiskLevel, StateExecutionInstance,
};

/// Classification of a failure, consulted by advisors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
  Application,
  Verification,
  Expired,
  Connectivity,
  Authentication,
  Authorization,
}

/// Payload delivered for one correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseData {
  /// Completion of a delegate task.
  Task {
    status: ExecutionStatus,
    #[serde(default)]
    output: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
  },
  /// Completion of a spawned child instance.
  Child {
    status: ExecutionStatus,
    #[serde(default)]
    elements: Vec<ContextElement>,
  },
  /// An external signal, such as an approval or a resume.
  Signal {
    #[serde(default)]
    params: Params,
  },
  /// An elapsed delay.
  Delay,
  /// Failure reported in place of a result.
  Error { message: String },
}

impl ResponseData {
  pub fn status(&self) -> Option<ExecutionStatus> {
    match self {
      ResponseData::Task { status, .. } | ResponseData::Child { status, .. } => Some(*status),
      ResponseData::Error { .. } => Some(ExecutionStatus::Error),
      ResponseData::Signal { .. } | ResponseData::Delay => None,
    }
  }

  pub fn is_error(&self) -> bool {
    matches!(self, ResponseData::Error { .. })
  }

  pub fn error_message(&self) -> Option<&str> {
    match self {
      ResponseData::Task { error, .. } => error.as_deref(),
      ResponseData::Error { message } => Some(message),
      _ => None,
    }
  }
}

/// Result of executing a state, or of handling its async completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResponse {
  pub status: ExecutionStatus,
  /// Awaiting external completion of `correlation_ids`.
  pub is_async: bool,
  pub correlation_ids: Vec<String>,
  pub error_message: Option<String>,
  /// Merged into the attempt's result data.
  pub output: Option<serde_json::Value>,
  pub risk_level: Option<RiskLevel>,
  /// Pushed onto the instance's context stack.
  pub context_elements: Vec<ContextElement>,
  /// Forwarded to the parent when this instance completes.
  pub notify_elements: Vec<ContextElement>,
  pub delegate_task_id: Option<String>,
  /// Child instances to trigger (fan-out).
  pub spawned_instances: Vec<StateExecutionInstance>,
  pub failure_types: Vec<FailureType>,
}

impl ExecutionResponse {
  /// A synchronous result with the given status.
  pub fn sync(status: ExecutionStatus) -> Self {
    Self {
      status,
      is_async: false,
      correlation_ids: Vec::new(),
      error_message: None,
      output: None,
      risk_level: None,
      context_elements: Vec::new(),
      notify_elements: Vec::new(),
      delegate_task_id: None,
      spawned_instances: Vec::new(),
      failure_types: Vec::new(),
    }
  }

  pub fn success() -> Self {
    Self::sync(ExecutionStatus::Success)
  }

  pub fn failed(message: impl Into<String>) -> Self {
    Self::sync(ExecutionStatus::Failed).with_error(message)
  }

  /// Wait for all `correlation_ids` to resolve.
  pub fn async_wait(correlation_ids: Vec<String>) -> Self {
    let mut response = Self::sync(ExecutionStatus::Running);
    response.is_async = true;
    response.correlation_ids = correlation_ids;
    response
  }

  /// Park the instance as PAUSED while waiting.
  pub fn paused(mut self) -> Self {
    self.status = ExecutionStatus::Paused;
    self
  }

  pub fn with_error(mut self, message: impl Into<String>) -> Self {
    self.error_message = Some(message.into());
    self
  }

  pub fn with_output(mut self, output: serde_json::Value) -> Self {
    self.output = Some(output);
    self
  }

  pub fn with_risk_level(mut self, risk_level: RiskLevel) -> Self {
    self.risk_level = Some(risk_level);
    self
  }

  pub fn with_context_element(mut self, element: ContextElement) -> Self {
    self.context_elements.push(element);
    self
  }

  pub fn with_notify_element(mut self, element: ContextElement) -> Self {
    self.notify_elements.push(element);
    self
  }

  pub fn with_delegate_task(mut self, task_id: impl Into<String>) -> Self {
    self.delegate_task_id = Some(task_id.into());
    self
  }

  pub fn with_spawned(mut self, instances: Vec<StateExecutionInstance>) -> Self {
    self.spawned_instances = instances;
    self
  }

  pub fn with_failure_type(mut self, failure_type: FailureType) -> Self {
    self.failure_types.push(failure_type);
    self
  }
}
