use serde::{Deserialize, Serialize};
use statewright_config::ErrorStrategy;
use statewright_store::{ContextElement, ContextElementType, Params};

/// Workflow-level parameters carried as the STANDARD context element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStandardParams {
  #[serde(default)]
  pub error_strategy: ErrorStrategy,
  /// Runtime variables, readable as `workflow.variables.<name>`.
  #[serde(default)]
  pub variables: Params,
}

impl WorkflowStandardParams {
  pub fn new(error_strategy: ErrorStrategy) -> Self {
    Self {
      error_strategy,
      variables: Params::new(),
    }
  }

  pub fn with_variables(mut self, variables: Params) -> Self {
    self.variables = variables;
    self
  }

  pub fn from_element(element: &ContextElement) -> Self {
    serde_json::from_value(serde_json::Value::Object(element.params.clone())).unwrap_or_default()
  }

  pub fn into_element(self) -> ContextElement {
    let params = match serde_json::to_value(self) {
      Ok(serde_json::Value::Object(params)) => params,
      _ => Params::new(),
    };
    ContextElement::new(ContextElementType::Standard, "workflow").with_params(params)
  }
}
