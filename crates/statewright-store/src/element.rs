use serde::{Deserialize, Serialize};

/// Kind of value pushed onto an execution's context stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextElementType {
  /// Workflow-level parameters: runtime variables, error strategy.
  Standard,
  Service,
  Environment,
  Artifact,
  Instance,
  Phase,
  Fork,
  Param,
  /// Values published by a state for later states to read.
  Output,
}

impl ContextElementType {
  /// Key under which the element's params appear in the expression context.
  pub fn context_key(self) -> &'static str {
    match self {
      ContextElementType::Standard => "workflow",
      ContextElementType::Service => "service",
      ContextElementType::Environment => "env",
      ContextElementType::Artifact => "artifact",
      ContextElementType::Instance => "instance",
      ContextElementType::Phase => "phase",
      ContextElementType::Fork => "fork",
      ContextElementType::Param => "param",
      ContextElementType::Output => "context",
    }
  }
}

/// A typed, named value consumed by expression evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextElement {
  pub element_type: ContextElementType,
  pub name: String,
  #[serde(default)]
  pub params: serde_json::Map<String, serde_json::Value>,
}

impl ContextElement {
  pub fn new(element_type: ContextElementType, name: impl Into<String>) -> Self {
    Self {
      element_type,
      name: name.into(),
      params: serde_json::Map::new(),
    }
  }

  pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
    self.params.insert(key.into(), value);
    self
  }

  pub fn with_params(mut self, params: serde_json::Map<String, serde_json::Value>) -> Self {
    self.params.extend(params);
    self
  }
}

/// Ordered stack of context elements, stored in push order.
///
/// Lookups by type walk from the most recent push; listing by type keeps
/// push order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextStack(Vec<ContextElement>);

impl ContextStack {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, element: ContextElement) {
    self.0.push(element);
  }

  pub fn pop(&mut self) -> Option<ContextElement> {
    self.0.pop()
  }

  pub fn peek(&self) -> Option<&ContextElement> {
    self.0.last()
  }

  /// Most recently pushed element of the given type.
  pub fn find(&self, element_type: ContextElementType) -> Option<&ContextElement> {
    self.0.iter().rev().find(|e| e.element_type == element_type)
  }

  /// Most recently pushed element of the given type and name.
  pub fn find_named(&self, element_type: ContextElementType, name: &str) -> Option<&ContextElement> {
    self
      .0
      .iter()
      .rev()
      .find(|e| e.element_type == element_type && e.name == name)
  }

  /// All elements of the given type in push order.
  pub fn list(&self, element_type: ContextElementType) -> Vec<&ContextElement> {
    self
      .0
      .iter()
      .filter(|e| e.element_type == element_type)
      .collect()
  }

  /// Iterate in push order (oldest first).
  pub fn iter(&self) -> impl Iterator<Item = &ContextElement> {
    self.0.iter()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl FromIterator<ContextElement> for ContextStack {
  fn from_iter<I: IntoIterator<Item = ContextElement>>(iter: I) -> Self {
    Self(iter.into_iter().collect())
  }
}
