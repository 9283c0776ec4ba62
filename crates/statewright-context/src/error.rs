use statewright_store::ContextElementType;

/// Errors raised while evaluating expressions or reading the context.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
  /// An expression failed to compile or evaluate.
  #[error("failed to evaluate '{expression}': {message}")]
  Expression { expression: String, message: String },

  /// A required context element is missing.
  #[error("missing context element: {element_type:?}")]
  MissingElement { element_type: ContextElementType },
}
