use std::sync::Arc;

use statewright_store::ContextElementType;

use crate::context::ExecutionContext;

/// A named fallback for top-level identifiers missing from the context map.
///
/// Resolvers are tried in registration order. The first one whose
/// [`normalize`](ExpressionResolver::normalize) returns a rewritten
/// expression wins, and its [`value`](ExpressionResolver::value) is bound
/// under [`prefix`](ExpressionResolver::prefix) for that evaluation only.
pub trait ExpressionResolver: Send + Sync {
  /// Name the resolver's value is bound under.
  fn prefix(&self) -> &str;

  /// Rewrite `expression` to address this resolver, or `None` for no match.
  fn normalize(&self, expression: &str) -> Option<String>;

  /// Value bound under the prefix. Computed at most once per evaluation.
  fn value(&self, context: &ExecutionContext) -> serde_json::Value;
}

/// Ordered list of resolvers, shared by all contexts of an engine.
#[derive(Clone, Default)]
pub struct ResolverChain {
  resolvers: Vec<Arc<dyn ExpressionResolver>>,
}

impl ResolverChain {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, resolver: Arc<dyn ExpressionResolver>) -> Self {
    self.resolvers.push(resolver);
    self
  }

  pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ExpressionResolver>> {
    self.resolvers.iter()
  }

  pub fn len(&self) -> usize {
    self.resolvers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.resolvers.is_empty()
  }
}

impl std::fmt::Debug for ResolverChain {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_list()
      .entries(self.resolvers.iter().map(|r| r.prefix().to_string()))
      .finish()
  }
}

/// Exposes every element of one type as a list, e.g. `${instances[0].host}`.
#[derive(Debug, Clone)]
pub struct ElementListResolver {
  prefix: String,
  element_type: ContextElementType,
}

impl ElementListResolver {
  pub fn new(prefix: impl Into<String>, element_type: ContextElementType) -> Self {
    Self {
      prefix: prefix.into(),
      element_type,
    }
  }
}

impl ExpressionResolver for ElementListResolver {
  fn prefix(&self) -> &str {
    &self.prefix
  }

  fn normalize(&self, expression: &str) -> Option<String> {
    let rest = expression.strip_prefix(self.prefix.as_str())?;
    if rest.is_empty() || rest.starts_with('.') || rest.starts_with('[') || rest.starts_with('|') {
      Some(expression.to_string())
    } else {
      None
    }
  }

  fn value(&self, context: &ExecutionContext) -> serde_json::Value {
    let elements = context
      .context_elements(self.element_type)
      .into_iter()
      .map(|element| {
        let mut params = element.params.clone();
        params
          .entry("name".to_string())
          .or_insert_with(|| serde_json::Value::String(element.name.clone()));
        serde_json::Value::Object(params)
      })
      .collect();
    serde_json::Value::Array(elements)
  }
}
