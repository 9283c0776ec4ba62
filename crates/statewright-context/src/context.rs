use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use minijinja::value::{Enumerator, Object};
use minijinja::{Environment, UndefinedBehavior, Value};
use serde_json::json;
use statewright_config::ErrorStrategy;
use statewright_store::{
  ContextElement, ContextElementType, Params, StateExecutionData, StateExecutionInstance,
};

use crate::error::ContextError;
use crate::expression::{find_placeholders, normalize_name, split_top_level};
use crate::resolver::ResolverChain;
use crate::secrets::{LazySecrets, SecretResolver};
use crate::standard::WorkflowStandardParams;

const DEFAULT_MAX_DEPTH: usize = 10;
const CONTEXT_PREFIX: &str = "context";

/// Read model of one state attempt.
///
/// The expression map is built on first use and cached; everything else
/// reads straight from the instance snapshot the context was created with.
#[derive(Clone)]
pub struct ExecutionContext {
  instance: StateExecutionInstance,
  resolvers: ResolverChain,
  secrets: Option<Arc<dyn SecretResolver>>,
  max_depth: usize,
  base: OnceLock<Arc<BTreeMap<String, Value>>>,
}

impl ExecutionContext {
  pub fn new(instance: StateExecutionInstance) -> Self {
    Self {
      instance,
      resolvers: ResolverChain::new(),
      secrets: None,
      max_depth: DEFAULT_MAX_DEPTH,
      base: OnceLock::new(),
    }
  }

  pub fn with_resolvers(mut self, resolvers: ResolverChain) -> Self {
    self.resolvers = resolvers;
    self
  }

  pub fn with_secrets(mut self, secrets: Arc<dyn SecretResolver>) -> Self {
    self.secrets = Some(secrets);
    self
  }

  pub fn with_max_depth(mut self, max_depth: usize) -> Self {
    self.max_depth = max_depth;
    self
  }

  pub fn instance(&self) -> &StateExecutionInstance {
    &self.instance
  }

  pub fn execution_id(&self) -> &str {
    &self.instance.execution_id
  }

  pub fn state_name(&self) -> &str {
    &self.instance.state_name
  }

  pub fn display_name(&self) -> &str {
    &self.instance.display_name
  }

  pub fn state_type(&self) -> &str {
    &self.instance.state_type
  }

  pub fn is_retry(&self) -> bool {
    self.instance.retry
  }

  pub fn retry_count(&self) -> u32 {
    self.instance.retry_count
  }

  /// Replacement parameters installed by a retry or an advisor.
  pub fn state_params(&self) -> Option<&Params> {
    self.instance.state_params.as_ref()
  }

  /// Result data of the current attempt, if any was recorded yet.
  pub fn state_execution_data(&self) -> Option<&StateExecutionData> {
    self.instance.current_data()
  }

  /// Result data of another state of this execution, by display name.
  pub fn state_execution_data_of(&self, display_name: &str) -> Option<&StateExecutionData> {
    self.instance.state_execution_map.get(display_name)
  }

  /// Most recently pushed element of the given type.
  pub fn context_element(&self, element_type: ContextElementType) -> Option<&ContextElement> {
    self.instance.context_elements.find(element_type)
  }

  /// Most recently pushed element of the given type and name.
  pub fn context_element_named(
    &self,
    element_type: ContextElementType,
    name: &str,
  ) -> Option<&ContextElement> {
    self.instance.context_elements.find_named(element_type, name)
  }

  /// All elements of the given type in push order.
  pub fn context_elements(&self, element_type: ContextElementType) -> Vec<&ContextElement> {
    self.instance.context_elements.list(element_type)
  }

  /// Like [`context_element`](Self::context_element) but missing is an error.
  pub fn require_context_element(
    &self,
    element_type: ContextElementType,
  ) -> Result<&ContextElement, ContextError> {
    self
      .context_element(element_type)
      .ok_or(ContextError::MissingElement { element_type })
  }

  /// Error strategy of the workflow, from the STANDARD element.
  pub fn error_strategy(&self) -> ErrorStrategy {
    self
      .context_element(ContextElementType::Standard)
      .map(|e| WorkflowStandardParams::from_element(e).error_strategy)
      .unwrap_or_default()
  }

  /// Substitute every `${...}` placeholder. Placeholders that resolve to
  /// nothing are kept verbatim.
  pub fn render(&self, expression: &str) -> Result<String, ContextError> {
    self.render_at_depth(expression, 0)
  }

  /// Render and split on `,`, trimming each entry.
  pub fn render_list(&self, expression: &str) -> Result<Vec<String>, ContextError> {
    let rendered = self.render(expression)?;
    Ok(
      rendered
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect(),
    )
  }

  /// Evaluate an expression to a value.
  ///
  /// A single placeholder yields the placeholder's value; otherwise every
  /// placeholder is bound to a variable and the whole expression is
  /// evaluated, so `${build.count} > 3` yields a boolean.
  pub fn evaluate(&self, expression: &str) -> Result<serde_json::Value, ContextError> {
    let value = self.evaluate_at_depth(expression, 0)?;
    serde_json::to_value(&value).map_err(|e| ContextError::Expression {
      expression: expression.to_string(),
      message: e.to_string(),
    })
  }

  /// The expression map as JSON, for debugging and display.
  pub fn as_json(&self) -> serde_json::Value {
    let base = self.base();
    let map: serde_json::Map<String, serde_json::Value> = base
      .iter()
      .filter(|(key, _)| key.as_str() != "secrets")
      .map(|(key, value)| {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        (key.clone(), value)
      })
      .collect();
    serde_json::Value::Object(map)
  }

  fn base(&self) -> Arc<BTreeMap<String, Value>> {
    self
      .base
      .get_or_init(|| Arc::new(self.build_base()))
      .clone()
  }

  fn build_base(&self) -> BTreeMap<String, Value> {
    let mut map = BTreeMap::new();

    for (display_name, data) in &self.instance.state_execution_map {
      map.insert(
        normalize_name(display_name),
        Value::from_serialize(state_data_view(data)),
      );
    }

    let mut workflow = serde_json::Map::new();
    workflow.insert("execution_id".to_string(), json!(self.instance.execution_id));
    if let Some(name) = &self.instance.execution_name {
      workflow.insert("execution_name".to_string(), json!(name));
    }
    let mut outputs = serde_json::Map::new();

    // Oldest first so that later pushes win.
    for element in self.instance.context_elements.iter() {
      match element.element_type {
        ContextElementType::Standard => workflow.extend(element.params.clone()),
        ContextElementType::Output => {
          outputs.insert(
            element.name.clone(),
            serde_json::Value::Object(element.params.clone()),
          );
        }
        other => {
          map.insert(
            other.context_key().to_string(),
            Value::from_serialize(&element.params),
          );
        }
      }
    }

    map.insert("workflow".to_string(), Value::from_serialize(&workflow));
    map.insert(CONTEXT_PREFIX.to_string(), Value::from_serialize(&outputs));
    map.insert(
      "currentStep".to_string(),
      Value::from_serialize(json!({
        "name": self.instance.state_name,
        "display_name": self.instance.display_name,
        "type": self.instance.state_type,
        "retry_count": self.instance.retry_count,
      })),
    );
    if let Some(secrets) = &self.secrets {
      map.insert(
        "secrets".to_string(),
        Value::from_object(LazySecrets::new(secrets.clone())),
      );
    }

    map
  }

  fn render_at_depth(&self, expression: &str, depth: usize) -> Result<String, ContextError> {
    let placeholders = find_placeholders(expression);
    if placeholders.is_empty() {
      return Ok(expression.to_string());
    }

    let mut evaluation = Evaluation::new(self);
    let mut rendered = String::with_capacity(expression.len());
    let mut last = 0;

    for placeholder in &placeholders {
      rendered.push_str(&expression[last..placeholder.start]);
      let value = evaluation.resolve(placeholder.inner)?;
      if value.is_undefined() || value.is_none() {
        rendered.push_str(&expression[placeholder.start..placeholder.end]);
      } else if let Some(s) = value.as_str() {
        if s.contains("${") && depth < self.max_depth {
          rendered.push_str(&self.render_at_depth(s, depth + 1)?);
        } else {
          rendered.push_str(s);
        }
      } else {
        rendered.push_str(&value.to_string());
      }
      last = placeholder.end;
    }
    rendered.push_str(&expression[last..]);

    Ok(rendered)
  }

  fn evaluate_at_depth(&self, expression: &str, depth: usize) -> Result<Value, ContextError> {
    let trimmed = expression.trim();
    let placeholders = find_placeholders(trimmed);
    let mut evaluation = Evaluation::new(self);

    if placeholders.is_empty() {
      return evaluation.eval_raw(trimmed);
    }

    if placeholders.len() == 1 && placeholders[0].start == 0 && placeholders[0].end == trimmed.len() {
      let value = evaluation.resolve(placeholders[0].inner)?;
      return self.evaluate_nested(value, depth);
    }

    let mut rewritten = String::with_capacity(trimmed.len());
    let mut last = 0;
    for (n, placeholder) in placeholders.iter().enumerate() {
      let var = format!("__var_{n}");
      rewritten.push_str(&trimmed[last..placeholder.start]);
      rewritten.push_str(&var);
      last = placeholder.end;

      let value = evaluation.resolve(placeholder.inner)?;
      let value = self.evaluate_nested(value, depth)?;
      evaluation.bound.insert(var, value);
    }
    rewritten.push_str(&trimmed[last..]);

    evaluation.eval_raw(&rewritten)
  }

  fn evaluate_nested(&self, value: Value, depth: usize) -> Result<Value, ContextError> {
    let Some(s) = value.as_str() else {
      return Ok(value);
    };
    if !s.contains("${") || depth >= self.max_depth {
      return Ok(value);
    }
    let trimmed = s.trim();
    let placeholders = find_placeholders(trimmed);
    // A lone placeholder keeps its type; anything else is text.
    if placeholders.len() == 1 && placeholders[0].start == 0 && placeholders[0].end == trimmed.len() {
      self.evaluate_at_depth(trimmed, depth + 1)
    } else {
      Ok(Value::from(self.render_at_depth(s, depth + 1)?))
    }
  }
}

impl std::fmt::Debug for ExecutionContext {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ExecutionContext")
      .field("instance_id", &self.instance.id)
      .field("state_name", &self.instance.state_name)
      .field("resolvers", &self.resolvers)
      .finish_non_exhaustive()
  }
}

/// Per-call evaluation state: resolver values and placeholder bindings.
struct Evaluation<'a> {
  context: &'a ExecutionContext,
  env: Environment<'static>,
  base: Arc<BTreeMap<String, Value>>,
  bound: BTreeMap<String, Value>,
}

impl<'a> Evaluation<'a> {
  fn new(context: &'a ExecutionContext) -> Self {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Chainable);
    Self {
      context,
      env,
      base: context.base(),
      bound: BTreeMap::new(),
    }
  }

  fn contains(&self, name: &str) -> bool {
    self.bound.contains_key(name) || self.base.contains_key(name)
  }

  fn eval_raw(&self, expression: &str) -> Result<Value, ContextError> {
    let to_error = |e: minijinja::Error| ContextError::Expression {
      expression: expression.to_string(),
      message: e.to_string(),
    };
    let compiled = self.env.compile_expression(expression).map_err(to_error)?;
    let scope = Value::from_object(Scope {
      base: self.base.clone(),
      bound: self.bound.clone(),
    });
    compiled.eval(scope).map_err(to_error)
  }

  /// Resolve the body of one placeholder.
  fn resolve(&mut self, inner: &str) -> Result<Value, ContextError> {
    let (top, rest) = split_top_level(inner);
    let top = top.trim();
    let normalized = normalize_name(top);

    if self.contains(&normalized) {
      return self.eval_raw(&format!("{normalized}{rest}"));
    }

    let chain = self.context.resolvers.clone();
    for resolver in chain.iter() {
      if let Some(rewritten) = resolver.normalize(inner) {
        let prefix = resolver.prefix().to_string();
        if !self.bound.contains_key(&prefix) {
          let value = resolver.value(self.context);
          self.bound.insert(prefix, Value::from_serialize(&value));
        }
        return self.eval_raw(&rewritten);
      }
    }

    if !is_identifier(top) {
      return self.eval_raw(inner);
    }

    let prefixes = [
      normalize_name(&self.context.instance.display_name),
      CONTEXT_PREFIX.to_string(),
    ];
    for prefix in prefixes {
      if !self.contains(&prefix) {
        continue;
      }
      if let Ok(value) = self.eval_raw(&format!("{prefix}.{inner}")) {
        if !value.is_undefined() && !value.is_none() {
          return Ok(value);
        }
      }
    }

    tracing::debug!(expression = %inner, "expression did not resolve");
    Ok(Value::UNDEFINED)
  }
}

fn is_identifier(name: &str) -> bool {
  let mut chars = name.chars();
  matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
    && chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn state_data_view(data: &StateExecutionData) -> serde_json::Value {
  let mut view = match &data.output {
    serde_json::Value::Object(fields) => fields.clone(),
    serde_json::Value::Null => serde_json::Map::new(),
    other => {
      let mut fields = serde_json::Map::new();
      fields.insert("output".to_string(), other.clone());
      fields
    }
  };
  view.insert("status".to_string(), json!(data.status));
  view.insert("state_type".to_string(), json!(data.state_type));
  if let Some(error) = &data.error_msg {
    view.insert("error_msg".to_string(), json!(error));
  }
  serde_json::Value::Object(view)
}

/// Root object the expressions are evaluated against.
#[derive(Debug)]
struct Scope {
  base: Arc<BTreeMap<String, Value>>,
  bound: BTreeMap<String, Value>,
}

impl Object for Scope {
  fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
    let key = key.as_str()?;
    self.bound.get(key).or_else(|| self.base.get(key)).cloned()
  }

  fn enumerate(self: &Arc<Self>) -> Enumerator {
    let keys = self
      .bound
      .keys()
      .chain(self.base.keys())
      .map(|k| Value::from(k.as_str()))
      .collect();
    Enumerator::Values(keys)
  }
}
