use std::collections::HashMap;
use std::sync::Arc;

use statewright_config::StateDef;

use crate::error::GraphError;
use crate::state::{State, StateInfo};

type StateFactory = dyn Fn(StateInfo) -> Result<Arc<dyn State>, GraphError> + Send + Sync;

/// What the registry knows about a step type besides how to build it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateTypeMetadata {
  /// Phase categories the type may appear under. Empty allows any.
  pub phase_categories: Vec<String>,
  /// Infrastructure targets the type supports. Empty supports any.
  pub infrastructure: Vec<String>,
}

impl StateTypeMetadata {
  pub fn any() -> Self {
    Self::default()
  }

  pub fn in_phases(mut self, categories: &[&str]) -> Self {
    self.phase_categories = categories.iter().map(|c| c.to_string()).collect();
    self
  }

  pub fn on_infrastructure(mut self, targets: &[&str]) -> Self {
    self.infrastructure = targets.iter().map(|t| t.to_string()).collect();
    self
  }

  pub fn allows_phase(&self, category: &str) -> bool {
    self.phase_categories.is_empty() || self.phase_categories.iter().any(|c| c == category)
  }

  pub fn supports(&self, infrastructure: &str) -> bool {
    self.infrastructure.is_empty() || self.infrastructure.iter().any(|t| t == infrastructure)
  }
}

struct Registration {
  metadata: StateTypeMetadata,
  factory: Arc<StateFactory>,
}

/// Maps a type tag to a concrete [`State`] builder plus metadata.
///
/// Consulted only while building a [`StateMachine`](crate::StateMachine).
#[derive(Default)]
pub struct StateRegistry {
  types: HashMap<String, Registration>,
}

impl StateRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register (or replace) a step type.
  pub fn register<F>(&mut self, state_type: impl Into<String>, metadata: StateTypeMetadata, factory: F)
  where
    F: Fn(StateInfo) -> Result<Arc<dyn State>, GraphError> + Send + Sync + 'static,
  {
    self.types.insert(
      state_type.into(),
      Registration {
        metadata,
        factory: Arc::new(factory),
      },
    );
  }

  pub fn metadata(&self, state_type: &str) -> Option<&StateTypeMetadata> {
    self.types.get(state_type).map(|r| &r.metadata)
  }

  pub fn contains(&self, state_type: &str) -> bool {
    self.types.contains_key(state_type)
  }

  /// Registered type tags, sorted.
  pub fn state_types(&self) -> Vec<&str> {
    let mut types: Vec<_> = self.types.keys().map(|k| k.as_str()).collect();
    types.sort_unstable();
    types
  }

  /// Build the state described by `def`.
  pub fn create(&self, def: &StateDef) -> Result<Arc<dyn State>, GraphError> {
    let registration = self
      .types
      .get(&def.state_type)
      .ok_or_else(|| GraphError::UnknownStateType(def.state_type.clone()))?;
    (registration.factory)(StateInfo::from_def(def))
  }
}

impl std::fmt::Debug for StateRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StateRegistry")
      .field("types", &self.state_types())
      .finish()
  }
}
