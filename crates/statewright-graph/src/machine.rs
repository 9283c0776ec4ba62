use std::collections::HashMap;
use std::sync::Arc;

use statewright_config::{ErrorStrategy, StateMachineDef, TransitionType};

use crate::error::GraphError;
use crate::registry::StateRegistry;
use crate::state::State;

/// A validated, typed edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
  pub from: String,
  pub to: String,
  pub transition_type: TransitionType,
}

/// An executable state machine.
///
/// The root machine owns every descendant child machine, flattened by id,
/// so `(child_machine_id, state_name)` pairs resolve from the root.
pub struct StateMachine {
  id: String,
  name: String,
  initial_state: String,
  error_strategy: ErrorStrategy,
  phase_category: Option<String>,
  states: HashMap<String, Arc<dyn State>>,
  transitions: Vec<Transition>,
  /// (state, edge type) -> next state.
  edges: HashMap<(String, TransitionType), String>,
  children: HashMap<String, StateMachine>,
}

impl StateMachine {
  /// Build and validate a machine and all of its child machines.
  pub fn build(def: &StateMachineDef, registry: &StateRegistry) -> Result<Self, GraphError> {
    let mut children = HashMap::new();
    let mut root = Self::build_one(def, registry, &mut children)?;
    if children.contains_key(&root.id) {
      return Err(GraphError::InvalidDefinition {
        message: format!("child machine reuses the root id '{}'", root.id),
      });
    }
    root.children = children;
    Ok(root)
  }

  fn build_one(
    def: &StateMachineDef,
    registry: &StateRegistry,
    descendants: &mut HashMap<String, StateMachine>,
  ) -> Result<Self, GraphError> {
    let mut states: HashMap<String, Arc<dyn State>> = HashMap::new();
    for state_def in &def.states {
      if states.contains_key(&state_def.name) {
        return Err(GraphError::DuplicateState(state_def.name.clone()));
      }
      if let Some(category) = &def.phase_category {
        let allowed = registry
          .metadata(&state_def.state_type)
          .is_none_or(|m| m.allows_phase(category));
        if !allowed {
          return Err(GraphError::StateNotAllowed {
            state_type: state_def.state_type.clone(),
            category: category.clone(),
          });
        }
      }
      states.insert(state_def.name.clone(), registry.create(state_def)?);
    }

    if !states.contains_key(&def.initial_state) {
      return Err(GraphError::InvalidDefinition {
        message: format!(
          "initial state '{}' of machine '{}' does not exist",
          def.initial_state, def.machine_id
        ),
      });
    }

    let mut transitions = Vec::with_capacity(def.transitions.len());
    let mut edges = HashMap::new();
    for t in &def.transitions {
      if !states.contains_key(&t.from) || !states.contains_key(&t.to) {
        return Err(GraphError::InvalidTransition {
          from: t.from.clone(),
          to: t.to.clone(),
        });
      }
      if edges
        .insert((t.from.clone(), t.transition_type), t.to.clone())
        .is_some()
      {
        return Err(GraphError::InvalidDefinition {
          message: format!("state '{}' has more than one {:?} transition", t.from, t.transition_type),
        });
      }
      transitions.push(Transition {
        from: t.from.clone(),
        to: t.to.clone(),
        transition_type: t.transition_type,
      });
    }

    for child_def in &def.child_machines {
      let child = Self::build_one(child_def, registry, descendants)?;
      if descendants.insert(child.id.clone(), child).is_some() {
        return Err(GraphError::InvalidDefinition {
          message: format!("duplicate child machine '{}'", child_def.machine_id),
        });
      }
    }

    Ok(Self {
      id: def.machine_id.clone(),
      name: def.name.clone(),
      initial_state: def.initial_state.clone(),
      error_strategy: def.error_strategy,
      phase_category: def.phase_category.clone(),
      states,
      transitions,
      edges,
      children: HashMap::new(),
    })
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn initial_state_name(&self) -> &str {
    &self.initial_state
  }

  pub fn error_strategy(&self) -> ErrorStrategy {
    self.error_strategy
  }

  pub fn phase_category(&self) -> Option<&str> {
    self.phase_category.as_deref()
  }

  pub fn transitions(&self) -> &[Transition] {
    &self.transitions
  }

  /// Child machine by id, at any depth.
  pub fn child_machine(&self, machine_id: &str) -> Option<&StateMachine> {
    self.children.get(machine_id)
  }

  /// The machine addressed by `child_machine_id`; `None` is the root itself.
  pub fn machine(&self, child_machine_id: Option<&str>) -> Result<&StateMachine, GraphError> {
    match child_machine_id {
      None => Ok(self),
      Some(id) if id == self.id => Ok(self),
      Some(id) => self
        .children
        .get(id)
        .ok_or_else(|| GraphError::UnknownChildMachine(id.to_string())),
    }
  }

  /// Resolve a state of the addressed machine.
  pub fn get_state(&self, child_machine_id: Option<&str>, state_name: &str) -> Result<Arc<dyn State>, GraphError> {
    self
      .machine(child_machine_id)?
      .states
      .get(state_name)
      .cloned()
      .ok_or_else(|| GraphError::StateNotFound(state_name.to_string()))
  }

  /// The initial state of the addressed machine.
  pub fn initial_state(&self, child_machine_id: Option<&str>) -> Result<Arc<dyn State>, GraphError> {
    let machine = self.machine(child_machine_id)?;
    machine.get_state(None, &machine.initial_state)
  }

  /// Next state along an edge, `None` when the state has no such edge.
  pub fn next_state(
    &self,
    child_machine_id: Option<&str>,
    state_name: &str,
    transition_type: TransitionType,
  ) -> Result<Option<Arc<dyn State>>, GraphError> {
    let machine = self.machine(child_machine_id)?;
    match machine.edges.get(&(state_name.to_string(), transition_type)) {
      Some(next) => machine.get_state(None, next).map(Some),
      None => Ok(None),
    }
  }

  pub fn success_transition(
    &self,
    child_machine_id: Option<&str>,
    state_name: &str,
  ) -> Result<Option<Arc<dyn State>>, GraphError> {
    self.next_state(child_machine_id, state_name, TransitionType::Success)
  }

  pub fn failure_transition(
    &self,
    child_machine_id: Option<&str>,
    state_name: &str,
  ) -> Result<Option<Arc<dyn State>>, GraphError> {
    self.next_state(child_machine_id, state_name, TransitionType::Failure)
  }
}

impl std::fmt::Debug for StateMachine {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StateMachine")
      .field("id", &self.id)
      .field("initial_state", &self.initial_state)
      .field("states", &self.states.keys().collect::<Vec<_>>())
      .field("children", &self.children.keys().collect::<Vec<_>>())
      .finish()
  }
}
