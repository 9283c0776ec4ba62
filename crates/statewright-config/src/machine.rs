use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::edge::TransitionDef;
use crate::enums::ErrorStrategy;
use crate::error::ConfigError;

/// A state machine definition as authored.
///
/// Child machines nest recursively and are addressed by `machine_id` from
/// states that spawn them (phases, sub-workflows, forks).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMachineDef {
  pub machine_id: String,
  pub name: String,
  pub initial_state: String,
  #[serde(default)]
  pub error_strategy: ErrorStrategy,
  /// Phase category this machine represents when used as a child.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub phase_category: Option<String>,
  pub states: Vec<StateDef>,
  #[serde(default)]
  pub transitions: Vec<TransitionDef>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub child_machines: Vec<StateMachineDef>,
}

impl StateMachineDef {
  /// Parse a definition from a JSON string.
  pub fn from_json(json: &str) -> Result<Self, ConfigError> {
    Ok(serde_json::from_str(json)?)
  }

  /// Read and parse a definition file.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json(&json)
  }
}

/// A single state (graph node) definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDef {
  pub name: String,
  /// Type tag resolved through the step-type registry.
  #[serde(rename = "type")]
  pub state_type: String,
  /// Seconds to wait before the state starts executing.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub wait_interval_secs: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
  #[serde(default)]
  pub rollback: bool,
  #[serde(default)]
  pub properties: serde_json::Map<String, serde_json::Value>,
}

impl StateDef {
  pub fn new(name: impl Into<String>, state_type: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      state_type: state_type.into(),
      wait_interval_secs: None,
      timeout_ms: None,
      rollback: false,
      properties: serde_json::Map::new(),
    }
  }

  pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
    self.properties.insert(key.into(), value);
    self
  }
}
