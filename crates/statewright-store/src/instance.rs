use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::element::{ContextElement, ContextStack};
use crate::interrupt::InterruptEffect;
use crate::status::ExecutionStatus;

pub type Params = serde_json::Map<String, serde_json::Value>;

/// Risk assessment attached to a state's result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
  /// No assessment available.
  #[default]
  Na,
  Low,
  Medium,
  High,
}

impl RiskLevel {
  /// Highest populated level, or `Na` when nothing was assessed.
  pub fn highest(levels: impl IntoIterator<Item = RiskLevel>) -> RiskLevel {
    levels.into_iter().max().unwrap_or_default()
  }
}

/// Result data of one state attempt, keyed by display name on the instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateExecutionData {
  pub state_name: String,
  pub state_type: String,
  pub status: ExecutionStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error_msg: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub start_ts: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub end_ts: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub wait_interval_secs: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub element: Option<ContextElement>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub state_params: Option<Params>,
  #[serde(default)]
  pub risk_level: RiskLevel,
  /// State-specific output, readable from expressions as `<display_name>.<key>`.
  #[serde(default)]
  pub output: serde_json::Value,
}

impl StateExecutionData {
  pub fn new(state_name: impl Into<String>, state_type: impl Into<String>) -> Self {
    Self {
      state_name: state_name.into(),
      state_type: state_type.into(),
      status: ExecutionStatus::New,
      error_msg: None,
      start_ts: None,
      end_ts: None,
      wait_interval_secs: None,
      element: None,
      state_params: None,
      risk_level: RiskLevel::Na,
      output: serde_json::Value::Null,
    }
  }

  pub fn with_output(mut self, output: serde_json::Value) -> Self {
    self.output = output;
    self
  }
}

/// The durable record of one attempt to execute one state within one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateExecutionInstance {
  pub id: String,
  pub execution_id: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub execution_name: Option<String>,

  // Binding
  pub state_machine_id: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub child_state_machine_id: Option<String>,
  pub state_name: String,
  pub display_name: String,
  pub state_type: String,
  #[serde(default)]
  pub rollback: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub rollback_phase_name: Option<String>,

  // Lineage
  #[serde(skip_serializing_if = "Option::is_none")]
  pub parent_instance_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub prev_instance_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub next_instance_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub clone_instance_id: Option<String>,

  pub status: ExecutionStatus,
  #[serde(default)]
  pub context_elements: ContextStack,
  #[serde(default)]
  pub state_execution_map: BTreeMap<String, StateExecutionData>,
  #[serde(default)]
  pub state_execution_data_history: Vec<StateExecutionData>,
  #[serde(default)]
  pub interrupt_history: Vec<InterruptEffect>,
  #[serde(default)]
  pub dedicated_interrupt_count: u32,

  /// Correlation id completed when this instance finishes (spawned children).
  #[serde(skip_serializing_if = "Option::is_none")]
  pub notify_id: Option<String>,
  #[serde(default)]
  pub notify_elements: Vec<ContextElement>,
  /// External task this instance is waiting on.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub delegate_task_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub state_params: Option<Params>,

  /// Registered advisor ids consulted for this instance.
  #[serde(default)]
  pub advisors: Vec<String>,
  /// Registered completion callback id (root instances).
  #[serde(skip_serializing_if = "Option::is_none")]
  pub callback: Option<String>,

  #[serde(default)]
  pub retry: bool,
  #[serde(default)]
  pub retry_count: u32,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub state_timeout_ms: Option<u64>,

  pub created_at: DateTime<Utc>,
  pub last_updated_at: DateTime<Utc>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub start_ts: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub end_ts: Option<DateTime<Utc>>,
  /// `None` never expires.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub expiry_ts: Option<DateTime<Utc>>,
}

impl StateExecutionInstance {
  /// Create a NEW record bound to a state of the given machine.
  pub fn new(
    execution_id: impl Into<String>,
    state_machine_id: impl Into<String>,
    state_name: impl Into<String>,
  ) -> Self {
    let state_name = state_name.into();
    let now = Utc::now();
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      execution_id: execution_id.into(),
      execution_name: None,
      state_machine_id: state_machine_id.into(),
      child_state_machine_id: None,
      display_name: state_name.clone(),
      state_name,
      state_type: String::new(),
      rollback: false,
      rollback_phase_name: None,
      parent_instance_id: None,
      prev_instance_id: None,
      next_instance_id: None,
      clone_instance_id: None,
      status: ExecutionStatus::New,
      context_elements: ContextStack::new(),
      state_execution_map: BTreeMap::new(),
      state_execution_data_history: Vec::new(),
      interrupt_history: Vec::new(),
      dedicated_interrupt_count: 0,
      notify_id: None,
      notify_elements: Vec::new(),
      delegate_task_id: None,
      state_params: None,
      advisors: Vec::new(),
      callback: None,
      retry: false,
      retry_count: 0,
      state_timeout_ms: None,
      created_at: now,
      last_updated_at: now,
      start_ts: None,
      end_ts: None,
      expiry_ts: None,
    }
  }

  /// Execution data of the current attempt.
  pub fn current_data(&self) -> Option<&StateExecutionData> {
    self.state_execution_map.get(&self.display_name)
  }

  /// Execution data of the current attempt, created on first access.
  pub fn current_data_mut(&mut self) -> &mut StateExecutionData {
    let display_name = self.display_name.clone();
    let state_name = self.state_name.clone();
    let state_type = self.state_type.clone();
    self
      .state_execution_map
      .entry(display_name)
      .or_insert_with(|| StateExecutionData::new(state_name, state_type))
  }

  /// Replace the current attempt's execution data with a fresh entry.
  ///
  /// A state visited again under the same display name starts from
  /// scratch instead of inheriting the earlier visit's result.
  pub fn begin_attempt(&mut self, start_ts: DateTime<Utc>) {
    let mut data = StateExecutionData::new(self.state_name.clone(), self.state_type.clone());
    data.start_ts = Some(start_ts);
    data.state_params = self.state_params.clone();
    self.state_execution_map.insert(self.display_name.clone(), data);
  }

  /// Copy of this record bound to another state of the same execution.
  ///
  /// The copy keeps the context stack, the per-state result map and the
  /// routing fields; attempt-specific fields are reset and lineage points
  /// back at this record.
  pub fn clone_for(&self, state_name: &str) -> Self {
    let mut next = self.clone();
    let now = Utc::now();
    next.id = uuid::Uuid::new_v4().to_string();
    next.state_name = state_name.to_string();
    next.display_name = state_name.to_string();
    next.prev_instance_id = Some(self.id.clone());
    next.next_instance_id = None;
    next.clone_instance_id = None;
    next.status = ExecutionStatus::New;
    next.interrupt_history.clear();
    next.state_execution_data_history.clear();
    next.dedicated_interrupt_count = 0;
    next.state_params = None;
    next.delegate_task_id = None;
    next.retry = false;
    next.retry_count = 0;
    next.state_timeout_ms = None;
    next.created_at = now;
    next.last_updated_at = now;
    next.start_ts = None;
    next.end_ts = None;
    next.expiry_ts = None;
    next
  }

  /// A NEW child record spawned by this instance into a child machine.
  pub fn spawn_child(&self, child_state_machine_id: impl Into<String>, notify_id: impl Into<String>) -> Self {
    let mut child = StateExecutionInstance::new(
      self.execution_id.clone(),
      self.state_machine_id.clone(),
      String::new(),
    );
    child.execution_name = self.execution_name.clone();
    child.child_state_machine_id = Some(child_state_machine_id.into());
    child.parent_instance_id = Some(self.id.clone());
    child.notify_id = Some(notify_id.into());
    child.context_elements = self.context_elements.clone();
    child.advisors = self.advisors.clone();
    child
  }
}
