use chrono::{DateTime, Utc};

use crate::instance::StateExecutionInstance;
use crate::status::ExecutionStatus;

/// Filter for [`crate::Store::list_instances`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceQuery {
  pub execution_id: Option<String>,
  pub parent_instance_ids: Option<Vec<String>>,
  pub statuses: Option<Vec<ExecutionStatus>>,
  pub created_since: Option<DateTime<Utc>>,
}

impl InstanceQuery {
  pub fn execution(execution_id: impl Into<String>) -> Self {
    Self {
      execution_id: Some(execution_id.into()),
      ..Default::default()
    }
  }

  pub fn with_statuses(mut self, statuses: &[ExecutionStatus]) -> Self {
    self.statuses = Some(statuses.to_vec());
    self
  }

  pub fn with_parents(mut self, parent_instance_ids: Vec<String>) -> Self {
    self.parent_instance_ids = Some(parent_instance_ids);
    self
  }

  pub fn created_since(mut self, since: Option<DateTime<Utc>>) -> Self {
    self.created_since = since;
    self
  }

  pub(crate) fn matches(&self, instance: &StateExecutionInstance) -> bool {
    if let Some(execution_id) = &self.execution_id {
      if &instance.execution_id != execution_id {
        return false;
      }
    }
    if let Some(parents) = &self.parent_instance_ids {
      match &instance.parent_instance_id {
        Some(parent) if parents.contains(parent) => {}
        _ => return false,
      }
    }
    if let Some(statuses) = &self.statuses {
      if !statuses.contains(&instance.status) {
        return false;
      }
    }
    if let Some(since) = self.created_since {
      if instance.created_at < since {
        return false;
      }
    }
    true
  }
}
