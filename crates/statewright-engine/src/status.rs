use chrono::{DateTime, Utc};
use statewright_graph::ExecutionResponse;
use statewright_store::{ExecutionInterrupt, ExecutionStatus, InterruptEffect, StateExecutionInstance};
use tracing::debug;

use crate::error::ExecutorError;
use crate::events::EngineEvent;
use crate::executor::StateMachineExecutor;

impl StateMachineExecutor {
  /// Re-read an instance and apply `mutate` iff its status is in `expected`.
  ///
  /// Returns the written record, or `None` when the record had already
  /// moved on. The interrupt, if any, is appended to the instance's audit
  /// trail. Entering a final status stamps the end time on both the
  /// instance and its current attempt and drops the instance's waits.
  pub(crate) async fn cas_update<F>(
    &self,
    instance_id: &str,
    expected: &[ExecutionStatus],
    interrupt: Option<&ExecutionInterrupt>,
    mutate: F,
  ) -> Result<Option<StateExecutionInstance>, ExecutorError>
  where
    F: FnOnce(&mut StateExecutionInstance) + Send,
  {
    let mut record = self.store.get_instance(instance_id).await?;
    if !expected.contains(&record.status) {
      return Ok(None);
    }

    let previous = record.status;
    if let Some(interrupt) = interrupt {
      record.interrupt_history.push(InterruptEffect::of(interrupt));
      record.dedicated_interrupt_count = self.store.count_instance_interrupts(instance_id).await?;
    }
    mutate(&mut record);

    let now = Utc::now();
    let status = record.status;
    record.last_updated_at = now;
    if status.is_final() && record.end_ts.is_none() {
      record.end_ts = Some(now);
    }
    if let Some(data) = record.state_execution_map.get_mut(&record.display_name) {
      data.status = status;
      if status.is_final() && data.end_ts.is_none() {
        data.end_ts = Some(now);
      }
    }

    if !self.store.update_instance(&record, expected).await? {
      debug!(instance_id = %instance_id, "conditional update lost the race");
      return Ok(None);
    }

    if status.is_final() && !previous.is_final() {
      self.wait_notify.cancel_waits(instance_id).await?;
    }
    if previous != status {
      debug!(instance_id = %instance_id, from = %previous, to = %status, "status changed");
      self.notifier.notify(EngineEvent::StatusChanged {
        execution_id: record.execution_id.clone(),
        instance_id: record.id.clone(),
        state_name: record.state_name.clone(),
        status,
      });
    }
    Ok(Some(record))
  }

  /// Record a response on the current attempt of an active instance.
  ///
  /// A paused instance never expires.
  pub(crate) async fn apply_response(
    &self,
    instance_id: &str,
    status: ExecutionStatus,
    response: &ExecutionResponse,
    expiry: Option<DateTime<Utc>>,
  ) -> Result<Option<StateExecutionInstance>, ExecutorError> {
    let response = response.clone();
    self
      .cas_update(instance_id, ExecutionStatus::ACTIVE, None, move |record| {
        record.status = status;
        if status == ExecutionStatus::Paused {
          record.expiry_ts = None;
        } else if let Some(expiry) = expiry {
          record.expiry_ts = Some(expiry);
        }
        for element in response.context_elements {
          record.context_elements.push(element);
        }
        record.notify_elements.extend(response.notify_elements);
        if let Some(task_id) = response.delegate_task_id {
          record.delegate_task_id = Some(task_id);
        }

        let data = record.current_data_mut();
        if let Some(message) = response.error_message {
          data.error_msg = Some(message);
        }
        if let Some(risk_level) = response.risk_level {
          data.risk_level = risk_level;
        }
        if let Some(output) = response.output {
          merge_output(&mut data.output, output);
        }
      })
      .await
  }
}

/// Merge object outputs key by key; anything else replaces.
fn merge_output(current: &mut serde_json::Value, output: serde_json::Value) {
  match (current, output) {
    (serde_json::Value::Object(current), serde_json::Value::Object(output)) => current.extend(output),
    (current, output) => *current = output,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_merge_output() {
    let mut output = json!({"a": 1, "b": 2});
    merge_output(&mut output, json!({"b": 3, "c": 4}));
    assert_eq!(output, json!({"a": 1, "b": 3, "c": 4}));

    let mut output = serde_json::Value::Null;
    merge_output(&mut output, json!({"a": 1}));
    assert_eq!(output, json!({"a": 1}));

    merge_output(&mut output, json!("text"));
    assert_eq!(output, json!("text"));
  }
}
