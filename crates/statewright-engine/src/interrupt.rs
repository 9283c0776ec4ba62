//! Control-plane interrupts.
//!
//! Interrupts are persisted first and then applied. An interrupt is seized
//! when it is applied, so applying the same interrupt twice changes nothing.
//! PAUSE_ALL is the exception: it stays unseized while it is in effect and
//! is seized by the RESUME_ALL that lifts it.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use statewright_graph::{ExecutionResponse, FailureType, ResponseData};
use statewright_store::{
  ExecutionInterrupt, ExecutionInterruptType, ExecutionStatus, InstanceQuery, Params,
  StateExecutionInstance, StoreError,
};
use tracing::{debug, info, instrument, warn};

use crate::error::ExecutorError;
use crate::events::EngineEvent;
use crate::executor::StateMachineExecutor;

/// Statuses ABORT and MARK_EXPIRED can discontinue.
const DISCONTINUABLE: &[ExecutionStatus] = &[
  ExecutionStatus::New,
  ExecutionStatus::Queued,
  ExecutionStatus::Starting,
  ExecutionStatus::Running,
  ExecutionStatus::Paused,
  ExecutionStatus::Waiting,
];

/// Statuses ABORT_ALL sweeps.
const ABORT_ALL: &[ExecutionStatus] = &[
  ExecutionStatus::New,
  ExecutionStatus::Queued,
  ExecutionStatus::Running,
  ExecutionStatus::Starting,
  ExecutionStatus::Paused,
  ExecutionStatus::Waiting,
];

/// Statuses END_EXECUTION aborts; WAITING instances are failed instead.
const END_EXECUTION: &[ExecutionStatus] = &[
  ExecutionStatus::New,
  ExecutionStatus::Queued,
  ExecutionStatus::Running,
  ExecutionStatus::Starting,
  ExecutionStatus::Paused,
];

/// Statuses a RETRY is accepted from.
const RETRYABLE: &[ExecutionStatus] = &[
  ExecutionStatus::Waiting,
  ExecutionStatus::Failed,
  ExecutionStatus::Error,
  ExecutionStatus::Expired,
];

/// Key of the RESUME_ALL id in the signal that releases a held instance.
pub(crate) const RESUME_INTERRUPT_KEY: &str = "resume_interrupt_id";

impl StateMachineExecutor {
  /// Persist an interrupt and apply it.
  #[instrument(
    name = "register_interrupt",
    skip(self, interrupt),
    fields(execution_id = %interrupt.execution_id, interrupt_type = ?interrupt.interrupt_type)
  )]
  pub async fn register_interrupt(
    self: &Arc<Self>,
    interrupt: ExecutionInterrupt,
  ) -> Result<ExecutionInterrupt, ExecutorError> {
    self.validate_interrupt(&interrupt).await?;
    self.store.insert_interrupt(&interrupt).await?;
    info!(interrupt_id = %interrupt.id, "interrupt registered");
    self.notifier.notify(EngineEvent::InterruptRegistered {
      execution_id: interrupt.execution_id.clone(),
      interrupt_id: interrupt.id.clone(),
      interrupt_type: interrupt.interrupt_type,
    });

    self.apply_interrupt(&interrupt.id).await?;
    Ok(self.store.get_interrupt(&interrupt.id).await?)
  }

  async fn validate_interrupt(&self, interrupt: &ExecutionInterrupt) -> Result<(), ExecutorError> {
    let invalid = |message: String| ExecutorError::InvalidInterrupt { message };
    match interrupt.interrupt_type {
      ExecutionInterruptType::RollbackDone
      | ExecutionInterruptType::Pause
      | ExecutionInterruptType::WaitingForManualIntervention
      | ExecutionInterruptType::NextStep
      | ExecutionInterruptType::MarkFailed => {
        return Err(invalid(format!(
          "{:?} is advice only and cannot be registered",
          interrupt.interrupt_type
        )));
      }
      t if !t.is_execution_scoped() && interrupt.instance_id.is_none() => {
        return Err(invalid(format!("{t:?} requires an instance id")));
      }
      _ => {}
    }

    let pause_all_active = self
      .store
      .list_interrupts(&interrupt.execution_id, false)
      .await?
      .iter()
      .any(|i| i.interrupt_type == ExecutionInterruptType::PauseAll);
    match interrupt.interrupt_type {
      ExecutionInterruptType::PauseAll if pause_all_active => {
        Err(invalid("execution is already paused".to_string()))
      }
      ExecutionInterruptType::ResumeAll if !pause_all_active => {
        Err(invalid("execution is not paused".to_string()))
      }
      _ => Ok(()),
    }
  }

  /// Apply a persisted interrupt. Re-applying a seized interrupt is a no-op.
  pub async fn apply_interrupt(self: &Arc<Self>, interrupt_id: &str) -> Result<(), ExecutorError> {
    let interrupt = self.store.get_interrupt(interrupt_id).await?;
    match interrupt.interrupt_type {
      ExecutionInterruptType::PauseAll => {
        info!("pausing dispatch of new instances");
        Ok(())
      }
      ExecutionInterruptType::ResumeAll => {
        if !self.store.seize_interrupt(interrupt_id).await? {
          debug!("resume-all already applied");
          return Ok(());
        }
        self.resume_all(&interrupt).await
      }
      _ => {
        if !self.store.seize_interrupt(interrupt_id).await? {
          debug!("interrupt already applied");
          return Ok(());
        }
        self.handle_interrupt(&interrupt).await
      }
    }
  }

  async fn handle_interrupt(self: &Arc<Self>, interrupt: &ExecutionInterrupt) -> Result<(), ExecutorError> {
    match interrupt.interrupt_type {
      ExecutionInterruptType::Ignore => self.ignore(interrupt).await,
      ExecutionInterruptType::Resume | ExecutionInterruptType::MarkSuccess => self.mark_success(interrupt).await,
      ExecutionInterruptType::Retry => self.retry(interrupt).await,
      ExecutionInterruptType::Abort => self.discontinue(interrupt, ExecutionStatus::Aborted).await,
      ExecutionInterruptType::MarkExpired => self.discontinue(interrupt, ExecutionStatus::Expired).await,
      ExecutionInterruptType::AbortAll => self.abort_instances(interrupt, ABORT_ALL).await,
      ExecutionInterruptType::EndExecution | ExecutionInterruptType::Rollback => {
        self.end_execution(interrupt).await
      }
      other => Err(ExecutorError::InvalidInterrupt {
        message: format!("{other:?} cannot be applied"),
      }),
    }
  }

  /// Load the instance an interrupt addresses. A missing record is logged
  /// and skipped.
  async fn target(&self, interrupt: &ExecutionInterrupt) -> Result<Option<StateExecutionInstance>, ExecutorError> {
    let Some(instance_id) = &interrupt.instance_id else {
      return Err(ExecutorError::InvalidInterrupt {
        message: format!("{:?} requires an instance id", interrupt.interrupt_type),
      });
    };
    match self.store.get_instance(instance_id).await {
      Ok(instance) => Ok(Some(instance)),
      Err(StoreError::NotFound(_)) => {
        warn!(instance_id = %instance_id, "interrupt addresses an unknown instance");
        Ok(None)
      }
      Err(e) => Err(e.into()),
    }
  }

  /// Release every instance held by PAUSE_ALL.
  async fn resume_all(&self, interrupt: &ExecutionInterrupt) -> Result<(), ExecutorError> {
    let pause_alls: Vec<ExecutionInterrupt> = self
      .store
      .list_interrupts(&interrupt.execution_id, false)
      .await?
      .into_iter()
      .filter(|i| i.interrupt_type == ExecutionInterruptType::PauseAll)
      .collect();

    let mut params = Params::new();
    params.insert(RESUME_INTERRUPT_KEY.to_string(), serde_json::Value::String(interrupt.id.clone()));
    for pause_all in pause_alls {
      if self.store.seize_interrupt(&pause_all.id).await? {
        info!(pause_all = %pause_all.id, "resuming dispatch");
        self
          .wait_notify
          .done_with(&pause_all.id, ResponseData::Signal { params: params.clone() })
          .await?;
      }
    }
    Ok(())
  }

  /// Treat a WAITING instance as failed and follow its success edge.
  async fn ignore(self: &Arc<Self>, interrupt: &ExecutionInterrupt) -> Result<(), ExecutorError> {
    let Some(instance) = self.target(interrupt).await? else {
      return Ok(());
    };
    let updated = self
      .cas_update(&instance.id, &[ExecutionStatus::Waiting], Some(interrupt), |record| {
        record.status = ExecutionStatus::Failed;
      })
      .await?;
    let Some(updated) = updated else {
      warn!(status = %instance.status, "only waiting instances can be ignored");
      return Ok(());
    };
    self.success_transition(&self.context(updated)).await
  }

  /// Complete an active instance as if its state had succeeded.
  async fn mark_success(self: &Arc<Self>, interrupt: &ExecutionInterrupt) -> Result<(), ExecutorError> {
    let Some(instance) = self.target(interrupt).await? else {
      return Ok(());
    };
    let recorded = self
      .cas_update(&instance.id, ExecutionStatus::ACTIVE, Some(interrupt), |_| {})
      .await?;
    let Some(instance) = recorded else {
      warn!(status = %instance.status, "only active instances can be marked successful");
      return Ok(());
    };
    let state = self.state_of(&instance).await?;
    let context = self.context(instance);
    self
      .handle_response(&context, state, ExecutionResponse::success())
      .await
  }

  /// Reset a failed or waiting instance and dispatch it again.
  ///
  /// The current attempt moves to the history and the instance's notify
  /// elements are reset to those of its immediate predecessor.
  #[instrument(name = "retry", skip_all, fields(instance_id = ?interrupt.instance_id))]
  async fn retry(self: &Arc<Self>, interrupt: &ExecutionInterrupt) -> Result<(), ExecutorError> {
    let Some(instance) = self.target(interrupt).await? else {
      return Ok(());
    };
    if !RETRYABLE.contains(&instance.status) {
      return Err(ExecutorError::RetryFailed {
        instance_id: instance.id,
        status: instance.status,
      });
    }

    let notify_elements = match &instance.prev_instance_id {
      Some(prev) => match self.store.get_instance(prev).await {
        Ok(prev) => prev.notify_elements,
        Err(StoreError::NotFound(_)) => Vec::new(),
        Err(e) => return Err(e.into()),
      },
      None => Vec::new(),
    };
    let state_params = interrupt.state_params();

    let updated = self
      .cas_update(&instance.id, RETRYABLE, Some(interrupt), move |record| {
        if let Some(data) = record.state_execution_map.remove(&record.display_name) {
          record.state_execution_data_history.push(data);
        }
        record.notify_elements = notify_elements;
        if state_params.is_some() {
          record.state_params = state_params;
        }
        record.status = ExecutionStatus::New;
        record.retry = true;
        record.retry_count += 1;
        record.delegate_task_id = None;
        record.end_ts = None;
        record.expiry_ts = None;
      })
      .await?;
    let Some(updated) = updated else {
      let current = self.store.get_instance(&instance.id).await?;
      return Err(ExecutorError::RetryFailed {
        instance_id: current.id,
        status: current.status,
      });
    };

    info!(retry_count = updated.retry_count, "retrying instance");
    self.wait_notify.cancel_waits(&updated.id).await?;
    self.spawn("dispatch", self.dispatch_future(updated.id, None));
    Ok(())
  }

  /// Mark an instance DISCONTINUING and finish it with `final_status`.
  #[instrument(name = "discontinue", skip_all, fields(instance_id = ?interrupt.instance_id, status = %final_status))]
  async fn discontinue(
    self: &Arc<Self>,
    interrupt: &ExecutionInterrupt,
    final_status: ExecutionStatus,
  ) -> Result<(), ExecutorError> {
    let Some(instance) = self.target(interrupt).await? else {
      return Ok(());
    };
    if instance.status == ExecutionStatus::Discontinuing {
      return self.finish_discontinued(instance, final_status).await;
    }

    let buffer = self.abort_expiry();
    let marked = self
      .cas_update(&instance.id, DISCONTINUABLE, Some(interrupt), |record| {
        record.status = ExecutionStatus::Discontinuing;
        record.expiry_ts = Some(buffer);
      })
      .await?;
    let Some(marked) = marked else {
      warn!(status = %instance.status, "instance can no longer be discontinued");
      return Ok(());
    };
    self.finish_discontinued(marked, final_status).await
  }

  /// Abort or expire the instance's task and move it to `final_status`.
  async fn finish_discontinued(
    &self,
    instance: StateExecutionInstance,
    final_status: ExecutionStatus,
  ) -> Result<(), ExecutorError> {
    let state = self.state_of(&instance).await?;
    let mut error_msg = None;
    if let Some(task_id) = &instance.delegate_task_id {
      let result = if final_status == ExecutionStatus::Expired {
        error_msg = Some("Expired: no response within the allotted time".to_string());
        self.dispatcher.expire_task(task_id).await
      } else {
        self.dispatcher.abort_task(task_id).await
      };
      if let Err(e) = result {
        warn!(task_id = %task_id, error = %e, "failed to discontinue delegate task");
      }
    }

    let context = self.context(instance.clone());
    state.handle_abort_event(&context).await;

    let terminated = self
      .cas_update(&instance.id, &[ExecutionStatus::Discontinuing], None, move |record| {
        record.status = final_status;
        if let Some(message) = error_msg {
          record.current_data_mut().error_msg = Some(message);
        }
      })
      .await?;
    let Some(terminated) = terminated else {
      debug!("instance already finished");
      return Ok(());
    };
    info!(instance_id = %terminated.id, status = %final_status, "instance discontinued");

    let context = self.context(terminated);
    self.end_transition(&context, final_status).await?;
    let failure_types: &[FailureType] = if final_status == ExecutionStatus::Expired {
      &[FailureType::Expired]
    } else {
      &[]
    };
    // Informational: the instance is already final.
    let _ = self
      .invoke_advisors(&context, state.as_ref(), final_status, failure_types)
      .await;
    Ok(())
  }

  /// Discontinue the leaves of an execution in one of `statuses`.
  ///
  /// Containers are not discontinued directly; they finish once their
  /// children report back.
  #[instrument(name = "abort_instances", skip_all, fields(execution_id = %interrupt.execution_id))]
  async fn abort_instances(
    &self,
    interrupt: &ExecutionInterrupt,
    statuses: &[ExecutionStatus],
  ) -> Result<(), ExecutorError> {
    let candidates = self
      .store
      .list_instances(
        &InstanceQuery::execution(&interrupt.execution_id)
          .with_statuses(statuses)
          .created_since(interrupt.since),
      )
      .await?;
    if candidates.is_empty() {
      debug!("no instances to abort");
    }

    let ids: Vec<String> = candidates.iter().map(|i| i.id.clone()).collect();
    let mut live = statuses.to_vec();
    live.push(ExecutionStatus::Discontinuing);
    let containers: HashSet<String> = self
      .store
      .list_instances(
        &InstanceQuery::execution(&interrupt.execution_id)
          .with_parents(ids)
          .with_statuses(&live),
      )
      .await?
      .into_iter()
      .filter_map(|child| child.parent_instance_id)
      .collect();

    let buffer = self.abort_expiry();
    for leaf in candidates.iter().filter(|i| !containers.contains(&i.id)) {
      let marked = self
        .cas_update(&leaf.id, statuses, Some(interrupt), |record| {
          record.status = ExecutionStatus::Discontinuing;
          record.expiry_ts = Some(buffer);
        })
        .await?;
      if marked.is_none() {
        debug!(instance_id = %leaf.id, "instance moved on before it could be aborted");
      }
    }

    let marked = self
      .store
      .list_instances(
        &InstanceQuery::execution(&interrupt.execution_id).with_statuses(&[ExecutionStatus::Discontinuing]),
      )
      .await?;
    for instance in marked {
      let instance_id = instance.id.clone();
      if let Err(e) = self.finish_discontinued(instance, ExecutionStatus::Aborted).await {
        warn!(instance_id = %instance_id, error = %e, "failed to abort instance");
      }
    }
    Ok(())
  }

  /// Abort everything still running and fail whatever is waiting.
  #[instrument(name = "end_execution", skip_all, fields(execution_id = %interrupt.execution_id))]
  async fn end_execution(&self, interrupt: &ExecutionInterrupt) -> Result<(), ExecutorError> {
    self.abort_instances(interrupt, END_EXECUTION).await?;

    let waiting = self
      .store
      .list_instances(
        &InstanceQuery::execution(&interrupt.execution_id)
          .with_statuses(&[ExecutionStatus::Waiting])
          .created_since(interrupt.since),
      )
      .await?;
    for instance in waiting {
      let failed = self
        .cas_update(&instance.id, &[ExecutionStatus::Waiting], Some(interrupt), |record| {
          record.status = ExecutionStatus::Failed;
        })
        .await?;
      if let Some(failed) = failed {
        self.end_transition(&self.context(failed), ExecutionStatus::Failed).await?;
      }
    }
    Ok(())
  }

  fn abort_expiry(&self) -> chrono::DateTime<Utc> {
    let buffer = i64::try_from(self.settings.abort_expiry_buffer_ms).unwrap_or(i64::MAX);
    Utc::now()
      .checked_add_signed(Duration::milliseconds(buffer))
      .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC)
  }
}
