use std::sync::Arc;

use chrono::{DateTime, Utc};
use statewright_config::ErrorStrategy;
use statewright_context::ExecutionContext;
use statewright_graph::ResponseData;
use statewright_store::{ExecutionStatus, Params, StateExecutionInstance};
use tracing::{debug, error, info, instrument, warn};

use crate::error::ExecutorError;
use crate::events::EngineEvent;
use crate::executor::StateMachineExecutor;

impl StateMachineExecutor {
  /// Follow the success edge, or end the machine when there is none.
  #[instrument(name = "success_transition", skip_all, fields(instance_id = %context.instance().id))]
  pub(crate) async fn success_transition(
    self: &Arc<Self>,
    context: &ExecutionContext,
  ) -> Result<(), ExecutorError> {
    let instance = context.instance();
    let machine = self.machine(&instance.state_machine_id).await?;
    let next = machine.success_transition(instance.child_state_machine_id.as_deref(), &instance.state_name)?;
    match next {
      Some(next) => self.transition_to(context, next.name()).await,
      None => self.end_transition(context, ExecutionStatus::Success).await,
    }
  }

  /// Follow the failure edge, or apply the workflow's error strategy.
  #[instrument(name = "failed_transition", skip_all, fields(instance_id = %context.instance().id))]
  pub(crate) async fn failed_transition(
    self: &Arc<Self>,
    context: &ExecutionContext,
  ) -> Result<(), ExecutorError> {
    let instance = context.instance();
    let machine = self.machine(&instance.state_machine_id).await?;
    let next = machine.failure_transition(instance.child_state_machine_id.as_deref(), &instance.state_name)?;
    if let Some(next) = next {
      return self.transition_to(context, next.name()).await;
    }

    match context.error_strategy() {
      ErrorStrategy::Fail => self.end_transition(context, ExecutionStatus::Failed).await,
      ErrorStrategy::Pause => {
        self
          .park_for_intervention(&instance.id, ExecutionStatus::BROKE, None, None)
          .await
      }
    }
  }

  /// Park a failed instance in WAITING until an operator interrupts it.
  pub(crate) async fn park_for_intervention(
    &self,
    instance_id: &str,
    expected: &[ExecutionStatus],
    expiry: Option<DateTime<Utc>>,
    state_params: Option<Params>,
  ) -> Result<(), ExecutorError> {
    let parked = self
      .cas_update(instance_id, expected, None, move |record| {
        record.status = ExecutionStatus::Waiting;
        record.expiry_ts = expiry;
        if state_params.is_some() {
          record.state_params = state_params;
        }
      })
      .await?;
    let Some(parked) = parked else {
      debug!(instance_id = %instance_id, "instance moved on before it could be parked");
      return Ok(());
    };

    info!(instance_id = %instance_id, "waiting for manual intervention");
    self.notifier.notify(EngineEvent::ManualInterventionNeeded {
      execution_id: parked.execution_id,
      instance_id: parked.id,
      state_name: parked.state_name,
    });
    Ok(())
  }

  /// Trigger the next state of the same machine.
  pub(crate) async fn transition_to(
    self: &Arc<Self>,
    context: &ExecutionContext,
    state_name: &str,
  ) -> Result<(), ExecutorError> {
    let next = context.instance().clone_for(state_name);
    self.link_next(&context.instance().id, &next.id).await?;
    debug!(next_state = %state_name, "transitioning");
    self.trigger(next).await.map(|_| ())
  }

  /// Record the successor of a finished instance.
  pub(crate) async fn link_next(&self, instance_id: &str, next_instance_id: &str) -> Result<(), ExecutorError> {
    let current = self.store.get_instance(instance_id).await?;
    if current.next_instance_id.is_some() {
      return Ok(());
    }
    let next_instance_id = next_instance_id.to_string();
    self
      .cas_update(instance_id, &[current.status], None, |record| {
        record.next_instance_id = Some(next_instance_id);
      })
      .await?;
    Ok(())
  }

  /// Report completion: to the parent when spawned, otherwise to the
  /// execution's callback.
  #[instrument(name = "end_transition", skip_all, fields(instance_id = %context.instance().id, status = %status))]
  pub(crate) async fn end_transition(
    &self,
    context: &ExecutionContext,
    status: ExecutionStatus,
  ) -> Result<(), ExecutorError> {
    let instance = context.instance();
    if let Some(notify_id) = &instance.notify_id {
      debug!(notify_id = %notify_id, "notifying parent");
      self
        .wait_notify
        .done_with(
          notify_id,
          ResponseData::Child {
            status,
            elements: instance.notify_elements.clone(),
          },
        )
        .await?;
      return Ok(());
    }

    if let Some(callback_id) = &instance.callback {
      match self.callbacks.get(callback_id) {
        Some(callback) => callback.on_complete(context, status).await,
        None => warn!(callback = %callback_id, "completion callback not registered"),
      }
    }

    if instance.parent_instance_id.is_none() {
      info!(execution_id = %instance.execution_id, status = %status, "execution finished");
      self.notifier.notify(EngineEvent::ExecutionFinished {
        execution_id: instance.execution_id.clone(),
        status,
      });
    }
    Ok(())
  }

  /// Trigger the children an async response spawned.
  ///
  /// A child bound to an unknown child machine, or to no state at all, has
  /// nothing to run; its parent is notified of success straight away. A
  /// child that cannot be triggered reports FAILED to its parent.
  pub(crate) async fn spawn_children(
    self: &Arc<Self>,
    parent: &StateExecutionInstance,
    children: Vec<StateExecutionInstance>,
  ) -> Result<(), ExecutorError> {
    if children.is_empty() {
      return Ok(());
    }
    let machine = self.machine(&parent.state_machine_id).await?;

    for mut child in children {
      child.id = uuid::Uuid::new_v4().to_string();
      child.execution_id = parent.execution_id.clone();
      child.state_machine_id = parent.state_machine_id.clone();
      child.parent_instance_id = Some(parent.id.clone());
      child.state_params = None;
      child.notify_elements.clear();

      let runnable = match child.child_state_machine_id.as_deref() {
        Some(id) => machine.child_machine(id).is_some(),
        None => !child.state_name.is_empty(),
      };
      let notify_id = child.notify_id.clone();
      if !runnable {
        warn!(
          child_machine = ?child.child_state_machine_id,
          "nothing to run for spawned child, reporting success"
        );
        self.notify_spawner(notify_id.as_deref(), ExecutionStatus::Success).await?;
        continue;
      }

      if let Err(e) = self.trigger(child).await {
        error!(error = %e, "failed to trigger spawned child");
        self.notify_spawner(notify_id.as_deref(), ExecutionStatus::Failed).await?;
      }
    }
    Ok(())
  }

  async fn notify_spawner(&self, notify_id: Option<&str>, status: ExecutionStatus) -> Result<(), ExecutorError> {
    let Some(notify_id) = notify_id else {
      return Ok(());
    };
    self
      .wait_notify
      .done_with(
        notify_id,
        ResponseData::Child {
          status,
          elements: Vec::new(),
        },
      )
      .await?;
    Ok(())
  }
}
