use std::sync::Arc;

use chrono::{Duration, Utc};
use statewright_context::ExecutionContext;
use statewright_store::{ExecutionInterrupt, ExecutionInterruptType, ExecutionStatus};
use tracing::{info, instrument};

use crate::advisor::ExecutionEventAdvice;
use crate::error::ExecutorError;
use crate::executor::{BoxFuture, StateMachineExecutor};
use crate::wait_notify::NotifyCallback;

impl StateMachineExecutor {
  /// Apply an advisor's override of the default routing.
  #[instrument(
    name = "handle_advice",
    skip_all,
    fields(instance_id = %context.instance().id, action = ?advice.interrupt_type)
  )]
  pub(crate) async fn handle_advice(
    self: &Arc<Self>,
    context: &ExecutionContext,
    status: ExecutionStatus,
    advice: ExecutionEventAdvice,
  ) -> Result<(), ExecutorError> {
    let instance = context.instance();
    let Some(action) = advice.interrupt_type else {
      return self.follow_status(context, status).await;
    };
    info!("applying advice");

    match action {
      ExecutionInterruptType::MarkSuccess => {
        let context = self.override_status(context, status, ExecutionStatus::Success).await?;
        self.success_transition(&context).await
      }
      ExecutionInterruptType::MarkFailed => {
        let context = self.override_status(context, status, ExecutionStatus::Failed).await?;
        self.failed_transition(&context).await
      }
      ExecutionInterruptType::Ignore => self.success_transition(context).await,
      ExecutionInterruptType::Abort => {
        let context = self.override_status(context, status, ExecutionStatus::Aborted).await?;
        self.end_transition(&context, ExecutionStatus::Aborted).await
      }
      ExecutionInterruptType::EndExecution => {
        let final_status = if status.is_final() {
          status
        } else {
          ExecutionStatus::Aborted
        };
        self.end_transition(context, final_status).await
      }
      ExecutionInterruptType::RollbackDone => self.end_transition(context, ExecutionStatus::Failed).await,
      ExecutionInterruptType::Pause => {
        self
          .park_for_intervention(&instance.id, &[status], None, advice.state_params)
          .await
      }
      ExecutionInterruptType::WaitingForManualIntervention => {
        let timeout_ms = advice
          .timeout_ms
          .unwrap_or(self.settings.manual_intervention_timeout_ms);
        let expiry = Utc::now()
          .checked_add_signed(Duration::milliseconds(i64::try_from(timeout_ms).unwrap_or(i64::MAX)));
        self
          .park_for_intervention(&instance.id, &[status], expiry, advice.state_params)
          .await
      }
      ExecutionInterruptType::NextStep | ExecutionInterruptType::Rollback => {
        self.advice_transition(context, &advice).await
      }
      ExecutionInterruptType::Retry => self.advised_retry(context, &advice).await,
      other => Err(ExecutorError::InvalidAdvice {
        instance_id: instance.id.clone(),
        message: format!("{other:?} cannot be used as advice"),
      }),
    }
  }

  /// Rewrite the status an advisor overrode; returns the context to route with.
  async fn override_status(
    &self,
    context: &ExecutionContext,
    current: ExecutionStatus,
    status: ExecutionStatus,
  ) -> Result<ExecutionContext, ExecutorError> {
    if current == status {
      return Ok(context.clone());
    }
    let updated = self
      .cas_update(&context.instance().id, &[current], None, |record| {
        record.status = status;
      })
      .await?;
    Ok(match updated {
      Some(updated) => self.context(updated),
      None => context.clone(),
    })
  }

  /// Trigger the state named by the advice instead of the graph's edge.
  async fn advice_transition(
    self: &Arc<Self>,
    context: &ExecutionContext,
    advice: &ExecutionEventAdvice,
  ) -> Result<(), ExecutorError> {
    let instance = context.instance();
    if advice.next_child_state_machine_id.is_none() && advice.next_state_name.is_none() {
      return Err(ExecutorError::InvalidAdvice {
        instance_id: instance.id.clone(),
        message: "redirect advice names neither a state nor a child machine".to_string(),
      });
    }

    let machine = self.machine(&instance.state_machine_id).await?;
    let child = advice
      .next_child_state_machine_id
      .clone()
      .or_else(|| instance.child_state_machine_id.clone());
    let state = match &advice.next_state_name {
      Some(name) => machine.get_state(child.as_deref(), name)?,
      None => machine.initial_state(child.as_deref())?,
    };

    let mut next = instance.clone_for(state.name());
    next.child_state_machine_id = child;
    next.clone_instance_id = Some(instance.id.clone());
    if let Some(display_name) = &advice.next_state_display_name {
      next.display_name = display_name.clone();
    }
    if let Some(phase) = &advice.rollback_phase_name {
      next.rollback_phase_name = Some(phase.clone());
    }
    if advice.state_params.is_some() {
      next.state_params = advice.state_params.clone();
    }

    self.link_next(&instance.id, &next.id).await?;
    info!(next_state = %state.name(), "redirecting by advice");
    self.trigger(next).await.map(|_| ())
  }

  /// Retry now, or after the advised wait.
  async fn advised_retry(
    self: &Arc<Self>,
    context: &ExecutionContext,
    advice: &ExecutionEventAdvice,
  ) -> Result<(), ExecutorError> {
    let instance = context.instance();
    let wait = advice.wait_interval_secs.unwrap_or(0);
    if wait > 0 {
      info!(seconds = wait, "retrying after wait");
      let correlation_id = self.delay.delay(wait).await?;
      self
        .wait_notify
        .wait_for_all(
          NotifyCallback::RetryAfterWait {
            execution_id: instance.execution_id.clone(),
            instance_id: instance.id.clone(),
            state_params: advice.state_params.clone(),
          },
          vec![correlation_id],
        )
        .await?;
      return Ok(());
    }

    let interrupt = retry_interrupt(
      &instance.execution_id,
      &instance.id,
      advice.state_params.clone(),
    );
    self.spawn("retry", self.interrupt_future(interrupt));
    Ok(())
  }

  /// Register an interrupt from the worker pool.
  pub(crate) fn interrupt_future(self: &Arc<Self>, interrupt: ExecutionInterrupt) -> BoxFuture {
    let executor = self.clone();
    Box::pin(async move { executor.register_interrupt(interrupt).await.map(|_| ()) })
  }
}

/// A RETRY interrupt carrying optional replacement parameters.
pub(crate) fn retry_interrupt(
  execution_id: &str,
  instance_id: &str,
  state_params: Option<statewright_store::Params>,
) -> ExecutionInterrupt {
  let interrupt = ExecutionInterrupt::for_instance(execution_id, instance_id, ExecutionInterruptType::Retry);
  match state_params {
    Some(params) => interrupt.with_property("state_params", serde_json::Value::Object(params)),
    None => interrupt,
  }
}
