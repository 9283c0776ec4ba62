use std::sync::Arc;

use statewright_graph::{ExecutionResponse, FailureType};
use statewright_store::ExecutionStatus;
use tracing::{debug, instrument, warn};

use crate::advice::retry_interrupt;
use crate::error::ExecutorError;
use crate::executor::{BoxFuture, StateMachineExecutor};
use crate::interrupt::RESUME_INTERRUPT_KEY;
use crate::wait_notify::{Delivery, Notification, NotifyCallback};

/// Statuses an instance may still be committing when its async result arrives.
const STARTING: &[ExecutionStatus] = &[
  ExecutionStatus::New,
  ExecutionStatus::Queued,
  ExecutionStatus::Starting,
];

impl StateMachineExecutor {
  /// Run a completed wait on the worker pool.
  pub fn on_delivery(self: &Arc<Self>, delivery: Delivery) {
    let Delivery {
      callback,
      notification,
    } = delivery;
    match callback {
      NotifyCallback::AsyncResume { instance_id, .. } => {
        self.spawn("async_resume", self.resume_future(instance_id, notification));
      }
      NotifyCallback::WaitElapsed {
        instance_id, attempt, ..
      } => {
        let executor = self.clone();
        self.spawn(
          "wait_elapsed",
          Box::pin(async move { executor.resume_after_wait(&instance_id, attempt).await }),
        );
      }
      NotifyCallback::RetryAfterWait {
        execution_id,
        instance_id,
        state_params,
      } => {
        let interrupt = retry_interrupt(&execution_id, &instance_id, state_params);
        self.spawn("retry", self.interrupt_future(interrupt));
      }
      NotifyCallback::ResumeAll { instance_id, .. } => {
        let resume_id = resume_interrupt_id(&notification);
        self.spawn("resume_all", self.dispatch_future(instance_id, resume_id));
      }
    }
  }

  fn resume_future(self: &Arc<Self>, instance_id: String, notification: Notification) -> BoxFuture {
    let executor = self.clone();
    Box::pin(async move { executor.resume(&instance_id, notification).await })
  }

  /// Hand the results an instance waited on to its state.
  ///
  /// Results can arrive before the instance's own RUNNING write commits,
  /// so a record still starting is re-read with bounded backoff. Anything
  /// other than RUNNING or PAUSED afterwards is a late result and ignored.
  #[instrument(name = "async_resume", skip(self, notification), fields(instance_id = %instance_id))]
  pub(crate) async fn resume(
    self: &Arc<Self>,
    instance_id: &str,
    notification: Notification,
  ) -> Result<(), ExecutorError> {
    let policy = &self.settings.resume_poll;
    let mut instance = self.store.get_instance(instance_id).await?;
    let mut attempt = 0;
    while STARTING.contains(&instance.status) {
      if attempt >= policy.max_attempts {
        warn!(status = %instance.status, "instance never left startup");
        return Err(ExecutorError::ResumeTimedOut {
          instance_id: instance_id.to_string(),
        });
      }
      tokio::time::sleep(policy.delay_for(attempt)).await;
      attempt += 1;
      instance = self.store.get_instance(instance_id).await?;
    }
    if !matches!(instance.status, ExecutionStatus::Running | ExecutionStatus::Paused) {
      debug!(status = %instance.status, "ignoring late async result");
      return Ok(());
    }

    let state = self.state_of(&instance).await?;
    let context = self.context(instance);
    let result = match notification {
      Notification::Error {
        correlation_id,
        response,
      } => {
        warn!(correlation_id = %correlation_id, "async work reported an error");
        Ok(
          ExecutionResponse::sync(ExecutionStatus::Error)
            .with_error(response.error_message().unwrap_or("async work failed"))
            .with_failure_type(FailureType::Application),
        )
      }
      Notification::Results(results) => state.handle_async_response(&context, results).await,
    };

    match result {
      Ok(response) => self.handle_response(&context, state, response).await,
      Err(e) => self.handle_exception(&context, state, e.to_string()).await,
    }
  }
}

fn resume_interrupt_id(notification: &Notification) -> Option<String> {
  let Notification::Results(results) = notification else {
    return None;
  };
  results.values().find_map(|response| match response {
    statewright_graph::ResponseData::Signal { params } => params
      .get(RESUME_INTERRUPT_KEY)
      .and_then(|v| v.as_str())
      .map(str::to_string),
    _ => None,
  })
}
