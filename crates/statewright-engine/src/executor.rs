//! The state machine executor.
//!
//! Every step of an execution is a persisted [`StateExecutionInstance`].
//! The executor moves instances through their statuses with conditional
//! updates, so whichever writer loses a race simply observes that someone
//! else already moved the record on.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use statewright_config::EngineSettings;
use statewright_context::{
  ElementListResolver, ExecutionContext, ResolverChain, SecretResolver, WorkflowStandardParams,
};
use statewright_graph::{ExecutionResponse, FailureType, State, StateMachine};
use statewright_store::{
  ContextElement, ContextElementType, ExecutionStatus, Params, StateExecutionInstance, Store,
};
use tokio::sync::{RwLock, Semaphore};
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

use crate::advisor::{AdvisorRegistry, ExecutionEvent, ExecutionEventAdvice, ExecutionEventAdvisor};
use crate::callback::{CallbackRegistry, ExecutionCallback};
use crate::delay::DelayScheduler;
use crate::dispatcher::TaskDispatcher;
use crate::error::ExecutorError;
use crate::events::{EngineEvent, ExecutionNotifier, NoopNotifier};
use crate::wait_notify::{NotifyCallback, WaitNotify};

/// A unit of background work run on the worker pool.
pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = Result<(), ExecutorError>> + Send + 'static>>;

/// Statuses an instance may be dispatched from.
const DISPATCHABLE: &[ExecutionStatus] = &[
  ExecutionStatus::New,
  ExecutionStatus::Queued,
  ExecutionStatus::Paused,
];

/// A request to start a new execution of a registered machine.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
  pub machine_id: String,
  /// Generated when empty.
  pub execution_id: Option<String>,
  pub execution_name: Option<String>,
  /// Workflow variables, readable as `${workflow.<name>}`.
  pub variables: Params,
  pub context_elements: Vec<ContextElement>,
  /// Registered callback invoked when the execution completes.
  pub callback: Option<String>,
  /// Registered advisors consulted for every instance of the execution.
  pub advisors: Vec<String>,
}

impl ExecutionRequest {
  pub fn new(machine_id: impl Into<String>) -> Self {
    Self {
      machine_id: machine_id.into(),
      ..Default::default()
    }
  }

  pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
    self.execution_id = Some(execution_id.into());
    self
  }

  pub fn with_variables(mut self, variables: Params) -> Self {
    self.variables = variables;
    self
  }

  pub fn with_context_element(mut self, element: ContextElement) -> Self {
    self.context_elements.push(element);
    self
  }

  pub fn with_callback(mut self, callback: impl Into<String>) -> Self {
    self.callback = Some(callback.into());
    self
  }

  pub fn with_advisor(mut self, advisor: impl Into<String>) -> Self {
    self.advisors.push(advisor.into());
    self
  }
}

/// Drives state machines over persisted execution records.
///
/// # Usage
///
/// ```ignore
/// let (wait_notify, deliveries) = InMemoryWaitNotify::new();
/// let wait_notify = Arc::new(wait_notify);
/// let delay = Arc::new(TokioDelayScheduler::new(wait_notify.clone()));
/// let executor = StateMachineExecutor::builder(store, dispatcher, wait_notify, delay)
///   .callback("cli", Arc::new(ChannelCallback::new(sender)))
///   .build();
/// executor.register_machine(machine).await;
/// tokio::spawn(CallbackPump::new(executor.clone(), deliveries).start(cancel));
/// executor.execute(ExecutionRequest::new("deploy").with_callback("cli")).await?;
/// ```
pub struct StateMachineExecutor {
  pub(crate) settings: EngineSettings,
  pub(crate) store: Arc<dyn Store>,
  pub(crate) dispatcher: Arc<dyn TaskDispatcher>,
  pub(crate) wait_notify: Arc<dyn WaitNotify>,
  pub(crate) delay: Arc<dyn DelayScheduler>,
  pub(crate) notifier: Arc<dyn ExecutionNotifier>,
  pub(crate) advisors: AdvisorRegistry,
  pub(crate) callbacks: CallbackRegistry,
  resolvers: ResolverChain,
  secrets: Option<Arc<dyn SecretResolver>>,
  machines: RwLock<HashMap<String, Arc<StateMachine>>>,
  workers: Arc<Semaphore>,
}

/// Builder for [`StateMachineExecutor`].
pub struct ExecutorBuilder {
  settings: EngineSettings,
  store: Arc<dyn Store>,
  dispatcher: Arc<dyn TaskDispatcher>,
  wait_notify: Arc<dyn WaitNotify>,
  delay: Arc<dyn DelayScheduler>,
  notifier: Arc<dyn ExecutionNotifier>,
  advisors: AdvisorRegistry,
  callbacks: CallbackRegistry,
  resolvers: Option<ResolverChain>,
  secrets: Option<Arc<dyn SecretResolver>>,
}

impl ExecutorBuilder {
  pub fn settings(mut self, settings: EngineSettings) -> Self {
    self.settings = settings;
    self
  }

  pub fn notifier(mut self, notifier: Arc<dyn ExecutionNotifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn advisor(mut self, id: impl Into<String>, advisor: Arc<dyn ExecutionEventAdvisor>) -> Self {
    self.advisors.insert(id, advisor);
    self
  }

  pub fn callback(mut self, id: impl Into<String>, callback: Arc<dyn ExecutionCallback>) -> Self {
    self.callbacks.insert(id, callback);
    self
  }

  /// Replace the default resolvers (`services`, `instances`, `artifacts`).
  pub fn resolvers(mut self, resolvers: ResolverChain) -> Self {
    self.resolvers = Some(resolvers);
    self
  }

  pub fn secrets(mut self, secrets: Arc<dyn SecretResolver>) -> Self {
    self.secrets = Some(secrets);
    self
  }

  pub fn build(self) -> Arc<StateMachineExecutor> {
    let resolvers = self.resolvers.unwrap_or_else(|| {
      ResolverChain::new()
        .with(Arc::new(ElementListResolver::new("services", ContextElementType::Service)))
        .with(Arc::new(ElementListResolver::new("instances", ContextElementType::Instance)))
        .with(Arc::new(ElementListResolver::new("artifacts", ContextElementType::Artifact)))
    });
    let workers = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));
    Arc::new(StateMachineExecutor {
      settings: self.settings,
      store: self.store,
      dispatcher: self.dispatcher,
      wait_notify: self.wait_notify,
      delay: self.delay,
      notifier: self.notifier,
      advisors: self.advisors,
      callbacks: self.callbacks,
      resolvers,
      secrets: self.secrets,
      machines: RwLock::new(HashMap::new()),
      workers,
    })
  }
}

impl StateMachineExecutor {
  pub fn builder(
    store: Arc<dyn Store>,
    dispatcher: Arc<dyn TaskDispatcher>,
    wait_notify: Arc<dyn WaitNotify>,
    delay: Arc<dyn DelayScheduler>,
  ) -> ExecutorBuilder {
    ExecutorBuilder {
      settings: EngineSettings::default(),
      store,
      dispatcher,
      wait_notify,
      delay,
      notifier: Arc::new(NoopNotifier),
      advisors: AdvisorRegistry::default(),
      callbacks: CallbackRegistry::default(),
      resolvers: None,
      secrets: None,
    }
  }

  pub fn settings(&self) -> &EngineSettings {
    &self.settings
  }

  pub fn store(&self) -> &Arc<dyn Store> {
    &self.store
  }

  /// Make a machine available to executions.
  pub async fn register_machine(&self, machine: StateMachine) {
    info!(machine_id = %machine.id(), "registering state machine");
    self
      .machines
      .write()
      .await
      .insert(machine.id().to_string(), Arc::new(machine));
  }

  pub(crate) async fn machine(&self, machine_id: &str) -> Result<Arc<StateMachine>, ExecutorError> {
    self
      .machines
      .read()
      .await
      .get(machine_id)
      .cloned()
      .ok_or_else(|| ExecutorError::UnknownMachine(machine_id.to_string()))
  }

  /// Resolve the state an instance is bound to.
  pub(crate) async fn state_of(&self, instance: &StateExecutionInstance) -> Result<Arc<dyn State>, ExecutorError> {
    let machine = self.machine(&instance.state_machine_id).await?;
    Ok(machine.get_state(instance.child_state_machine_id.as_deref(), &instance.state_name)?)
  }

  /// Start a new execution at the machine's initial state.
  #[instrument(name = "execute", skip(self, request), fields(machine_id = %request.machine_id))]
  pub async fn execute(self: &Arc<Self>, request: ExecutionRequest) -> Result<StateExecutionInstance, ExecutorError> {
    let machine = self.machine(&request.machine_id).await?;
    let execution_id = request
      .execution_id
      .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut instance = StateExecutionInstance::new(
      execution_id,
      machine.id(),
      machine.initial_state_name(),
    );
    instance.execution_name = request.execution_name;
    instance.callback = request.callback;
    instance.advisors = request.advisors;
    instance.context_elements.push(
      WorkflowStandardParams::new(machine.error_strategy())
        .with_variables(request.variables)
        .into_element(),
    );
    for element in request.context_elements {
      instance.context_elements.push(element);
    }

    info!(execution_id = %instance.execution_id, "starting execution");
    self.trigger(instance).await
  }

  /// Persist a NEW instance and hand it to the worker pool.
  ///
  /// An empty state name binds the instance to the initial state of its
  /// (child) machine.
  #[instrument(
    name = "trigger",
    skip(self, instance),
    fields(execution_id = %instance.execution_id, state = %instance.state_name)
  )]
  pub async fn trigger(
    self: &Arc<Self>,
    mut instance: StateExecutionInstance,
  ) -> Result<StateExecutionInstance, ExecutorError> {
    let machine = self.machine(&instance.state_machine_id).await?;
    let child = instance.child_state_machine_id.as_deref();
    let state = if instance.state_name.is_empty() {
      machine.initial_state(child)?
    } else {
      machine.get_state(child, &instance.state_name)?
    };

    instance.state_name = state.name().to_string();
    if instance.display_name.is_empty() {
      instance.display_name = state.name().to_string();
    }
    instance.state_type = state.state_type().to_string();
    instance.rollback = state.info().rollback;
    instance.status = ExecutionStatus::New;
    instance.expiry_ts = None;

    self.store.insert_instance(&instance).await?;
    self.notifier.notify(EngineEvent::StatusChanged {
      execution_id: instance.execution_id.clone(),
      instance_id: instance.id.clone(),
      state_name: instance.state_name.clone(),
      status: ExecutionStatus::New,
    });
    debug!(instance_id = %instance.id, "instance triggered");

    let queued = self
      .cas_update(&instance.id, &[ExecutionStatus::New], None, |record| {
        record.status = ExecutionStatus::Queued;
      })
      .await?;
    self.spawn("dispatch", self.dispatch_future(instance.id.clone(), None));
    Ok(queued.unwrap_or(instance))
  }

  /// Load an instance by id.
  pub async fn instance(&self, instance_id: &str) -> Result<StateExecutionInstance, ExecutorError> {
    Ok(self.store.get_instance(instance_id).await?)
  }

  /// Run a task on the worker pool, logging its failure.
  pub(crate) fn spawn(&self, task: &'static str, future: BoxFuture) {
    let workers = self.workers.clone();
    tokio::spawn(
      async move {
        let Ok(_permit) = workers.acquire_owned().await else {
          return;
        };
        if let Err(e) = future.await {
          error!(error = %e, "background task failed");
        }
      }
      .instrument(info_span!("worker", task)),
    );
  }

  pub(crate) fn dispatch_future(self: &Arc<Self>, instance_id: String, resume_interrupt_id: Option<String>) -> BoxFuture {
    let executor = self.clone();
    Box::pin(async move {
      executor
        .start_execution(&instance_id, resume_interrupt_id.as_deref())
        .await
    })
  }

  /// Move a dispatched instance to STARTING and run it, honoring
  /// PAUSE_ALL and pre-execution waits.
  #[instrument(name = "start_execution", skip(self), fields(instance_id = %instance_id))]
  pub(crate) async fn start_execution(
    self: &Arc<Self>,
    instance_id: &str,
    resume_interrupt_id: Option<&str>,
  ) -> Result<(), ExecutorError> {
    let instance = self.store.get_instance(instance_id).await?;
    if resume_interrupt_id.is_none() {
      let interrupts = self.store.list_interrupts(&instance.execution_id, false).await?;
      let pause_all = interrupts
        .iter()
        .find(|i| i.interrupt_type == statewright_store::ExecutionInterruptType::PauseAll);
      if let Some(pause_all) = pause_all {
        let paused = self
          .cas_update(
            instance_id,
            &[ExecutionStatus::New, ExecutionStatus::Queued],
            Some(pause_all),
            |record| {
              record.status = ExecutionStatus::Paused;
              record.expiry_ts = None;
            },
          )
          .await?;
        if paused.is_some() {
          info!(interrupt_id = %pause_all.id, "instance held by pause-all");
          self
            .wait_notify
            .wait_for_all(
              NotifyCallback::ResumeAll {
                execution_id: instance.execution_id.clone(),
                instance_id: instance_id.to_string(),
              },
              vec![pause_all.id.clone()],
            )
            .await?;
          // Lifted while the wait was being registered.
          if self.store.get_interrupt(&pause_all.id).await?.seized {
            self.wait_notify.cancel_waits(instance_id).await?;
            self.spawn("dispatch", self.dispatch_future(instance_id.to_string(), None));
          }
        }
        return Ok(());
      }
    }

    let resumed_by = match resume_interrupt_id {
      Some(id) => Some(self.store.get_interrupt(id).await?),
      None => None,
    };
    let state = self.state_of(&instance).await?;
    let expiry = self.expiry_for(state.as_ref(), &instance);
    let now = Utc::now();
    let started = self
      .cas_update(instance_id, DISPATCHABLE, resumed_by.as_ref(), |record| {
        record.status = ExecutionStatus::Starting;
        record.start_ts = Some(now);
        record.end_ts = None;
        record.expiry_ts = Some(expiry);
        record.begin_attempt(now);
      })
      .await?;
    let Some(instance) = started else {
      debug!("instance already left the dispatchable statuses");
      return Ok(());
    };

    let wait = state.info().wait_interval_secs.unwrap_or(0);
    if wait == 0 {
      return self.start_state_execution(instance, state).await;
    }

    let context = self.context(instance.clone());
    let advice = self
      .invoke_advisors(&context, state.as_ref(), ExecutionStatus::Starting, &[])
      .await;
    if let Some(advice) = advice.filter(|a| a.skip_state) {
      let response = skip_response(&advice);
      return self.handle_response(&context, state, response).await;
    }

    let waiting = self
      .cas_update(instance_id, &[ExecutionStatus::Starting], None, |record| {
        record.status = ExecutionStatus::Waiting;
        let data = record.current_data_mut();
        data.wait_interval_secs = Some(wait);
        data.error_msg = Some(format!("Waiting {wait} seconds before execution"));
      })
      .await?;
    if waiting.is_none() {
      return Ok(());
    }
    info!(seconds = wait, "waiting before execution");
    let correlation_id = self.delay.delay(wait).await?;
    self
      .wait_notify
      .wait_for_all(
        NotifyCallback::WaitElapsed {
          execution_id: instance.execution_id.clone(),
          instance_id: instance.id.clone(),
          attempt: instance.retry_count,
        },
        vec![correlation_id],
      )
      .await?;
    Ok(())
  }

  /// Start an instance whose pre-execution wait elapsed.
  ///
  /// A wait that belongs to an earlier attempt of a retried instance is
  /// ignored.
  pub(crate) async fn resume_after_wait(self: &Arc<Self>, instance_id: &str, attempt: u32) -> Result<(), ExecutorError> {
    let current = self.store.get_instance(instance_id).await?;
    if current.retry_count != attempt {
      debug!(instance_id = %instance_id, attempt, "wait elapsed for an earlier attempt");
      return Ok(());
    }
    let started = self
      .cas_update(instance_id, &[ExecutionStatus::Waiting], None, |record| {
        record.status = ExecutionStatus::Starting;
        record.current_data_mut().error_msg = None;
      })
      .await?;
    let Some(instance) = started else {
      debug!(instance_id = %instance_id, "wait elapsed for an instance that moved on");
      return Ok(());
    };
    let state = self.state_of(&instance).await?;
    self.start_state_execution(instance, state).await
  }

  /// Consult advisors, then execute the state and handle its result.
  #[instrument(
    name = "execute_state",
    skip(self, instance, state),
    fields(instance_id = %instance.id, state = %instance.state_name, state_type = %instance.state_type)
  )]
  pub(crate) async fn start_state_execution(
    self: &Arc<Self>,
    instance: StateExecutionInstance,
    state: Arc<dyn State>,
  ) -> Result<(), ExecutorError> {
    let context = self.context(instance);
    let advice = self
      .invoke_advisors(&context, state.as_ref(), ExecutionStatus::Starting, &[])
      .await;

    let result = match advice {
      Some(advice) if advice.skip_state => {
        info!("state skipped by advisor");
        Ok(skip_response(&advice))
      }
      Some(ExecutionEventAdvice {
        execution_response: Some(response),
        ..
      }) => Ok(response),
      _ => state.execute(&context).await,
    };

    match result {
      Ok(response) => self.handle_response(&context, state, response).await,
      Err(e) => self.handle_exception(&context, state, e.to_string()).await,
    }
  }

  /// Record a state's result and route the instance onwards.
  #[instrument(
    name = "handle_response",
    skip_all,
    fields(instance_id = %context.instance().id, status = %response.status, is_async = response.is_async)
  )]
  pub(crate) async fn handle_response(
    self: &Arc<Self>,
    context: &ExecutionContext,
    state: Arc<dyn State>,
    response: ExecutionResponse,
  ) -> Result<(), ExecutorError> {
    let instance = context.instance();
    let response = if response.is_async && response.correlation_ids.is_empty() {
      warn!("async response without correlation ids");
      ExecutionResponse::sync(ExecutionStatus::Error)
        .with_error("async response carried no correlation ids")
        .with_failure_type(FailureType::Application)
    } else {
      response
    };

    if response.is_async {
      let status = if response.status == ExecutionStatus::Paused {
        ExecutionStatus::Paused
      } else {
        ExecutionStatus::Running
      };
      let expiry = (status == ExecutionStatus::Running && instance.status != ExecutionStatus::Running)
        .then(|| self.expiry_for(state.as_ref(), instance));

      self
        .wait_notify
        .wait_for_all(
          NotifyCallback::AsyncResume {
            execution_id: instance.execution_id.clone(),
            instance_id: instance.id.clone(),
          },
          response.correlation_ids.clone(),
        )
        .await?;

      let Some(updated) = self.apply_response(&instance.id, status, &response, expiry).await? else {
        self.wait_notify.cancel_waits(&instance.id).await?;
        return self.lost_update(&instance.id).await;
      };
      let updated_context = self.context(updated.clone());
      let _ = self
        .invoke_advisors(&updated_context, state.as_ref(), status, &response.failure_types)
        .await;
      if status == ExecutionStatus::Running {
        self.spawn_children(&updated, response.spawned_instances).await?;
      }
      return Ok(());
    }

    let status = response.status;
    let Some(updated) = self.apply_response(&instance.id, status, &response, None).await? else {
      return self.lost_update(&instance.id).await;
    };
    let context = self.context(updated);
    let advice = self
      .invoke_advisors(&context, state.as_ref(), status, &response.failure_types)
      .await
      .filter(|a| !a.skip_state);
    match advice {
      Some(advice) => self.handle_advice(&context, status, advice).await,
      None => self.follow_status(&context, status).await,
    }
  }

  /// Record an error raised by a state and route the instance as failed.
  #[instrument(name = "handle_exception", skip_all, fields(instance_id = %context.instance().id))]
  pub(crate) async fn handle_exception(
    self: &Arc<Self>,
    context: &ExecutionContext,
    state: Arc<dyn State>,
    message: String,
  ) -> Result<(), ExecutorError> {
    error!(error = %message, "state execution failed");
    let response = ExecutionResponse::failed(message).with_failure_type(FailureType::Application);
    let instance_id = context.instance().id.clone();
    let Some(updated) = self
      .apply_response(&instance_id, ExecutionStatus::Failed, &response, None)
      .await?
    else {
      return self.lost_update(&instance_id).await;
    };
    let context = self.context(updated);
    let advice = self
      .invoke_advisors(&context, state.as_ref(), ExecutionStatus::Failed, &response.failure_types)
      .await
      .filter(|a| !a.skip_state);
    match advice {
      Some(advice) => self.handle_advice(&context, ExecutionStatus::Failed, advice).await,
      None => self.failed_transition(&context).await,
    }
  }

  /// Follow the default routing for a final status.
  pub(crate) async fn follow_status(
    self: &Arc<Self>,
    context: &ExecutionContext,
    status: ExecutionStatus,
  ) -> Result<(), ExecutorError> {
    if status.is_positive() {
      self.success_transition(context).await
    } else if status.is_broke() {
      self.failed_transition(context).await
    } else if status.is_discontinued() {
      self.end_transition(context, status).await
    } else {
      warn!(status = %status, "synchronous response left the instance in a non-final status");
      Ok(())
    }
  }

  /// A conditional update found the record in an unexpected status.
  async fn lost_update(&self, instance_id: &str) -> Result<(), ExecutorError> {
    let current = self.store.get_instance(instance_id).await?;
    if current.status.is_final() {
      debug!(status = %current.status, "instance already finalized");
    } else {
      warn!(status = %current.status, "instance was moved on by another writer");
    }
    Ok(())
  }

  pub(crate) async fn invoke_advisors(
    &self,
    context: &ExecutionContext,
    state: &dyn State,
    status: ExecutionStatus,
    failure_types: &[FailureType],
  ) -> Option<ExecutionEventAdvice> {
    let ids = &context.instance().advisors;
    if ids.is_empty() {
      return None;
    }
    let event = ExecutionEvent {
      context,
      state,
      status,
      failure_types,
    };
    self.advisors.advise(ids, &event).await
  }

  /// Build the read model a state sees.
  pub(crate) fn context(&self, instance: StateExecutionInstance) -> ExecutionContext {
    let context = ExecutionContext::new(instance)
      .with_resolvers(self.resolvers.clone())
      .with_max_depth(self.settings.max_expression_depth);
    match &self.secrets {
      Some(secrets) => context.with_secrets(secrets.clone()),
      None => context,
    }
  }

  /// When an attempt of `state` started now should expire.
  pub(crate) fn expiry_for(&self, state: &dyn State, instance: &StateExecutionInstance) -> DateTime<Utc> {
    let timeout_ms = state
      .info()
      .timeout_ms
      .or(instance.state_timeout_ms)
      .unwrap_or(self.settings.default_state_timeout_ms);
    let wait_ms = state.info().wait_interval_secs.unwrap_or(0).saturating_mul(1000);
    let total = i64::try_from(timeout_ms.saturating_add(wait_ms)).unwrap_or(i64::MAX);
    Utc::now()
      .checked_add_signed(Duration::milliseconds(total))
      .unwrap_or(DateTime::<Utc>::MAX_UTC)
  }
}

/// The response recorded for a state an advisor chose to skip.
fn skip_response(advice: &ExecutionEventAdvice) -> ExecutionResponse {
  match &advice.skip_error {
    Some(error) => ExecutionResponse::failed(error.clone()),
    None => ExecutionResponse::sync(ExecutionStatus::Skipped),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_skip_response() {
    assert_eq!(
      skip_response(&ExecutionEventAdvice::skip()).status,
      ExecutionStatus::Skipped
    );
    let advice = ExecutionEventAdvice {
      skip_error: Some("bad condition".to_string()),
      ..ExecutionEventAdvice::skip()
    };
    let response = skip_response(&advice);
    assert_eq!(response.status, ExecutionStatus::Failed);
    assert_eq!(response.error_message.as_deref(), Some("bad condition"));
  }

  #[test]
  fn test_request_builder() {
    let request = ExecutionRequest::new("deploy")
      .with_execution_id("exec-1")
      .with_callback("cli")
      .with_advisor("failure-strategy");
    assert_eq!(request.execution_id.as_deref(), Some("exec-1"));
    assert_eq!(request.callback.as_deref(), Some("cli"));
    assert_eq!(request.advisors, vec!["failure-strategy".to_string()]);
  }
}
