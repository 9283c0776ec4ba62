//! Shared harness for executor integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use statewright_config::StateMachineDef;
use statewright_context::ExecutionContext;
use statewright_engine::{
  CallbackPump, ChannelCallback, ChannelNotifier, DelegateTask, DispatchError, EngineEvent, ExecutionOutcome,
  ExecutionRequest, ExecutorBuilder, InMemoryWaitNotify, StateMachineExecutor, TaskDispatcher,
  TokioDelayScheduler, builtin_registry,
};
use statewright_graph::{ExecutionResponse, ResponseData, State, StateError, StateInfo, StateMachine, StateTypeMetadata};
use statewright_store::{ExecutionStatus, InstanceQuery, MemoryStore, StateExecutionInstance, Store};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const CALLBACK: &str = "test";

/// Dispatcher that records tasks; completion is driven by the test through
/// `done_with(task_id, ..)`.
#[derive(Default)]
pub struct RecordingDispatcher {
  pub tasks: Mutex<Vec<DelegateTask>>,
  pub aborted: Mutex<Vec<String>>,
  pub expired: Mutex<Vec<String>>,
}

impl RecordingDispatcher {
  pub fn task_ids(&self) -> Vec<String> {
    self.tasks.lock().unwrap().iter().map(|t| t.task_id.clone()).collect()
  }

  pub fn aborted(&self) -> Vec<String> {
    self.aborted.lock().unwrap().clone()
  }

  pub fn expired(&self) -> Vec<String> {
    self.expired.lock().unwrap().clone()
  }
}

#[async_trait]
impl TaskDispatcher for RecordingDispatcher {
  async fn execute(&self, task: DelegateTask) -> Result<String, DispatchError> {
    let id = task.task_id.clone();
    self.tasks.lock().unwrap().push(task);
    Ok(id)
  }

  async fn execute_sync(&self, task: DelegateTask) -> Result<ResponseData, DispatchError> {
    self.tasks.lock().unwrap().push(task);
    Ok(ResponseData::Task {
      status: ExecutionStatus::Success,
      output: serde_json::Value::Null,
      error: None,
    })
  }

  async fn abort_task(&self, task_id: &str) -> Result<(), DispatchError> {
    self.aborted.lock().unwrap().push(task_id.to_string());
    Ok(())
  }

  async fn expire_task(&self, task_id: &str) -> Result<(), DispatchError> {
    self.expired.lock().unwrap().push(task_id.to_string());
    Ok(())
  }
}

/// Waits on the correlation ids listed in its `on` property.
pub struct WaitState(StateInfo);

#[async_trait]
impl State for WaitState {
  fn info(&self) -> &StateInfo {
    &self.0
  }

  async fn execute(&self, context: &ExecutionContext) -> Result<ExecutionResponse, StateError> {
    let ids = match self.0.param(context, "on") {
      Some(serde_json::Value::Array(ids)) => ids
        .iter()
        .filter_map(|id| id.as_str())
        .map(|id| context.render(id))
        .collect::<Result<Vec<_>, _>>()?,
      _ => Vec::new(),
    };
    Ok(ExecutionResponse::async_wait(ids))
  }
}

/// Fails until the instance has been retried `failures` times.
pub struct FlakyState(StateInfo);

#[async_trait]
impl State for FlakyState {
  fn info(&self) -> &StateInfo {
    &self.0
  }

  async fn execute(&self, context: &ExecutionContext) -> Result<ExecutionResponse, StateError> {
    let failures = self
      .0
      .param(context, "failures")
      .and_then(|v| v.as_u64())
      .unwrap_or(0);
    if u64::from(context.retry_count()) < failures {
      return Err(StateError::execution(format!("attempt {} failed", context.retry_count())));
    }
    Ok(ExecutionResponse::success().with_output(json!({"attempts": context.retry_count() + 1})))
  }
}

/// Spawns one child bound to the `machine` child machine and `state`.
pub struct SpawnState(StateInfo);

#[async_trait]
impl State for SpawnState {
  fn info(&self) -> &StateInfo {
    &self.0
  }

  async fn execute(&self, context: &ExecutionContext) -> Result<ExecutionResponse, StateError> {
    let machine = self.0.rendered_param(context, "machine")?.unwrap_or_default();
    let notify_id = format!("spawn-{}", uuid::Uuid::new_v4());
    let mut child = context.instance().spawn_child(machine, notify_id.clone());
    if let Some(state) = self.0.rendered_param(context, "state")? {
      child.state_name = state;
    }
    Ok(ExecutionResponse::async_wait(vec![notify_id]).with_spawned(vec![child]))
  }
}

pub struct Harness {
  pub executor: Arc<StateMachineExecutor>,
  pub store: Arc<dyn Store>,
  pub wait_notify: Arc<InMemoryWaitNotify>,
  pub dispatcher: Arc<RecordingDispatcher>,
  pub events: mpsc::UnboundedReceiver<EngineEvent>,
  outcomes: mpsc::UnboundedReceiver<ExecutionOutcome>,
  cancel: CancellationToken,
}

impl Drop for Harness {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

impl Harness {
  pub fn new() -> Self {
    Self::with(Arc::new(MemoryStore::new()), |builder| builder)
  }

  pub fn with(store: Arc<dyn Store>, configure: impl FnOnce(ExecutorBuilder) -> ExecutorBuilder) -> Self {
    let (wait_notify, deliveries) = InMemoryWaitNotify::new();
    let wait_notify = Arc::new(wait_notify);
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let delay = Arc::new(TokioDelayScheduler::new(wait_notify.clone()));
    let (outcome_sender, outcomes) = mpsc::unbounded_channel();
    let (event_sender, events) = mpsc::unbounded_channel();

    let builder = StateMachineExecutor::builder(store.clone(), dispatcher.clone(), wait_notify.clone(), delay)
      .callback(CALLBACK, Arc::new(ChannelCallback::new(outcome_sender)))
      .notifier(Arc::new(ChannelNotifier::new(event_sender)));
    let executor = configure(builder).build();

    let cancel = CancellationToken::new();
    tokio::spawn(CallbackPump::new(executor.clone(), deliveries).start(cancel.clone()));

    Self {
      executor,
      store,
      wait_notify,
      dispatcher,
      events,
      outcomes,
      cancel,
    }
  }

  /// Build a machine from JSON with the built-in and test state types.
  pub async fn register(&self, def: serde_json::Value) {
    let def: StateMachineDef = serde_json::from_value(def).expect("invalid machine definition");
    let mut registry = builtin_registry(self.dispatcher.clone());
    registry.register("wait", StateTypeMetadata::any(), |info| {
      Ok(Arc::new(WaitState(info)) as Arc<dyn State>)
    });
    registry.register("flaky", StateTypeMetadata::any(), |info| {
      Ok(Arc::new(FlakyState(info)) as Arc<dyn State>)
    });
    registry.register("spawn", StateTypeMetadata::any(), |info| {
      Ok(Arc::new(SpawnState(info)) as Arc<dyn State>)
    });
    let machine = StateMachine::build(&def, &registry).expect("machine failed to build");
    self.executor.register_machine(machine).await;
  }

  /// Start an execution reporting to the test callback.
  pub async fn start(&self, request: ExecutionRequest) -> StateExecutionInstance {
    self
      .executor
      .execute(request.with_callback(CALLBACK))
      .await
      .expect("execution failed to start")
  }

  pub async fn outcome(&mut self) -> ExecutionOutcome {
    self.outcome_within(Duration::from_secs(10)).await
  }

  pub async fn outcome_within(&mut self, limit: Duration) -> ExecutionOutcome {
    tokio::time::timeout(limit, self.outcomes.recv())
      .await
      .expect("timed out waiting for execution outcome")
      .expect("outcome channel closed")
  }

  /// Assert that no further outcome arrives for a short while.
  pub async fn assert_no_outcome(&mut self) {
    let next = tokio::time::timeout(Duration::from_millis(200), self.outcomes.recv()).await;
    assert!(next.is_err(), "unexpected outcome: {next:?}");
  }

  pub async fn instances(&self, execution_id: &str) -> Vec<StateExecutionInstance> {
    self
      .store
      .list_instances(&InstanceQuery::execution(execution_id))
      .await
      .expect("failed to list instances")
  }

  /// Poll until an instance of `state_name` reaches `status`.
  pub async fn wait_for(&self, execution_id: &str, state_name: &str, status: ExecutionStatus) -> StateExecutionInstance {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
      let found = self
        .instances(execution_id)
        .await
        .into_iter()
        .find(|i| i.state_name == state_name && i.status == status);
      if let Some(instance) = found {
        return instance;
      }
      assert!(
        tokio::time::Instant::now() < deadline,
        "{state_name} never reached {status}: {:?}",
        self
          .instances(execution_id)
          .await
          .iter()
          .map(|i| (i.state_name.clone(), i.status))
          .collect::<Vec<_>>()
      );
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
  }

  /// Final status of every instance by state name, in creation order.
  pub async fn statuses(&self, execution_id: &str) -> Vec<(String, ExecutionStatus)> {
    self
      .instances(execution_id)
      .await
      .into_iter()
      .map(|i| (i.state_name, i.status))
      .collect()
  }

  /// Wait for the next event matching `predicate`, discarding the rest.
  pub async fn event(&mut self, predicate: impl Fn(&EngineEvent) -> bool) -> EngineEvent {
    loop {
      let event = tokio::time::timeout(Duration::from_secs(10), self.events.recv())
        .await
        .expect("timed out waiting for engine event")
        .expect("event channel closed");
      if predicate(&event) {
        return event;
      }
    }
  }
}

pub fn task_done(status: ExecutionStatus, output: serde_json::Value) -> ResponseData {
  ResponseData::Task {
    status,
    output,
    error: None,
  }
}

pub fn params(value: serde_json::Value) -> statewright_store::Params {
  value.as_object().cloned().unwrap_or_default()
}

pub fn by_state<'a>(instances: &'a [StateExecutionInstance], state_name: &str) -> Vec<&'a StateExecutionInstance> {
  instances.iter().filter(|i| i.state_name == state_name).collect()
}
