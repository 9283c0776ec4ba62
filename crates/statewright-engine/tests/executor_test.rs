//! End-to-end executions over the in-memory store.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use statewright_engine::{
  EngineEvent, ExecutionEvent, ExecutionEventAdvice, ExecutionEventAdvisor, ExecutionRequest, ExecutorError,
  FailureStrategy, FailureStrategyAdvisor, RepairAction, SkipConditionAdvisor, WaitNotify, approval_correlation_id,
};
use statewright_graph::{GraphError, ResponseData, State};
use statewright_store::{
  ContextElementType, ExecutionInterruptType, ExecutionStatus, SqliteStore, StateExecutionInstance,
};

use common::{Harness, by_state, params, task_done};

fn chain() -> serde_json::Value {
  json!({
    "machine_id": "build",
    "name": "Build",
    "initial_state": "compile",
    "states": [
      { "name": "compile", "type": "noop",
        "properties": { "outputs": { "artifact": "app-${workflow.version}.tar" } } },
      { "name": "publish", "type": "noop",
        "properties": { "outputs": { "published": "${context.compile.artifact}" } } }
    ],
    "transitions": [{ "from": "compile", "to": "publish" }]
  })
}

fn rollout(forks: serde_json::Value, right_status: &str) -> serde_json::Value {
  json!({
    "machine_id": "rollout",
    "name": "Rollout",
    "initial_state": "fan",
    "states": [
      { "name": "fan", "type": "fork", "properties": { "forks": forks } },
      { "name": "verify", "type": "noop" }
    ],
    "transitions": [{ "from": "fan", "to": "verify" }],
    "child_machines": [
      { "machine_id": "left", "name": "Left", "initial_state": "l1",
        "states": [{ "name": "l1", "type": "noop", "properties": { "outputs": { "zone": "${fork.parent}" } } }] },
      { "machine_id": "right", "name": "Right", "initial_state": "r1",
        "states": [{ "name": "r1", "type": "noop", "properties": { "status": right_status } }] }
    ]
  })
}

#[tokio::test]
async fn test_sync_chain_runs_to_success() {
  let mut harness = Harness::new();
  harness.register(chain()).await;

  let root = harness
    .start(ExecutionRequest::new("build").with_variables(params(json!({ "version": "1.2" }))))
    .await;
  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Success);
  assert_eq!(outcome.state_name, "publish");
  assert_eq!(outcome.context["context"]["publish"]["published"], json!("app-1.2.tar"));

  let instances = harness.instances(&root.execution_id).await;
  let compile = by_state(&instances, "compile")[0];
  let publish = by_state(&instances, "publish")[0];
  assert_eq!(compile.status, ExecutionStatus::Success);
  assert_eq!(publish.status, ExecutionStatus::Success);
  assert_eq!(compile.next_instance_id.as_deref(), Some(publish.id.as_str()));
  assert_eq!(publish.prev_instance_id.as_deref(), Some(compile.id.as_str()));
  assert!(compile.end_ts.is_some());
  assert!(compile.current_data().is_some_and(|d| d.end_ts.is_some()));

  let finished = harness
    .event(|e| matches!(e, EngineEvent::ExecutionFinished { .. }))
    .await;
  assert_eq!(
    finished,
    EngineEvent::ExecutionFinished {
      execution_id: root.execution_id.clone(),
      status: ExecutionStatus::Success,
    }
  );
}

#[tokio::test]
async fn test_failure_edge_recovers() {
  let mut harness = Harness::new();
  harness
    .register(json!({
      "machine_id": "recovering",
      "name": "Recovering",
      "initial_state": "check",
      "states": [
        { "name": "check", "type": "noop", "properties": { "status": "failed", "error": "disk full" } },
        { "name": "recover", "type": "noop" }
      ],
      "transitions": [{ "from": "check", "to": "recover", "type": "failure" }]
    }))
    .await;

  let root = harness.start(ExecutionRequest::new("recovering")).await;
  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Success);
  assert_eq!(outcome.state_name, "recover");

  let instances = harness.instances(&root.execution_id).await;
  let check = by_state(&instances, "check")[0];
  assert_eq!(check.status, ExecutionStatus::Failed);
  assert_eq!(
    check.current_data().and_then(|d| d.error_msg.as_deref()),
    Some("disk full")
  );
}

#[tokio::test]
async fn test_failure_without_edge_fails_execution() {
  let mut harness = Harness::new();
  harness
    .register(json!({
      "machine_id": "strict",
      "name": "Strict",
      "initial_state": "check",
      "states": [
        { "name": "check", "type": "noop", "properties": { "status": "error" } },
        { "name": "deploy", "type": "noop" }
      ],
      "transitions": [{ "from": "check", "to": "deploy" }]
    }))
    .await;

  let root = harness.start(ExecutionRequest::new("strict")).await;
  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Failed);
  assert_eq!(outcome.state_name, "check");
  assert_eq!(
    harness.statuses(&root.execution_id).await,
    vec![("check".to_string(), ExecutionStatus::Error)]
  );
}

#[tokio::test]
async fn test_async_waits_for_every_correlation_id() {
  let mut harness = Harness::new();
  harness
    .register(json!({
      "machine_id": "gather",
      "name": "Gather",
      "initial_state": "collect",
      "states": [{ "name": "collect", "type": "wait", "properties": { "on": ["a", "b"] } }]
    }))
    .await;

  let root = harness.start(ExecutionRequest::new("gather")).await;
  harness.wait_for(&root.execution_id, "collect", ExecutionStatus::Running).await;

  harness
    .wait_notify
    .done_with("a", task_done(ExecutionStatus::Success, json!(null)))
    .await
    .unwrap();
  harness.assert_no_outcome().await;
  harness.wait_for(&root.execution_id, "collect", ExecutionStatus::Running).await;

  harness
    .wait_notify
    .done_with("b", task_done(ExecutionStatus::Success, json!(null)))
    .await
    .unwrap();
  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Success);
  assert_eq!(harness.wait_notify.pending().await, 0);
}

#[tokio::test]
async fn test_async_error_is_delivered_once() {
  let mut harness = Harness::new();
  harness
    .register(json!({
      "machine_id": "gather",
      "name": "Gather",
      "initial_state": "collect",
      "states": [{ "name": "collect", "type": "wait", "properties": { "on": ["a", "b"] } }]
    }))
    .await;

  let root = harness.start(ExecutionRequest::new("gather")).await;
  harness
    .wait_notify
    .done_with("a", ResponseData::Error { message: "worker lost".to_string() })
    .await
    .unwrap();

  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Failed);
  let collect = harness.wait_for(&root.execution_id, "collect", ExecutionStatus::Error).await;
  assert_eq!(
    collect.current_data().and_then(|d| d.error_msg.as_deref()),
    Some("worker lost")
  );

  harness
    .wait_notify
    .done_with("b", task_done(ExecutionStatus::Success, json!(null)))
    .await
    .unwrap();
  harness.assert_no_outcome().await;
  harness.wait_for(&root.execution_id, "collect", ExecutionStatus::Error).await;
}

#[tokio::test]
async fn test_command_publishes_task_output() {
  let mut harness = Harness::new();
  harness
    .register(json!({
      "machine_id": "deploy",
      "name": "Deploy",
      "initial_state": "run",
      "states": [{ "name": "run", "type": "command", "properties": { "command": "deploy ${workflow.service}" } }]
    }))
    .await;

  let root = harness
    .start(ExecutionRequest::new("deploy").with_variables(params(json!({ "service": "api" }))))
    .await;
  let run = harness.wait_for(&root.execution_id, "run", ExecutionStatus::Running).await;
  let task_ids = harness.dispatcher.task_ids();
  assert_eq!(task_ids.len(), 1);
  assert_eq!(run.delegate_task_id.as_ref(), Some(&task_ids[0]));
  assert_eq!(
    harness.dispatcher.tasks.lock().unwrap()[0].params["command"],
    json!("deploy api")
  );

  harness
    .wait_notify
    .done_with(&task_ids[0], task_done(ExecutionStatus::Success, json!({ "version": "42" })))
    .await
    .unwrap();
  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Success);
  assert_eq!(outcome.context["context"]["run"]["version"], json!("42"));
}

#[tokio::test]
async fn test_approval_resumes_from_paused() {
  let mut harness = Harness::new();
  harness
    .register(json!({
      "machine_id": "release",
      "name": "Release",
      "initial_state": "approve",
      "states": [{ "name": "approve", "type": "approval" }]
    }))
    .await;

  let root = harness.start(ExecutionRequest::new("release")).await;
  let approve = harness.wait_for(&root.execution_id, "approve", ExecutionStatus::Paused).await;
  assert!(approve.expiry_ts.is_none());

  harness
    .wait_notify
    .done_with(
      &approval_correlation_id(&approve),
      ResponseData::Signal {
        params: params(json!({ "approved": true, "by": "ops" })),
      },
    )
    .await
    .unwrap();
  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Success);

  let approve = harness.executor.instance(&approve.id).await.unwrap();
  assert_eq!(
    approve.current_data().map(|d| d.output.clone()),
    Some(json!({ "approved": true, "by": "ops" }))
  );
}

#[tokio::test(start_paused = true)]
async fn test_wait_interval_delays_execution() {
  let mut harness = Harness::new();
  harness
    .register(json!({
      "machine_id": "soak",
      "name": "Soak",
      "initial_state": "settle",
      "states": [{ "name": "settle", "type": "noop", "wait_interval_secs": 30 }]
    }))
    .await;

  let started = tokio::time::Instant::now();
  let root = harness.start(ExecutionRequest::new("soak")).await;
  let waiting = harness.wait_for(&root.execution_id, "settle", ExecutionStatus::Waiting).await;
  assert_eq!(waiting.current_data().and_then(|d| d.wait_interval_secs), Some(30));

  let outcome = harness.outcome_within(Duration::from_secs(120)).await;
  assert_eq!(outcome.status, ExecutionStatus::Success);
  assert!(started.elapsed() >= Duration::from_secs(30));
}

struct ForceSuccess;

#[async_trait]
impl ExecutionEventAdvisor for ForceSuccess {
  async fn on_execution_event(&self, event: &ExecutionEvent<'_>) -> Option<ExecutionEventAdvice> {
    event
      .status
      .is_broke()
      .then(|| ExecutionEventAdvice::action(ExecutionInterruptType::MarkSuccess))
  }
}

#[tokio::test]
async fn test_advisor_overrides_failure() {
  let mut harness = Harness::with(Arc::new(statewright_store::MemoryStore::new()), |builder| {
    builder.advisor("force", Arc::new(ForceSuccess))
  });
  harness
    .register(json!({
      "machine_id": "strict",
      "name": "Strict",
      "initial_state": "check",
      "states": [
        { "name": "check", "type": "noop", "properties": { "status": "failed" } },
        { "name": "deploy", "type": "noop" }
      ],
      "transitions": [{ "from": "check", "to": "deploy" }]
    }))
    .await;

  let root = harness
    .start(ExecutionRequest::new("strict").with_advisor("force"))
    .await;
  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Success);
  assert_eq!(outcome.state_name, "deploy");
  assert_eq!(
    harness.statuses(&root.execution_id).await,
    vec![
      ("check".to_string(), ExecutionStatus::Success),
      ("deploy".to_string(), ExecutionStatus::Success),
    ]
  );
}

#[tokio::test]
async fn test_skip_condition_skips_state() {
  let mut harness = Harness::with(Arc::new(statewright_store::MemoryStore::new()), |builder| {
    builder.advisor(
      "skip",
      Arc::new(SkipConditionAdvisor::new().with_condition("smoke", "${workflow.skip_smoke}")),
    )
  });
  harness
    .register(json!({
      "machine_id": "verify",
      "name": "Verify",
      "initial_state": "smoke",
      "states": [
        { "name": "smoke", "type": "noop", "properties": { "status": "failed" } },
        { "name": "report", "type": "noop" }
      ],
      "transitions": [{ "from": "smoke", "to": "report" }]
    }))
    .await;

  let root = harness
    .start(
      ExecutionRequest::new("verify")
        .with_variables(params(json!({ "skip_smoke": true })))
        .with_advisor("skip"),
    )
    .await;
  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Success);
  assert_eq!(
    harness.statuses(&root.execution_id).await,
    vec![
      ("smoke".to_string(), ExecutionStatus::Skipped),
      ("report".to_string(), ExecutionStatus::Success),
    ]
  );
}

fn flaky(failures: u64) -> serde_json::Value {
  json!({
    "machine_id": "flaky",
    "name": "Flaky",
    "initial_state": "prepare",
    "states": [
      { "name": "prepare", "type": "noop" },
      { "name": "flaky", "type": "flaky", "properties": { "failures": failures } }
    ],
    "transitions": [{ "from": "prepare", "to": "flaky" }]
  })
}

fn retrying(strategy: FailureStrategy) -> Harness {
  Harness::with(Arc::new(statewright_store::MemoryStore::new()), |builder| {
    builder.advisor("failure-strategy", Arc::new(FailureStrategyAdvisor::new(vec![strategy])))
  })
}

#[tokio::test]
async fn test_failure_strategy_retries_until_success() {
  let mut harness = retrying(FailureStrategy::retry(3, Vec::new(), RepairAction::Fail).for_states(&["flaky"]));
  harness.register(flaky(2)).await;

  let root = harness
    .start(ExecutionRequest::new("flaky").with_advisor("failure-strategy"))
    .await;
  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Success);

  let instances = harness.instances(&root.execution_id).await;
  let flaky = by_state(&instances, "flaky");
  assert_eq!(flaky.len(), 1);
  assert_eq!(flaky[0].retry_count, 2);
  assert_eq!(flaky[0].state_execution_data_history.len(), 2);
  assert!(
    flaky[0]
      .state_execution_data_history
      .iter()
      .all(|d| d.status == ExecutionStatus::Failed)
  );
}

#[tokio::test]
async fn test_failure_strategy_gives_up_after_retries() {
  let mut harness = retrying(FailureStrategy::retry(1, Vec::new(), RepairAction::Fail));
  harness.register(flaky(5)).await;

  let root = harness
    .start(ExecutionRequest::new("flaky").with_advisor("failure-strategy"))
    .await;
  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Failed);
  assert_eq!(outcome.state_name, "flaky");

  let flaky = harness.wait_for(&root.execution_id, "flaky", ExecutionStatus::Failed).await;
  assert_eq!(flaky.retry_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failure_strategy_waits_between_retries() {
  let mut harness = retrying(FailureStrategy::retry(2, vec![20], RepairAction::Fail));
  harness.register(flaky(1)).await;

  let started = tokio::time::Instant::now();
  harness
    .start(ExecutionRequest::new("flaky").with_advisor("failure-strategy"))
    .await;
  let outcome = harness.outcome_within(Duration::from_secs(120)).await;
  assert_eq!(outcome.status, ExecutionStatus::Success);
  assert!(started.elapsed() >= Duration::from_secs(20));
}

#[tokio::test]
async fn test_fork_runs_children() {
  let mut harness = Harness::new();
  harness.register(rollout(json!(["left", "right"]), "success")).await;

  let root = harness
    .start(
      ExecutionRequest::new("rollout").with_context_element(
        statewright_store::ContextElement::new(ContextElementType::Environment, "prod")
          .with_param("region", json!("eu")),
      ),
    )
    .await;
  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Success);
  assert_eq!(outcome.state_name, "verify");

  let instances = harness.instances(&root.execution_id).await;
  let fan = by_state(&instances, "fan")[0];
  assert_eq!(fan.status, ExecutionStatus::Success);
  for (state, machine) in [("l1", "left"), ("r1", "right")] {
    let child = by_state(&instances, state)[0];
    assert_eq!(child.status, ExecutionStatus::Success);
    assert_eq!(child.parent_instance_id.as_deref(), Some(fan.id.as_str()));
    assert_eq!(child.child_state_machine_id.as_deref(), Some(machine));
    assert!(
      child
        .context_elements
        .find_named(ContextElementType::Fork, machine)
        .is_some()
    );
    assert!(child.context_elements.find(ContextElementType::Environment).is_some());
  }
  let l1 = by_state(&instances, "l1")[0];
  assert_eq!(l1.current_data().map(|d| d.output["zone"].clone()), Some(json!("fan")));
}

#[tokio::test]
async fn test_fork_fails_when_a_child_fails() {
  let mut harness = Harness::new();
  harness.register(rollout(json!(["left", "right"]), "failed")).await;

  let root = harness.start(ExecutionRequest::new("rollout")).await;
  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Failed);
  assert_eq!(outcome.state_name, "fan");

  let fan = harness.wait_for(&root.execution_id, "fan", ExecutionStatus::Failed).await;
  assert_eq!(
    fan.current_data().and_then(|d| d.error_msg.as_deref()),
    Some("1 of 2 children failed")
  );
}

#[tokio::test]
async fn test_fork_with_unknown_child_machine_succeeds() {
  let mut harness = Harness::new();
  harness.register(rollout(json!(["left", "ghost"]), "success")).await;

  let root = harness.start(ExecutionRequest::new("rollout")).await;
  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Success);

  let instances = harness.instances(&root.execution_id).await;
  assert_eq!(by_state(&instances, "l1").len(), 1);
  assert_eq!(instances.len(), 3);
}

#[tokio::test]
async fn test_phase_runs_child_machine() {
  let mut harness = Harness::new();
  harness
    .register(json!({
      "machine_id": "release",
      "name": "Release",
      "initial_state": "canary",
      "states": [{ "name": "canary", "type": "phase", "properties": { "machine": "canary-steps" } }],
      "child_machines": [
        { "machine_id": "canary-steps", "name": "Canary", "initial_state": "shift",
          "phase_category": "deploy",
          "states": [{ "name": "shift", "type": "noop",
                      "properties": { "outputs": { "phase": "${phase.phase_name}" } } }] }
      ]
    }))
    .await;

  let root = harness.start(ExecutionRequest::new("release")).await;
  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Success);
  assert_eq!(outcome.state_name, "canary");

  let shift = harness.wait_for(&root.execution_id, "shift", ExecutionStatus::Success).await;
  assert_eq!(
    shift.current_data().map(|d| d.output["phase"].clone()),
    Some(json!("canary"))
  );
}

#[tokio::test]
async fn test_trigger_rejects_unknown_bindings() {
  let harness = Harness::new();
  harness.register(rollout(json!(["left"]), "success")).await;

  let mut orphan = StateExecutionInstance::new("exec-1", "rollout", "");
  orphan.child_state_machine_id = Some("ghost".to_string());
  let err = harness.executor.trigger(orphan).await.unwrap_err();
  assert!(matches!(err, ExecutorError::Graph(GraphError::UnknownChildMachine(_))));

  let err = harness.executor.execute(ExecutionRequest::new("missing")).await.unwrap_err();
  assert!(matches!(err, ExecutorError::UnknownMachine(_)));
}

#[tokio::test]
async fn test_sqlite_backed_execution() {
  let dir = tempfile::tempdir().expect("failed to create temp dir");
  let url = format!("sqlite://{}", dir.path().join("statewright.db").display());
  let store = SqliteStore::connect(&url).await.expect("failed to open store");

  let mut harness = Harness::with(Arc::new(store), |builder| builder);
  harness.register(chain()).await;

  let root = harness
    .start(ExecutionRequest::new("build").with_variables(params(json!({ "version": "2.0" }))))
    .await;
  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Success);
  assert_eq!(outcome.context["context"]["publish"]["published"], json!("app-2.0.tar"));
  assert_eq!(
    harness.statuses(&root.execution_id).await,
    vec![
      ("compile".to_string(), ExecutionStatus::Success),
      ("publish".to_string(), ExecutionStatus::Success),
    ]
  );
}

/// Sends the first successful `verify` back to `build`.
#[derive(Default)]
struct RevisitOnce(AtomicBool);

#[async_trait]
impl ExecutionEventAdvisor for RevisitOnce {
  async fn on_execution_event(&self, event: &ExecutionEvent<'_>) -> Option<ExecutionEventAdvice> {
    let verified = event.state.name() == "verify" && event.status == ExecutionStatus::Success;
    (verified && !self.0.swap(true, Ordering::SeqCst)).then(|| ExecutionEventAdvice::next_step("build"))
  }
}

#[tokio::test]
async fn test_revisited_state_records_its_own_timing() {
  let mut harness = Harness::with(Arc::new(statewright_store::MemoryStore::new()), |builder| {
    builder.advisor("revisit", Arc::new(RevisitOnce::default()))
  });
  harness
    .register(json!({
      "machine_id": "pipeline",
      "name": "Pipeline",
      "initial_state": "build",
      "states": [
        { "name": "build", "type": "noop" },
        { "name": "verify", "type": "noop" }
      ],
      "transitions": [{ "from": "build", "to": "verify" }]
    }))
    .await;

  let root = harness
    .start(ExecutionRequest::new("pipeline").with_advisor("revisit"))
    .await;
  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Success);

  let instances = harness.instances(&root.execution_id).await;
  assert_eq!(instances.len(), 4);
  let builds = by_state(&instances, "build");
  assert_eq!(builds.len(), 2);
  let (first, second) = (builds[0], builds[1]);
  assert!(first.clone_instance_id.is_none());
  assert!(second.clone_instance_id.is_some());

  let first_data = first.current_data().unwrap();
  let second_data = second.current_data().unwrap();
  let first_end = first_data.end_ts.unwrap();
  let second_start = second_data.start_ts.unwrap();
  assert!(second_start >= first_end);
  assert!(second_data.end_ts.unwrap() >= second_start);
  assert_eq!(second_data.status, ExecutionStatus::Success);
}

fn nested(child_state: &str, child_machine: &str) -> serde_json::Value {
  json!({
    "machine_id": "nest",
    "name": "Nest",
    "initial_state": "fan",
    "states": [{
      "name": "fan",
      "type": "spawn",
      "properties": { "machine": child_machine, "state": child_state }
    }],
    "child_machines": [{
      "machine_id": "steps",
      "name": "Steps",
      "initial_state": "step",
      "states": [{ "name": "step", "type": "noop" }]
    }]
  })
}

#[tokio::test]
async fn test_child_that_cannot_start_fails_its_spawner() {
  let mut harness = Harness::new();
  harness.register(nested("missing", "steps")).await;

  let root = harness.start(ExecutionRequest::new("nest")).await;
  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Failed);
  assert_eq!(outcome.state_name, "fan");
  assert_eq!(
    harness.statuses(&root.execution_id).await,
    vec![("fan".to_string(), ExecutionStatus::Failed)]
  );
  assert_eq!(harness.wait_notify.pending().await, 0);
}

#[tokio::test]
async fn test_child_of_unknown_machine_is_skipped() {
  let mut harness = Harness::new();
  harness.register(nested("missing", "ghost")).await;

  let root = harness.start(ExecutionRequest::new("nest")).await;
  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Success);
  assert_eq!(
    harness.statuses(&root.execution_id).await,
    vec![("fan".to_string(), ExecutionStatus::Success)]
  );
}
