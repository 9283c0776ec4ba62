//! Operator interrupts applied to live executions.

mod common;

use std::time::Duration;

use serde_json::json;
use statewright_engine::{EngineEvent, ExecutionRequest, ExecutorError, WaitNotify, approval_correlation_id};
use statewright_graph::ResponseData;
use statewright_store::{ExecutionInterrupt, ExecutionInterruptType, ExecutionStatus, StateExecutionInstance, Store};

use common::{Harness, by_state, params, task_done};

fn gated(error_strategy: &str) -> serde_json::Value {
  json!({
    "machine_id": "gated",
    "name": "Gated",
    "initial_state": "gate",
    "error_strategy": error_strategy,
    "states": [
      { "name": "gate", "type": "wait", "properties": { "on": ["gate-open"] } },
      { "name": "after", "type": "noop" }
    ],
    "transitions": [{ "from": "gate", "to": "after" }]
  })
}

fn command() -> serde_json::Value {
  json!({
    "machine_id": "deploy",
    "name": "Deploy",
    "initial_state": "run",
    "states": [{ "name": "run", "type": "command", "properties": { "command": "deploy" } }]
  })
}

fn instance_interrupt(execution_id: &str, instance_id: &str, interrupt_type: ExecutionInterruptType) -> ExecutionInterrupt {
  ExecutionInterrupt::for_instance(execution_id, instance_id, interrupt_type)
}

#[tokio::test]
async fn test_pause_strategy_then_ignore() {
  let mut harness = Harness::new();
  harness
    .register(json!({
      "machine_id": "careful",
      "name": "Careful",
      "initial_state": "check",
      "error_strategy": "pause",
      "states": [
        { "name": "check", "type": "noop", "properties": { "status": "failed" } },
        { "name": "deploy", "type": "noop" }
      ],
      "transitions": [{ "from": "check", "to": "deploy" }]
    }))
    .await;

  let root = harness.start(ExecutionRequest::new("careful")).await;
  let check = harness.wait_for(&root.execution_id, "check", ExecutionStatus::Waiting).await;
  harness
    .event(|e| matches!(e, EngineEvent::ManualInterventionNeeded { .. }))
    .await;

  harness
    .executor
    .register_interrupt(instance_interrupt(&root.execution_id, &check.id, ExecutionInterruptType::Ignore))
    .await
    .unwrap();
  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Success);
  assert_eq!(outcome.state_name, "deploy");

  let check = harness.executor.instance(&check.id).await.unwrap();
  assert_eq!(check.status, ExecutionStatus::Failed);
  assert_eq!(check.interrupt_history.len(), 1);
  assert_eq!(check.interrupt_history[0].interrupt_type, ExecutionInterruptType::Ignore);
  assert_eq!(check.dedicated_interrupt_count, 1);
}

#[tokio::test]
async fn test_abort_stops_task_once_and_ignores_late_result() {
  let mut harness = Harness::new();
  harness.register(command()).await;

  let root = harness.start(ExecutionRequest::new("deploy")).await;
  let run = harness.wait_for(&root.execution_id, "run", ExecutionStatus::Running).await;
  let task_id = harness.dispatcher.task_ids()[0].clone();

  let abort = harness
    .executor
    .register_interrupt(instance_interrupt(&root.execution_id, &run.id, ExecutionInterruptType::Abort))
    .await
    .unwrap();
  assert!(abort.seized);
  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Aborted);
  assert_eq!(harness.dispatcher.aborted(), vec![task_id.clone()]);
  assert_eq!(harness.wait_notify.pending().await, 0);
  assert_eq!(harness.wait_notify.unclaimed().await, 0);

  // Applying the same interrupt again changes nothing.
  harness.executor.apply_interrupt(&abort.id).await.unwrap();
  assert_eq!(harness.dispatcher.aborted().len(), 1);

  harness
    .wait_notify
    .done_with(&task_id, task_done(ExecutionStatus::Success, json!({})))
    .await
    .unwrap();
  harness.assert_no_outcome().await;
  assert_eq!(harness.wait_notify.pending().await, 0);

  let run = harness.executor.instance(&run.id).await.unwrap();
  assert_eq!(run.status, ExecutionStatus::Aborted);
  assert_eq!(run.interrupt_history.len(), 1);
}

#[tokio::test]
async fn test_mark_expired_expires_task() {
  let mut harness = Harness::new();
  harness.register(command()).await;

  let root = harness.start(ExecutionRequest::new("deploy")).await;
  let run = harness.wait_for(&root.execution_id, "run", ExecutionStatus::Running).await;
  let task_id = harness.dispatcher.task_ids()[0].clone();

  harness
    .executor
    .register_interrupt(instance_interrupt(&root.execution_id, &run.id, ExecutionInterruptType::MarkExpired))
    .await
    .unwrap();
  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Expired);
  assert_eq!(harness.dispatcher.expired(), vec![task_id]);
  assert!(harness.dispatcher.aborted().is_empty());

  let run = harness.executor.instance(&run.id).await.unwrap();
  assert!(
    run
      .current_data()
      .and_then(|d| d.error_msg.as_deref())
      .is_some_and(|m| m.starts_with("Expired"))
  );
}

#[tokio::test]
async fn test_expired_instance_can_be_retried() {
  let mut harness = Harness::new();
  harness.register(command()).await;

  let root = harness.start(ExecutionRequest::new("deploy")).await;
  let run = harness.wait_for(&root.execution_id, "run", ExecutionStatus::Running).await;
  harness
    .executor
    .register_interrupt(instance_interrupt(&root.execution_id, &run.id, ExecutionInterruptType::MarkExpired))
    .await
    .unwrap();
  assert_eq!(harness.outcome().await.status, ExecutionStatus::Expired);

  harness
    .executor
    .register_interrupt(instance_interrupt(&root.execution_id, &run.id, ExecutionInterruptType::Retry))
    .await
    .unwrap();
  attempt(&harness, &run.id, 1, ExecutionStatus::Running).await;
  let task_ids = harness.dispatcher.task_ids();
  assert_eq!(task_ids.len(), 2);

  harness
    .wait_notify
    .done_with(&task_ids[1], task_done(ExecutionStatus::Success, json!({})))
    .await
    .unwrap();
  assert_eq!(harness.outcome().await.status, ExecutionStatus::Success);
}

#[tokio::test]
async fn test_pause_all_holds_new_instances_until_resume_all() {
  let mut harness = Harness::new();
  harness.register(gated("fail")).await;

  let root = harness.start(ExecutionRequest::new("gated")).await;
  harness.wait_for(&root.execution_id, "gate", ExecutionStatus::Running).await;

  let resume_early = ExecutionInterrupt::for_execution(&root.execution_id, ExecutionInterruptType::ResumeAll);
  let err = harness.executor.register_interrupt(resume_early).await.unwrap_err();
  assert!(matches!(err, ExecutorError::InvalidInterrupt { .. }));

  let pause = harness
    .executor
    .register_interrupt(ExecutionInterrupt::for_execution(&root.execution_id, ExecutionInterruptType::PauseAll))
    .await
    .unwrap();
  assert!(!pause.seized);
  let err = harness
    .executor
    .register_interrupt(ExecutionInterrupt::for_execution(&root.execution_id, ExecutionInterruptType::PauseAll))
    .await
    .unwrap_err();
  assert!(matches!(err, ExecutorError::InvalidInterrupt { .. }));

  harness
    .wait_notify
    .done_with("gate-open", task_done(ExecutionStatus::Success, json!(null)))
    .await
    .unwrap();
  let held = harness.wait_for(&root.execution_id, "after", ExecutionStatus::Paused).await;
  harness.assert_no_outcome().await;

  let resume = harness
    .executor
    .register_interrupt(ExecutionInterrupt::for_execution(&root.execution_id, ExecutionInterruptType::ResumeAll))
    .await
    .unwrap();
  assert!(resume.seized);
  assert!(harness.executor.store().get_interrupt(&pause.id).await.unwrap().seized);

  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Success);
  assert_eq!(outcome.state_name, "after");

  let after = harness.executor.instance(&held.id).await.unwrap();
  let effects: Vec<_> = after.interrupt_history.iter().map(|e| e.interrupt_type).collect();
  assert_eq!(
    effects,
    vec![ExecutionInterruptType::PauseAll, ExecutionInterruptType::ResumeAll]
  );
}

#[tokio::test]
async fn test_retry_reruns_failed_instance() {
  let mut harness = Harness::new();
  harness
    .register(json!({
      "machine_id": "flaky",
      "name": "Flaky",
      "initial_state": "prepare",
      "states": [
        { "name": "prepare", "type": "noop" },
        { "name": "flaky", "type": "flaky", "properties": { "failures": 1 } }
      ],
      "transitions": [{ "from": "prepare", "to": "flaky" }]
    }))
    .await;

  let root = harness.start(ExecutionRequest::new("flaky")).await;
  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Failed);
  let flaky = harness.wait_for(&root.execution_id, "flaky", ExecutionStatus::Failed).await;
  assert_eq!(
    flaky.current_data().and_then(|d| d.error_msg.as_deref()),
    Some("attempt 0 failed")
  );

  let retry = instance_interrupt(&root.execution_id, &flaky.id, ExecutionInterruptType::Retry)
    .with_property("state_params", json!({ "note": "manual" }));
  harness.executor.register_interrupt(retry).await.unwrap();
  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Success);

  let instances = harness.instances(&root.execution_id).await;
  let prepare = by_state(&instances, "prepare")[0];
  let retried = by_state(&instances, "flaky");
  assert_eq!(retried.len(), 1);
  let retried = retried[0];
  assert_eq!(retried.id, flaky.id);
  assert!(retried.retry);
  assert_eq!(retried.retry_count, 1);
  assert_eq!(retried.prev_instance_id.as_deref(), Some(prepare.id.as_str()));
  assert_eq!(retried.state_params, Some(params(json!({ "note": "manual" }))));
  assert_eq!(retried.state_execution_data_history.len(), 1);
  assert_eq!(retried.state_execution_data_history[0].status, ExecutionStatus::Failed);
  assert_eq!(retried.current_data().map(|d| d.status), Some(ExecutionStatus::Success));
  assert_eq!(retried.notify_elements, prepare.notify_elements);

  let err = harness
    .executor
    .register_interrupt(instance_interrupt(&root.execution_id, &prepare.id, ExecutionInterruptType::Retry))
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    ExecutorError::RetryFailed { status: ExecutionStatus::Success, .. }
  ));
  let unchanged = harness.executor.instance(&prepare.id).await.unwrap();
  assert_eq!(unchanged.retry_count, 0);
  assert_eq!(unchanged.status, ExecutionStatus::Success);
}

#[tokio::test]
async fn test_concurrent_mark_success_applies_once() {
  let mut harness = Harness::new();
  harness.register(gated("fail")).await;

  let root = harness.start(ExecutionRequest::new("gated")).await;
  let gate = harness.wait_for(&root.execution_id, "gate", ExecutionStatus::Running).await;

  let first = instance_interrupt(&root.execution_id, &gate.id, ExecutionInterruptType::MarkSuccess);
  let second = instance_interrupt(&root.execution_id, &gate.id, ExecutionInterruptType::MarkSuccess);
  let (a, b) = tokio::join!(
    harness.executor.register_interrupt(first),
    harness.executor.register_interrupt(second)
  );
  a.unwrap();
  b.unwrap();

  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Success);
  harness.assert_no_outcome().await;

  let instances = harness.instances(&root.execution_id).await;
  assert_eq!(by_state(&instances, "gate")[0].status, ExecutionStatus::Success);
  assert_eq!(by_state(&instances, "after").len(), 1);
}

#[tokio::test]
async fn test_abort_all_aborts_fork_children() {
  let mut harness = Harness::new();
  harness
    .register(json!({
      "machine_id": "rollout",
      "name": "Rollout",
      "initial_state": "fan",
      "states": [
        { "name": "fan", "type": "fork", "properties": { "forks": ["left", "right"] } },
        { "name": "verify", "type": "noop" }
      ],
      "transitions": [{ "from": "fan", "to": "verify" }],
      "child_machines": [
        { "machine_id": "left", "name": "Left", "initial_state": "l1",
          "states": [{ "name": "l1", "type": "wait", "properties": { "on": ["never-left"] } }] },
        { "machine_id": "right", "name": "Right", "initial_state": "r1",
          "states": [{ "name": "r1", "type": "wait", "properties": { "on": ["never-right"] } }] }
      ]
    }))
    .await;

  let root = harness.start(ExecutionRequest::new("rollout")).await;
  harness.wait_for(&root.execution_id, "l1", ExecutionStatus::Running).await;
  harness.wait_for(&root.execution_id, "r1", ExecutionStatus::Running).await;

  harness
    .executor
    .register_interrupt(ExecutionInterrupt::for_execution(&root.execution_id, ExecutionInterruptType::AbortAll))
    .await
    .unwrap();
  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Aborted);
  assert_eq!(outcome.state_name, "fan");

  let instances = harness.instances(&root.execution_id).await;
  for state in ["fan", "l1", "r1"] {
    assert_eq!(by_state(&instances, state)[0].status, ExecutionStatus::Aborted, "{state}");
  }
  assert!(by_state(&instances, "verify").is_empty());
  // The container finished through its children, not through the sweep.
  assert!(by_state(&instances, "fan")[0].interrupt_history.is_empty());
}

#[tokio::test]
async fn test_end_execution_fails_waiting_instances() {
  let mut harness = Harness::new();
  harness
    .register(json!({
      "machine_id": "careful",
      "name": "Careful",
      "initial_state": "check",
      "error_strategy": "pause",
      "states": [{ "name": "check", "type": "noop", "properties": { "status": "failed" } }]
    }))
    .await;

  let root = harness.start(ExecutionRequest::new("careful")).await;
  let check = harness.wait_for(&root.execution_id, "check", ExecutionStatus::Waiting).await;

  harness
    .executor
    .register_interrupt(ExecutionInterrupt::for_execution(&root.execution_id, ExecutionInterruptType::EndExecution))
    .await
    .unwrap();
  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Failed);

  let check = harness.executor.instance(&check.id).await.unwrap();
  assert_eq!(check.status, ExecutionStatus::Failed);
  assert_eq!(check.interrupt_history[0].interrupt_type, ExecutionInterruptType::EndExecution);
}

#[tokio::test]
async fn test_end_execution_aborts_running_instances() {
  let mut harness = Harness::new();
  harness.register(gated("fail")).await;

  let root = harness.start(ExecutionRequest::new("gated")).await;
  harness.wait_for(&root.execution_id, "gate", ExecutionStatus::Running).await;

  harness
    .executor
    .register_interrupt(ExecutionInterrupt::for_execution(&root.execution_id, ExecutionInterruptType::EndExecution))
    .await
    .unwrap();
  let outcome = harness.outcome().await;
  assert_eq!(outcome.status, ExecutionStatus::Aborted);
  assert_eq!(
    harness.statuses(&root.execution_id).await,
    vec![("gate".to_string(), ExecutionStatus::Aborted)]
  );
}

#[tokio::test]
async fn test_advice_only_interrupts_are_rejected() {
  let harness = Harness::new();
  for interrupt_type in [
    ExecutionInterruptType::Pause,
    ExecutionInterruptType::NextStep,
    ExecutionInterruptType::MarkFailed,
  ] {
    let err = harness
      .executor
      .register_interrupt(instance_interrupt("exec-1", "i-1", interrupt_type))
      .await
      .unwrap_err();
    assert!(matches!(err, ExecutorError::InvalidInterrupt { .. }));
  }

  let missing_instance = ExecutionInterrupt::for_execution("exec-1", ExecutionInterruptType::Abort);
  let err = harness.executor.register_interrupt(missing_instance).await.unwrap_err();
  assert!(matches!(err, ExecutorError::InvalidInterrupt { .. }));
}

/// Poll until the instance is on attempt `retry_count` with `status`.
async fn attempt(harness: &Harness, instance_id: &str, retry_count: u32, status: ExecutionStatus) -> StateExecutionInstance {
  let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
  loop {
    let instance = harness.executor.instance(instance_id).await.unwrap();
    if instance.retry_count == retry_count && instance.status == status {
      return instance;
    }
    assert!(
      tokio::time::Instant::now() < deadline,
      "attempt {retry_count} never reached {status}, found {} on attempt {}",
      instance.status,
      instance.retry_count
    );
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
}

#[tokio::test]
async fn test_retried_approval_waits_for_a_new_signal() {
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
  harness
    .wait_notify
    .done_with(
      &approval_correlation_id(&approve),
      ResponseData::Signal {
        params: params(json!({ "approved": false })),
      },
    )
    .await
    .unwrap();
  assert_eq!(harness.outcome().await.status, ExecutionStatus::Failed);

  harness
    .executor
    .register_interrupt(instance_interrupt(&root.execution_id, &approve.id, ExecutionInterruptType::Retry))
    .await
    .unwrap();
  let retried = attempt(&harness, &approve.id, 1, ExecutionStatus::Paused).await;
  harness.assert_no_outcome().await;
  let still = harness.executor.instance(&approve.id).await.unwrap();
  assert_eq!(still.status, ExecutionStatus::Paused);
  assert!(still.expiry_ts.is_none());
  assert_eq!(still.state_execution_data_history.len(), 1);

  harness
    .wait_notify
    .done_with(
      &approval_correlation_id(&retried),
      ResponseData::Signal {
        params: params(json!({ "approved": true })),
      },
    )
    .await
    .unwrap();
  assert_eq!(harness.outcome().await.status, ExecutionStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn test_retry_while_waiting_restarts_the_wait() {
  let mut harness = Harness::new();
  harness
    .register(json!({
      "machine_id": "soak",
      "name": "Soak",
      "initial_state": "settle",
      "states": [{ "name": "settle", "type": "noop", "wait_interval_secs": 30 }]
    }))
    .await;

  let root = harness.start(ExecutionRequest::new("soak")).await;
  let settle = harness.wait_for(&root.execution_id, "settle", ExecutionStatus::Waiting).await;
  tokio::time::sleep(Duration::from_secs(10)).await;

  let retried_at = tokio::time::Instant::now();
  harness
    .executor
    .register_interrupt(instance_interrupt(&root.execution_id, &settle.id, ExecutionInterruptType::Retry))
    .await
    .unwrap();
  attempt(&harness, &settle.id, 1, ExecutionStatus::Waiting).await;

  // The first attempt's delay elapses here and must not start the retry.
  tokio::time::sleep(Duration::from_secs(25)).await;
  let settle = harness.executor.instance(&settle.id).await.unwrap();
  assert_eq!(settle.status, ExecutionStatus::Waiting);

  let outcome = harness.outcome_within(Duration::from_secs(120)).await;
  assert_eq!(outcome.status, ExecutionStatus::Success);
  assert!(retried_at.elapsed() >= Duration::from_secs(30));
}
