//! Correlation-id based wait/notify.
//!
//! A waiter registers interest in a set of correlation ids together with a
//! [`NotifyCallback`]. Once every id has resolved (or one resolves with an
//! error) the callback is delivered exactly once to the [`CallbackPump`].
//!
//! A result nobody waits for yet is held until a waiter claims it or the
//! retention period passes. A result delivered to a waiter is not kept.
//!
//! [`CallbackPump`]: crate::CallbackPump

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use statewright_graph::ResponseData;
use statewright_store::Params;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tracing::debug;

/// What to do once a wait completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotifyCallback {
  /// Resume an instance that returned an async response.
  AsyncResume {
    execution_id: String,
    instance_id: String,
  },
  /// Start an instance whose pre-execution wait elapsed.
  WaitElapsed {
    execution_id: String,
    instance_id: String,
    /// Retry count of the attempt that started waiting.
    #[serde(default)]
    attempt: u32,
  },
  /// Retry an instance after an advised wait.
  RetryAfterWait {
    execution_id: String,
    instance_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    state_params: Option<Params>,
  },
  /// Dispatch an instance held back by PAUSE_ALL.
  ResumeAll {
    execution_id: String,
    instance_id: String,
  },
}

impl NotifyCallback {
  pub fn instance_id(&self) -> &str {
    match self {
      NotifyCallback::AsyncResume { instance_id, .. }
      | NotifyCallback::WaitElapsed { instance_id, .. }
      | NotifyCallback::RetryAfterWait { instance_id, .. }
      | NotifyCallback::ResumeAll { instance_id, .. } => instance_id,
    }
  }
}

/// Outcome of a completed wait.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
  /// Every correlation id resolved.
  Results(HashMap<String, ResponseData>),
  /// One correlation id resolved with an error; the rest are abandoned.
  Error {
    correlation_id: String,
    response: ResponseData,
  },
}

/// A callback ready to run.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
  pub callback: NotifyCallback,
  pub notification: Notification,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
  #[error("wait/notify delivery channel closed")]
  Closed,

  #[error("wait registered without correlation ids")]
  EmptyWait,
}

#[async_trait]
pub trait WaitNotify: Send + Sync {
  /// Wait for every correlation id, returning the wait id.
  async fn wait_for_all(&self, callback: NotifyCallback, correlation_ids: Vec<String>) -> Result<String, NotifyError>;

  /// Resolve a correlation id.
  async fn done_with(&self, correlation_id: &str, response: ResponseData) -> Result<(), NotifyError>;

  /// Drop every wait registered for an instance, returning how many went.
  async fn cancel_waits(&self, instance_id: &str) -> Result<usize, NotifyError>;
}

/// How long an unclaimed result is held by default.
const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

struct Wait {
  callback: NotifyCallback,
  pending: HashSet<String>,
  results: HashMap<String, ResponseData>,
}

struct Unclaimed {
  response: ResponseData,
  at: Instant,
}

#[derive(Default)]
struct Waits {
  waits: HashMap<String, Wait>,
  by_correlation: HashMap<String, Vec<String>>,
  /// Results that arrived before anyone waited for them.
  unclaimed: HashMap<String, Unclaimed>,
}

impl Waits {
  fn expire(&mut self, retention: Duration) {
    self.unclaimed.retain(|_, result| result.at.elapsed() < retention);
  }

  /// Record a result against one wait, returning its delivery if complete.
  fn resolve(&mut self, wait_id: &str, correlation_id: &str, response: &ResponseData) -> Option<Delivery> {
    let wait = self.waits.get_mut(wait_id)?;
    if !wait.pending.remove(correlation_id) {
      return None;
    }
    wait.results.insert(correlation_id.to_string(), response.clone());
    if !response.is_error() && !wait.pending.is_empty() {
      return None;
    }

    let wait = self.remove(wait_id)?;
    let notification = if response.is_error() {
      Notification::Error {
        correlation_id: correlation_id.to_string(),
        response: response.clone(),
      }
    } else {
      Notification::Results(wait.results)
    };
    Some(Delivery {
      callback: wait.callback,
      notification,
    })
  }

  fn remove(&mut self, wait_id: &str) -> Option<Wait> {
    let wait = self.waits.remove(wait_id)?;
    for correlation_id in wait.pending.iter().chain(wait.results.keys()) {
      if let Some(ids) = self.by_correlation.get_mut(correlation_id) {
        ids.retain(|id| id != wait_id);
        if ids.is_empty() {
          self.by_correlation.remove(correlation_id);
        }
      }
    }
    Some(wait)
  }
}

/// In-process wait/notify delivering completed callbacks over a channel.
pub struct InMemoryWaitNotify {
  waits: Mutex<Waits>,
  sender: mpsc::UnboundedSender<Delivery>,
  retention: Duration,
}

impl InMemoryWaitNotify {
  /// Create the wait/notify and the receiver its deliveries arrive on.
  pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
    Self::with_retention(DEFAULT_RETENTION)
  }

  /// Like [`InMemoryWaitNotify::new`], holding unclaimed results for `retention`.
  pub fn with_retention(retention: Duration) -> (Self, mpsc::UnboundedReceiver<Delivery>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let waits = Mutex::new(Waits::default());
    (
      Self {
        waits,
        sender,
        retention,
      },
      receiver,
    )
  }

  /// Number of waits still pending.
  pub async fn pending(&self) -> usize {
    self.waits.lock().await.waits.len()
  }

  /// Number of results held for a waiter that has not registered yet.
  pub async fn unclaimed(&self) -> usize {
    let mut waits = self.waits.lock().await;
    waits.expire(self.retention);
    waits.unclaimed.len()
  }

  fn deliver(&self, delivery: Delivery) -> Result<(), NotifyError> {
    debug!(instance_id = %delivery.callback.instance_id(), "delivering callback");
    self.sender.send(delivery).map_err(|_| NotifyError::Closed)
  }
}

#[async_trait]
impl WaitNotify for InMemoryWaitNotify {
  async fn wait_for_all(&self, callback: NotifyCallback, correlation_ids: Vec<String>) -> Result<String, NotifyError> {
    if correlation_ids.is_empty() {
      return Err(NotifyError::EmptyWait);
    }

    let wait_id = uuid::Uuid::new_v4().to_string();
    let mut waits = self.waits.lock().await;
    waits.expire(self.retention);
    let pending: HashSet<String> = correlation_ids.into_iter().collect();
    for correlation_id in &pending {
      waits
        .by_correlation
        .entry(correlation_id.clone())
        .or_default()
        .push(wait_id.clone());
    }
    waits.waits.insert(
      wait_id.clone(),
      Wait {
        callback,
        pending: pending.clone(),
        results: HashMap::new(),
      },
    );

    let early: Vec<(String, ResponseData)> = pending
      .iter()
      .filter_map(|id| waits.unclaimed.remove(id).map(|r| (id.clone(), r.response)))
      .collect();
    let mut delivery = None;
    for (correlation_id, response) in early {
      if let Some(d) = waits.resolve(&wait_id, &correlation_id, &response) {
        delivery = Some(d);
        break;
      }
    }
    drop(waits);

    if let Some(delivery) = delivery {
      self.deliver(delivery)?;
    }
    Ok(wait_id)
  }

  async fn done_with(&self, correlation_id: &str, response: ResponseData) -> Result<(), NotifyError> {
    let mut waits = self.waits.lock().await;
    waits.expire(self.retention);
    let wait_ids = waits.by_correlation.get(correlation_id).cloned().unwrap_or_default();
    if wait_ids.is_empty() {
      debug!(correlation_id = %correlation_id, "holding result until a waiter registers");
      waits.unclaimed.insert(
        correlation_id.to_string(),
        Unclaimed {
          response,
          at: Instant::now(),
        },
      );
      return Ok(());
    }
    let deliveries: Vec<Delivery> = wait_ids
      .iter()
      .filter_map(|wait_id| waits.resolve(wait_id, correlation_id, &response))
      .collect();
    drop(waits);

    for delivery in deliveries {
      self.deliver(delivery)?;
    }
    Ok(())
  }

  async fn cancel_waits(&self, instance_id: &str) -> Result<usize, NotifyError> {
    let mut waits = self.waits.lock().await;
    let wait_ids: Vec<String> = waits
      .waits
      .iter()
      .filter(|(_, wait)| wait.callback.instance_id() == instance_id)
      .map(|(id, _)| id.clone())
      .collect();
    for wait_id in &wait_ids {
      waits.remove(wait_id);
    }
    if !wait_ids.is_empty() {
      debug!(instance_id = %instance_id, count = wait_ids.len(), "cancelled waits");
    }
    Ok(wait_ids.len())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use statewright_store::ExecutionStatus;

  fn resume(instance_id: &str) -> NotifyCallback {
    NotifyCallback::AsyncResume {
      execution_id: "exec-1".to_string(),
      instance_id: instance_id.to_string(),
    }
  }

  fn task(status: ExecutionStatus) -> ResponseData {
    ResponseData::Task {
      status,
      output: serde_json::Value::Null,
      error: None,
    }
  }

  #[tokio::test]
  async fn test_delivers_once_all_ids_resolve() {
    let (wait_notify, mut receiver) = InMemoryWaitNotify::new();
    wait_notify
      .wait_for_all(resume("i-1"), vec!["a".to_string(), "b".to_string()])
      .await
      .unwrap();

    wait_notify.done_with("a", task(ExecutionStatus::Success)).await.unwrap();
    assert!(receiver.try_recv().is_err());

    wait_notify.done_with("b", task(ExecutionStatus::Success)).await.unwrap();
    let delivery = receiver.try_recv().unwrap();
    assert_eq!(delivery.callback, resume("i-1"));
    match delivery.notification {
      Notification::Results(results) => assert_eq!(results.len(), 2),
      other => panic!("expected results, got {other:?}"),
    }
    assert_eq!(wait_notify.pending().await, 0);
  }

  #[tokio::test]
  async fn test_error_delivers_immediately_and_only_once() {
    let (wait_notify, mut receiver) = InMemoryWaitNotify::new();
    wait_notify
      .wait_for_all(resume("i-1"), vec!["a".to_string(), "b".to_string()])
      .await
      .unwrap();

    wait_notify
      .done_with("a", ResponseData::Error { message: "boom".to_string() })
      .await
      .unwrap();
    let delivery = receiver.try_recv().unwrap();
    assert!(matches!(
      delivery.notification,
      Notification::Error { ref correlation_id, .. } if correlation_id == "a"
    ));

    wait_notify.done_with("b", task(ExecutionStatus::Success)).await.unwrap();
    assert!(receiver.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_result_before_wait_is_claimed() {
    let (wait_notify, mut receiver) = InMemoryWaitNotify::new();
    wait_notify.done_with("a", ResponseData::Delay).await.unwrap();
    assert!(receiver.try_recv().is_err());

    wait_notify
      .wait_for_all(resume("i-1"), vec!["a".to_string()])
      .await
      .unwrap();
    assert!(receiver.try_recv().is_ok());
  }

  #[tokio::test]
  async fn test_delivered_result_is_not_replayed() {
    let (wait_notify, mut receiver) = InMemoryWaitNotify::new();
    wait_notify
      .wait_for_all(resume("i-1"), vec!["a".to_string()])
      .await
      .unwrap();
    wait_notify.done_with("a", task(ExecutionStatus::Failed)).await.unwrap();
    assert!(receiver.try_recv().is_ok());
    assert_eq!(wait_notify.unclaimed().await, 0);

    wait_notify
      .wait_for_all(resume("i-1"), vec!["a".to_string()])
      .await
      .unwrap();
    assert!(receiver.try_recv().is_err());
    assert_eq!(wait_notify.pending().await, 1);
  }

  #[tokio::test]
  async fn test_claimed_early_result_is_released() {
    let (wait_notify, mut receiver) = InMemoryWaitNotify::new();
    wait_notify.done_with("a", ResponseData::Delay).await.unwrap();
    assert_eq!(wait_notify.unclaimed().await, 1);

    wait_notify
      .wait_for_all(resume("i-1"), vec!["a".to_string()])
      .await
      .unwrap();
    assert!(receiver.try_recv().is_ok());
    assert_eq!(wait_notify.unclaimed().await, 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_unclaimed_results_expire() {
    let (wait_notify, mut receiver) = InMemoryWaitNotify::with_retention(Duration::from_secs(60));
    wait_notify.done_with("a", ResponseData::Delay).await.unwrap();
    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(wait_notify.unclaimed().await, 0);

    wait_notify
      .wait_for_all(resume("i-1"), vec!["a".to_string()])
      .await
      .unwrap();
    assert!(receiver.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_cancel_waits_drops_instance_waits() {
    let (wait_notify, mut receiver) = InMemoryWaitNotify::new();
    wait_notify
      .wait_for_all(resume("i-1"), vec!["a".to_string(), "b".to_string()])
      .await
      .unwrap();
    wait_notify
      .wait_for_all(resume("i-2"), vec!["c".to_string()])
      .await
      .unwrap();

    assert_eq!(wait_notify.cancel_waits("i-1").await.unwrap(), 1);
    assert_eq!(wait_notify.pending().await, 1);

    wait_notify.done_with("a", task(ExecutionStatus::Success)).await.unwrap();
    wait_notify.done_with("b", task(ExecutionStatus::Success)).await.unwrap();
    assert!(receiver.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_empty_wait_is_rejected() {
    let (wait_notify, _receiver) = InMemoryWaitNotify::new();
    let result = wait_notify.wait_for_all(resume("i-1"), Vec::new()).await;
    assert!(matches!(result, Err(NotifyError::EmptyWait)));
  }

  #[test]
  fn test_callback_serializes_with_kind_tag() {
    let json = serde_json::to_value(resume("i-1")).unwrap();
    assert_eq!(json["kind"], "async_resume");
    assert_eq!(json["instance_id"], "i-1");
  }
}
