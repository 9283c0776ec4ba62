use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use statewright_graph::ResponseData;
use tracing::warn;

use crate::wait_notify::{NotifyError, WaitNotify};

/// Resolves a correlation id after a delay.
#[async_trait]
pub trait DelayScheduler: Send + Sync {
  /// Schedule a delay and return the correlation id it will resolve.
  async fn delay(&self, seconds: u64) -> Result<String, NotifyError>;
}

/// Delay scheduler backed by tokio timers.
///
/// Delays do not survive a restart.
pub struct TokioDelayScheduler {
  wait_notify: Arc<dyn WaitNotify>,
}

impl TokioDelayScheduler {
  pub fn new(wait_notify: Arc<dyn WaitNotify>) -> Self {
    Self { wait_notify }
  }
}

#[async_trait]
impl DelayScheduler for TokioDelayScheduler {
  async fn delay(&self, seconds: u64) -> Result<String, NotifyError> {
    let correlation_id = format!("delay-{}", uuid::Uuid::new_v4());
    let wait_notify = self.wait_notify.clone();
    let id = correlation_id.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_secs(seconds)).await;
      if let Err(e) = wait_notify.done_with(&id, ResponseData::Delay).await {
        warn!(correlation_id = %id, error = %e, "failed to resolve delay");
      }
    });
    Ok(correlation_id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::wait_notify::{InMemoryWaitNotify, NotifyCallback};

  #[tokio::test(start_paused = true)]
  async fn test_delay_resolves_after_interval() {
    let (wait_notify, mut receiver) = InMemoryWaitNotify::new();
    let wait_notify = Arc::new(wait_notify);
    let scheduler = TokioDelayScheduler::new(wait_notify.clone());

    let started = tokio::time::Instant::now();
    let id = scheduler.delay(5).await.unwrap();
    wait_notify
      .wait_for_all(
        NotifyCallback::WaitElapsed {
          execution_id: "exec-1".to_string(),
          instance_id: "i-1".to_string(),
          attempt: 0,
        },
        vec![id],
      )
      .await
      .unwrap();

    let delivery = receiver.recv().await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(matches!(delivery.callback, NotifyCallback::WaitElapsed { .. }));
  }
}
