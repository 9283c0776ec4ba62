//! Callback pump feeding completed waits back into the executor.
//!
//! The `CallbackPump` owns the receiving end of the wait/notify channel and
//! hands each delivery to the executor, which runs it on its worker pool.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::executor::StateMachineExecutor;
use crate::wait_notify::Delivery;

/// Drains wait/notify deliveries into the executor.
///
/// # Usage
///
/// ```ignore
/// let (wait_notify, deliveries) = InMemoryWaitNotify::new();
/// // ... build the executor around `wait_notify` ...
/// let cancel = CancellationToken::new();
/// tokio::spawn(CallbackPump::new(executor.clone(), deliveries).start(cancel.clone()));
/// ```
pub struct CallbackPump {
  executor: Arc<StateMachineExecutor>,
  receiver: mpsc::UnboundedReceiver<Delivery>,
}

impl CallbackPump {
  pub fn new(executor: Arc<StateMachineExecutor>, receiver: mpsc::UnboundedReceiver<Delivery>) -> Self {
    Self { executor, receiver }
  }

  /// Start the delivery loop.
  ///
  /// Runs until the cancellation token is triggered or the channel closes.
  pub async fn start(mut self, cancel: CancellationToken) {
    info!("starting callback pump");

    loop {
      tokio::select! {
          _ = cancel.cancelled() => {
              info!("callback pump cancelled");
              break;
          }
          delivery = self.receiver.recv() => {
              match delivery {
                  Some(delivery) => self.executor.on_delivery(delivery),
                  None => {
                      info!("callback pump channel closed");
                      break;
                  }
              }
          }
      }
    }
  }
}
