//! Engine events and notifiers for observability.
//!
//! Events are emitted as instances move through the status machine so that
//! consumers can persist history, alert operators or stream to UIs.
//! Delivery is best effort and never affects execution.

use serde::{Deserialize, Serialize};
use statewright_store::{ExecutionInterruptType, ExecutionStatus};
use tokio::sync::mpsc;

/// Events emitted by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineEvent {
  /// An instance was persisted or changed status.
  StatusChanged {
    execution_id: String,
    instance_id: String,
    state_name: String,
    status: ExecutionStatus,
  },

  /// An instance is parked in WAITING until an operator interrupts it.
  ManualInterventionNeeded {
    execution_id: String,
    instance_id: String,
    state_name: String,
  },

  /// An interrupt was persisted.
  InterruptRegistered {
    execution_id: String,
    interrupt_id: String,
    interrupt_type: ExecutionInterruptType,
  },

  /// A root instance reached the end of its machine.
  ExecutionFinished {
    execution_id: String,
    status: ExecutionStatus,
  },
}

/// Trait for receiving engine events.
///
/// The engine calls `notify` for each event - implementations decide
/// what to do with them (persist, broadcast, log, ignore, etc.).
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: EngineEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: EngineEvent) {}
}

/// A notifier that sends events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<EngineEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<EngineEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: EngineEvent) {
    // Receiver may have been dropped.
    let _ = self.sender.send(event);
  }
}
