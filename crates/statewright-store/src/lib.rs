//! Statewright Store
//!
//! This crate provides the execution records and the storage trait the
//! orchestrator persists them through.
//!
//! The [`Store`] trait defines operations for:
//! - Inserting and loading [`StateExecutionInstance`] records
//! - Conditional updates guarded by the record's current status
//! - Range queries by execution, parent and creation time
//! - Persisting and seizing [`ExecutionInterrupt`] commands
//!
//! Every status transition goes through [`Store::update_instance`], which
//! only writes when the stored status is still one of the expected ones.
//! A `false` return means another writer already moved the record.

mod element;
mod instance;
mod interrupt;
mod memory;
mod query;
mod sqlite;
mod status;

pub use element::{ContextElement, ContextElementType, ContextStack};
pub use instance::{Params, RiskLevel, StateExecutionData, StateExecutionInstance};
pub use interrupt::{ExecutionInterrupt, ExecutionInterruptType, InterruptEffect};
pub use memory::MemoryStore;
pub use query::InstanceQuery;
pub use sqlite::SqliteStore;
pub use status::ExecutionStatus;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A record with the same id was already persisted.
  #[error("already exists: {0}")]
  AlreadyExists(String),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// A stored document could not be encoded or decoded.
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

/// Storage trait for execution records and interrupts.
#[async_trait]
pub trait Store: Send + Sync {
  /// Persist a new record. Fails with `AlreadyExists` for a known id.
  async fn insert_instance(&self, instance: &StateExecutionInstance) -> Result<(), StoreError>;

  /// Load a record by id.
  async fn get_instance(&self, id: &str) -> Result<StateExecutionInstance, StoreError>;

  /// Replace a record iff its stored status is one of `expected`.
  ///
  /// Returns `false` when the record is missing or has already moved on.
  async fn update_instance(
    &self,
    instance: &StateExecutionInstance,
    expected: &[ExecutionStatus],
  ) -> Result<bool, StoreError>;

  /// List records matching the query, oldest first.
  async fn list_instances(&self, query: &InstanceQuery) -> Result<Vec<StateExecutionInstance>, StoreError>;

  /// Delete final records that ended before the cutoff. Returns the number removed.
  async fn purge_finished(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;

  /// Persist a new interrupt.
  async fn insert_interrupt(&self, interrupt: &ExecutionInterrupt) -> Result<(), StoreError>;

  /// Load an interrupt by id.
  async fn get_interrupt(&self, id: &str) -> Result<ExecutionInterrupt, StoreError>;

  /// List the interrupts of an execution, oldest first.
  async fn list_interrupts(
    &self,
    execution_id: &str,
    include_seized: bool,
  ) -> Result<Vec<ExecutionInterrupt>, StoreError>;

  /// Mark an interrupt seized. Returns `false` if it already was.
  async fn seize_interrupt(&self, id: &str) -> Result<bool, StoreError>;

  /// Number of interrupts addressed to one instance.
  async fn count_instance_interrupts(&self, instance_id: &str) -> Result<u32, StoreError>;
}
