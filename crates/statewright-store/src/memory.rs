//! In-process store used by tests and the CLI.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
  ExecutionInterrupt, ExecutionStatus, InstanceQuery, StateExecutionInstance, Store, StoreError,
};

/// A [`Store`] keeping everything in memory behind a single lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
  inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
  instances: HashMap<String, StateExecutionInstance>,
  interrupts: HashMap<String, ExecutionInterrupt>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn insert_instance(&self, instance: &StateExecutionInstance) -> Result<(), StoreError> {
    let mut inner = self.inner.write().await;
    if inner.instances.contains_key(&instance.id) {
      return Err(StoreError::AlreadyExists(instance.id.clone()));
    }
    inner.instances.insert(instance.id.clone(), instance.clone());
    Ok(())
  }

  async fn get_instance(&self, id: &str) -> Result<StateExecutionInstance, StoreError> {
    self
      .inner
      .read()
      .await
      .instances
      .get(id)
      .cloned()
      .ok_or_else(|| StoreError::NotFound(format!("instance {id}")))
  }

  async fn update_instance(
    &self,
    instance: &StateExecutionInstance,
    expected: &[ExecutionStatus],
  ) -> Result<bool, StoreError> {
    let mut inner = self.inner.write().await;
    let Some(stored) = inner.instances.get_mut(&instance.id) else {
      return Ok(false);
    };
    if !expected.contains(&stored.status) {
      return Ok(false);
    }
    *stored = instance.clone();
    stored.last_updated_at = Utc::now();
    Ok(true)
  }

  async fn list_instances(&self, query: &InstanceQuery) -> Result<Vec<StateExecutionInstance>, StoreError> {
    let inner = self.inner.read().await;
    let mut instances: Vec<_> = inner
      .instances
      .values()
      .filter(|i| query.matches(i))
      .cloned()
      .collect();
    instances.sort_by_key(|i| i.created_at);
    Ok(instances)
  }

  async fn purge_finished(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
    let mut inner = self.inner.write().await;
    let len = inner.instances.len();
    inner
      .instances
      .retain(|_, i| !(i.status.is_final() && i.end_ts.is_some_and(|end| end < before)));
    Ok((len - inner.instances.len()) as u64)
  }

  async fn insert_interrupt(&self, interrupt: &ExecutionInterrupt) -> Result<(), StoreError> {
    let mut inner = self.inner.write().await;
    if inner.interrupts.contains_key(&interrupt.id) {
      return Err(StoreError::AlreadyExists(interrupt.id.clone()));
    }
    inner.interrupts.insert(interrupt.id.clone(), interrupt.clone());
    Ok(())
  }

  async fn get_interrupt(&self, id: &str) -> Result<ExecutionInterrupt, StoreError> {
    self
      .inner
      .read()
      .await
      .interrupts
      .get(id)
      .cloned()
      .ok_or_else(|| StoreError::NotFound(format!("interrupt {id}")))
  }

  async fn list_interrupts(
    &self,
    execution_id: &str,
    include_seized: bool,
  ) -> Result<Vec<ExecutionInterrupt>, StoreError> {
    let inner = self.inner.read().await;
    let mut interrupts: Vec<_> = inner
      .interrupts
      .values()
      .filter(|i| i.execution_id == execution_id && (include_seized || !i.seized))
      .cloned()
      .collect();
    interrupts.sort_by_key(|i| i.created_at);
    Ok(interrupts)
  }

  async fn seize_interrupt(&self, id: &str) -> Result<bool, StoreError> {
    let mut inner = self.inner.write().await;
    match inner.interrupts.get_mut(id) {
      Some(interrupt) if !interrupt.seized => {
        interrupt.seized = true;
        Ok(true)
      }
      Some(_) => Ok(false),
      None => Err(StoreError::NotFound(format!("interrupt {id}"))),
    }
  }

  async fn count_instance_interrupts(&self, instance_id: &str) -> Result<u32, StoreError> {
    let inner = self.inner.read().await;
    let count = inner
      .interrupts
      .values()
      .filter(|i| i.instance_id.as_deref() == Some(instance_id))
      .count();
    Ok(count as u32)
  }
}
