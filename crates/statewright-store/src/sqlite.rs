use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::{
  ExecutionInterrupt, ExecutionStatus, InstanceQuery, StateExecutionInstance, Store, StoreError,
};

const SCHEMA: &[&str] = &[
  r#"
  CREATE TABLE IF NOT EXISTS state_execution_instances (
    id TEXT PRIMARY KEY NOT NULL,
    execution_id TEXT NOT NULL,
    parent_instance_id TEXT,
    status TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL,
    ended_at_ms INTEGER,
    data TEXT NOT NULL
  )
  "#,
  "CREATE INDEX IF NOT EXISTS idx_instances_execution ON state_execution_instances (execution_id, created_at_ms)",
  "CREATE INDEX IF NOT EXISTS idx_instances_parent ON state_execution_instances (parent_instance_id)",
  r#"
  CREATE TABLE IF NOT EXISTS execution_interrupts (
    id TEXT PRIMARY KEY NOT NULL,
    execution_id TEXT NOT NULL,
    instance_id TEXT,
    seized INTEGER NOT NULL DEFAULT 0,
    created_at_ms INTEGER NOT NULL,
    data TEXT NOT NULL
  )
  "#,
  "CREATE INDEX IF NOT EXISTS idx_interrupts_execution ON execution_interrupts (execution_id, created_at_ms)",
];

/// SQLite-based store implementation.
///
/// Records are kept as JSON documents next to the columns used for
/// filtering and for the status guard of conditional updates.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if missing) the database at `url` and run migrations.
  pub async fn connect(url: &str) -> Result<Self, StoreError> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    // Every connection to an in-memory database sees its own database.
    let max_connections = if url.contains(":memory:") { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
      .max_connections(max_connections)
      .connect_with(options)
      .await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Create tables and indexes.
  pub async fn migrate(&self) -> Result<(), StoreError> {
    for statement in SCHEMA {
      sqlx::query(statement).execute(&self.pool).await?;
    }
    Ok(())
  }
}

fn decode_interrupt(data: &str, seized: i64) -> Result<ExecutionInterrupt, StoreError> {
  let mut interrupt: ExecutionInterrupt = serde_json::from_str(data)?;
  interrupt.seized = seized != 0;
  Ok(interrupt)
}

#[async_trait]
impl Store for SqliteStore {
  async fn insert_instance(&self, instance: &StateExecutionInstance) -> Result<(), StoreError> {
    let data = serde_json::to_string(instance)?;
    let result = sqlx::query(
      r#"
      INSERT INTO state_execution_instances
        (id, execution_id, parent_instance_id, status, created_at_ms, ended_at_ms, data)
      VALUES (?, ?, ?, ?, ?, ?, ?)
      ON CONFLICT(id) DO NOTHING
      "#,
    )
    .bind(&instance.id)
    .bind(&instance.execution_id)
    .bind(&instance.parent_instance_id)
    .bind(instance.status)
    .bind(instance.created_at.timestamp_millis())
    .bind(instance.end_ts.map(|t| t.timestamp_millis()))
    .bind(data)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(StoreError::AlreadyExists(instance.id.clone()));
    }
    Ok(())
  }

  async fn get_instance(&self, id: &str) -> Result<StateExecutionInstance, StoreError> {
    let data: Option<String> =
      sqlx::query_scalar("SELECT data FROM state_execution_instances WHERE id = ?")
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

    match data {
      Some(data) => Ok(serde_json::from_str(&data)?),
      None => Err(StoreError::NotFound(format!("instance {id}"))),
    }
  }

  async fn update_instance(
    &self,
    instance: &StateExecutionInstance,
    expected: &[ExecutionStatus],
  ) -> Result<bool, StoreError> {
    if expected.is_empty() {
      return Ok(false);
    }

    let mut stored = instance.clone();
    stored.last_updated_at = Utc::now();
    let data = serde_json::to_string(&stored)?;

    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE state_execution_instances SET status = ");
    qb.push_bind(stored.status);
    qb.push(", parent_instance_id = ");
    qb.push_bind(stored.parent_instance_id.clone());
    qb.push(", ended_at_ms = ");
    qb.push_bind(stored.end_ts.map(|t| t.timestamp_millis()));
    qb.push(", data = ");
    qb.push_bind(data);
    qb.push(" WHERE id = ");
    qb.push_bind(stored.id.clone());
    qb.push(" AND status IN (");
    let mut separated = qb.separated(", ");
    for status in expected {
      separated.push_bind(*status);
    }
    separated.push_unseparated(")");

    let result = qb.build().execute(&self.pool).await?;
    Ok(result.rows_affected() == 1)
  }

  async fn list_instances(&self, query: &InstanceQuery) -> Result<Vec<StateExecutionInstance>, StoreError> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT data FROM state_execution_instances WHERE 1 = 1");

    if let Some(execution_id) = &query.execution_id {
      qb.push(" AND execution_id = ");
      qb.push_bind(execution_id.clone());
    }
    if let Some(parents) = &query.parent_instance_ids {
      if parents.is_empty() {
        return Ok(Vec::new());
      }
      qb.push(" AND parent_instance_id IN (");
      let mut separated = qb.separated(", ");
      for parent in parents {
        separated.push_bind(parent.clone());
      }
      separated.push_unseparated(")");
    }
    if let Some(statuses) = &query.statuses {
      if statuses.is_empty() {
        return Ok(Vec::new());
      }
      qb.push(" AND status IN (");
      let mut separated = qb.separated(", ");
      for status in statuses {
        separated.push_bind(*status);
      }
      separated.push_unseparated(")");
    }
    if let Some(since) = query.created_since {
      qb.push(" AND created_at_ms >= ");
      qb.push_bind(since.timestamp_millis());
    }
    qb.push(" ORDER BY created_at_ms, rowid");

    let rows: Vec<(String,)> = qb.build_query_as().fetch_all(&self.pool).await?;
    rows
      .into_iter()
      .map(|(data,)| serde_json::from_str(&data).map_err(StoreError::from))
      .collect()
  }

  async fn purge_finished(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
    let mut qb = QueryBuilder::<Sqlite>::new(
      "DELETE FROM state_execution_instances WHERE ended_at_ms IS NOT NULL AND ended_at_ms < ",
    );
    qb.push_bind(before.timestamp_millis());
    qb.push(" AND status IN (");
    let mut separated = qb.separated(", ");
    for status in ExecutionStatus::POSITIVE
      .iter()
      .chain(ExecutionStatus::BROKE)
      .chain(ExecutionStatus::DISCONTINUE)
    {
      separated.push_bind(*status);
    }
    separated.push_unseparated(")");

    let result = qb.build().execute(&self.pool).await?;
    Ok(result.rows_affected())
  }

  async fn insert_interrupt(&self, interrupt: &ExecutionInterrupt) -> Result<(), StoreError> {
    let data = serde_json::to_string(interrupt)?;
    let result = sqlx::query(
      r#"
      INSERT INTO execution_interrupts (id, execution_id, instance_id, seized, created_at_ms, data)
      VALUES (?, ?, ?, ?, ?, ?)
      ON CONFLICT(id) DO NOTHING
      "#,
    )
    .bind(&interrupt.id)
    .bind(&interrupt.execution_id)
    .bind(&interrupt.instance_id)
    .bind(interrupt.seized as i64)
    .bind(interrupt.created_at.timestamp_millis())
    .bind(data)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(StoreError::AlreadyExists(interrupt.id.clone()));
    }
    Ok(())
  }

  async fn get_interrupt(&self, id: &str) -> Result<ExecutionInterrupt, StoreError> {
    let row: Option<(String, i64)> =
      sqlx::query_as("SELECT data, seized FROM execution_interrupts WHERE id = ?")
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

    match row {
      Some((data, seized)) => decode_interrupt(&data, seized),
      None => Err(StoreError::NotFound(format!("interrupt {id}"))),
    }
  }

  async fn list_interrupts(
    &self,
    execution_id: &str,
    include_seized: bool,
  ) -> Result<Vec<ExecutionInterrupt>, StoreError> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
      r#"
      SELECT data, seized FROM execution_interrupts
      WHERE execution_id = ? AND (? OR seized = 0)
      ORDER BY created_at_ms, rowid
      "#,
    )
    .bind(execution_id)
    .bind(include_seized)
    .fetch_all(&self.pool)
    .await?;

    rows
      .iter()
      .map(|(data, seized)| decode_interrupt(data, *seized))
      .collect()
  }

  async fn seize_interrupt(&self, id: &str) -> Result<bool, StoreError> {
    let result = sqlx::query("UPDATE execution_interrupts SET seized = 1 WHERE id = ? AND seized = 0")
      .bind(id)
      .execute(&self.pool)
      .await?;
    if result.rows_affected() == 1 {
      return Ok(true);
    }
    // Distinguish "already seized" from "unknown".
    self.get_interrupt(id).await.map(|_| false)
  }

  async fn count_instance_interrupts(&self, instance_id: &str) -> Result<u32, StoreError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM execution_interrupts WHERE instance_id = ?")
      .bind(instance_id)
      .fetch_one(&self.pool)
      .await?;
    Ok(count as u32)
  }
}
