//! Runs `command` tasks as local shell processes.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use statewright_engine::{DelegateTask, DispatchError, TaskDispatcher, WaitNotify};
use statewright_graph::ResponseData;
use statewright_store::ExecutionStatus;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Dispatcher executing commands with `sh -c`.
///
/// Each task reports its result under its task id. Aborting a task kills
/// its process.
pub struct ShellDispatcher {
  wait_notify: Arc<dyn WaitNotify>,
  running: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl ShellDispatcher {
  pub fn new(wait_notify: Arc<dyn WaitNotify>) -> Self {
    Self {
      wait_notify,
      running: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  fn kill(&self, task_id: &str) -> Result<(), DispatchError> {
    let handle = self
      .running
      .lock()
      .map_err(|_| DispatchError::Unavailable("task table poisoned".to_string()))?
      .remove(task_id);
    match handle {
      Some(handle) => {
        handle.abort();
        Ok(())
      }
      None => Err(DispatchError::TaskNotFound(task_id.to_string())),
    }
  }
}

#[async_trait]
impl TaskDispatcher for ShellDispatcher {
  async fn execute(&self, task: DelegateTask) -> Result<String, DispatchError> {
    let task_id = task.task_id.clone();
    let wait_notify = self.wait_notify.clone();
    let running = self.running.clone();
    let id = task_id.clone();

    let mut table = self
      .running
      .lock()
      .map_err(|_| DispatchError::Unavailable("task table poisoned".to_string()))?;
    let handle = tokio::spawn(async move {
      let response = run(&task).await;
      if let Ok(mut table) = running.lock() {
        table.remove(&id);
      }
      if let Err(e) = wait_notify.done_with(&id, response).await {
        warn!(task_id = %id, error = %e, "failed to report task result");
      }
    });
    table.insert(task_id.clone(), handle);
    Ok(task_id)
  }

  async fn execute_sync(&self, task: DelegateTask) -> Result<ResponseData, DispatchError> {
    Ok(run(&task).await)
  }

  async fn abort_task(&self, task_id: &str) -> Result<(), DispatchError> {
    info!(task_id = %task_id, "aborting task");
    self.kill(task_id)
  }

  async fn expire_task(&self, task_id: &str) -> Result<(), DispatchError> {
    info!(task_id = %task_id, "expiring task");
    self.kill(task_id)
  }
}

async fn run(task: &DelegateTask) -> ResponseData {
  let Some(script) = task.params.get("command").and_then(|v| v.as_str()) else {
    return ResponseData::Error {
      message: "task has no command".to_string(),
    };
  };

  let mut command = Command::new("sh");
  command
    .arg("-c")
    .arg(script)
    .stdin(Stdio::null())
    .kill_on_drop(true);
  if let Some(env) = task.params.get("env").and_then(|v| v.as_object()) {
    for (key, value) in env {
      match value.as_str() {
        Some(value) => command.env(key, value),
        None => command.env(key, value.to_string()),
      };
    }
  }

  info!(task_id = %task.task_id, command = %script, "running command");
  let output = command.output();
  let output = match task.timeout_ms {
    Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), output).await {
      Ok(output) => output,
      Err(_) => {
        return ResponseData::Task {
          status: ExecutionStatus::Expired,
          output: serde_json::Value::Null,
          error: Some(format!("command timed out after {ms}ms")),
        };
      }
    },
    None => output.await,
  };

  match output {
    Ok(output) => {
      let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
      let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
      let exit_code = output.status.code();
      if output.status.success() {
        ResponseData::Task {
          status: ExecutionStatus::Success,
          output: json!({ "stdout": stdout, "exit_code": exit_code }),
          error: None,
        }
      } else {
        ResponseData::Task {
          status: ExecutionStatus::Failed,
          output: json!({ "stdout": stdout, "stderr": stderr, "exit_code": exit_code }),
          error: Some(match exit_code {
            Some(code) => format!("command exited with status {code}"),
            None => "command terminated by signal".to_string(),
          }),
        }
      }
    }
    Err(e) => ResponseData::Error {
      message: format!("failed to start command: {e}"),
    },
  }
}
