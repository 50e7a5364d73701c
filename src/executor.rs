//! External collaborator interfaces.
//!
//! The dispatcher is deliberately ignorant of what a task actually does:
//! the domain work lives behind [`PayloadExecutor`], and persistence of
//! produced artifacts behind [`ArtifactSink`]. Payload executors must be
//! safe to retry, since the dispatcher will call `execute` again for the
//! same task id after a failure.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::agent::Agent;
use crate::task::Task;

/// Failure raised by a payload executor.
#[derive(Debug, Error)]
#[error("payload execution failed: {message}")]
pub struct PayloadError {
    /// Human-readable failure reason.
    pub message: String,
}

impl PayloadError {
    /// Create a new payload error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Executes the domain-specific work of a task.
#[async_trait]
pub trait PayloadExecutor: Send + Sync {
    /// Perform the task's work and return its result payload.
    ///
    /// The task snapshot carries the assigned agent in
    /// [`Task::assigned_agent`]. Called once per attempt; must be
    /// idempotent-safe under retries.
    async fn execute(&self, task: &Task) -> Result<Value, PayloadError>;
}

/// Receives produced artifacts after a task succeeds.
///
/// The dispatcher notifies the sink fire-and-forget; committing is never
/// a blocking dependency of task completion.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Commit a successful task's result, scoped to the owning agent.
    async fn commit(&self, agent: &Agent, task_id: &str, result: &Value);
}

/// Sink that discards artifacts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl ArtifactSink for NullSink {
    async fn commit(&self, agent: &Agent, task_id: &str, _result: &Value) {
        log::debug!(
            "discarding artifact for task '{}' from agent {}",
            task_id,
            agent.id
        );
    }
}

/// Executor that echoes the task back as its result.
///
/// Used by the command-line binary for dry runs of a submission and by
/// tests that only care about scheduling behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoExecutor;

#[async_trait]
impl PayloadExecutor for EchoExecutor {
    async fn execute(&self, task: &Task) -> Result<Value, PayloadError> {
        Ok(serde_json::json!({
            "task_id": task.id,
            "name": task.name,
            "attempt": task.attempts + 1,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_executor_reports_task_identity() {
        let task = Task::new("t1", "build");
        let result = EchoExecutor.execute(&task).await.unwrap();
        assert_eq!(result["task_id"], "t1");
        assert_eq!(result["attempt"], 1);
    }

    #[test]
    fn test_payload_error_display() {
        let err = PayloadError::new("compiler exited with status 1");
        assert!(err.to_string().contains("compiler exited"));
    }
}
