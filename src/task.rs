//! Task data model.
//!
//! A task is a unit of work with required capabilities, a priority, and a
//! set of dependencies on other task ids. Tasks carry their own lifecycle
//! status; the result and error slots are mutually exclusive and set
//! exactly once.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Submitted, not yet placed in a phase.
    Pending,
    /// Placed in a phase, waiting for dispatch.
    Queued,
    /// Currently running on an agent.
    Executing,
    /// Finished successfully; `result` is set.
    Completed,
    /// Terminally failed; `error` is set.
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Executing => "executing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Pending
    }
}

/// A unit of work to be assigned to a capability-matching agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Caller-chosen identifier, stable across retries.
    pub id: String,
    /// Human-readable name, matched against agent roles during scoring.
    pub name: String,
    /// Capabilities an agent must advertise to run this task.
    /// Empty means any agent qualifies.
    #[serde(default)]
    pub required_capabilities: HashSet<String>,
    /// Numeric priority; higher is more urgent.
    #[serde(default)]
    pub priority: i64,
    /// Ids of tasks that must reach Completed before this task may start.
    #[serde(default)]
    pub dependencies: HashSet<String>,
    /// Current lifecycle status.
    #[serde(default)]
    pub status: TaskStatus,
    /// Result payload, set exactly once on success.
    #[serde(default)]
    pub result: Option<Value>,
    /// Failure message, set exactly once on terminal failure.
    #[serde(default)]
    pub error: Option<String>,
    /// Number of execution attempts so far.
    #[serde(default)]
    pub attempts: u32,
    /// Agents that already failed this task; never selected again for it.
    #[serde(default)]
    pub excluded_agents: HashSet<Uuid>,
    /// The agent currently (or last) assigned to this task.
    #[serde(default)]
    pub assigned_agent: Option<Uuid>,
    /// When execution of the latest attempt started.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the task settled (completed or terminally failed).
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new task with the given id and name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            required_capabilities: HashSet::new(),
            priority: 0,
            dependencies: HashSet::new(),
            status: TaskStatus::Pending,
            result: None,
            error: None,
            attempts: 0,
            excluded_agents: HashSet::new(),
            assigned_agent: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Add a required capability.
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.required_capabilities.insert(capability.into());
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Add a dependency on another task id.
    pub fn with_dependency(mut self, task_id: impl Into<String>) -> Self {
        self.dependencies.insert(task_id.into());
        self
    }

    /// Whether every dependency is contained in `completed`.
    pub fn ready(&self, completed: &HashSet<String>) -> bool {
        self.dependencies.iter().all(|d| completed.contains(d))
    }

    /// Mark the task completed with its result payload.
    ///
    /// The result slot is write-once; settling an already-settled task is
    /// a no-op so a late duplicate settlement can never overwrite the
    /// recorded outcome.
    pub fn complete(&mut self, result: Value) {
        if self.is_settled() {
            return;
        }
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.finished_at = Some(Utc::now());
    }

    /// Mark the task terminally failed with an error message.
    pub fn fail(&mut self, error: impl Into<String>) {
        if self.is_settled() {
            return;
        }
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
    }

    /// Whether the task has reached a terminal status.
    pub fn is_settled(&self) -> bool {
        matches!(self.status, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Task(id={}, name={}, status={}, priority={})",
            self.id, self.name, self.status, self.priority
        )
    }
}

/// Per-task outcome reported by the dispatcher.
///
/// Every submitted task produces exactly one outcome; no result is
/// silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// Id of the task this outcome describes.
    pub task_id: String,
    /// Final status (Completed or Failed).
    pub status: TaskStatus,
    /// Agent that produced the final attempt, if any attempt ran.
    pub agent_id: Option<Uuid>,
    /// Result payload on success.
    pub result: Option<Value>,
    /// Failure reason on terminal failure.
    pub error: Option<String>,
    /// Total execution attempts made.
    pub attempts: u32,
    /// Wall-clock duration of the final attempt in milliseconds.
    pub duration_ms: f64,
}

impl TaskOutcome {
    /// Whether the task completed successfully.
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_requires_all_dependencies() {
        let task = Task::new("t3", "deploy")
            .with_dependency("t1")
            .with_dependency("t2");

        let mut completed = HashSet::new();
        completed.insert("t1".to_string());
        assert!(!task.ready(&completed));

        completed.insert("t2".to_string());
        assert!(task.ready(&completed));
    }

    #[test]
    fn test_result_and_error_are_write_once() {
        let mut task = Task::new("t1", "build");
        task.complete(Value::from("done"));
        assert_eq!(task.status, TaskStatus::Completed);

        // A late failure cannot overwrite the settled result.
        task.fail("too late");
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.error.is_none());
    }

    #[test]
    fn test_deserializes_from_minimal_json() {
        let task: Task = serde_json::from_str(r#"{"id": "t1", "name": "build"}"#).unwrap();
        assert_eq!(task.id, "t1");
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.required_capabilities.is_empty());
    }
}
