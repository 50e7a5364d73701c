//! Error types for the coordination engine.
//!
//! The taxonomy distinguishes fatal planning errors (which abort a whole
//! submission before anything executes) from task-level failures (which are
//! isolated to the failing task) and from contract violations such as an
//! invalid agent status transition.

use thiserror::Error;
use uuid::Uuid;

use crate::agent::AgentStatus;

/// Result alias used throughout the coordination engine.
pub type CoordinationResult<T> = Result<T, CoordinationError>;

/// Errors raised by the coordination engine.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// One or more tasks can never become eligible because their
    /// dependencies form a cycle or reference task ids that do not exist.
    ///
    /// Fatal to plan construction: no partial plan is ever returned.
    #[error("cyclic or unresolvable dependencies among tasks: {}", remaining.join(", "))]
    CyclicDependency {
        /// Ids of the tasks that could not be placed in any phase (sorted).
        remaining: Vec<String>,
    },

    /// An agent specification was rejected at registration time.
    #[error("invalid agent spec for '{name}': {reason}")]
    InvalidAgentSpec { name: String, reason: String },

    /// A status transition was requested from a state it is not valid in,
    /// e.g. marking an already-Busy agent Busy. This is a programming
    /// contract violation and is never retried.
    #[error("invalid transition for agent {agent_id}: {from} -> {to}")]
    InvalidTransition {
        agent_id: Uuid,
        from: AgentStatus,
        to: AgentStatus,
    },

    /// The referenced agent is not present in the registry.
    #[error("agent not found: {agent_id}")]
    AgentNotFound { agent_id: Uuid },

    /// The registry refused to spawn a new agent because the configured
    /// agent ceiling has been reached.
    #[error("agent ceiling reached ({limit} agents); task must wait for an idle agent")]
    AgentCeilingReached { limit: usize },

    /// A task exhausted its retry budget and is terminally failed.
    #[error("task '{task_id}' failed after {attempts} attempt(s): {reason}")]
    TaskExecutionFailed {
        task_id: String,
        attempts: u32,
        reason: String,
    },

    /// A dependency or priority map entry references a task id that is not
    /// part of the submission.
    #[error("unknown task id referenced: {task_id}")]
    UnknownTask { task_id: String },

    /// Two submitted tasks share the same id.
    #[error("duplicate task id in submission: {task_id}")]
    DuplicateTask { task_id: String },

    /// The submission contained no tasks.
    #[error("submission contains no tasks")]
    EmptySubmission,

    /// Configuration failed validation.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cyclic_error_names_remaining_tasks() {
        let err = CoordinationError::CyclicDependency {
            remaining: vec!["t1".to_string(), "t2".to_string()],
        };
        let message = err.to_string();
        assert!(message.contains("t1"));
        assert!(message.contains("t2"));
    }

    #[test]
    fn test_invalid_transition_display() {
        let id = Uuid::new_v4();
        let err = CoordinationError::InvalidTransition {
            agent_id: id,
            from: AgentStatus::Busy,
            to: AgentStatus::Busy,
        };
        assert!(err.to_string().contains("busy -> busy"));
    }
}
