//! Agent data model.
//!
//! An agent is a schedulable worker with a capability set, a lifecycle
//! status, and rolling performance statistics. Agents are owned by the
//! [`AgentRegistry`](crate::registry::AgentRegistry); everything here is
//! plain data plus the metric arithmetic that the feedback tracker drives.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default per-agent concurrent task limit.
pub const DEFAULT_MAX_CONCURRENT_TASKS: u32 = 5;

/// Capability assigned to agents spawned without any required capabilities.
pub const GENERAL_CAPABILITY: &str = "general";

/// Lifecycle status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Created but not yet ready to accept work.
    Initializing,
    /// Ready to be assigned a task.
    Idle,
    /// Currently executing a task.
    Busy,
    /// Entered an unrecoverable error state.
    Error,
    /// Draining; accepts no new work.
    ShuttingDown,
    /// Fully stopped.
    Stopped,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentStatus::Initializing => "initializing",
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Error => "error",
            AgentStatus::ShuttingDown => "shutting_down",
            AgentStatus::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// Rolling performance statistics for a single agent.
///
/// `avg_execution_ms` is a running mean updated incrementally on every
/// completion or failure; it has a single writer (the feedback tracker,
/// invoked from the dispatch path that owns the agent at that moment).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Number of tasks this agent completed successfully.
    pub tasks_completed: u64,
    /// Number of tasks this agent failed.
    pub tasks_failed: u64,
    /// Running mean of execution time in milliseconds.
    pub avg_execution_ms: f64,
    /// Timestamp of the most recent recorded activity.
    pub last_activity: Option<DateTime<Utc>>,
}

impl PerformanceMetrics {
    /// Record one task outcome, updating the running mean via
    /// `(prev_avg * (n - 1) + sample) / n`.
    pub fn record(&mut self, success: bool, elapsed_ms: f64) {
        if success {
            self.tasks_completed += 1;
        } else {
            self.tasks_failed += 1;
        }
        let n = (self.tasks_completed + self.tasks_failed) as f64;
        self.avg_execution_ms = (self.avg_execution_ms * (n - 1.0) + elapsed_ms) / n;
        self.last_activity = Some(Utc::now());
    }

    /// Success rate as a percentage (0.0–100.0). Returns 100.0 when no
    /// task has been recorded yet, so brand-new agents are not penalized.
    pub fn success_rate(&self) -> f64 {
        let total = self.tasks_completed + self.tasks_failed;
        if total == 0 {
            return 100.0;
        }
        self.tasks_completed as f64 / total as f64 * 100.0
    }
}

/// Specification used to register a new agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Human-readable agent name.
    pub name: String,
    /// Role label, matched against task names during scoring.
    pub role: String,
    /// Capabilities this agent advertises.
    pub capabilities: HashSet<String>,
    /// Maximum tasks this agent may run concurrently (must be >= 1).
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: u32,
    /// Declared scoring weight added to this agent's selection score.
    #[serde(default)]
    pub priority_weight: i64,
}

fn default_max_concurrent_tasks() -> u32 {
    DEFAULT_MAX_CONCURRENT_TASKS
}

impl AgentSpec {
    /// Create a spec with defaults for the numeric knobs.
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            capabilities: HashSet::new(),
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            priority_weight: 0,
        }
    }

    /// Add a capability to the spec.
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    /// Replace the capability set.
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Set the declared scoring weight.
    pub fn with_priority_weight(mut self, weight: i64) -> Self {
        self.priority_weight = weight;
        self
    }
}

/// A schedulable worker with a capability set and a status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Unique identifier, stable for the process lifetime.
    pub id: Uuid,
    /// Human-readable agent name.
    pub name: String,
    /// Role label, matched against task names during scoring.
    pub role: String,
    /// Capabilities this agent advertises (unordered, unique).
    pub capabilities: HashSet<String>,
    /// Current lifecycle status.
    pub status: AgentStatus,
    /// Maximum tasks this agent may run concurrently.
    pub max_concurrent_tasks: u32,
    /// Declared scoring weight added during selection.
    pub priority_weight: i64,
    /// Rolling performance statistics.
    pub performance: PerformanceMetrics,
    /// Monotonic registration sequence number, used as the final
    /// selection tie-break (earliest registration wins).
    pub registered_at: u64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Agent {
    /// Build an agent from a spec. The registry assigns the registration
    /// sequence number and performs the Initializing -> Idle transition.
    pub fn from_spec(spec: AgentSpec, registered_at: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: spec.name,
            role: spec.role,
            capabilities: spec.capabilities,
            status: AgentStatus::Initializing,
            max_concurrent_tasks: spec.max_concurrent_tasks,
            priority_weight: spec.priority_weight,
            performance: PerformanceMetrics::default(),
            registered_at,
            created_at: Utc::now(),
        }
    }

    /// Whether this agent advertises every capability in `required`.
    pub fn covers(&self, required: &HashSet<String>) -> bool {
        required.is_subset(&self.capabilities)
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Agent(id={}, name={}, status={}, capabilities={})",
            self.id,
            self.name,
            self.status,
            self.capabilities.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_mean_update() {
        let mut perf = PerformanceMetrics::default();
        perf.record(true, 100.0);
        assert_eq!(perf.avg_execution_ms, 100.0);

        perf.record(true, 200.0);
        assert_eq!(perf.avg_execution_ms, 150.0);

        perf.record(false, 600.0);
        assert_eq!(perf.avg_execution_ms, 300.0);
        assert_eq!(perf.tasks_completed, 2);
        assert_eq!(perf.tasks_failed, 1);
    }

    #[test]
    fn test_success_rate() {
        let mut perf = PerformanceMetrics::default();
        assert_eq!(perf.success_rate(), 100.0);

        perf.record(true, 10.0);
        perf.record(true, 10.0);
        perf.record(false, 10.0);
        assert!((perf.success_rate() - 66.666).abs() < 0.01);
    }

    #[test]
    fn test_covers_is_subset_match() {
        let agent = Agent::from_spec(
            AgentSpec::new("worker", "builder").with_capabilities(["rust", "docs"]),
            0,
        );
        let mut required = HashSet::new();
        required.insert("rust".to_string());
        assert!(agent.covers(&required));

        required.insert("deploy".to_string());
        assert!(!agent.covers(&required));

        // Empty requirement set: any agent qualifies.
        assert!(agent.covers(&HashSet::new()));
    }
}
