//! Coordinator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoordinationError, CoordinationResult};

/// Default intra-phase concurrency cap.
pub const DEFAULT_MAX_PARALLEL: usize = 4;
/// Default per-task retry budget.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default conflict-resolution priority threshold.
pub const DEFAULT_CONFLICT_THRESHOLD: i64 = 7;
/// Default ceiling on the total number of agents in the registry.
pub const DEFAULT_MAX_AGENTS: usize = 64;

/// Tunable knobs for the coordination engine.
///
/// Deserializable from JSON so a submission file can carry its own
/// configuration; every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Maximum number of tasks executing concurrently within a phase.
    pub max_parallel: usize,
    /// Maximum execution attempts per task before it terminally fails.
    pub max_retries: u32,
    /// Priority threshold for the conflict resolver; priorities above it
    /// favor the local change-set.
    pub conflict_threshold: i64,
    /// Default per-agent concurrent task limit for spawned agents.
    pub default_max_concurrent_tasks: u32,
    /// Ceiling on the total number of agents; beyond it, tasks wait for
    /// an idle agent instead of spawning a new one.
    pub max_agents: usize,
    /// Optional wall-clock timeout per task attempt, in milliseconds.
    /// `None` disables the timeout.
    pub task_timeout_ms: Option<u64>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            max_retries: DEFAULT_MAX_RETRIES,
            conflict_threshold: DEFAULT_CONFLICT_THRESHOLD,
            default_max_concurrent_tasks: crate::agent::DEFAULT_MAX_CONCURRENT_TASKS,
            max_agents: DEFAULT_MAX_AGENTS,
            task_timeout_ms: None,
        }
    }
}

impl CoordinatorConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> CoordinationResult<()> {
        if self.max_parallel < 1 {
            return Err(CoordinationError::InvalidConfig {
                reason: "max_parallel must be at least 1".to_string(),
            });
        }
        if self.max_retries < 1 {
            return Err(CoordinationError::InvalidConfig {
                reason: "max_retries must be at least 1".to_string(),
            });
        }
        if self.default_max_concurrent_tasks < 1 {
            return Err(CoordinationError::InvalidConfig {
                reason: "default_max_concurrent_tasks must be at least 1".to_string(),
            });
        }
        if self.max_agents < 1 {
            return Err(CoordinationError::InvalidConfig {
                reason: "max_agents must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// The per-attempt timeout as a `Duration`, if configured.
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms.map(Duration::from_millis)
    }
}
