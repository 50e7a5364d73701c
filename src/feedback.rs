//! Feedback tracker: rolling per-agent performance statistics and
//! aggregate execution insights.
//!
//! `record` is called from dispatch paths after every task attempt and
//! updates the owning agent's running mean through the registry (single
//! writer per agent). The raw history lives in a concurrent map so that
//! recording never blocks scheduling. `summarize` is read-only and may be
//! called at any time; its output is informational and is not fed back
//! into agent scoring.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::registry::AgentRegistry;

/// One recorded task attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Id of the task the attempt belonged to.
    pub task_id: String,
    /// Agent that ran the attempt.
    pub agent_id: Uuid,
    /// Whether the attempt succeeded.
    pub success: bool,
    /// Wall-clock execution time in milliseconds.
    pub elapsed_ms: f64,
    /// When the attempt was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// Aggregate statistics for a single agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInsight {
    /// Attempts that succeeded.
    pub completed: u64,
    /// Attempts that failed.
    pub failed: u64,
    /// Success rate as a percentage.
    pub success_rate: f64,
    /// Mean execution time across this agent's attempts, in ms.
    pub avg_execution_ms: f64,
}

/// Aggregated execution insights across all recorded attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insights {
    /// Total recorded attempts.
    pub total_tasks: u64,
    /// Overall success rate as a percentage.
    pub success_rate: f64,
    /// Mean execution time across all attempts, in ms.
    pub mean_execution_ms: f64,
    /// Per-agent breakdown.
    pub per_agent: HashMap<Uuid, AgentInsight>,
}

/// Records task outcomes and aggregates them into [`Insights`].
pub struct FeedbackTracker {
    registry: Arc<AgentRegistry>,
    history: DashMap<Uuid, Vec<TaskRecord>>,
}

impl FeedbackTracker {
    /// Create a tracker bound to the registry whose agents it updates.
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self {
            registry,
            history: DashMap::new(),
        }
    }

    /// Record one task attempt for an agent.
    ///
    /// Updates the agent's rolling `avg_execution_ms` (running mean) and
    /// success rate via the registry, then appends to the raw history.
    /// Unknown agents are logged and skipped rather than failing the
    /// dispatch path.
    pub fn record(&self, task_id: &str, agent_id: Uuid, success: bool, elapsed_ms: f64) {
        if let Err(e) = self.registry.record_performance(agent_id, success, elapsed_ms) {
            log::warn!("could not update performance for agent {}: {}", agent_id, e);
        }

        self.history.entry(agent_id).or_default().push(TaskRecord {
            task_id: task_id.to_string(),
            agent_id,
            success,
            elapsed_ms,
            recorded_at: Utc::now(),
        });
    }

    /// All recorded attempts for one agent.
    pub fn agent_history(&self, agent_id: Uuid) -> Vec<TaskRecord> {
        self.history
            .get(&agent_id)
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// All recorded attempts for one task, across agents.
    pub fn task_history(&self, task_id: &str) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self
            .history
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|r| r.task_id == task_id)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        records.sort_by_key(|r| r.recorded_at);
        records
    }

    /// Aggregate the recorded history into [`Insights`].
    ///
    /// Read-only and idempotent: summarizing the same history twice
    /// yields identical results, and scheduling state is untouched.
    pub fn summarize(&self) -> Insights {
        let mut total: u64 = 0;
        let mut succeeded: u64 = 0;
        let mut elapsed_sum: f64 = 0.0;
        let mut per_agent: HashMap<Uuid, AgentInsight> = HashMap::new();

        for entry in self.history.iter() {
            let records = entry.value();
            if records.is_empty() {
                continue;
            }

            let completed = records.iter().filter(|r| r.success).count() as u64;
            let failed = records.len() as u64 - completed;
            let agent_elapsed: f64 = records.iter().map(|r| r.elapsed_ms).sum();

            total += records.len() as u64;
            succeeded += completed;
            elapsed_sum += agent_elapsed;

            per_agent.insert(
                *entry.key(),
                AgentInsight {
                    completed,
                    failed,
                    success_rate: completed as f64 / records.len() as f64 * 100.0,
                    avg_execution_ms: agent_elapsed / records.len() as f64,
                },
            );
        }

        Insights {
            total_tasks: total,
            success_rate: if total == 0 {
                100.0
            } else {
                succeeded as f64 / total as f64 * 100.0
            },
            mean_execution_ms: if total == 0 {
                0.0
            } else {
                elapsed_sum / total as f64
            },
            per_agent,
        }
    }
}
