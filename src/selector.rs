//! Capability-based agent selection.
//!
//! Scoring is pure: the selector ranks a snapshot of agents for a task and
//! either names the best match or asks for a new agent to be spawned. The
//! registry invokes it under its own write lock so that selection and the
//! Busy transition are atomic (see [`crate::registry`]).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::{Agent, AgentStatus, GENERAL_CAPABILITY};
use crate::task::Task;

/// Points per overlapping capability.
const CAPABILITY_WEIGHT: i64 = 10;
/// Bonus when the agent's role and the task's name align.
const ROLE_MATCH_BONUS: i64 = 5;
/// Bonus for an idle agent.
const IDLE_BONUS: i64 = 3;

/// Request to create a new agent because no registered idle agent covers
/// the task's required capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnRequest {
    /// Capability set the new agent must advertise. Empty means the agent
    /// gets the generic fallback capability.
    pub capabilities: HashSet<String>,
}

impl SpawnRequest {
    /// The effective capability set for the spawned agent: the request as
    /// given, or the generic fallback when it is empty.
    pub fn effective_capabilities(&self) -> HashSet<String> {
        if self.capabilities.is_empty() {
            [GENERAL_CAPABILITY.to_string()].into_iter().collect()
        } else {
            self.capabilities.clone()
        }
    }
}

/// Outcome of agent selection for a task.
#[derive(Debug, Clone)]
pub enum Selection {
    /// An existing idle agent fully covers the task; assign it.
    Assigned(Uuid),
    /// No registered idle agent qualifies; a new agent must be spawned.
    Spawn(SpawnRequest),
}

/// Score an agent for a task.
///
/// `10 x |required ∩ capabilities| + 5` on a case-insensitive substring
/// match between the agent's role and the task's name, plus the agent's
/// declared priority weight, plus `3` if the agent is idle.
pub fn score(agent: &Agent, task: &Task) -> i64 {
    let overlap = task
        .required_capabilities
        .intersection(&agent.capabilities)
        .count() as i64;

    let mut total = CAPABILITY_WEIGHT * overlap + agent.priority_weight;

    let role = agent.role.to_lowercase();
    let name = task.name.to_lowercase();
    if !role.is_empty() && !name.is_empty() && (role.contains(&name) || name.contains(&role)) {
        total += ROLE_MATCH_BONUS;
    }

    if agent.status == AgentStatus::Idle {
        total += IDLE_BONUS;
    }

    total
}

/// Select the best agent for a task from a snapshot of the registry.
///
/// Only Idle agents not present in the task's exclusion set are eligible,
/// and an agent must cover the full required capability set (subset match)
/// to be assignable. Ties on score are broken by lowest average execution
/// time, then by earliest registration. When nothing qualifies the
/// selector issues a [`SpawnRequest`] carrying the task's requirements —
/// a task is never failed purely for lack of a pre-provisioned agent.
pub fn select(task: &Task, agents: &[Agent]) -> Selection {
    let mut best: Option<&Agent> = None;
    let mut best_score = i64::MIN;

    for agent in agents {
        if agent.status != AgentStatus::Idle {
            continue;
        }
        if task.excluded_agents.contains(&agent.id) {
            continue;
        }
        if !agent.covers(&task.required_capabilities) {
            continue;
        }

        let candidate_score = score(agent, task);
        let better = match best {
            None => true,
            Some(current) => {
                candidate_score > best_score
                    || (candidate_score == best_score
                        && (agent.performance.avg_execution_ms
                            < current.performance.avg_execution_ms
                            || (agent.performance.avg_execution_ms
                                == current.performance.avg_execution_ms
                                && agent.registered_at < current.registered_at)))
            }
        };
        if better {
            best = Some(agent);
            best_score = candidate_score;
        }
    }

    match best {
        Some(agent) => {
            log::debug!(
                "selected agent {} ('{}') for task '{}' with score {}",
                agent.id,
                agent.name,
                task.id,
                best_score
            );
            Selection::Assigned(agent.id)
        }
        None => {
            log::debug!(
                "no idle agent covers task '{}' (required: {:?}); requesting spawn",
                task.id,
                task.required_capabilities
            );
            Selection::Spawn(SpawnRequest {
                capabilities: task.required_capabilities.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentSpec;

    fn idle_agent(name: &str, role: &str, caps: &[&str], seq: u64) -> Agent {
        let mut agent = Agent::from_spec(
            AgentSpec::new(name, role).with_capabilities(caps.iter().copied()),
            seq,
        );
        agent.status = AgentStatus::Idle;
        agent
    }

    #[test]
    fn test_capability_overlap_dominates_score() {
        let task = Task::new("t", "render frames")
            .with_capability("render")
            .with_capability("gpu");
        let narrow = idle_agent("a", "worker", &["render"], 0);
        let broad = idle_agent("b", "worker", &["render", "gpu"], 1);

        assert!(score(&broad, &task) > score(&narrow, &task));
    }

    #[test]
    fn test_role_alignment_bonus() {
        let task = Task::new("t", "render");
        let matching = idle_agent("a", "render specialist", &[], 0);
        let other = idle_agent("b", "builder", &[], 1);

        assert_eq!(score(&matching, &task) - score(&other, &task), ROLE_MATCH_BONUS);
    }

    #[test]
    fn test_never_selects_non_idle_agents() {
        let task = Task::new("t", "build");
        let mut busy = idle_agent("a", "builder", &[], 0);
        busy.status = AgentStatus::Busy;

        match select(&task, &[busy]) {
            Selection::Spawn(_) => {}
            Selection::Assigned(_) => panic!("selected a non-idle agent"),
        }
    }

    #[test]
    fn test_spawn_when_no_agent_covers_capabilities() {
        let task = Task::new("t", "render").with_capability("render");
        let agent = idle_agent("a", "builder", &["build"], 0);

        match select(&task, &[agent]) {
            Selection::Spawn(request) => {
                assert!(request.capabilities.contains("render"));
            }
            Selection::Assigned(_) => panic!("agent without capability was assigned"),
        }
    }

    #[test]
    fn test_ties_prefer_faster_then_earlier_agent() {
        let task = Task::new("t", "build");
        let mut slow = idle_agent("slow", "worker", &[], 0);
        slow.performance.avg_execution_ms = 500.0;
        let mut fast = idle_agent("fast", "worker", &[], 1);
        fast.performance.avg_execution_ms = 50.0;
        let fast_id = fast.id;

        match select(&task, &[slow.clone(), fast]) {
            Selection::Assigned(id) => assert_eq!(id, fast_id),
            Selection::Spawn(_) => panic!("expected an assignment"),
        }

        // Equal history: earliest registration wins.
        let first = idle_agent("first", "worker", &[], 0);
        let second = idle_agent("second", "worker", &[], 1);
        let first_id = first.id;
        match select(&task, &[second, first]) {
            Selection::Assigned(id) => assert_eq!(id, first_id),
            Selection::Spawn(_) => panic!("expected an assignment"),
        }
    }

    #[test]
    fn test_excluded_agents_are_skipped() {
        let agent = idle_agent("a", "worker", &["build"], 0);
        let mut task = Task::new("t", "build").with_capability("build");
        task.excluded_agents.insert(agent.id);

        assert!(matches!(select(&task, &[agent]), Selection::Spawn(_)));
    }

    #[test]
    fn test_empty_spawn_request_gets_fallback_capability() {
        let request = SpawnRequest {
            capabilities: HashSet::new(),
        };
        assert!(request
            .effective_capabilities()
            .contains(GENERAL_CAPABILITY));
    }
}
