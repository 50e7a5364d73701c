//! Dependency resolver: turns a flat task list plus dependency and priority
//! maps into an ordered sequence of execution phases (waves).
//!
//! Plan construction is pure and side-effect-free; it can be called
//! speculatively to preview a submission without executing anything. A
//! cycle (or a dependency on a task id that does not exist) fails the whole
//! plan — no partial plan is ever returned.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoordinationError, CoordinationResult};
use crate::task::Task;

/// One wave of tasks that are simultaneously eligible to run.
///
/// Task ids are ordered by descending priority, with ties broken by
/// submission order (stable).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    /// Ordered task ids in this phase.
    pub tasks: Vec<String>,
}

impl Phase {
    /// Number of tasks in the phase.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the phase is empty.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// The ordered list of phases produced by the dependency resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Phases in dependency order.
    pub phases: Vec<Phase>,
}

impl ExecutionPlan {
    /// Total number of tasks across all phases.
    pub fn task_count(&self) -> usize {
        self.phases.iter().map(Phase::len).sum()
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ExecutionPlan({} phases, {} tasks)",
            self.phases.len(),
            self.task_count()
        )
    }
}

/// Build an execution plan from a task list plus external dependency and
/// priority maps.
///
/// The maps are merged with what each task already declares: map entries
/// add to a task's dependency set, and a priority map entry overrides the
/// task's own priority. Map keys referencing unknown task ids are rejected
/// up front.
///
/// # Errors
///
/// * [`CoordinationError::EmptySubmission`] when `tasks` is empty.
/// * [`CoordinationError::UnknownTask`] when a map key names a task id
///   that is not part of the submission.
/// * [`CoordinationError::CyclicDependency`] when a scan over the
///   remaining tasks yields nothing eligible — a cycle, or a dependency
///   on an id that no task carries. The error names the unplaced ids.
pub fn build_plan(
    tasks: &[Task],
    dependencies: &HashMap<String, HashSet<String>>,
    priorities: &HashMap<String, i64>,
) -> CoordinationResult<ExecutionPlan> {
    if tasks.is_empty() {
        return Err(CoordinationError::EmptySubmission);
    }

    let mut known: HashSet<&str> = HashSet::with_capacity(tasks.len());
    for task in tasks {
        if !known.insert(task.id.as_str()) {
            return Err(CoordinationError::DuplicateTask {
                task_id: task.id.clone(),
            });
        }
    }
    for key in dependencies.keys().chain(priorities.keys()) {
        if !known.contains(key.as_str()) {
            return Err(CoordinationError::UnknownTask {
                task_id: key.clone(),
            });
        }
    }

    // Effective dependency set and priority per task, in submission order.
    let entries: Vec<(&str, HashSet<String>, i64)> = tasks
        .iter()
        .map(|task| {
            let mut deps = task.dependencies.clone();
            if let Some(extra) = dependencies.get(&task.id) {
                deps.extend(extra.iter().cloned());
            }
            let priority = priorities.get(&task.id).copied().unwrap_or(task.priority);
            (task.id.as_str(), deps, priority)
        })
        .collect();

    let mut completed: HashSet<String> = HashSet::new();
    let mut placed: HashSet<&str> = HashSet::new();
    let mut phases: Vec<Phase> = Vec::new();

    while placed.len() < entries.len() {
        // Scan in submission order so the later priority sort stays stable
        // with respect to it.
        let mut wave: Vec<(&str, i64)> = entries
            .iter()
            .filter(|(id, deps, _)| {
                !placed.contains(id) && deps.iter().all(|d| completed.contains(d))
            })
            .map(|(id, _, priority)| (*id, *priority))
            .collect();

        if wave.is_empty() {
            let mut remaining: Vec<String> = entries
                .iter()
                .filter(|(id, _, _)| !placed.contains(id))
                .map(|(id, _, _)| id.to_string())
                .collect();
            remaining.sort();
            log::error!(
                "dependency resolution stalled; {} task(s) unplaceable: {:?}",
                remaining.len(),
                remaining
            );
            return Err(CoordinationError::CyclicDependency { remaining });
        }

        // Stable: ties keep submission order.
        wave.sort_by(|a, b| b.1.cmp(&a.1));

        for (id, _) in &wave {
            placed.insert(id);
            completed.insert(id.to_string());
        }
        phases.push(Phase {
            tasks: wave.into_iter().map(|(id, _)| id.to_string()).collect(),
        });
    }

    log::debug!(
        "built execution plan: {} phase(s) for {} task(s)",
        phases.len(),
        entries.len()
    );
    Ok(ExecutionPlan { phases })
}
