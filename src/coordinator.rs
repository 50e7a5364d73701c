//! The coordination engine's top-level driver.
//!
//! A caller submits a task list plus dependency and priority maps; the
//! coordinator plans phases, drives them in dependency order through the
//! dispatcher, and reports every task's outcome. Planning errors abort
//! the whole submission before anything executes; task-level failures are
//! isolated and enumerated in the report.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::CoordinatorConfig;
use crate::conflict::{ConflictPolicy, MergeStrategy, ThresholdPolicy};
use crate::dispatcher::Dispatcher;
use crate::error::{CoordinationError, CoordinationResult};
use crate::executor::{ArtifactSink, NullSink, PayloadExecutor};
use crate::feedback::{FeedbackTracker, Insights};
use crate::planner::{self, ExecutionPlan};
use crate::registry::AgentRegistry;
use crate::task::{Task, TaskOutcome, TaskStatus};

/// A unit of work for the coordinator: tasks plus external dependency and
/// priority maps, with optional configuration overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Submission {
    /// The tasks to execute.
    pub tasks: Vec<Task>,
    /// Extra dependencies, merged into each task's own dependency set.
    #[serde(default)]
    pub dependencies: HashMap<String, HashSet<String>>,
    /// Priority overrides by task id.
    #[serde(default)]
    pub priorities: HashMap<String, i64>,
    /// Optional coordinator configuration carried with the submission.
    #[serde(default)]
    pub config: Option<CoordinatorConfig>,
}

impl Submission {
    /// Create a submission from a bare task list.
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            tasks,
            ..Default::default()
        }
    }

    /// Fold the external dependency and priority maps into the tasks,
    /// validating that every map key names a submitted task.
    fn normalize(&self) -> CoordinationResult<Vec<Task>> {
        let known: HashSet<&str> = self.tasks.iter().map(|t| t.id.as_str()).collect();
        for key in self.dependencies.keys().chain(self.priorities.keys()) {
            if !known.contains(key.as_str()) {
                return Err(CoordinationError::UnknownTask {
                    task_id: key.clone(),
                });
            }
        }

        Ok(self
            .tasks
            .iter()
            .map(|task| {
                let mut task = task.clone();
                if let Some(extra) = self.dependencies.get(&task.id) {
                    task.dependencies.extend(extra.iter().cloned());
                }
                if let Some(priority) = self.priorities.get(&task.id) {
                    task.priority = *priority;
                }
                task
            })
            .collect())
    }
}

/// Summary of a full submission run: one outcome per task plus aggregate
/// counts and execution insights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Per-task outcomes, in plan order.
    pub outcomes: Vec<TaskOutcome>,
    /// Number of tasks that completed.
    pub completed: usize,
    /// Number of tasks that terminally failed.
    pub failed: usize,
    /// Number of phases the plan contained.
    pub phases: usize,
    /// Aggregated execution insights.
    pub insights: Insights,
}

impl ExecutionReport {
    /// Whether every task in the submission completed.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Coordinates a pool of capability-advertising agents over submissions.
pub struct Coordinator {
    registry: Arc<AgentRegistry>,
    feedback: Arc<FeedbackTracker>,
    dispatcher: Dispatcher,
    conflict_policy: Arc<dyn ConflictPolicy>,
    config: CoordinatorConfig,
}

impl Coordinator {
    /// Create a coordinator with a payload executor and a discarding
    /// artifact sink.
    pub fn new(
        config: CoordinatorConfig,
        executor: Arc<dyn PayloadExecutor>,
    ) -> CoordinationResult<Self> {
        Self::with_sink(config, executor, Arc::new(NullSink))
    }

    /// Create a coordinator with an explicit artifact sink.
    pub fn with_sink(
        config: CoordinatorConfig,
        executor: Arc<dyn PayloadExecutor>,
        sink: Arc<dyn ArtifactSink>,
    ) -> CoordinationResult<Self> {
        config.validate()?;

        let registry = Arc::new(AgentRegistry::new(&config));
        let feedback = Arc::new(FeedbackTracker::new(Arc::clone(&registry)));
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&feedback),
            executor,
            sink,
            config.clone(),
        );

        Ok(Self {
            registry,
            feedback,
            dispatcher,
            conflict_policy: Arc::new(ThresholdPolicy {
                threshold: config.conflict_threshold,
            }),
            config,
        })
    }

    /// Replace the conflict-resolution policy.
    pub fn with_conflict_policy(mut self, policy: Arc<dyn ConflictPolicy>) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// The shared agent registry, for pre-registering agents.
    pub fn registry(&self) -> Arc<AgentRegistry> {
        Arc::clone(&self.registry)
    }

    /// Aggregated execution insights so far. Read-only.
    pub fn insights(&self) -> Insights {
        self.feedback.summarize()
    }

    /// The active configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Build the execution plan for a submission without executing it.
    pub fn plan(&self, submission: &Submission) -> CoordinationResult<ExecutionPlan> {
        let tasks = submission.normalize()?;
        planner::build_plan(&tasks, &HashMap::new(), &HashMap::new())
    }

    /// Execute a submission to completion.
    ///
    /// Phases run strictly in dependency order. A task whose dependency
    /// terminally failed is itself failed without executing (its outcome
    /// names the unresolved dependencies); sibling tasks are unaffected.
    ///
    /// # Errors
    ///
    /// Only planning errors are returned as `Err` — a cycle, an unknown
    /// task id, or an empty submission — and in that case nothing has
    /// executed. Task-level failures are reported per task inside the
    /// `ExecutionReport`.
    pub async fn run(&self, submission: Submission) -> CoordinationResult<ExecutionReport> {
        let tasks = submission.normalize()?;
        let plan = planner::build_plan(&tasks, &HashMap::new(), &HashMap::new())?;

        let by_id: HashMap<String, Task> =
            tasks.into_iter().map(|t| (t.id.clone(), t)).collect();

        log::info!(
            "running submission: {} task(s) across {} phase(s)",
            by_id.len(),
            plan.phases.len()
        );

        let mut completed_ids: HashSet<String> = HashSet::new();
        let mut outcomes: Vec<TaskOutcome> = Vec::with_capacity(by_id.len());

        for (index, phase) in plan.phases.iter().enumerate() {
            let mut runnable: Vec<Task> = Vec::with_capacity(phase.len());
            for task_id in &phase.tasks {
                let task = &by_id[task_id];
                if task.ready(&completed_ids) {
                    let mut task = task.clone();
                    task.status = TaskStatus::Queued;
                    runnable.push(task);
                } else {
                    // A dependency failed in an earlier phase; the task
                    // is failed explicitly, never silently dropped.
                    let mut unresolved: Vec<&str> = task
                        .dependencies
                        .iter()
                        .filter(|d| !completed_ids.contains(*d))
                        .map(String::as_str)
                        .collect();
                    unresolved.sort_unstable();
                    log::warn!(
                        "skipping task '{}': unresolved dependencies {:?}",
                        task_id,
                        unresolved
                    );
                    outcomes.push(TaskOutcome {
                        task_id: task_id.clone(),
                        status: TaskStatus::Failed,
                        agent_id: None,
                        result: None,
                        error: Some(format!(
                            "dependencies did not complete: {}",
                            unresolved.join(", ")
                        )),
                        attempts: 0,
                        duration_ms: 0.0,
                    });
                }
            }

            if runnable.is_empty() {
                continue;
            }

            log::debug!("phase {}: {} runnable task(s)", index, runnable.len());
            let phase_outcomes = self.dispatcher.run_phase(runnable).await;
            for outcome in &phase_outcomes {
                if outcome.is_success() {
                    completed_ids.insert(outcome.task_id.clone());
                }
            }
            outcomes.extend(phase_outcomes);
        }

        let completed = outcomes.iter().filter(|o| o.is_success()).count();
        let failed = outcomes.len() - completed;
        log::info!(
            "submission finished: {} completed, {} failed",
            completed,
            failed
        );

        Ok(ExecutionReport {
            outcomes,
            completed,
            failed,
            phases: plan.phases.len(),
            insights: self.feedback.summarize(),
        })
    }

    /// Decide which of two concurrent change-sets wins for a party with
    /// the given priority, using the configured conflict policy.
    pub fn resolve_conflict(&self, party_priority: i64) -> MergeStrategy {
        let strategy = self.conflict_policy.decide(party_priority);
        log::debug!(
            "conflict resolved for priority {}: {}",
            party_priority,
            strategy
        );
        strategy
    }
}
