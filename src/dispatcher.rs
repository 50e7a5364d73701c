//! Bounded-concurrency phase execution.
//!
//! A phase's tasks all run as independent tokio tasks gated by a
//! semaphore with `max_parallel` permits, so at most `max_parallel`
//! payload executions are in flight at once. One task failing (or
//! hanging, when a timeout is configured) never aborts its siblings; the
//! phase settles when every task has settled.
//!
//! Each attempt claims an agent atomically through the registry, runs the
//! payload, records feedback, and releases the agent. Failed attempts
//! exclude the failing agent from future selection for that task and are
//! retried while the retry budget lasts.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use uuid::Uuid;

use crate::agent::Agent;
use crate::config::CoordinatorConfig;
use crate::error::CoordinationError;
use crate::executor::{ArtifactSink, PayloadError, PayloadExecutor};
use crate::feedback::FeedbackTracker;
use crate::registry::{AgentRegistry, Claim};
use crate::task::{Task, TaskOutcome, TaskStatus};

/// Executes phases of tasks against the agent pool.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<AgentRegistry>,
    feedback: Arc<FeedbackTracker>,
    executor: Arc<dyn PayloadExecutor>,
    sink: Arc<dyn ArtifactSink>,
    config: CoordinatorConfig,
}

impl Dispatcher {
    /// Create a dispatcher over the shared registry and feedback tracker.
    pub fn new(
        registry: Arc<AgentRegistry>,
        feedback: Arc<FeedbackTracker>,
        executor: Arc<dyn PayloadExecutor>,
        sink: Arc<dyn ArtifactSink>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            registry,
            feedback,
            executor,
            sink,
            config,
        }
    }

    /// Run one phase of tasks and collect an outcome per task.
    ///
    /// Tasks should already be in dispatch order (priority descending, as
    /// produced by the planner). Outcomes come back in the same order;
    /// every task yields exactly one outcome.
    pub async fn run_phase(&self, tasks: Vec<Task>) -> Vec<TaskOutcome> {
        log::info!(
            "dispatching phase with {} task(s), max_parallel={}",
            tasks.len(),
            self.config.max_parallel
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel));
        let mut handles = Vec::with_capacity(tasks.len());

        for task in tasks {
            let this = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let task_id = task.id.clone();
            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("phase semaphore closed");
                this.run_task(task).await
            });
            handles.push((task_id, handle));
        }

        let (ids, futures): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let mut outcomes = Vec::with_capacity(ids.len());
        for (task_id, joined) in ids.into_iter().zip(join_all(futures).await) {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    // A panicked worker still yields an outcome; no task
                    // result is silently dropped.
                    log::error!("worker for task '{}' panicked: {}", task_id, e);
                    outcomes.push(TaskOutcome {
                        task_id,
                        status: TaskStatus::Failed,
                        agent_id: None,
                        result: None,
                        error: Some(format!("internal: task worker panicked: {}", e)),
                        attempts: 0,
                        duration_ms: 0.0,
                    });
                }
            }
        }
        outcomes
    }

    /// Execute one task to settlement, retrying across agents.
    async fn run_task(&self, mut task: Task) -> TaskOutcome {
        task.status = TaskStatus::Queued;

        let mut last_agent: Option<Uuid> = None;
        let mut last_elapsed_ms = 0.0;
        let mut last_error = String::new();

        while task.attempts < self.config.max_retries {
            let agent = match self.claim_agent(&task).await {
                Ok(agent) => agent,
                Err(e) => {
                    // No agent can ever serve this task (e.g. the agent
                    // ceiling blocks a required spawn). Terminal.
                    task.fail(e.to_string());
                    return self.outcome_of(task, last_agent, last_elapsed_ms);
                }
            };

            task.assigned_agent = Some(agent.id);
            task.status = TaskStatus::Executing;
            task.started_at = Some(Utc::now());
            task.attempts += 1;
            last_agent = Some(agent.id);

            let started = Instant::now();
            let result = self.execute_with_timeout(&task).await;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            last_elapsed_ms = elapsed_ms;

            match result {
                Ok(value) => {
                    self.feedback.record(&task.id, agent.id, true, elapsed_ms);
                    self.release(agent.id);
                    self.notify_sink(&agent, &task.id, &value);
                    log::info!(
                        "task '{}' completed on agent {} in {:.0}ms (attempt {})",
                        task.id,
                        agent.id,
                        elapsed_ms,
                        task.attempts
                    );
                    task.complete(value);
                    return self.outcome_of(task, last_agent, elapsed_ms);
                }
                Err(err) => {
                    self.feedback.record(&task.id, agent.id, false, elapsed_ms);
                    self.release(agent.id);
                    task.excluded_agents.insert(agent.id);
                    last_error = err.to_string();
                    log::warn!(
                        "task '{}' attempt {}/{} failed on agent {}: {}",
                        task.id,
                        task.attempts,
                        self.config.max_retries,
                        agent.id,
                        last_error
                    );
                }
            }
        }

        let exhausted = CoordinationError::TaskExecutionFailed {
            task_id: task.id.clone(),
            attempts: task.attempts,
            reason: last_error,
        };
        task.fail(exhausted.to_string());
        self.outcome_of(task, last_agent, last_elapsed_ms)
    }

    /// Claim an agent for the task, waiting for an idle notification when
    /// the pool is at its ceiling with a compatible agent busy.
    async fn claim_agent(&self, task: &Task) -> Result<Agent, CoordinationError> {
        loop {
            // Register interest before claiming so a release between the
            // claim attempt and the await is not missed.
            let notified = self.registry.idle_notified();
            match self.registry.try_claim(task)? {
                Claim::Assigned(agent) => return Ok(agent),
                Claim::Wait => notified.await,
            }
        }
    }

    async fn execute_with_timeout(&self, task: &Task) -> Result<serde_json::Value, PayloadError> {
        let execution = self.executor.execute(task);
        match self.config.task_timeout() {
            Some(limit) => match timeout(limit, execution).await {
                Ok(result) => result,
                Err(_) => Err(PayloadError::new(format!(
                    "timed out after {}ms",
                    limit.as_millis()
                ))),
            },
            None => execution.await,
        }
    }

    /// Return the agent to the pool. An invalid transition here means the
    /// registry was mutated behind the dispatcher's back; log loudly but
    /// do not take the task down over it.
    fn release(&self, agent_id: Uuid) {
        if let Err(e) = self.registry.mark_idle(agent_id) {
            log::error!("failed to release agent {}: {}", agent_id, e);
        }
    }

    /// Commit the artifact fire-and-forget; task completion never blocks
    /// on persistence.
    fn notify_sink(&self, agent: &Agent, task_id: &str, result: &serde_json::Value) {
        let sink = Arc::clone(&self.sink);
        let agent = agent.clone();
        let task_id = task_id.to_string();
        let result = result.clone();
        tokio::spawn(async move {
            sink.commit(&agent, &task_id, &result).await;
        });
    }

    fn outcome_of(&self, task: Task, agent_id: Option<Uuid>, duration_ms: f64) -> TaskOutcome {
        TaskOutcome {
            task_id: task.id,
            status: task.status,
            agent_id,
            result: task.result,
            error: task.error,
            attempts: task.attempts,
            duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Value;

    use crate::agent::AgentSpec;
    use crate::executor::NullSink;

    fn dispatcher(
        executor: Arc<dyn PayloadExecutor>,
        config: CoordinatorConfig,
    ) -> (Dispatcher, Arc<AgentRegistry>, Arc<FeedbackTracker>) {
        let registry = Arc::new(AgentRegistry::new(&config));
        let feedback = Arc::new(FeedbackTracker::new(Arc::clone(&registry)));
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&feedback),
            executor,
            Arc::new(NullSink),
            config,
        );
        (dispatcher, registry, feedback)
    }

    /// Tracks the number of concurrently running executions.
    struct GaugeExecutor {
        current: AtomicUsize,
        high_water: AtomicUsize,
    }

    #[async_trait]
    impl PayloadExecutor for GaugeExecutor {
        async fn execute(&self, _task: &Task) -> Result<Value, PayloadError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.high_water.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    /// Fails the first `failures` attempts of every task, then succeeds.
    struct FlakyExecutor {
        failures: u32,
        attempts: Mutex<std::collections::HashMap<String, u32>>,
    }

    #[async_trait]
    impl PayloadExecutor for FlakyExecutor {
        async fn execute(&self, task: &Task) -> Result<Value, PayloadError> {
            let mut attempts = self.attempts.lock();
            let count = attempts.entry(task.id.clone()).or_insert(0);
            *count += 1;
            if *count <= self.failures {
                Err(PayloadError::new(format!("induced failure #{}", count)))
            } else {
                Ok(Value::from("ok"))
            }
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl PayloadExecutor for AlwaysFails {
        async fn execute(&self, _task: &Task) -> Result<Value, PayloadError> {
            Err(PayloadError::new("broken"))
        }
    }

    /// Fails only the task whose id matches `fail_id`.
    struct SelectiveExecutor {
        fail_id: String,
    }

    #[async_trait]
    impl PayloadExecutor for SelectiveExecutor {
        async fn execute(&self, task: &Task) -> Result<Value, PayloadError> {
            if task.id == self.fail_id {
                Err(PayloadError::new("induced failure"))
            } else {
                Ok(Value::from("ok"))
            }
        }
    }

    struct Hangs;

    #[async_trait]
    impl PayloadExecutor for Hangs {
        async fn execute(&self, _task: &Task) -> Result<Value, PayloadError> {
            tokio::time::sleep(Duration::from_secs(300)).await;
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_max_parallel() {
        let executor = Arc::new(GaugeExecutor {
            current: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
        });
        let config = CoordinatorConfig {
            max_parallel: 3,
            ..Default::default()
        };
        let (dispatcher, _, _) = dispatcher(executor.clone(), config);

        let tasks: Vec<Task> = (0..10)
            .map(|i| Task::new(format!("t{}", i), "work"))
            .collect();
        let outcomes = dispatcher.run_phase(tasks).await;

        assert_eq!(outcomes.len(), 10);
        assert!(outcomes.iter().all(TaskOutcome::is_success));
        assert!(executor.high_water.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_retry_excludes_failed_agents_and_succeeds() {
        // Fails twice, so the third attempt must land on a third agent.
        let executor = Arc::new(FlakyExecutor {
            failures: 2,
            attempts: Mutex::new(Default::default()),
        });
        let config = CoordinatorConfig::default();
        let (dispatcher, registry, feedback) = dispatcher(executor, config);

        for i in 0..3 {
            registry
                .register(
                    AgentSpec::new(format!("worker-{}", i), "builder")
                        .with_capability("build"),
                )
                .unwrap();
        }

        let task = Task::new("t1", "build").with_capability("build");
        let outcomes = dispatcher.run_phase(vec![task]).await;

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_success());
        assert_eq!(outcomes[0].attempts, 3);

        // Three attempts on three distinct agents, two recorded failures.
        let history = feedback.task_history("t1");
        assert_eq!(history.len(), 3);
        let agents: HashSet<Uuid> = history.iter().map(|r| r.agent_id).collect();
        assert_eq!(agents.len(), 3);
        assert_eq!(history.iter().filter(|r| !r.success).count(), 2);
    }

    #[tokio::test]
    async fn test_spawns_agent_for_uncovered_capability() {
        let (dispatcher, registry, _) =
            dispatcher(Arc::new(crate::executor::EchoExecutor), Default::default());

        let task = Task::new("t1", "render").with_capability("render");
        let outcomes = dispatcher.run_phase(vec![task]).await;

        assert!(outcomes[0].is_success());
        let spawned = registry.find(|a| a.capabilities.contains("render"));
        assert_eq!(spawned.len(), 1);
        assert_eq!(spawned[0].capabilities.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_siblings() {
        let executor = Arc::new(SelectiveExecutor {
            fail_id: "doomed".to_string(),
        });
        let (dispatcher, registry, _) = dispatcher(executor, Default::default());
        registry.register(AgentSpec::new("w", "worker")).unwrap();

        // "doomed" exhausts its retries; "fine" must still complete.
        let doomed = Task::new("doomed", "work");
        let fine = Task::new("fine", "work");

        let outcomes = dispatcher.run_phase(vec![doomed, fine]).await;
        assert_eq!(outcomes.len(), 2);

        let doomed_outcome = outcomes.iter().find(|o| o.task_id == "doomed").unwrap();
        assert_eq!(doomed_outcome.status, TaskStatus::Failed);
        assert_eq!(doomed_outcome.attempts, 3);
        assert!(doomed_outcome.error.as_deref().unwrap().contains("induced"));

        let fine_outcome = outcomes.iter().find(|o| o.task_id == "fine").unwrap();
        assert!(fine_outcome.is_success());
    }

    #[tokio::test]
    async fn test_always_failing_task_is_terminal_with_reason() {
        let (dispatcher, _, _) = dispatcher(Arc::new(AlwaysFails), Default::default());
        let outcomes = dispatcher.run_phase(vec![Task::new("t1", "work")]).await;

        assert_eq!(outcomes[0].status, TaskStatus::Failed);
        assert_eq!(outcomes[0].attempts, 3);

        // The terminal error is the taxonomy variant, not an ad-hoc string.
        let expected = CoordinationError::TaskExecutionFailed {
            task_id: "t1".to_string(),
            attempts: 3,
            reason: "broken".to_string(),
        };
        assert_eq!(outcomes[0].error.as_deref(), Some(expected.to_string().as_str()));
    }

    #[tokio::test]
    async fn test_ceiling_wait_claims_freed_agent() {
        let config = CoordinatorConfig {
            max_agents: 1,
            ..Default::default()
        };
        let (dispatcher, registry, _) =
            dispatcher(Arc::new(crate::executor::EchoExecutor), config);
        registry.register(AgentSpec::new("solo", "worker")).unwrap();

        // Two tasks, one agent, no room to spawn: the second claim must
        // wait for the first release and reuse the same agent.
        let outcomes = dispatcher
            .run_phase(vec![Task::new("t1", "work"), Task::new("t2", "work")])
            .await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(TaskOutcome::is_success));
        assert_eq!(registry.agent_count(), 1);
        let agents: HashSet<Uuid> = outcomes.iter().filter_map(|o| o.agent_id).collect();
        assert_eq!(agents.len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_fails_the_attempt() {
        let config = CoordinatorConfig {
            task_timeout_ms: Some(50),
            max_retries: 1,
            ..Default::default()
        };
        let (dispatcher, _, _) = dispatcher(Arc::new(Hangs), config);
        let outcomes = dispatcher.run_phase(vec![Task::new("t1", "work")]).await;

        assert_eq!(outcomes[0].status, TaskStatus::Failed);
        assert!(outcomes[0].error.as_deref().unwrap().contains("timed out"));
    }
}
