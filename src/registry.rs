//! Agent registry: the single owner of all mutable agent state.
//!
//! Every status transition, spawn, and performance update goes through
//! this component; the underlying collection is never exposed for direct
//! mutation. Selection and the Idle -> Busy transition happen under one
//! write lock, so two concurrent dispatch paths can never claim the same
//! agent.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::agent::{Agent, AgentSpec, AgentStatus};
use crate::config::CoordinatorConfig;
use crate::error::{CoordinationError, CoordinationResult};
use crate::selector::{self, Selection, SpawnRequest};
use crate::task::Task;

/// Outcome of an atomic claim attempt for a task.
#[derive(Debug)]
pub enum Claim {
    /// An agent was selected (or spawned) and marked Busy for the task.
    Assigned(Agent),
    /// The agent ceiling is reached but a compatible agent is currently
    /// busy; the caller should wait for an idle notification and retry.
    Wait,
}

struct RegistryInner {
    agents: HashMap<Uuid, Agent>,
    next_seq: u64,
}

/// Thread-safe registry of all known agents.
pub struct AgentRegistry {
    inner: RwLock<RegistryInner>,
    max_agents: usize,
    default_max_concurrent_tasks: u32,
    /// Signalled whenever an agent returns to Idle, waking claim waiters.
    idle_notify: Notify,
}

impl AgentRegistry {
    /// Create an empty registry configured with the coordinator's agent
    /// ceiling and per-agent defaults.
    pub fn new(config: &CoordinatorConfig) -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                agents: HashMap::new(),
                next_seq: 0,
            }),
            max_agents: config.max_agents,
            default_max_concurrent_tasks: config.default_max_concurrent_tasks,
            idle_notify: Notify::new(),
        }
    }

    /// Register a new agent from a spec.
    ///
    /// The agent passes through Initializing and lands Idle. Fails only
    /// when `max_concurrent_tasks < 1`.
    pub fn register(&self, spec: AgentSpec) -> CoordinationResult<Agent> {
        if spec.max_concurrent_tasks < 1 {
            return Err(CoordinationError::InvalidAgentSpec {
                name: spec.name,
                reason: "max_concurrent_tasks must be at least 1".to_string(),
            });
        }

        let mut inner = self.inner.write();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let mut agent = Agent::from_spec(spec, seq);
        debug_assert_eq!(agent.status, AgentStatus::Initializing);
        agent.status = AgentStatus::Idle;

        log::info!(
            "registered agent {} ('{}') with capabilities {:?}",
            agent.id,
            agent.name,
            agent.capabilities
        );
        inner.agents.insert(agent.id, agent.clone());
        Ok(agent)
    }

    /// Return snapshots of all agents matching `predicate`. Read-only.
    pub fn find<F>(&self, predicate: F) -> Vec<Agent>
    where
        F: Fn(&Agent) -> bool,
    {
        let inner = self.inner.read();
        inner
            .agents
            .values()
            .filter(|a| predicate(a))
            .cloned()
            .collect()
    }

    /// Snapshot of a single agent.
    pub fn get(&self, agent_id: Uuid) -> Option<Agent> {
        self.inner.read().agents.get(&agent_id).cloned()
    }

    /// Snapshot of every agent.
    pub fn snapshot(&self) -> Vec<Agent> {
        self.inner.read().agents.values().cloned().collect()
    }

    /// Total number of agents (any status).
    pub fn agent_count(&self) -> usize {
        self.inner.read().agents.len()
    }

    /// Number of agents currently Idle.
    pub fn idle_count(&self) -> usize {
        self.inner
            .read()
            .agents
            .values()
            .filter(|a| a.status == AgentStatus::Idle)
            .count()
    }

    /// Transition an agent Idle -> Busy.
    pub fn mark_busy(&self, agent_id: Uuid) -> CoordinationResult<()> {
        self.transition(agent_id, AgentStatus::Idle, AgentStatus::Busy)
    }

    /// Transition an agent Busy -> Idle and wake any claim waiters.
    pub fn mark_idle(&self, agent_id: Uuid) -> CoordinationResult<()> {
        self.transition(agent_id, AgentStatus::Busy, AgentStatus::Idle)?;
        self.idle_notify.notify_waiters();
        Ok(())
    }

    /// Spawn a new agent whose capability set is exactly the request's
    /// (or the generic fallback when the request is empty).
    ///
    /// # Errors
    ///
    /// [`CoordinationError::AgentCeilingReached`] when the registry is at
    /// its configured agent ceiling.
    pub fn spawn(&self, capabilities: HashSet<String>) -> CoordinationResult<Agent> {
        let mut inner = self.inner.write();
        self.spawn_locked(&mut inner, SpawnRequest { capabilities })
    }

    /// Atomically select (or spawn) an agent for `task` and mark it Busy.
    ///
    /// Selection and the Busy transition happen under a single write
    /// lock, which is what upholds the "one agent, one task" invariant.
    /// When the agent ceiling blocks a spawn the result depends on
    /// whether a compatible agent exists at all: [`Claim::Wait`] when one
    /// is merely busy, an error when no agent will ever qualify.
    pub fn try_claim(&self, task: &Task) -> CoordinationResult<Claim> {
        let mut inner = self.inner.write();

        let snapshot: Vec<Agent> = inner.agents.values().cloned().collect();
        match selector::select(task, &snapshot) {
            Selection::Assigned(agent_id) => {
                let agent = inner
                    .agents
                    .get_mut(&agent_id)
                    .ok_or(CoordinationError::AgentNotFound { agent_id })?;
                // The selector only ever returns Idle agents, and the
                // snapshot was taken under this same lock.
                debug_assert_eq!(agent.status, AgentStatus::Idle);
                agent.status = AgentStatus::Busy;
                Ok(Claim::Assigned(agent.clone()))
            }
            Selection::Spawn(request) => {
                if inner.agents.len() >= self.max_agents {
                    let compatible_busy = inner.agents.values().any(|a| {
                        a.status == AgentStatus::Busy
                            && !task.excluded_agents.contains(&a.id)
                            && a.covers(&task.required_capabilities)
                    });
                    if compatible_busy {
                        log::debug!(
                            "agent ceiling reached; task '{}' waiting for an idle agent",
                            task.id
                        );
                        return Ok(Claim::Wait);
                    }
                    return Err(CoordinationError::AgentCeilingReached {
                        limit: self.max_agents,
                    });
                }

                let mut agent = self.spawn_locked(&mut inner, request)?;
                let entry = inner
                    .agents
                    .get_mut(&agent.id)
                    .expect("just-spawned agent present");
                entry.status = AgentStatus::Busy;
                agent.status = AgentStatus::Busy;
                Ok(Claim::Assigned(agent))
            }
        }
    }

    /// A future that resolves on the next Idle notification.
    ///
    /// Obtain it *before* calling [`try_claim`](Self::try_claim) again so
    /// a release between the claim attempt and the await is not missed.
    pub fn idle_notified(&self) -> Notified<'_> {
        self.idle_notify.notified()
    }

    /// Update an agent's rolling performance statistics.
    ///
    /// Called by the feedback tracker from the dispatch path that owns
    /// the agent at that moment, so each agent's running mean has a
    /// single writer.
    pub fn record_performance(
        &self,
        agent_id: Uuid,
        success: bool,
        elapsed_ms: f64,
    ) -> CoordinationResult<()> {
        let mut inner = self.inner.write();
        let agent = inner
            .agents
            .get_mut(&agent_id)
            .ok_or(CoordinationError::AgentNotFound { agent_id })?;
        agent.performance.record(success, elapsed_ms);
        Ok(())
    }

    /// Shut an agent down: Idle -> ShuttingDown -> Stopped.
    ///
    /// A Busy agent refuses shutdown; drain it by letting its in-flight
    /// task settle first.
    pub fn shutdown(&self, agent_id: Uuid) -> CoordinationResult<()> {
        self.transition(agent_id, AgentStatus::Idle, AgentStatus::ShuttingDown)?;
        self.transition(agent_id, AgentStatus::ShuttingDown, AgentStatus::Stopped)?;
        log::info!("agent {} stopped", agent_id);
        Ok(())
    }

    fn spawn_locked(
        &self,
        inner: &mut RegistryInner,
        request: SpawnRequest,
    ) -> CoordinationResult<Agent> {
        if inner.agents.len() >= self.max_agents {
            return Err(CoordinationError::AgentCeilingReached {
                limit: self.max_agents,
            });
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;

        let capabilities = request.effective_capabilities();
        let mut role: Vec<&str> = capabilities.iter().map(String::as_str).collect();
        role.sort_unstable();

        let spec = AgentSpec {
            name: format!("agent-{}", seq),
            role: role.join(" "),
            capabilities,
            max_concurrent_tasks: self.default_max_concurrent_tasks,
            priority_weight: 0,
        };
        let mut agent = Agent::from_spec(spec, seq);
        agent.status = AgentStatus::Idle;

        log::info!(
            "spawned agent {} ('{}') on demand with capabilities {:?}",
            agent.id,
            agent.name,
            agent.capabilities
        );
        inner.agents.insert(agent.id, agent.clone());
        Ok(agent)
    }

    fn transition(
        &self,
        agent_id: Uuid,
        from: AgentStatus,
        to: AgentStatus,
    ) -> CoordinationResult<()> {
        let mut inner = self.inner.write();
        let agent = inner
            .agents
            .get_mut(&agent_id)
            .ok_or(CoordinationError::AgentNotFound { agent_id })?;
        if agent.status != from {
            return Err(CoordinationError::InvalidTransition {
                agent_id,
                from: agent.status,
                to,
            });
        }
        agent.status = to;
        log::debug!("agent {} transitioned {} -> {}", agent_id, from, to);
        Ok(())
    }
}
