//! # taskmesh
//!
//! A coordination engine for a pool of interchangeable agents. Agents
//! advertise capability sets; incoming tasks declare required
//! capabilities, priorities, and dependencies. The engine resolves the
//! dependency graph into ordered execution phases, scores and assigns the
//! best-matching idle agent per task (spawning new agents on demand),
//! executes independent tasks concurrently under a configurable cap,
//! retries failures on different agents, and tracks rolling per-agent
//! performance.
//!
//! The domain work itself lives behind the
//! [`PayloadExecutor`](executor::PayloadExecutor) trait; persistence of
//! produced artifacts behind [`ArtifactSink`](executor::ArtifactSink).

pub mod agent;
pub mod config;
pub mod conflict;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod feedback;
pub mod planner;
pub mod registry;
pub mod selector;
pub mod task;

pub use agent::{Agent, AgentSpec, AgentStatus, PerformanceMetrics};
pub use config::CoordinatorConfig;
pub use conflict::{ConflictPolicy, MergeStrategy, ThresholdPolicy};
pub use coordinator::{Coordinator, ExecutionReport, Submission};
pub use dispatcher::Dispatcher;
pub use error::{CoordinationError, CoordinationResult};
pub use executor::{ArtifactSink, EchoExecutor, NullSink, PayloadError, PayloadExecutor};
pub use feedback::{FeedbackTracker, Insights};
pub use planner::{build_plan, ExecutionPlan, Phase};
pub use registry::AgentRegistry;
pub use selector::{Selection, SpawnRequest};
pub use task::{Task, TaskOutcome, TaskStatus};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
