//! Conflict resolution for concurrent change-sets.
//!
//! When two concurrent streams of work must be reconciled, a deterministic
//! priority-threshold rule decides which side wins. The rule is exposed
//! both as a pure function and behind the [`ConflictPolicy`] trait so
//! alternative policies can be substituted without touching the
//! dispatcher.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_CONFLICT_THRESHOLD;

/// Which of two concurrent change-sets is retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Keep the party's own changes.
    FavorLocal,
    /// Keep the other party's incoming changes.
    FavorIncoming,
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeStrategy::FavorLocal => write!(f, "favor_local"),
            MergeStrategy::FavorIncoming => write!(f, "favor_incoming"),
        }
    }
}

/// Resolve a conflict by priority threshold.
///
/// Returns [`MergeStrategy::FavorLocal`] iff `party_priority > threshold`.
/// Pure and deterministic; there is no failure mode, only a policy
/// choice.
pub fn resolve(party_priority: i64, threshold: i64) -> MergeStrategy {
    if party_priority > threshold {
        MergeStrategy::FavorLocal
    } else {
        MergeStrategy::FavorIncoming
    }
}

/// Pluggable conflict-resolution policy.
pub trait ConflictPolicy: Send + Sync {
    /// Decide which change-set wins for a party with the given priority.
    fn decide(&self, party_priority: i64) -> MergeStrategy;
}

/// The default threshold policy: priorities above the threshold favor the
/// local change-set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThresholdPolicy {
    /// The priority boundary.
    pub threshold: i64,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_CONFLICT_THRESHOLD,
        }
    }
}

impl ConflictPolicy for ThresholdPolicy {
    fn decide(&self, party_priority: i64) -> MergeStrategy {
        resolve(party_priority, self.threshold)
    }
}
