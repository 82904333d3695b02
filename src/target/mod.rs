//! Target identities, health oracle and replica resolver
//!
//! The engine addresses stripe data by logical target ID. What a target
//! ID means on the network - which node serves it, whether it names a
//! buddy mirror group, what its current health is - comes from the ports
//! in this module, fed by the embedding client's management service.
//!
//! Health states may be stale: the oracle hands out the most recently
//! known snapshot, and the retry policy re-reads it on every decision.

use std::fmt;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;

// =============================================================================
// Identities
// =============================================================================

/// Storage target identifier.
///
/// Names either a concrete storage target or, in a mirrored pattern's
/// target list, a buddy mirror group to be resolved at exchange time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId(pub u16);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage node identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resolved storage node: the ID plus its display name for log lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHandle {
    id: NodeId,
    name: String,
}

impl NodeHandle {
    pub fn new(id: NodeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

// =============================================================================
// Health Snapshot
// =============================================================================

/// Whether a target can be reached on the network at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reachability {
    Online,
    Offline,
}

/// Whether a target's stored data is safe to use.
///
/// Only matters for mirrored patterns; plain striped targets have no
/// replica to diverge from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Consistency {
    /// Fully in sync with its buddy
    Good,
    /// Behind its buddy, resync pending or running
    NeedsResync,
    /// Resync failed, data must not be trusted
    Bad,
}

/// Point-in-time health of one storage target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetHealth {
    pub reachability: Reachability,
    pub consistency: Consistency,
}

impl TargetHealth {
    pub fn new(reachability: Reachability, consistency: Consistency) -> Self {
        Self {
            reachability,
            consistency,
        }
    }

    /// The target cannot be reached; only its buddy can help.
    pub fn is_offline(&self) -> bool {
        self.reachability == Reachability::Offline
    }

    /// The target is safe to address right now.
    pub fn is_usable(&self) -> bool {
        self.reachability == Reachability::Online && self.consistency == Consistency::Good
    }
}

// =============================================================================
// Ports
// =============================================================================

/// Port for target health lookups.
///
/// Safe to call at arbitrary frequency; implementations return the most
/// recently known state, which may be stale. `None` means the target is
/// not known to the management service at all.
pub trait TargetHealthOracle: Send + Sync {
    fn get_state(&self, target: TargetId) -> Option<TargetHealth>;
}

/// Port for mapping logical targets onto the network.
pub trait ReplicaResolver: Send + Sync {
    /// Resolve a stripe target list entry to a concrete target.
    ///
    /// For mirrored patterns `logical` names a buddy mirror group and
    /// `use_secondary` picks the member; plain targets resolve to
    /// themselves. Fails with [`Error::UnknownTarget`](crate::Error) when
    /// the ID is not in the map (stale pattern, removed group).
    fn resolve_stripe_target(&self, logical: TargetId, use_secondary: bool) -> Result<TargetId>;

    /// Resolve a concrete target to the node serving it.
    ///
    /// Fails with [`Error::UnknownNode`](crate::Error) when the target
    /// maps to no known node.
    fn resolve_node(&self, target: TargetId) -> Result<NodeHandle>;
}

// =============================================================================
// State Store
// =============================================================================

/// Shared per-target health map.
///
/// The standard [`TargetHealthOracle`] backing: the management-service
/// poller writes states in, concurrent I/O calls read them out. Absent
/// entries mean the target has never been reported.
#[derive(Debug, Default)]
pub struct TargetStateStore {
    states: DashMap<TargetId, TargetHealth>,
}

impl TargetStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the latest known state for a target.
    pub fn set_state(&self, target: TargetId, state: TargetHealth) {
        self.states.insert(target, state);
    }

    /// Forget a target (removed from the cluster).
    pub fn remove_state(&self, target: TargetId) {
        self.states.remove(&target);
    }
}

impl TargetHealthOracle for TargetStateStore {
    fn get_state(&self, target: TargetId) -> Option<TargetHealth> {
        self.states.get(&target).map(|state| *state)
    }
}
