//! Node contract - the minimal interface every reactive node exposes.
//!
//! The domain and the engine drive nodes exclusively through
//! [`ReactiveNode`]: a stable object id, a kind tag for logging, and a
//! `tick` that commits the node's work for one turn. Input nodes add
//! [`InputNode::add_input`], which stages a value for the next tick.
//!
//! Topology is never mutated by nodes directly; attachments and detachments
//! go through the domain's engine wrappers so the engine can maintain its
//! ordering invariants.

use std::sync::Arc;

use crate::turn::Turn;
use crate::types::{NodeId, NodeKind, TickResult};

/// Shared handle to a reactive node.
///
/// User-facing wrappers own these; the engine keeps `Weak` back-references
/// arranged as a DAG.
pub type NodeHandle = Arc<dyn ReactiveNode>;

/// Behavior every reactive node exposes to the engine and the domain.
///
/// `tick` is called by the domain for input nodes (after admission) and by
/// the engine for derived nodes (during propagation). It may read from
/// parents, write the node's own state, and fire pulse notifications
/// through the domain, but must not edit the graph except via
/// engine-mediated attach/detach/shift.
pub trait ReactiveNode: Send + Sync {
    /// Stable object id, unique within the owning domain.
    fn object_id(&self) -> NodeId;

    /// Kind tag, used for logging.
    fn kind(&self) -> NodeKind;

    /// Commit this node's work for the given turn.
    ///
    /// Returns [`TickResult::Pulsed`] if the node produced an observable
    /// change, [`TickResult::Idle`] otherwise. Never fails itself; user
    /// closures embedded in derived nodes may panic, which aborts the turn.
    fn tick(&self, turn: &Turn) -> TickResult;
}

/// An input node: accepts externally produced values.
///
/// `add_input` only stages the value; the change becomes observable when
/// the domain ticks the node during the next turn's tick phase.
pub trait InputNode<V>: ReactiveNode {
    /// Stage a new value for the next tick.
    fn add_input(&self, value: V);
}
