//! Engine contract - the interface every propagation engine satisfies.
//!
//! The engine is a strategy object: it owns the dependency topology and
//! decides in which order (and on which threads) affected nodes tick within
//! a turn. The domain drives it through the hook set below and relies on
//! three invariants:
//!
//! 1. `on_turn_propagate` returns only after every transitively affected
//!    node has ticked exactly once for this turn.
//! 2. Turns whose input sets share a dependency never propagate
//!    concurrently; the engine serializes them.
//! 3. `try_merge` is non-blocking when it refuses.
//!
//! Engines that tick nodes on worker threads must bracket user callbacks
//! with `Domain::set_current_continuation` / `clear_current_continuation`
//! on each worker, so inputs produced inside callbacks route into the
//! turn's continuation instead of racing the propagation.

pub mod toposort;

pub use toposort::TopoSortEngine;

use crate::node::{NodeHandle, ReactiveNode};
use crate::flags::TurnFlags;
use crate::turn::Turn;

/// A caller's admission closure, handed to `try_merge`.
pub type MergeInput = Box<dyn FnOnce() + Send>;

/// Result of a merge attempt.
pub enum MergeOutcome {
    /// The closure was admitted into a host turn and has completed,
    /// including the host's post-processing. The caller is done.
    Merged,
    /// No host turn accepted the closure; ownership returns to the caller,
    /// who opens its own turn. Refusal never blocks.
    Refused(MergeInput),
}

/// Propagation strategy contract.
///
/// Hook obligations, in the order the domain fires them over a node's and
/// a turn's lifetime:
///
/// | Hook | Obligation |
/// |---|---|
/// | `on_node_create` | register the node in the topology |
/// | `on_node_destroy` | remove it; no in-flight pulse may still target it |
/// | `on_node_attach` | add the edge; may relabel levels/priorities |
/// | `on_node_detach` | inverse of attach |
/// | `on_node_pulse` | schedule dependents for ticking in this turn |
/// | `on_node_idle_pulse` | let dependents observe quiescence |
/// | `on_node_shift` | re-level so the new parent's effect lands this turn |
/// | `on_turn_admission_start/end` | delimit admission; quiesce propagation |
/// | `on_turn_input_change` | enlist the node as a propagation root |
/// | `on_turn_propagate` | tick affected nodes to fixpoint, topologically |
/// | `on_turn_end` | turn fully post-processed; release serialization, wake merged callers |
pub trait Engine: Send + Sync {
    /// A node was constructed.
    fn on_node_create(&self, node: &NodeHandle);

    /// A node is about to be freed.
    fn on_node_destroy(&self, node: &dyn ReactiveNode);

    /// `node` now depends on `parent`.
    fn on_node_attach(&self, node: &dyn ReactiveNode, parent: &dyn ReactiveNode);

    /// `node` no longer depends on `parent`.
    fn on_node_detach(&self, node: &dyn ReactiveNode, parent: &dyn ReactiveNode);

    /// `node` changed during propagation; schedule its dependents.
    fn on_node_pulse(&self, node: &dyn ReactiveNode, turn: &Turn);

    /// `node` confirmed no change during propagation.
    fn on_node_idle_pulse(&self, node: &dyn ReactiveNode, turn: &Turn);

    /// `node` switched from `old_parent` to `new_parent` mid-turn.
    fn on_node_shift(
        &self,
        node: &dyn ReactiveNode,
        old_parent: &dyn ReactiveNode,
        new_parent: &dyn ReactiveNode,
        turn: &Turn,
    );

    /// Admission for `turn` is opening. Blocks while another turn holds
    /// the engine, which is how overlapping turns serialize.
    fn on_turn_admission_start(&self, turn: &Turn);

    /// Admission for `turn` closed; merged admissions drain here.
    fn on_turn_admission_end(&self, turn: &Turn);

    /// An input node committed a change; enlist it as a propagation root.
    fn on_turn_input_change(&self, node: &dyn ReactiveNode, turn: &Turn);

    /// Drive all scheduled nodes to fixpoint in dependency order.
    fn on_turn_propagate(&self, turn: &Turn);

    /// The domain finished post-processing `turn` (observer detachments
    /// applied, continuation stolen). Release turn serialization and wake
    /// any callers merged into this turn. Also fired when a turn aborts.
    fn on_turn_end(&self, turn: &Turn);

    /// Try to fold a caller's admission closure into a turn that is
    /// currently admitting.
    ///
    /// `flags` are the *caller's* turn flags: merging requires
    /// [`TurnFlags::ENABLE_INPUT_MERGING`] to be set there. On success the
    /// closure runs inside the host turn's admission and this call blocks
    /// until the host turn ends. On refusal it returns immediately.
    fn try_merge(&self, flags: TurnFlags, input: MergeInput) -> MergeOutcome;
}
