//! Per-thread transaction context.
//!
//! Each thread keeps its own admission state per domain: the default turn
//! flags, whether a transaction is currently admitting, the input nodes
//! enlisted so far, and the continuation buffer of the turn currently
//! propagating on this thread (if any). Keyed by [`DomainId`] so threads
//! working against several domains stay isolated.
//!
//! All accessors copy data in or out under a short `RefCell` borrow; no
//! user code ever runs while the context is borrowed.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use crate::flags::TurnFlags;
use crate::node::NodeHandle;
use crate::turn::ContinuationBuffer;
use crate::types::DomainId;

/// Per-thread, per-domain admission state.
#[derive(Default)]
struct ThreadContext {
    /// Default flags for transactions opened on this thread.
    turn_flags: TurnFlags,
    /// True while this thread is inside the admission phase.
    tx_active: bool,
    /// Input nodes enlisted during the current admission, in push order.
    tx_inputs: Vec<NodeHandle>,
    /// Continuation of the turn currently running user code on this
    /// thread; `Some` only during tick/propagation phases.
    continuation: Option<Arc<ContinuationBuffer>>,
}

thread_local! {
    static CONTEXTS: RefCell<HashMap<DomainId, ThreadContext>> = RefCell::new(HashMap::new());
}

fn with_context<R>(domain: DomainId, f: impl FnOnce(&mut ThreadContext) -> R) -> R {
    CONTEXTS.with(|contexts| {
        let mut contexts = contexts.borrow_mut();
        f(contexts.entry(domain).or_default())
    })
}

// =============================================================================
// Turn Flags
// =============================================================================

/// This thread's default turn flags for `domain`.
pub(crate) fn turn_flags(domain: DomainId) -> TurnFlags {
    with_context(domain, |ctx| ctx.turn_flags)
}

/// Set bits in this thread's default turn flags.
pub(crate) fn set_turn_flags(domain: DomainId, flags: TurnFlags) {
    with_context(domain, |ctx| ctx.turn_flags.insert(flags));
}

/// Clear bits in this thread's default turn flags.
pub(crate) fn unset_turn_flags(domain: DomainId, flags: TurnFlags) {
    with_context(domain, |ctx| ctx.turn_flags.remove(flags));
}

/// Reset this thread's default turn flags to empty.
pub(crate) fn reset_turn_flags(domain: DomainId) {
    with_context(domain, |ctx| ctx.turn_flags = TurnFlags::empty());
}

// =============================================================================
// Transaction State
// =============================================================================

/// Mark this thread as admitting (or not) for `domain`.
pub(crate) fn set_tx_active(domain: DomainId, active: bool) {
    with_context(domain, |ctx| ctx.tx_active = active);
}

/// Enlist an input node in this thread's current admission.
pub(crate) fn push_input(domain: DomainId, node: NodeHandle) {
    with_context(domain, |ctx| ctx.tx_inputs.push(node));
}

/// Take the enlisted input nodes, in admission order.
pub(crate) fn take_inputs(domain: DomainId) -> Vec<NodeHandle> {
    with_context(domain, |ctx| std::mem::take(&mut ctx.tx_inputs))
}

/// Drop all admission state for an aborted turn.
pub(crate) fn clear_tx(domain: DomainId) {
    with_context(domain, |ctx| {
        ctx.tx_active = false;
        ctx.tx_inputs.clear();
    });
}

// =============================================================================
// Current Continuation
// =============================================================================

/// Point this thread at the continuation of the turn it is executing.
pub(crate) fn set_continuation(domain: DomainId, buffer: Arc<ContinuationBuffer>) {
    with_context(domain, |ctx| ctx.continuation = Some(buffer));
}

/// Clear this thread's continuation pointer.
pub(crate) fn clear_continuation(domain: DomainId) {
    with_context(domain, |ctx| ctx.continuation = None);
}

/// The continuation pointer and admission flag, read together.
///
/// `add_input` dispatches on this pair; reading both under one borrow
/// keeps the decision consistent.
pub(crate) fn dispatch_state(domain: DomainId) -> (Option<Arc<ContinuationBuffer>>, bool) {
    with_context(domain, |ctx| (ctx.continuation.clone(), ctx.tx_active))
}

/// True if this thread is admitting or running user code inside a turn.
pub(crate) fn in_turn(domain: DomainId) -> bool {
    with_context(domain, |ctx| ctx.tx_active || ctx.continuation.is_some())
}
