//! Transaction lifecycle - admission, tick, propagation, post-process.
//!
//! The phases of one turn, driven from the thread that opened it:
//!
//! 1. Merge attempt: the engine may fold this transaction into a turn that
//!    is already admitting.
//! 2. Admission: the user function runs; its `add_input` calls stage
//!    values and enlist the touched input nodes.
//! 3. Tick: each enlisted input commits its staged value, in admission
//!    order.
//! 4. Propagation: if any input pulsed, the engine drives dependents to
//!    fixpoint.
//! 5. Post-process: observers that detached themselves are unregistered,
//!    the engine releases the turn, and any continuation inputs drive
//!    follow-up turns.
//!
//! Inputs produced while a turn is propagating (observer callbacks writing
//! vars) must not race the propagation: `add_input` detects the live
//! continuation pointer on the current thread and defers them.
//!
//! If user code panics, the armed [`TurnGuard`] fires the close-out hooks
//! during unwinding so the engine releases its locks, then the panic
//! surfaces to the caller of the entry point. That includes admissions
//! merged in from other threads: they run on the host thread inside
//! `on_turn_admission_end`, so a panic there aborts the host turn, and the
//! merged caller is woken when the turn releases. Node state already
//! written is not rolled back; the graph is eventually consistent across
//! an aborted turn.

use std::sync::Arc;

use super::context;
use super::Domain;
use crate::engine::MergeOutcome;
use crate::error::DomainError;
use crate::flags::TurnFlags;
use crate::node::InputNode;
use crate::turn::{ContinuationBuffer, Turn};
use crate::types::{ObserverId, TickResult};

// =============================================================================
// Abort Guard
// =============================================================================

enum Stage {
    /// User code is running inside admission.
    Admission,
    /// `on_turn_admission_end` is running; merged admissions execute in
    /// there and may panic too.
    AdmissionClose,
    /// Input ticks / propagation are running.
    Execution,
}

/// Fires the close-out hooks if a turn unwinds mid-phase.
///
/// Whatever the stage, `on_turn_end` fires exactly once, so the engine
/// releases turn serialization and wakes any merged callers.
struct TurnGuard<'a> {
    domain: &'a Domain,
    turn: &'a Turn,
    stage: Stage,
    armed: bool,
}

impl<'a> TurnGuard<'a> {
    fn new(domain: &'a Domain, turn: &'a Turn, stage: Stage) -> Self {
        Self {
            domain,
            turn,
            stage,
            armed: true,
        }
    }

    fn advance(&mut self, stage: Stage) {
        self.stage = stage;
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let core = self.domain.core();
        match self.stage {
            // on_turn_admission_start was already called, so the engine
            // still expects the matching end before it releases the turn.
            Stage::Admission => core.on_turn_admission_end(self.turn),
            // The end hook was already entered; calling it again would
            // re-drain the merge window.
            Stage::AdmissionClose => {}
            Stage::Execution => self.domain.clear_current_continuation(),
        }
        context::clear_tx(core.id());
        core.on_turn_end(self.turn);
    }
}

// =============================================================================
// Transactions
// =============================================================================

impl Domain {
    /// Run `func` as one transaction with this thread's default flags.
    ///
    /// All inputs staged by `func` become observable atomically: dependents
    /// tick once per turn and observers see no intermediate mixtures.
    pub fn do_transaction<F>(&self, func: F) -> Result<(), DomainError>
    where
        F: FnOnce() + Send + 'static,
    {
        let flags = context::turn_flags(self.core().id());
        self.do_transaction_with_flags(func, flags)
    }

    /// Run `func` as one transaction with explicit flags.
    pub fn do_transaction_with_flags<F>(&self, func: F, flags: TurnFlags) -> Result<(), DomainError>
    where
        F: FnOnce() + Send + 'static,
    {
        let core = self.core();
        let id = core.id();
        if context::in_turn(id) {
            return Err(DomainError::NestedTransaction);
        }

        // Attempt to add the input to another turn. If successful, this
        // blocks until the host turn is done, and we are finished.
        let func = match core.engine().try_merge(flags, Box::new(func)) {
            MergeOutcome::Merged => return Ok(()),
            MergeOutcome::Refused(func) => func,
        };

        let turn = core.make_turn(flags);
        tracing::trace!(target: "spark_flow", turn = turn.id().0, "turn open");

        // Phase 1 - input admission
        context::set_tx_active(id, true);
        core.on_turn_admission_start(&turn);
        {
            let mut guard = TurnGuard::new(self, &turn, Stage::Admission);
            func();
            guard.advance(Stage::AdmissionClose);
            core.on_turn_admission_end(&turn);
            guard.disarm();
        }
        context::set_tx_active(id, false);

        // Phases 2-3 and post-process
        self.tick_and_propagate(&turn);
        self.post_process_turn(&turn);
        Ok(())
    }

    // =========================================================================
    // Input dispatch
    // =========================================================================

    /// Route a new input value to `node`.
    ///
    /// Checked in order:
    /// - a propagation is executing user code on this thread: defer into
    ///   the current turn's continuation (node carried by handle, value by
    ///   move, so both outlive the pulse that produced them);
    /// - this thread is admitting: stage into the open transaction;
    /// - otherwise: run a standalone one-input transaction.
    pub fn add_input<V, N>(&self, node: &Arc<N>, value: V)
    where
        N: InputNode<V> + 'static,
        V: Send + 'static,
    {
        let (continuation, active) = context::dispatch_state(self.core().id());
        if let Some(continuation) = continuation {
            let domain = self.clone();
            let node = node.clone();
            continuation.push(Box::new(move || {
                domain.add_transaction_input(&node, value);
            }));
        } else if active {
            self.add_transaction_input(node, value);
        } else {
            self.add_simple_input(node, value);
        }
    }

    /// Stage `value` and enlist `node` in this thread's open transaction.
    fn add_transaction_input<V, N>(&self, node: &Arc<N>, value: V)
    where
        N: InputNode<V> + 'static,
    {
        node.add_input(value);
        context::push_input(self.core().id(), node.clone());
    }

    /// One-input fast path: a turn of its own, no user function.
    ///
    /// The admission flag is raised here too: callers merged into this
    /// turn run their `add_input` calls on this thread and must land in
    /// this turn's input list.
    fn add_simple_input<V, N>(&self, node: &Arc<N>, value: V)
    where
        N: InputNode<V> + 'static,
    {
        let core = self.core();
        let id = core.id();
        let turn = core.make_turn(TurnFlags::empty());

        context::set_tx_active(id, true);
        core.on_turn_admission_start(&turn);
        node.add_input(value);
        context::push_input(id, node.clone());
        {
            let mut guard = TurnGuard::new(self, &turn, Stage::AdmissionClose);
            core.on_turn_admission_end(&turn);
            guard.disarm();
        }
        context::set_tx_active(id, false);

        self.tick_and_propagate(&turn);
        self.post_process_turn(&turn);
    }

    // =========================================================================
    // Turn phases
    // =========================================================================

    /// Tick the enlisted inputs in admission order, then propagate if any
    /// of them pulsed. The continuation pointer is live for the whole
    /// stretch: any user code that runs in here defers its inputs.
    fn tick_and_propagate(&self, turn: &Turn) {
        let core = self.core();
        let inputs = context::take_inputs(core.id());

        self.set_current_continuation(turn);
        {
            let mut guard = TurnGuard::new(self, turn, Stage::Execution);
            let mut should_propagate = false;
            for node in &inputs {
                if node.tick(turn) == TickResult::Pulsed {
                    should_propagate = true;
                }
            }
            if should_propagate {
                core.on_turn_propagate(turn);
            }
            guard.disarm();
        }
        self.clear_current_continuation();
    }

    /// Apply deferred observer detachments, release the turn, and drive
    /// any buffered continuation inputs as follow-up turns.
    fn post_process_turn(&self, turn: &Turn) {
        for observer in turn.take_detached() {
            self.unregister_observer(observer);
        }
        self.core().on_turn_end(turn);

        // Steal the continuation from the finished turn.
        let continuation = turn.continuation().clone();
        if !continuation.is_empty() {
            self.process_continuations(continuation, turn.flags());
        }
    }

    /// Run successive turns, each admitting the previous turn's
    /// continuation, until a turn produces no further continuation.
    ///
    /// Each continuation turn is caused only by user callbacks in the
    /// previous turn's propagation, which ran to completion before this
    /// admission begins, so the loop makes progress.
    fn process_continuations(&self, mut continuation: Arc<ContinuationBuffer>, flags: TurnFlags) {
        let core = self.core();
        let id = core.id();

        // Continuations never merge.
        let flags = flags.difference(TurnFlags::ENABLE_INPUT_MERGING);

        loop {
            let turn = core.make_turn(flags);
            tracing::trace!(
                target: "spark_flow",
                turn = turn.id().0,
                inputs = continuation.len(),
                "continuation turn"
            );

            context::set_tx_active(id, true);
            core.on_turn_admission_start(&turn);
            {
                let mut guard = TurnGuard::new(self, &turn, Stage::Admission);
                continuation.execute();
                guard.advance(Stage::AdmissionClose);
                core.on_turn_admission_end(&turn);
                guard.disarm();
            }
            context::set_tx_active(id, false);

            self.tick_and_propagate(&turn);

            for observer in turn.take_detached() {
                self.unregister_observer(observer);
            }
            core.on_turn_end(&turn);

            if turn.continuation().is_empty() {
                break;
            }
            continuation = turn.continuation().clone();
        }
    }

    // =========================================================================
    // Continuation pointer
    // =========================================================================

    /// Point the calling thread at `turn`'s continuation buffer.
    ///
    /// The domain does this around the tick and propagation phases on the
    /// turn's own thread; engines that tick nodes on workers must do the
    /// same around user callbacks on each worker thread.
    pub fn set_current_continuation(&self, turn: &Turn) {
        context::set_continuation(self.core().id(), turn.continuation().clone());
    }

    /// Clear the calling thread's continuation pointer.
    pub fn clear_current_continuation(&self) {
        context::clear_continuation(self.core().id());
    }

    // =========================================================================
    // Observer detachment
    // =========================================================================

    /// Forget an observer and undo its subject edge. Idempotent.
    pub(crate) fn unregister_observer(&self, id: ObserverId) {
        if let Some(observer) = self.core().observers().unregister(id) {
            observer.detach_from_subject();
        }
    }
}
