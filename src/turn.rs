//! Turn - the atomic unit of propagation.
//!
//! A turn is a passive value: a unique id, the flags it was opened with,
//! and two writable buffers. Observers that detach themselves mid-turn are
//! parked in `detached_observers` until post-processing; inputs produced
//! *during* propagation are parked in the continuation buffer and drive a
//! follow-up turn.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::flags::TurnFlags;
use crate::types::{ObserverId, TurnId};

// =============================================================================
// Continuation Buffer
// =============================================================================

/// Deferred input closure: performs one `add_input` when invoked.
pub type InputClosure = Box<dyn FnOnce() + Send>;

/// Insertion-ordered queue of deferred input closures.
///
/// Appends are concurrency-safe: several user callbacks inside the same
/// propagation may enqueue, possibly from engine worker threads. Draining
/// is done by the domain only, on one thread, outside propagation.
#[derive(Default)]
pub struct ContinuationBuffer {
    inputs: Mutex<Vec<InputClosure>>,
}

impl ContinuationBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a deferred input closure.
    pub fn push(&self, input: InputClosure) {
        self.inputs.lock().push(input);
    }

    /// True if no closures are buffered.
    pub fn is_empty(&self) -> bool {
        self.inputs.lock().is_empty()
    }

    /// Number of buffered closures.
    pub fn len(&self) -> usize {
        self.inputs.lock().len()
    }

    /// Invoke every buffered closure in insertion order, then empty the
    /// buffer. Called by the domain only, on one thread, outside the
    /// engine's propagation phase.
    pub(crate) fn execute(&self) {
        let inputs = std::mem::take(&mut *self.inputs.lock());
        for input in inputs {
            input();
        }
    }
}

// =============================================================================
// Turn
// =============================================================================

/// Bookkeeping for one propagation turn.
pub struct Turn {
    id: TurnId,
    flags: TurnFlags,
    detached_observers: Mutex<Vec<ObserverId>>,
    continuation: Arc<ContinuationBuffer>,
}

impl Turn {
    /// Create a turn with a fresh id and the given flags.
    pub(crate) fn new(id: TurnId, flags: TurnFlags) -> Self {
        Self {
            id,
            flags,
            detached_observers: Mutex::new(Vec::new()),
            continuation: Arc::new(ContinuationBuffer::new()),
        }
    }

    /// The turn's unique id.
    pub fn id(&self) -> TurnId {
        self.id
    }

    /// The flags this turn was opened with.
    pub fn flags(&self) -> TurnFlags {
        self.flags
    }

    /// Schedule an observer for removal at post-process.
    ///
    /// The observer still receives the pulse that triggered the detach;
    /// the registry forgets it only after the engine has quiesced.
    pub fn schedule_detach(&self, observer: ObserverId) {
        self.detached_observers.lock().push(observer);
    }

    /// Take the observers scheduled for detachment, in request order.
    pub(crate) fn take_detached(&self) -> Vec<ObserverId> {
        std::mem::take(&mut *self.detached_observers.lock())
    }

    /// The turn's continuation buffer.
    pub(crate) fn continuation(&self) -> &Arc<ContinuationBuffer> {
        &self.continuation
    }
}
