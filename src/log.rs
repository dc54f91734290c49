//! Event log - append-only trace of propagation events.
//!
//! Every engine hook the domain forwards is mirrored into the domain's log
//! sink as an [`EventRecord`]. The sink is pluggable:
//! - [`NullLog`] - no-op, the default; keeps the hot path free.
//! - [`MemoryLog`] - in-memory record vector, used by tests to assert
//!   causal traces.
//! - [`TracingLog`] - forwards each record as a `tracing` debug event.
//!
//! Sinks must preserve the order of appends made from a single thread;
//! appends from different threads may interleave arbitrarily.

use parking_lot::Mutex;

use crate::types::{NodeId, NodeKind, TurnId};

// =============================================================================
// Event Records
// =============================================================================

/// One entry in the propagation trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRecord {
    /// A node was constructed and registered with the engine.
    NodeCreate { node: NodeId, kind: NodeKind },
    /// A node is about to be freed.
    NodeDestroy { node: NodeId },
    /// A dependency edge was added.
    NodeAttach { node: NodeId, parent: NodeId },
    /// A dependency edge was removed.
    NodeDetach { node: NodeId, parent: NodeId },
    /// A node marked itself changed during propagation.
    NodePulse { node: NodeId, turn: TurnId },
    /// A node confirmed it did not change during propagation.
    NodeIdlePulse { node: NodeId, turn: TurnId },
    /// A node switched parents mid-turn.
    NodeShift {
        node: NodeId,
        old_parent: NodeId,
        new_parent: NodeId,
        turn: TurnId,
    },
    /// An input node committed a new value during the tick phase.
    InputAdmission { node: NodeId, turn: TurnId },
    /// Propagation for a turn is starting.
    TurnBegin { turn: TurnId },
    /// Propagation for a turn finished.
    TurnEnd { turn: TurnId },
}

// =============================================================================
// Log Sink
// =============================================================================

/// Append-only sink for propagation events.
pub trait LogSink: Send + Sync {
    /// Append one record. Must not block for long; called on the hot path.
    fn append(&self, record: EventRecord);
}

/// Sink that drops every record.
#[derive(Debug, Default)]
pub struct NullLog;

impl NullLog {
    /// Create a null sink.
    pub fn new() -> Self {
        NullLog
    }
}

impl LogSink for NullLog {
    fn append(&self, _record: EventRecord) {}
}

/// Sink that collects records in memory for later inspection.
#[derive(Debug, Default)]
pub struct MemoryLog {
    records: Mutex<Vec<EventRecord>>,
}

impl MemoryLog {
    /// Create an empty in-memory log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records appended so far.
    pub fn records(&self) -> Vec<EventRecord> {
        self.records.lock().clone()
    }

    /// Number of records appended so far.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// True if nothing was appended yet.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Drop all collected records.
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl LogSink for MemoryLog {
    fn append(&self, record: EventRecord) {
        self.records.lock().push(record);
    }
}

/// Sink that forwards every record as a `tracing` event.
#[derive(Debug, Default)]
pub struct TracingLog;

impl TracingLog {
    /// Create a tracing-backed sink.
    pub fn new() -> Self {
        TracingLog
    }
}

impl LogSink for TracingLog {
    fn append(&self, record: EventRecord) {
        tracing::debug!(target: "spark_flow::log", ?record, "event");
    }
}
