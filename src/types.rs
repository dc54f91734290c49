//! Core identifier and result types for spark-flow.
//!
//! Everything in the propagation core speaks in terms of these small copy
//! types: stable object ids for nodes and observers, turn ids, and the
//! tick result a node reports back to its engine.

use std::fmt;

// =============================================================================
// Node Identity
// =============================================================================

/// Stable object id of a reactive node.
///
/// Issued per-domain from an atomic counter at node construction and never
/// reused for the lifetime of the domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Stable id of a registered observer.
///
/// Observers are also nodes; the observer id shares the node id space so
/// log records for the same object correlate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "o{}", self.0)
    }
}

/// Process-unique id of a domain instance.
///
/// Keys the per-thread transaction context so that threads working against
/// several domains at once keep their admission state disjoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DomainId(pub u64);

// =============================================================================
// Turn Identity
// =============================================================================

/// Id of a turn, unique within a window of 2^31 turns.
///
/// The issuing counter wraps with a sawtooth (see the domain's turn-id
/// allocation), so consumers must treat turn ids as unique tokens, not
/// monotonic clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TurnId(pub u32);

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

// =============================================================================
// Tick Result
// =============================================================================

/// What a node reports after ticking in a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickResult {
    /// No observable change this turn.
    Idle,
    /// The node produced a new value/event this turn; dependents must tick.
    Pulsed,
}

// =============================================================================
// Node Kind
// =============================================================================

/// Small tag describing what a node is, carried in log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Input signal set by external code.
    Var,
    /// Constant signal.
    Val,
    /// Derived signal computed from parents.
    Signal,
    /// Input event stream fed by external code.
    EventSource,
    /// Observer sink attached to a signal or event stream.
    Observer,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        assert_eq!(NodeId(7).to_string(), "n7");
        assert_eq!(ObserverId(3).to_string(), "o3");
        assert_eq!(TurnId(42).to_string(), "t42");
    }

    #[test]
    fn test_tick_result_eq() {
        assert_eq!(TickResult::Pulsed, TickResult::Pulsed);
        assert_ne!(TickResult::Pulsed, TickResult::Idle);
    }
}
