//! Turn flags - per-transaction behavior switches.
//!
//! Flags are a typed bitset: only the flag families defined here exist, so
//! an unknown option is a compile error rather than a silently ignored bit.
//! Each thread carries its own default flags (see `domain::context`), used
//! by `do_transaction` when no explicit flags are passed.

use bitflags::bitflags;

bitflags! {
    /// Behavior switches for a single turn.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TurnFlags: u32 {
        /// Coalesce this transaction into an already-admitting turn when
        /// the engine can host it. The merged closure runs inside the host
        /// turn's admission and the caller blocks until the host turn has
        /// finished post-processing.
        const ENABLE_INPUT_MERGING = 1 << 0;
    }
}

impl Default for TurnFlags {
    fn default() -> Self {
        TurnFlags::empty()
    }
}
