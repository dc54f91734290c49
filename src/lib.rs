//! # spark-flow
//!
//! Turn-based reactive dataflow for Rust.
//!
//! A *domain* hosts a DAG of signals (time-varying values) and event
//! streams (discrete occurrences). Writes are grouped into *turns*:
//! atomic propagation rounds in which every affected node ticks exactly
//! once, in dependency order, so observers never see a value computed
//! from a mixture of old and new inputs.
//!
//! ## Architecture
//!
//! ```text
//! add_input / do_transaction
//!         │ admission
//!         ▼
//!     ┌────────┐  tick    ┌────────────┐  propagate   ┌───────────┐
//!     │  Turn  │ ───────► │ input nodes│ ───────────► │  engine   │
//!     └────────┘          └────────────┘              └───────────┘
//!         │ post-process: observer detachments, continuation turns
//!         ▼
//! ```
//!
//! The propagation *engine* is pluggable ([`engine::Engine`]); the crate
//! ships [`engine::TopoSortEngine`], a sequential level-ordered engine
//! that fully serializes turns.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use spark_flow::{Domain, DomainPolicy, ObserverAction, TopoSortEngine};
//!
//! let domain = Domain::new(DomainPolicy::new(Arc::new(TopoSortEngine::new())));
//!
//! let a = domain.make_var(1);
//! let b = domain.make_var(2);
//! let sum = domain.make_signal2(|x, y| x + y, &a, &b);
//!
//! let obs = domain.observe(&sum, |v| {
//!     println!("sum = {v}");
//!     ObserverAction::Continue
//! });
//!
//! // One turn: sum updates once, to 30.
//! let (a2, b2) = (a.clone(), b.clone());
//! domain.do_transaction(move || {
//!     a2.set(10);
//!     b2.set(20);
//! }).unwrap();
//!
//! assert_eq!(sum.get(), 30);
//! obs.detach();
//! ```

pub mod domain;
pub mod engine;
pub mod error;
pub mod flags;
pub mod log;
pub mod node;
pub mod observer;
pub mod signals;
pub mod turn;
pub mod types;

// Re-export the surface most users touch.
pub use domain::{Domain, DomainPolicy};
pub use engine::{Engine, MergeInput, MergeOutcome, TopoSortEngine};
pub use error::DomainError;
pub use flags::TurnFlags;
pub use log::{EventRecord, LogSink, MemoryLog, NullLog, TracingLog};
pub use node::{InputNode, NodeHandle, ReactiveNode};
pub use observer::ObserverRegistry;
pub use signals::{
    EventSource, ObserverAction, ObserverHandle, Signal, SignalSource, ValueNode, VarSignal,
};
pub use turn::{ContinuationBuffer, Turn};
pub use types::{DomainId, NodeId, NodeKind, ObserverId, TickResult, TurnId};
