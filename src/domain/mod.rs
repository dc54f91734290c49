//! Domain - per-domain state and the user-facing controller.
//!
//! A domain owns the singletons one reactive world shares: the propagation
//! engine, the log sink, the observer registry, and the id counters. Each
//! domain is a distinct value identity; two domains never share state, and
//! nodes from different domains must not be combined.
//!
//! [`Domain`] is a cheap cloneable handle. Domains can be anonymous
//! ([`Domain::new`]) or declared process-wide under a name
//! ([`Domain::declare`]), which is idempotent: re-declaring a name with the
//! same policy returns the existing domain.
//!
//! The transaction lifecycle (`do_transaction`, `add_input`, continuation
//! processing) lives in the `transaction` submodule; the per-thread
//! admission state in `context`.

pub(crate) mod context;
mod transaction;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::engine::Engine;
use crate::flags::TurnFlags;
use crate::log::{EventRecord, LogSink, NullLog};
use crate::node::{NodeHandle, ReactiveNode};
use crate::observer::ObserverRegistry;
use crate::turn::Turn;
use crate::types::{DomainId, ObserverId, TurnId};

// =============================================================================
// Policy
// =============================================================================

/// What a domain is made of: an engine and, optionally, a log sink.
pub struct DomainPolicy {
    engine: Arc<dyn Engine>,
    log: Arc<dyn LogSink>,
}

impl DomainPolicy {
    /// Policy with the given engine and the null log sink.
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            log: Arc::new(NullLog::new()),
        }
    }

    /// Replace the log sink.
    pub fn with_log(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }
}

// =============================================================================
// Domain Core
// =============================================================================

/// Id source for domain instances, process-wide.
static NEXT_DOMAIN_ID: AtomicU64 = AtomicU64::new(0);

/// The maximum turn id before the counter wraps.
const TURN_ID_MAX: u32 = i32::MAX as u32;

/// Per-domain owned state. Shared behind `Arc` by [`Domain`] handles.
pub(crate) struct DomainCore {
    id: DomainId,
    name: Option<String>,
    engine: Arc<dyn Engine>,
    log: Arc<dyn LogSink>,
    observers: ObserverRegistry,
    next_turn_id: AtomicU32,
    next_object_id: AtomicU64,
}

impl DomainCore {
    fn new(name: Option<String>, policy: DomainPolicy) -> Self {
        Self {
            id: DomainId(NEXT_DOMAIN_ID.fetch_add(1, Ordering::Relaxed)),
            name,
            engine: policy.engine,
            log: policy.log,
            observers: ObserverRegistry::new(),
            next_turn_id: AtomicU32::new(0),
            next_object_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn id(&self) -> DomainId {
        self.id
    }

    pub(crate) fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub(crate) fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    /// Issue a fresh object id for a node or observer.
    pub(crate) fn next_object_id(&self) -> u64 {
        self.next_object_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Issue the next turn id.
    ///
    /// The counter wraps with a sawtooth: when the issued id reaches the
    /// maximum positive 32-bit value, the counter is pulled back down by
    /// that maximum. Ids are unique within a 2^31 window, nothing more.
    pub(crate) fn next_turn_id(&self) -> TurnId {
        let id = self.next_turn_id.fetch_add(1, Ordering::Relaxed);
        if id == TURN_ID_MAX {
            self.next_turn_id.fetch_sub(TURN_ID_MAX, Ordering::Relaxed);
        }
        TurnId(id)
    }

    pub(crate) fn make_turn(&self, flags: TurnFlags) -> Turn {
        Turn::new(self.next_turn_id(), flags)
    }

    // =========================================================================
    // Engine hook wrappers
    //
    // Every hook the domain or a node fires goes through these: the record
    // is appended to the log sink first, then the engine is invoked. Nodes
    // never talk to the engine directly.
    // =========================================================================

    pub(crate) fn on_node_create(&self, node: &NodeHandle) {
        self.log.append(EventRecord::NodeCreate {
            node: node.object_id(),
            kind: node.kind(),
        });
        self.engine.on_node_create(node);
    }

    pub(crate) fn on_node_destroy(&self, node: &dyn ReactiveNode) {
        self.log.append(EventRecord::NodeDestroy {
            node: node.object_id(),
        });
        self.engine.on_node_destroy(node);
    }

    pub(crate) fn on_node_attach(&self, node: &dyn ReactiveNode, parent: &dyn ReactiveNode) {
        self.log.append(EventRecord::NodeAttach {
            node: node.object_id(),
            parent: parent.object_id(),
        });
        self.engine.on_node_attach(node, parent);
    }

    pub(crate) fn on_node_detach(&self, node: &dyn ReactiveNode, parent: &dyn ReactiveNode) {
        self.log.append(EventRecord::NodeDetach {
            node: node.object_id(),
            parent: parent.object_id(),
        });
        self.engine.on_node_detach(node, parent);
    }

    pub(crate) fn on_node_pulse(&self, node: &dyn ReactiveNode, turn: &Turn) {
        self.log.append(EventRecord::NodePulse {
            node: node.object_id(),
            turn: turn.id(),
        });
        self.engine.on_node_pulse(node, turn);
    }

    pub(crate) fn on_node_idle_pulse(&self, node: &dyn ReactiveNode, turn: &Turn) {
        self.log.append(EventRecord::NodeIdlePulse {
            node: node.object_id(),
            turn: turn.id(),
        });
        self.engine.on_node_idle_pulse(node, turn);
    }

    pub(crate) fn on_node_shift(
        &self,
        node: &dyn ReactiveNode,
        old_parent: &dyn ReactiveNode,
        new_parent: &dyn ReactiveNode,
        turn: &Turn,
    ) {
        self.log.append(EventRecord::NodeShift {
            node: node.object_id(),
            old_parent: old_parent.object_id(),
            new_parent: new_parent.object_id(),
            turn: turn.id(),
        });
        self.engine.on_node_shift(node, old_parent, new_parent, turn);
    }

    pub(crate) fn on_turn_admission_start(&self, turn: &Turn) {
        self.engine.on_turn_admission_start(turn);
    }

    pub(crate) fn on_turn_admission_end(&self, turn: &Turn) {
        self.engine.on_turn_admission_end(turn);
    }

    pub(crate) fn on_turn_input_change(&self, node: &dyn ReactiveNode, turn: &Turn) {
        self.log.append(EventRecord::InputAdmission {
            node: node.object_id(),
            turn: turn.id(),
        });
        self.engine.on_turn_input_change(node, turn);
    }

    pub(crate) fn on_turn_propagate(&self, turn: &Turn) {
        self.log.append(EventRecord::TurnBegin { turn: turn.id() });
        self.engine.on_turn_propagate(turn);
        self.log.append(EventRecord::TurnEnd { turn: turn.id() });
    }

    pub(crate) fn on_turn_end(&self, turn: &Turn) {
        self.engine.on_turn_end(turn);
    }
}

// =============================================================================
// Domain Handle
// =============================================================================

/// Handle to a reactive domain. Cloning is cheap and shares identity.
#[derive(Clone)]
pub struct Domain {
    core: Arc<DomainCore>,
}

impl std::fmt::Debug for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Domain").field("id", &self.core.id).finish()
    }
}

/// Process-wide registry of declared domains.
static DECLARED: Lazy<RwLock<HashMap<String, Domain>>> = Lazy::new(|| RwLock::new(HashMap::new()));

impl Domain {
    /// Create an anonymous domain with the given policy.
    pub fn new(policy: DomainPolicy) -> Self {
        let core = Arc::new(DomainCore::new(None, policy));
        tracing::debug!(target: "spark_flow", domain = core.id.0, "domain created");
        Self { core }
    }

    /// Declare a named domain, process-wide and idempotent.
    ///
    /// The first call installs the domain. A later call with the same
    /// engine instance returns the existing domain unchanged (the
    /// existing sinks stay in place); a different engine is a
    /// declaration conflict.
    pub fn declare(name: &str, policy: DomainPolicy) -> Result<Self, crate::error::DomainError> {
        let mut declared = DECLARED.write();
        if let Some(existing) = declared.get(name) {
            if Arc::ptr_eq(&existing.core.engine, &policy.engine) {
                return Ok(existing.clone());
            }
            return Err(crate::error::DomainError::AlreadyDeclared {
                name: name.to_string(),
            });
        }

        let core = Arc::new(DomainCore::new(Some(name.to_string()), policy));
        tracing::debug!(target: "spark_flow", domain = core.id.0, name, "domain declared");
        let domain = Self { core };
        declared.insert(name.to_string(), domain.clone());
        Ok(domain)
    }

    /// Look up a previously declared domain.
    pub fn get(name: &str) -> Option<Self> {
        DECLARED.read().get(name).cloned()
    }

    /// The domain's process-unique id.
    pub fn id(&self) -> DomainId {
        self.core.id
    }

    /// The domain's declared name, if any.
    pub fn name(&self) -> Option<&str> {
        self.core.name.as_deref()
    }

    pub(crate) fn core(&self) -> &Arc<DomainCore> {
        &self.core
    }

    pub(crate) fn downgrade(&self) -> WeakDomain {
        WeakDomain(Arc::downgrade(&self.core))
    }

    /// True if `observer` is still registered with this domain.
    pub fn is_observer_registered(&self, observer: ObserverId) -> bool {
        self.core.observers.is_registered(observer)
    }

    /// Number of live observers in this domain.
    pub fn observer_count(&self) -> usize {
        self.core.observers.len()
    }

    // =========================================================================
    // Turn-flag options (per-thread defaults)
    // =========================================================================

    /// Set bits in this thread's default turn flags.
    pub fn set_turn_flag(&self, flags: TurnFlags) {
        context::set_turn_flags(self.core.id, flags);
    }

    /// Clear bits in this thread's default turn flags.
    pub fn unset_turn_flag(&self, flags: TurnFlags) {
        context::unset_turn_flags(self.core.id, flags);
    }

    /// True if all given bits are set in this thread's default turn flags.
    pub fn is_turn_flag_set(&self, flags: TurnFlags) -> bool {
        context::turn_flags(self.core.id).contains(flags)
    }

    /// Reset this thread's default turn flags to empty.
    pub fn reset_turn_flags(&self) {
        context::reset_turn_flags(self.core.id);
    }
}

/// Non-owning domain reference held by nodes.
///
/// Nodes upgrade on demand; a node whose domain is gone goes inert rather
/// than keeping the whole domain alive through the registry it lives in.
#[derive(Clone)]
pub(crate) struct WeakDomain(Weak<DomainCore>);

impl WeakDomain {
    pub(crate) fn upgrade(&self) -> Option<Arc<DomainCore>> {
        self.0.upgrade()
    }
}
