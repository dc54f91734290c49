//! Observer registry - per-domain set of live observers.
//!
//! The registry owns the observer nodes: registration stores the strong
//! reference that keeps an observer alive, user code only holds weak
//! handles. Detachments requested *during* a turn are never applied
//! immediately; the observer id is parked on the turn
//! (`Turn::schedule_detach`) and the registry is updated at post-process,
//! once the engine guarantees no in-flight pulse still targets the node.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::node::ReactiveNode;
use crate::types::ObserverId;

/// A registered observer node, as the registry sees it.
///
/// Implemented by the concrete observer nodes in `signals::observe`; the
/// registry needs the node contract plus a way to undo the subject edge
/// when the observer is unregistered.
pub(crate) trait AnyObserver: ReactiveNode {
    /// The observer's registry id.
    fn observer_id(&self) -> ObserverId;

    /// Remove the dependency edge to the observed subject.
    fn detach_from_subject(&self);
}

/// Per-domain registry of live observers.
///
/// Thread-safe: registration and lookup may happen concurrently with a
/// propagating turn on another thread.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<HashMap<ObserverId, Arc<dyn AnyObserver>>>,
}

impl ObserverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the strong reference that keeps `observer` alive.
    pub(crate) fn register(&self, observer: Arc<dyn AnyObserver>) {
        self.observers
            .write()
            .insert(observer.observer_id(), observer);
    }

    /// Forget an observer, returning its node for final detachment.
    ///
    /// Idempotent: unregistering an unknown id is a no-op returning `None`.
    pub(crate) fn unregister(&self, id: ObserverId) -> Option<Arc<dyn AnyObserver>> {
        self.observers.write().remove(&id)
    }

    /// True if the observer is currently registered.
    pub fn is_registered(&self, id: ObserverId) -> bool {
        self.observers.read().contains_key(&id)
    }

    /// Number of live observers.
    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    /// True if no observers are registered.
    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }
}
