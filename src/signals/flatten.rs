//! Flattened signals - dynamic dependencies over signals of signals.
//!
//! A flatten follows an *outer* signal whose value is itself a signal and
//! always exposes the selected inner signal's value. When the selection
//! changes mid-turn, the node shifts its inner dependency edge through the
//! engine (`on_node_shift`), which re-levels it so a change the new inner
//! commits in the same turn is still observed.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use super::derived::Signal;
use super::{SignalSource, ValueNode};
use crate::domain::{Domain, WeakDomain};
use crate::node::{NodeHandle, ReactiveNode};
use crate::turn::Turn;
use crate::types::{NodeId, NodeKind, TickResult};

// =============================================================================
// Flatten Node
// =============================================================================

pub(crate) struct FlattenNode<T: Clone + PartialEq + Send + Sync + 'static> {
    id: NodeId,
    domain: WeakDomain,
    outer: Arc<dyn ValueNode<Signal<T>>>,
    outer_handle: NodeHandle,
    /// The currently selected inner signal; the node holds a dependency
    /// edge to it until the outer selects another one.
    inner: Mutex<Signal<T>>,
    value: RwLock<T>,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> ReactiveNode for FlattenNode<T> {
    fn object_id(&self) -> NodeId {
        self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Signal
    }

    fn tick(&self, turn: &Turn) -> TickResult {
        // Follow the outer selection first. A change moves our inner edge;
        // the engine re-levels us and, if the new inner already pulsed
        // this turn, schedules us again behind it.
        let selected = self.outer.current();
        let shifted = {
            let mut inner = self.inner.lock();
            if *inner != selected {
                let old = inner.clone();
                *inner = selected.clone();
                Some(old)
            } else {
                None
            }
        };
        if let Some(old) = shifted {
            if let Some(core) = self.domain.upgrade() {
                core.on_node_shift(self, &*old.node_handle(), &*selected.node_handle(), turn);
            }
        }

        let new = selected.get();
        let changed = new != *self.value.read();
        if changed {
            *self.value.write() = new;
            if let Some(core) = self.domain.upgrade() {
                core.on_node_pulse(self, turn);
            }
            TickResult::Pulsed
        } else {
            if let Some(core) = self.domain.upgrade() {
                core.on_node_idle_pulse(self, turn);
            }
            TickResult::Idle
        }
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> ValueNode<T> for FlattenNode<T> {
    fn current(&self) -> T {
        self.value.read().clone()
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Drop for FlattenNode<T> {
    fn drop(&mut self) {
        if let Some(core) = self.domain.upgrade() {
            core.on_node_detach(self, &*self.outer_handle);
            let inner = self.inner.get_mut().node_handle();
            core.on_node_detach(self, &*inner);
            core.on_node_destroy(self);
        }
    }
}

// =============================================================================
// Constructor
// =============================================================================

impl Domain {
    /// Create a signal that always carries the value of the inner signal
    /// currently selected by `outer`.
    ///
    /// Selecting a different inner signal is an ordinary input change on
    /// the outer var; the dependency edge moves with it, so updates of a
    /// de-selected signal no longer reach the flatten.
    pub fn make_flatten<T>(&self, outer: &impl SignalSource<Signal<T>>) -> Signal<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        let outer_node = outer.value_node();
        let outer_handle = outer.node_handle();
        let initial_inner = outer_node.current();
        let initial = initial_inner.get();

        let node = Arc::new(FlattenNode {
            id: NodeId(self.core().next_object_id()),
            domain: self.downgrade(),
            outer: outer_node,
            outer_handle: outer_handle.clone(),
            inner: Mutex::new(initial_inner.clone()),
            value: RwLock::new(initial),
        });
        let handle: NodeHandle = node.clone();
        self.core().on_node_create(&handle);
        self.core().on_node_attach(&*node, &*outer_handle);
        self.core().on_node_attach(&*node, &*initial_inner.node_handle());

        Signal::from_parts(self.clone(), node.clone(), handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainPolicy;
    use crate::engine::TopoSortEngine;
    use crate::log::{EventRecord, MemoryLog};
    use crate::signals::ObserverAction;

    fn domain() -> Domain {
        Domain::new(DomainPolicy::new(Arc::new(TopoSortEngine::new())))
    }

    fn domain_with_log() -> (Domain, Arc<MemoryLog>) {
        let log = Arc::new(MemoryLog::new());
        let domain = Domain::new(
            DomainPolicy::new(Arc::new(TopoSortEngine::new())).with_log(log.clone()),
        );
        (domain, log)
    }

    #[test]
    fn test_flatten_tracks_selected_signal() {
        let domain = domain();
        let v1 = domain.make_var(1i64);
        let v2 = domain.make_var(2i64);
        let s1 = domain.make_signal(|x| *x, &v1);
        let s2 = domain.make_signal(|x| *x, &v2);

        let outer = domain.make_var(s1.clone());
        let flat = domain.make_flatten(&outer);
        assert_eq!(flat.get(), 1);

        v1.set(10);
        assert_eq!(flat.get(), 10);

        // Select the other inner signal.
        outer.set(s2.clone());
        assert_eq!(flat.get(), 2);

        // Updates follow the new selection only.
        v2.set(20);
        assert_eq!(flat.get(), 20);
        v1.set(99);
        assert_eq!(flat.get(), 20);
    }

    /// Switching the selection and writing the newly selected input in the
    /// same transaction: the shift re-levels the flatten behind the new
    /// inner, so one turn delivers exactly one update with the new value.
    #[test]
    fn test_switch_and_new_input_in_one_turn() {
        let (domain, log) = domain_with_log();
        let v1 = domain.make_var(1i64);
        let v2 = domain.make_var(2i64);
        let s1 = domain.make_signal(|x| *x, &v1);
        let s2 = domain.make_signal(|x| *x, &v2);

        let outer = domain.make_var(s1.clone());
        let flat = domain.make_flatten(&outer);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let _obs = domain.observe(&flat, move |v: &i64| {
            seen2.lock().push(*v);
            ObserverAction::Continue
        });

        let (outer2, s2c, v2c) = (outer.clone(), s2.clone(), v2.clone());
        domain
            .do_transaction(move || {
                outer2.set(s2c);
                v2c.set(20);
            })
            .unwrap();

        // One shift, and the observer saw the post-switch value once,
        // never the stale 2 that s2 held before this turn.
        assert_eq!(*seen.lock(), vec![1, 20]);
        assert_eq!(flat.get(), 20);
        let shifts = log
            .records()
            .iter()
            .filter(|r| matches!(r, EventRecord::NodeShift { .. }))
            .count();
        assert_eq!(shifts, 1);
    }

    #[test]
    fn test_reselecting_same_signal_stays_idle() {
        let (domain, log) = domain_with_log();
        let v1 = domain.make_var(1i64);
        let s1 = domain.make_signal(|x| *x, &v1);

        let outer = domain.make_var(s1.clone());
        let flat = domain.make_flatten(&outer);

        // Same selection: the outer var swallows the equal write, no
        // shift, no pulse.
        outer.set(s1.clone());
        assert_eq!(flat.get(), 1);
        assert!(!log
            .records()
            .iter()
            .any(|r| matches!(r, EventRecord::NodeShift { .. })));
    }
}
