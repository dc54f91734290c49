//! Derived signals - values computed from other signals.
//!
//! A derived node recomputes from its parents when the engine ticks it.
//! The engine's level ordering guarantees every changed parent committed
//! first, so one recompute per turn sees a consistent snapshot and
//! dependents never observe mixtures of old and new parent values.
//!
//! Recomputing to an equal value is an idle pulse: dependents are told
//! nothing changed and stay asleep.

use parking_lot::RwLock;
use std::sync::Arc;

use super::{SignalSource, ValueNode};
use crate::domain::{Domain, WeakDomain};
use crate::node::{NodeHandle, ReactiveNode};
use crate::turn::Turn;
use crate::types::{NodeId, NodeKind, TickResult};

// =============================================================================
// Derived Node
// =============================================================================

pub(crate) struct DerivedNode<T: Clone + PartialEq + Send + Sync + 'static> {
    id: NodeId,
    kind: NodeKind,
    domain: WeakDomain,
    /// `None` for constant (`make_val`) nodes, which never recompute.
    compute: Option<Box<dyn Fn() -> T + Send + Sync>>,
    value: RwLock<T>,
    /// Strong references keep parents alive as long as a dependent reads
    /// them; the engine's back-edges stay weak.
    parents: Vec<NodeHandle>,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> ReactiveNode for DerivedNode<T> {
    fn object_id(&self) -> NodeId {
        self.id
    }

    fn kind(&self) -> NodeKind {
        self.kind
    }

    fn tick(&self, turn: &Turn) -> TickResult {
        let Some(compute) = &self.compute else {
            return TickResult::Idle;
        };
        let new = compute();
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

impl<T: Clone + PartialEq + Send + Sync + 'static> ValueNode<T> for DerivedNode<T> {
    fn current(&self) -> T {
        self.value.read().clone()
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Drop for DerivedNode<T> {
    fn drop(&mut self) {
        if let Some(core) = self.domain.upgrade() {
            for parent in &self.parents {
                core.on_node_detach(self, &**parent);
            }
            core.on_node_destroy(self);
        }
    }
}

// =============================================================================
// Signal Handle
// =============================================================================

/// A read-only signal: either a constant or a derived computation.
pub struct Signal<T> {
    domain: Domain,
    node: Arc<dyn ValueNode<T>>,
    handle: NodeHandle,
}

impl<T> Signal<T> {
    /// The signal's current value.
    pub fn get(&self) -> T {
        self.node.current()
    }

    /// The underlying node's id.
    pub fn object_id(&self) -> NodeId {
        self.handle.object_id()
    }
}

impl<T> Signal<T> {
    pub(crate) fn from_parts(domain: Domain, node: Arc<dyn ValueNode<T>>, handle: NodeHandle) -> Self {
        Self {
            domain,
            node,
            handle,
        }
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            domain: self.domain.clone(),
            node: self.node.clone(),
            handle: self.handle.clone(),
        }
    }
}

/// Signals compare by node identity: two handles are equal when they view
/// the same underlying node. This is what lets a signal itself be the
/// value of a var (see `make_flatten`), where "changed" means "a different
/// signal was selected".
impl<T> PartialEq for Signal<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.handle, &other.handle)
    }
}

impl<T> Eq for Signal<T> {}

impl<T> SignalSource<T> for Signal<T> {
    fn value_node(&self) -> Arc<dyn ValueNode<T>> {
        self.node.clone()
    }

    fn node_handle(&self) -> NodeHandle {
        self.handle.clone()
    }
}

// =============================================================================
// Constructors
// =============================================================================

impl Domain {
    /// Create a constant signal.
    pub fn make_val<T>(&self, value: T) -> Signal<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        let node = Arc::new(DerivedNode {
            id: NodeId(self.core().next_object_id()),
            kind: NodeKind::Val,
            domain: self.downgrade(),
            compute: None,
            value: RwLock::new(value),
            parents: Vec::new(),
        });
        let handle: NodeHandle = node.clone();
        self.core().on_node_create(&handle);
        Signal {
            domain: self.clone(),
            node: node.clone(),
            handle,
        }
    }

    /// Create a signal derived from one parent.
    pub fn make_signal<A, T, F>(&self, func: F, a: &impl SignalSource<A>) -> Signal<T>
    where
        A: Clone + Send + Sync + 'static,
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&A) -> T + Send + Sync + 'static,
    {
        let pa = a.value_node();
        let parents = vec![a.node_handle()];
        self.create_derived(Box::new(move || func(&pa.current())), parents)
    }

    /// Create a signal derived from two parents.
    pub fn make_signal2<A, B, T, F>(
        &self,
        func: F,
        a: &impl SignalSource<A>,
        b: &impl SignalSource<B>,
    ) -> Signal<T>
    where
        A: Clone + Send + Sync + 'static,
        B: Clone + Send + Sync + 'static,
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&A, &B) -> T + Send + Sync + 'static,
    {
        let pa = a.value_node();
        let pb = b.value_node();
        let parents = vec![a.node_handle(), b.node_handle()];
        self.create_derived(
            Box::new(move || func(&pa.current(), &pb.current())),
            parents,
        )
    }

    /// Create a signal derived from three parents.
    pub fn make_signal3<A, B, C, T, F>(
        &self,
        func: F,
        a: &impl SignalSource<A>,
        b: &impl SignalSource<B>,
        c: &impl SignalSource<C>,
    ) -> Signal<T>
    where
        A: Clone + Send + Sync + 'static,
        B: Clone + Send + Sync + 'static,
        C: Clone + Send + Sync + 'static,
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&A, &B, &C) -> T + Send + Sync + 'static,
    {
        let pa = a.value_node();
        let pb = b.value_node();
        let pc = c.value_node();
        let parents = vec![a.node_handle(), b.node_handle(), c.node_handle()];
        self.create_derived(
            Box::new(move || func(&pa.current(), &pb.current(), &pc.current())),
            parents,
        )
    }

    /// Register a derived node: compute the initial value, announce the
    /// node, then attach it below each parent.
    fn create_derived<T>(
        &self,
        compute: Box<dyn Fn() -> T + Send + Sync>,
        parents: Vec<NodeHandle>,
    ) -> Signal<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        let initial = compute();
        let node = Arc::new(DerivedNode {
            id: NodeId(self.core().next_object_id()),
            kind: NodeKind::Signal,
            domain: self.downgrade(),
            compute: Some(compute),
            value: RwLock::new(initial),
            parents: parents.clone(),
        });
        let handle: NodeHandle = node.clone();
        self.core().on_node_create(&handle);
        for parent in &parents {
            self.core().on_node_attach(&*node, &**parent);
        }
        Signal {
            domain: self.clone(),
            node: node.clone(),
            handle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainPolicy;
    use crate::engine::TopoSortEngine;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn domain() -> Domain {
        Domain::new(DomainPolicy::new(Arc::new(TopoSortEngine::new())))
    }

    #[test]
    fn test_initial_value_computed_at_creation() {
        let domain = domain();
        let a = domain.make_var(2);
        let b = domain.make_var(3);
        let c = domain.make_signal2(|x, y| x * y, &a, &b);
        assert_eq!(c.get(), 6);
    }

    #[test]
    fn test_recompute_on_input_change() {
        let domain = domain();
        let a = domain.make_var(1);
        let doubled = domain.make_signal(|x| x * 2, &a);

        a.set(21);
        assert_eq!(doubled.get(), 42);
    }

    #[test]
    fn test_chained_signals() {
        let domain = domain();
        let a = domain.make_var(1);
        let b = domain.make_signal(|x| x + 1, &a);
        let c = domain.make_signal(|x| x * 10, &b);

        a.set(4);
        assert_eq!(b.get(), 5);
        assert_eq!(c.get(), 50);
    }

    #[test]
    fn test_val_is_constant() {
        let domain = domain();
        let k = domain.make_val(100);
        let a = domain.make_var(1);
        let sum = domain.make_signal2(|x, k| x + k, &a, &k);

        a.set(2);
        assert_eq!(k.get(), 100);
        assert_eq!(sum.get(), 102);
    }

    /// Every node transitively dependent on a pulsed input ticks exactly
    /// once per turn, including the join of a diamond.
    #[test]
    fn test_diamond_recomputes_once_per_turn() {
        let domain = domain();
        let recomputes = Arc::new(AtomicUsize::new(0));

        let a = domain.make_var(1);
        let left = domain.make_signal(|x| x + 1, &a);
        let right = domain.make_signal(|x| x * 2, &a);
        let counter = recomputes.clone();
        let join = domain.make_signal2(
            move |l, r| {
                counter.fetch_add(1, Ordering::SeqCst);
                l + r
            },
            &left,
            &right,
        );

        // One recompute at creation.
        assert_eq!(recomputes.load(Ordering::SeqCst), 1);

        a.set(10);
        assert_eq!(join.get(), 31);
        assert_eq!(recomputes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_equal_recompute_is_idle_downstream() {
        let domain = domain();
        let downstream_recomputes = Arc::new(AtomicUsize::new(0));

        let a = domain.make_var(5i64);
        let clamped = domain.make_signal(|x| (*x).min(10), &a);
        let counter = downstream_recomputes.clone();
        let _leaf = domain.make_signal(
            move |x| {
                counter.fetch_add(1, Ordering::SeqCst);
                *x
            },
            &clamped,
        );
        assert_eq!(downstream_recomputes.load(Ordering::SeqCst), 1);

        // 5 -> 8: clamped changes, leaf recomputes.
        a.set(8);
        assert_eq!(downstream_recomputes.load(Ordering::SeqCst), 2);

        // 8 -> 12: clamped moves to the cap, leaf recomputes once more.
        a.set(12);
        assert_eq!(downstream_recomputes.load(Ordering::SeqCst), 3);

        // 12 -> 15: clamped stays 10, leaf sleeps.
        a.set(15);
        assert_eq!(downstream_recomputes.load(Ordering::SeqCst), 3);
    }
}
