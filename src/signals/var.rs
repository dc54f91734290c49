//! Var signals - input nodes whose value is set by external code.
//!
//! A var stages writes and commits them when the domain ticks it during a
//! turn. Equal writes are swallowed: committing a value equal to the
//! current one stays idle and wakes no dependents.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use super::{SignalSource, ValueNode};
use crate::domain::{Domain, WeakDomain};
use crate::node::{InputNode, NodeHandle, ReactiveNode};
use crate::turn::Turn;
use crate::types::{NodeId, NodeKind, TickResult};

// =============================================================================
// Var Node
// =============================================================================

pub(crate) struct VarNode<T: Clone + PartialEq + Send + Sync + 'static> {
    id: NodeId,
    domain: WeakDomain,
    /// Value staged by `add_input`, committed by the next tick.
    staged: Mutex<Option<T>>,
    value: RwLock<T>,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> ReactiveNode for VarNode<T> {
    fn object_id(&self) -> NodeId {
        self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Var
    }

    fn tick(&self, turn: &Turn) -> TickResult {
        let staged = self.staged.lock().take();
        match staged {
            Some(value) if value != *self.value.read() => {
                *self.value.write() = value;
                if let Some(core) = self.domain.upgrade() {
                    core.on_turn_input_change(self, turn);
                }
                TickResult::Pulsed
            }
            _ => TickResult::Idle,
        }
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> InputNode<T> for VarNode<T> {
    fn add_input(&self, value: T) {
        // Several writes in one admission collapse to the last one.
        *self.staged.lock() = Some(value);
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> ValueNode<T> for VarNode<T> {
    fn current(&self) -> T {
        self.value.read().clone()
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Drop for VarNode<T> {
    fn drop(&mut self) {
        if let Some(core) = self.domain.upgrade() {
            core.on_node_destroy(self);
        }
    }
}

// =============================================================================
// Var Signal Handle
// =============================================================================

/// An input signal: external code drives it with [`VarSignal::set`].
pub struct VarSignal<T: Clone + PartialEq + Send + Sync + 'static> {
    domain: Domain,
    node: Arc<VarNode<T>>,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> VarSignal<T> {
    /// Write a new value.
    ///
    /// Routes through the domain's input dispatch: inside a transaction it
    /// joins the open admission; during propagation it is deferred into
    /// the continuation; otherwise it runs as a standalone turn.
    pub fn set(&self, value: T) {
        self.domain.add_input(&self.node, value);
    }

    /// The last committed value.
    pub fn get(&self) -> T {
        self.node.current()
    }

    /// The underlying node's id.
    pub fn object_id(&self) -> NodeId {
        self.node.id
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Clone for VarSignal<T> {
    fn clone(&self) -> Self {
        Self {
            domain: self.domain.clone(),
            node: self.node.clone(),
        }
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> SignalSource<T> for VarSignal<T> {
    fn value_node(&self) -> Arc<dyn ValueNode<T>> {
        self.node.clone()
    }

    fn node_handle(&self) -> NodeHandle {
        self.node.clone()
    }
}

impl Domain {
    /// Create an input signal holding `initial`.
    pub fn make_var<T>(&self, initial: T) -> VarSignal<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        let node = Arc::new(VarNode {
            id: NodeId(self.core().next_object_id()),
            domain: self.downgrade(),
            staged: Mutex::new(None),
            value: RwLock::new(initial),
        });
        let handle: NodeHandle = node.clone();
        self.core().on_node_create(&handle);
        VarSignal {
            domain: self.clone(),
            node,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainPolicy;
    use crate::engine::TopoSortEngine;

    fn domain() -> Domain {
        Domain::new(DomainPolicy::new(Arc::new(TopoSortEngine::new())))
    }

    #[test]
    fn test_set_outside_transaction_commits() {
        let domain = domain();
        let a = domain.make_var(1);

        a.set(5);
        assert_eq!(a.get(), 5);
    }

    #[test]
    fn test_set_inside_transaction_is_deferred_until_tick() {
        let domain = domain();
        let a = domain.make_var(1);

        let a2 = a.clone();
        let observed_during = Arc::new(Mutex::new(None));
        let observed = observed_during.clone();
        domain
            .do_transaction(move || {
                a2.set(10);
                // Still the old value: admission only stages.
                *observed.lock() = Some(a2.get());
            })
            .unwrap();

        assert_eq!(*observed_during.lock(), Some(1));
        assert_eq!(a.get(), 10);
    }

    #[test]
    fn test_last_write_wins_within_admission() {
        let domain = domain();
        let a = domain.make_var(0);

        let a2 = a.clone();
        domain
            .do_transaction(move || {
                a2.set(1);
                a2.set(2);
                a2.set(3);
            })
            .unwrap();

        assert_eq!(a.get(), 3);
    }

    #[test]
    fn test_equal_write_stays_idle() {
        let domain = domain();
        let a = domain.make_var(7);

        a.set(7);
        assert_eq!(a.get(), 7);
    }
}
