//! Event sources - input nodes carrying discrete occurrences.
//!
//! Unlike a var, an event source has no standing value: events emitted
//! during one admission are committed together when the source ticks, stay
//! visible for that turn only, and are cleared the next time the source
//! ticks.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use crate::domain::{Domain, WeakDomain};
use crate::node::{InputNode, NodeHandle, ReactiveNode};
use crate::turn::Turn;
use crate::types::{NodeId, NodeKind, TickResult};

// =============================================================================
// Event Source Node
// =============================================================================

pub(crate) struct EventSourceNode<E: Clone + Send + Sync + 'static> {
    id: NodeId,
    domain: WeakDomain,
    /// Events staged by `add_input`, committed by the next tick.
    staged: Mutex<Vec<E>>,
    /// Events of the currently propagating turn.
    events: RwLock<Vec<E>>,
}

impl<E: Clone + Send + Sync + 'static> EventSourceNode<E> {
    /// The events committed for the current turn.
    pub(crate) fn events_this_turn(&self) -> Vec<E> {
        self.events.read().clone()
    }
}

impl<E: Clone + Send + Sync + 'static> ReactiveNode for EventSourceNode<E> {
    fn object_id(&self) -> NodeId {
        self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::EventSource
    }

    fn tick(&self, turn: &Turn) -> TickResult {
        let staged = std::mem::take(&mut *self.staged.lock());
        if staged.is_empty() {
            // Several emits in one admission enlist this node once per
            // emit; the first tick committed everything, the rest are
            // no-ops and must not disturb the committed batch.
            TickResult::Idle
        } else {
            *self.events.write() = staged;
            if let Some(core) = self.domain.upgrade() {
                core.on_turn_input_change(self, turn);
            }
            TickResult::Pulsed
        }
    }
}

impl<E: Clone + Send + Sync + 'static> InputNode<E> for EventSourceNode<E> {
    fn add_input(&self, value: E) {
        self.staged.lock().push(value);
    }
}

impl<E: Clone + Send + Sync + 'static> Drop for EventSourceNode<E> {
    fn drop(&mut self) {
        if let Some(core) = self.domain.upgrade() {
            core.on_node_destroy(self);
        }
    }
}

// =============================================================================
// Event Source Handle
// =============================================================================

/// An input event stream: external code feeds it with [`EventSource::emit`].
pub struct EventSource<E: Clone + Send + Sync + 'static> {
    domain: Domain,
    node: Arc<EventSourceNode<E>>,
}

impl<E: Clone + Send + Sync + 'static> EventSource<E> {
    /// Emit one event.
    ///
    /// Several emits inside one transaction are committed together and
    /// delivered in emission order.
    pub fn emit(&self, event: E) {
        self.domain.add_input(&self.node, event);
    }

    /// The underlying node's id.
    pub fn object_id(&self) -> NodeId {
        self.node.id
    }

    pub(crate) fn node(&self) -> &Arc<EventSourceNode<E>> {
        &self.node
    }
}

impl<E: Clone + Send + Sync + 'static> Clone for EventSource<E> {
    fn clone(&self) -> Self {
        Self {
            domain: self.domain.clone(),
            node: self.node.clone(),
        }
    }
}

impl Domain {
    /// Create an event source.
    pub fn make_event_source<E>(&self) -> EventSource<E>
    where
        E: Clone + Send + Sync + 'static,
    {
        let node = Arc::new(EventSourceNode {
            id: NodeId(self.core().next_object_id()),
            domain: self.downgrade(),
            staged: Mutex::new(Vec::new()),
            events: RwLock::new(Vec::new()),
        });
        let handle: NodeHandle = node.clone();
        self.core().on_node_create(&handle);
        EventSource {
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
    use crate::signals::ObserverAction;

    fn domain() -> Domain {
        Domain::new(DomainPolicy::new(Arc::new(TopoSortEngine::new())))
    }

    #[test]
    fn test_emits_in_one_transaction_arrive_together() {
        let domain = domain();
        let source = domain.make_event_source::<u32>();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let _obs = domain.observe_events(&source, move |e: &u32| {
            seen2.lock().push(*e);
            ObserverAction::Continue
        });

        let s2 = source.clone();
        domain
            .do_transaction(move || {
                s2.emit(1);
                s2.emit(2);
                s2.emit(3);
            })
            .unwrap();

        assert_eq!(*seen.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn test_single_emit_outside_transaction() {
        let domain = domain();
        let source = domain.make_event_source::<&'static str>();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let _obs = domain.observe_events(&source, move |e: &&str| {
            seen2.lock().push(*e);
            ObserverAction::Continue
        });

        source.emit("ping");
        source.emit("pong");

        assert_eq!(*seen.lock(), vec!["ping", "pong"]);
    }

    #[test]
    fn test_next_pulse_replaces_committed_batch() {
        let domain = domain();
        let source = domain.make_event_source::<u32>();

        source.emit(1);
        assert_eq!(source.node().events_this_turn(), vec![1]);

        // A later turn's batch replaces the previous one wholesale.
        let s2 = source.clone();
        domain
            .do_transaction(move || {
                s2.emit(2);
                s2.emit(3);
            })
            .unwrap();
        assert_eq!(source.node().events_this_turn(), vec![2, 3]);
    }
}
