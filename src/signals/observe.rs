//! Observers - user callbacks attached to signals and event streams.
//!
//! An observer is itself a node: the engine schedules it like any other
//! dependent, so a callback runs after its subject committed and exactly
//! once per turn. The registry owns the observer; user code gets a weak
//! [`ObserverHandle`].
//!
//! A callback detaches itself by returning [`ObserverAction::Detach`].
//! Mid-turn that only *schedules* the detachment on the current turn; the
//! registry forgets the observer at post-process, after the engine has
//! quiesced. The pulse that triggered the detach is therefore still
//! delivered; later pulses are not.

use std::sync::Arc;

use super::events::{EventSource, EventSourceNode};
use super::{SignalSource, ValueNode};
use crate::domain::{Domain, WeakDomain};
use crate::node::{NodeHandle, ReactiveNode};
use crate::observer::AnyObserver;
use crate::turn::Turn;
use crate::types::{NodeId, NodeKind, ObserverId, TickResult};

// =============================================================================
// Observer Action
// =============================================================================

/// What a callback wants to happen to its observer afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverAction {
    /// Keep observing.
    Continue,
    /// Detach this observer; it receives no further pulses.
    Detach,
}

// =============================================================================
// Signal Observer Node
// =============================================================================

struct SignalObserverNode<T: Clone + Send + Sync + 'static> {
    id: NodeId,
    obs_id: ObserverId,
    domain: WeakDomain,
    subject: Arc<dyn ValueNode<T>>,
    subject_handle: NodeHandle,
    func: Box<dyn Fn(&T) -> ObserverAction + Send + Sync>,
}

impl<T: Clone + Send + Sync + 'static> ReactiveNode for SignalObserverNode<T> {
    fn object_id(&self) -> NodeId {
        self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Observer
    }

    fn tick(&self, turn: &Turn) -> TickResult {
        let value = self.subject.current();
        if (self.func)(&value) == ObserverAction::Detach {
            turn.schedule_detach(self.obs_id);
        }
        TickResult::Idle
    }
}

impl<T: Clone + Send + Sync + 'static> AnyObserver for SignalObserverNode<T> {
    fn observer_id(&self) -> ObserverId {
        self.obs_id
    }

    fn detach_from_subject(&self) {
        if let Some(core) = self.domain.upgrade() {
            core.on_node_detach(self, &*self.subject_handle);
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Drop for SignalObserverNode<T> {
    fn drop(&mut self) {
        if let Some(core) = self.domain.upgrade() {
            core.on_node_destroy(self);
        }
    }
}

// =============================================================================
// Event Observer Node
// =============================================================================

struct EventObserverNode<E: Clone + Send + Sync + 'static> {
    id: NodeId,
    obs_id: ObserverId,
    domain: WeakDomain,
    subject: Arc<EventSourceNode<E>>,
    func: Box<dyn Fn(&E) -> ObserverAction + Send + Sync>,
}

impl<E: Clone + Send + Sync + 'static> ReactiveNode for EventObserverNode<E> {
    fn object_id(&self) -> NodeId {
        self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Observer
    }

    fn tick(&self, turn: &Turn) -> TickResult {
        for event in self.subject.events_this_turn() {
            if (self.func)(&event) == ObserverAction::Detach {
                turn.schedule_detach(self.obs_id);
                break;
            }
        }
        TickResult::Idle
    }
}

impl<E: Clone + Send + Sync + 'static> AnyObserver for EventObserverNode<E> {
    fn observer_id(&self) -> ObserverId {
        self.obs_id
    }

    fn detach_from_subject(&self) {
        if let Some(core) = self.domain.upgrade() {
            core.on_node_detach(self, &*self.subject);
        }
    }
}

impl<E: Clone + Send + Sync + 'static> Drop for EventObserverNode<E> {
    fn drop(&mut self) {
        if let Some(core) = self.domain.upgrade() {
            core.on_node_destroy(self);
        }
    }
}

// =============================================================================
// Observer Handle
// =============================================================================

/// Weak user handle to a registered observer.
///
/// Dropping the handle does nothing; the registry keeps the observer alive
/// until it detaches itself or [`ObserverHandle::detach`] is called.
pub struct ObserverHandle {
    domain: Domain,
    id: ObserverId,
}

impl ObserverHandle {
    /// The observer's id.
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// True while the observer is registered.
    pub fn is_active(&self) -> bool {
        self.domain.is_observer_registered(self.id)
    }

    /// Detach now. Call between turns; from inside a callback, return
    /// [`ObserverAction::Detach`] instead.
    pub fn detach(&self) {
        self.domain.unregister_observer(self.id);
    }
}

// =============================================================================
// Registration
// =============================================================================

impl Domain {
    /// Attach `func` to a signal.
    ///
    /// The callback runs once immediately with the current value, then
    /// once per turn in which the subject pulses.
    pub fn observe<T, S, F>(&self, subject: &S, func: F) -> ObserverHandle
    where
        T: Clone + Send + Sync + 'static,
        S: SignalSource<T>,
        F: Fn(&T) -> ObserverAction + Send + Sync + 'static,
    {
        let core = self.core();
        let raw = core.next_object_id();
        let node = Arc::new(SignalObserverNode {
            id: NodeId(raw),
            obs_id: ObserverId(raw),
            domain: self.downgrade(),
            subject: subject.value_node(),
            subject_handle: subject.node_handle(),
            func: Box::new(func),
        });
        let handle: NodeHandle = node.clone();
        core.on_node_create(&handle);
        core.on_node_attach(&*node, &*node.subject_handle);
        core.observers().register(node.clone());

        // Initial notification with the value as of registration.
        let initial = node.subject.current();
        if (node.func)(&initial) == ObserverAction::Detach {
            self.unregister_observer(node.obs_id);
        }

        ObserverHandle {
            domain: self.clone(),
            id: ObserverId(raw),
        }
    }

    /// Attach `func` to an event source; it runs once per event, in
    /// emission order. No initial notification: there is no current event.
    pub fn observe_events<E, F>(&self, subject: &EventSource<E>, func: F) -> ObserverHandle
    where
        E: Clone + Send + Sync + 'static,
        F: Fn(&E) -> ObserverAction + Send + Sync + 'static,
    {
        let core = self.core();
        let raw = core.next_object_id();
        let node = Arc::new(EventObserverNode {
            id: NodeId(raw),
            obs_id: ObserverId(raw),
            domain: self.downgrade(),
            subject: subject.node().clone(),
            func: Box::new(func),
        });
        let handle: NodeHandle = node.clone();
        core.on_node_create(&handle);
        core.on_node_attach(&*node, &**subject.node());
        core.observers().register(node.clone());

        ObserverHandle {
            domain: self.clone(),
            id: ObserverId(raw),
        }
    }
}
