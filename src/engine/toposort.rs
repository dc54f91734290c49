//! Sequential topological engine.
//!
//! Keeps every node labeled with a level (longest path from an input) and
//! ticks scheduled nodes in level order, so a node never ticks before all
//! of its affected parents have. That ordering is what makes glitch-freedom
//! hold: a derived node recomputes once per turn, after all its changed
//! inputs committed.
//!
//! Turns are fully serialized through a gate: admission blocks while
//! another turn holds the engine, which trivially satisfies the
//! overlapping-turns invariant. While a turn is admitting, callers that
//! request input merging are folded into it: their closure runs on the host
//! thread when admission closes, and they block until the host turn ends.

use parking_lot::{Condvar, Mutex, RwLock};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::{Arc, Weak};

use super::{Engine, MergeInput, MergeOutcome};
use crate::flags::TurnFlags;
use crate::node::{NodeHandle, ReactiveNode};
use crate::turn::Turn;
use crate::types::NodeId;

// =============================================================================
// Topology
// =============================================================================

struct TopoEntry {
    /// Longest-path depth from an input node. Inputs sit at 0.
    level: u32,
    /// Direct dependents.
    successors: Vec<NodeId>,
    node: Weak<dyn ReactiveNode>,
}

/// Raise `node` to at least `min_level`, pushing the increase through its
/// successors. Graphs are DAGs by construction, so this terminates.
fn raise_level(topology: &mut HashMap<NodeId, TopoEntry>, node: NodeId, min_level: u32) {
    let Some(entry) = topology.get_mut(&node) else {
        return;
    };
    if entry.level >= min_level {
        return;
    }
    entry.level = min_level;
    let successors = entry.successors.clone();
    for successor in successors {
        raise_level(topology, successor, min_level + 1);
    }
}

// =============================================================================
// Per-turn schedule
// =============================================================================

#[derive(Default)]
struct TurnSchedule {
    /// Min-heap on (level, admission sequence): lowest level ticks first,
    /// insertion order breaks ties.
    queue: BinaryHeap<Reverse<(u32, u64, NodeId)>>,
    /// Nodes already scheduled this turn. A node whose parents both pulse
    /// still ticks exactly once.
    scheduled: HashSet<NodeId>,
    /// Nodes that pulsed this turn; consulted by `on_node_shift` so a
    /// dynamic re-attach below an already-pulsed parent is not missed.
    pulsed: HashSet<NodeId>,
    seq: u64,
}

// =============================================================================
// Turn gate
// =============================================================================

/// Completion signal a merged caller blocks on.
#[derive(Default)]
struct TurnDone {
    finished: Mutex<bool>,
    cv: Condvar,
}

impl TurnDone {
    fn wait(&self) {
        let mut finished = self.finished.lock();
        while !*finished {
            self.cv.wait(&mut finished);
        }
    }

    fn finish(&self) {
        *self.finished.lock() = true;
        self.cv.notify_all();
    }
}

#[derive(Default)]
struct GateState {
    /// A turn currently owns the engine (admission through post-process).
    turn_active: bool,
    /// Open while the owning turn is admitting; merged closures land here.
    merge_queue: Option<Vec<MergeInput>>,
    /// Completion signal of the owning turn.
    done: Option<Arc<TurnDone>>,
}

#[derive(Default)]
struct TurnGate {
    state: Mutex<GateState>,
    cv: Condvar,
}

// =============================================================================
// Engine
// =============================================================================

/// Sequential, level-ordered propagation engine.
#[derive(Default)]
pub struct TopoSortEngine {
    topology: RwLock<HashMap<NodeId, TopoEntry>>,
    sched: Mutex<TurnSchedule>,
    gate: TurnGate,
}

impl TopoSortEngine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes currently registered.
    pub fn node_count(&self) -> usize {
        self.topology.read().len()
    }

    /// Current level of a node, if registered.
    pub fn level_of(&self, node: NodeId) -> Option<u32> {
        self.topology.read().get(&node).map(|entry| entry.level)
    }

    /// Schedule the direct dependents of `node` for ticking this turn.
    fn schedule_successors(&self, node: NodeId) {
        let targets: Vec<(NodeId, u32)> = {
            let topology = self.topology.read();
            let Some(entry) = topology.get(&node) else {
                return;
            };
            entry
                .successors
                .iter()
                .filter_map(|id| topology.get(id).map(|e| (*id, e.level)))
                .collect()
        };

        let mut sched = self.sched.lock();
        for (id, level) in targets {
            if sched.scheduled.insert(id) {
                let seq = sched.seq;
                sched.seq += 1;
                sched.queue.push(Reverse((level, seq, id)));
            }
        }
    }

    fn schedule_node(&self, node: NodeId) {
        let level = {
            let topology = self.topology.read();
            let Some(entry) = topology.get(&node) else {
                return;
            };
            entry.level
        };
        let mut sched = self.sched.lock();
        if sched.scheduled.insert(node) {
            let seq = sched.seq;
            sched.seq += 1;
            sched.queue.push(Reverse((level, seq, node)));
        }
    }
}

impl Engine for TopoSortEngine {
    fn on_node_create(&self, node: &NodeHandle) {
        self.topology.write().insert(
            node.object_id(),
            TopoEntry {
                level: 0,
                successors: Vec::new(),
                node: Arc::downgrade(node),
            },
        );
    }

    fn on_node_destroy(&self, node: &dyn ReactiveNode) {
        let id = node.object_id();
        let mut topology = self.topology.write();
        topology.remove(&id);
        for entry in topology.values_mut() {
            entry.successors.retain(|successor| *successor != id);
        }
    }

    fn on_node_attach(&self, node: &dyn ReactiveNode, parent: &dyn ReactiveNode) {
        let mut topology = self.topology.write();
        let parent_level = {
            let Some(entry) = topology.get_mut(&parent.object_id()) else {
                return;
            };
            entry.successors.push(node.object_id());
            entry.level
        };
        raise_level(&mut topology, node.object_id(), parent_level + 1);
    }

    fn on_node_detach(&self, node: &dyn ReactiveNode, parent: &dyn ReactiveNode) {
        let mut topology = self.topology.write();
        if let Some(entry) = topology.get_mut(&parent.object_id()) {
            let id = node.object_id();
            entry.successors.retain(|successor| *successor != id);
        }
    }

    fn on_node_pulse(&self, node: &dyn ReactiveNode, _turn: &Turn) {
        self.sched.lock().pulsed.insert(node.object_id());
        self.schedule_successors(node.object_id());
    }

    fn on_node_idle_pulse(&self, _node: &dyn ReactiveNode, _turn: &Turn) {
        // Dependents were never scheduled through this node; nothing to do
        // in a sequential engine.
    }

    fn on_node_shift(
        &self,
        node: &dyn ReactiveNode,
        old_parent: &dyn ReactiveNode,
        new_parent: &dyn ReactiveNode,
        _turn: &Turn,
    ) {
        let id = node.object_id();
        {
            let mut topology = self.topology.write();
            if let Some(entry) = topology.get_mut(&old_parent.object_id()) {
                entry.successors.retain(|successor| *successor != id);
            }
            let new_level = {
                let Some(entry) = topology.get_mut(&new_parent.object_id()) else {
                    return;
                };
                entry.successors.push(id);
                entry.level
            };
            raise_level(&mut topology, id, new_level + 1);
        }

        // If the new parent already pulsed this turn, the shifted node must
        // still see that change in this turn.
        let parent_pulsed = self
            .sched
            .lock()
            .pulsed
            .contains(&new_parent.object_id());
        if parent_pulsed {
            self.schedule_node(id);
        }
    }

    fn on_turn_admission_start(&self, _turn: &Turn) {
        let mut state = self.gate.state.lock();
        while state.turn_active {
            self.gate.cv.wait(&mut state);
        }
        state.turn_active = true;
        state.merge_queue = Some(Vec::new());
        state.done = Some(Arc::new(TurnDone::default()));
    }

    fn on_turn_admission_end(&self, _turn: &Turn) {
        // Close the merge window, then run merged admissions on the host
        // thread. Their `add_input` calls route into the host transaction,
        // which is still admitting from the domain's point of view.
        let merged = {
            let mut state = self.gate.state.lock();
            state.merge_queue.take().unwrap_or_default()
        };
        for input in merged {
            input();
        }
    }

    fn on_turn_input_change(&self, node: &dyn ReactiveNode, _turn: &Turn) {
        self.sched.lock().pulsed.insert(node.object_id());
        self.schedule_successors(node.object_id());
    }

    fn on_turn_propagate(&self, turn: &Turn) {
        // Ticked nodes fire on_node_pulse / on_node_idle_pulse themselves,
        // so the queue grows while we drain it. Never hold the schedule
        // lock across a tick.
        loop {
            let next = {
                let mut sched = self.sched.lock();
                let next = sched.queue.pop();
                if let Some(Reverse((_, _, id))) = next {
                    // Un-mark at pop: dedup only guards nodes still
                    // waiting in the queue. A node that shifts under an
                    // already-pulsed parent gets rescheduled and ticks
                    // again at its new level; for a static graph every
                    // parent sits at a lower level and has already
                    // popped, so nothing can re-schedule a ticked node.
                    sched.scheduled.remove(&id);
                }
                next
            };
            let Some(Reverse((_, _, id))) = next else {
                break;
            };
            let node = {
                let topology = self.topology.read();
                topology.get(&id).and_then(|entry| entry.node.upgrade())
            };
            if let Some(node) = node {
                node.tick(turn);
            }
        }
    }

    fn on_turn_end(&self, _turn: &Turn) {
        {
            let mut sched = self.sched.lock();
            sched.queue.clear();
            sched.scheduled.clear();
            sched.pulsed.clear();
            sched.seq = 0;
        }
        let done = {
            let mut state = self.gate.state.lock();
            state.turn_active = false;
            state.merge_queue = None;
            let done = state.done.take();
            self.gate.cv.notify_all();
            done
        };
        if let Some(done) = done {
            done.finish();
        }
    }

    fn try_merge(&self, flags: TurnFlags, input: MergeInput) -> MergeOutcome {
        if !flags.contains(TurnFlags::ENABLE_INPUT_MERGING) {
            return MergeOutcome::Refused(input);
        }
        let done = {
            let mut guard = self.gate.state.lock();
            let state = &mut *guard;
            match (&mut state.merge_queue, &state.done) {
                (Some(queue), Some(done)) => {
                    queue.push(input);
                    done.clone()
                }
                _ => return MergeOutcome::Refused(input),
            }
        };
        // Admitted into the host turn; wait for it to finish
        // post-processing.
        done.wait();
        MergeOutcome::Merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeKind, TickResult};

    /// Test node that records its tick order and reports its own pulse
    /// back to the engine, the way derived nodes do through the domain.
    struct RecordingNode {
        id: NodeId,
        engine: Arc<TopoSortEngine>,
        order: Arc<Mutex<Vec<NodeId>>>,
        pulses: bool,
    }

    impl RecordingNode {
        fn create(
            engine: &Arc<TopoSortEngine>,
            id: u64,
            order: &Arc<Mutex<Vec<NodeId>>>,
            pulses: bool,
        ) -> Arc<Self> {
            let node = Arc::new(Self {
                id: NodeId(id),
                engine: engine.clone(),
                order: order.clone(),
                pulses,
            });
            let handle: NodeHandle = node.clone();
            engine.on_node_create(&handle);
            node
        }
    }

    impl ReactiveNode for RecordingNode {
        fn object_id(&self) -> NodeId {
            self.id
        }

        fn kind(&self) -> NodeKind {
            NodeKind::Signal
        }

        fn tick(&self, turn: &Turn) -> TickResult {
            self.order.lock().push(self.id);
            if self.pulses {
                self.engine.on_node_pulse(self, turn);
                TickResult::Pulsed
            } else {
                self.engine.on_node_idle_pulse(self, turn);
                TickResult::Idle
            }
        }
    }

    fn turn() -> Turn {
        Turn::new(crate::types::TurnId(1), TurnFlags::empty())
    }

    #[test]
    fn test_attach_raises_levels_transitively() {
        let engine = Arc::new(TopoSortEngine::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let a = RecordingNode::create(&engine, 1, &order, true);
        let b = RecordingNode::create(&engine, 2, &order, true);
        let c = RecordingNode::create(&engine, 3, &order, true);

        engine.on_node_attach(&*b, &*a);
        engine.on_node_attach(&*c, &*b);
        assert_eq!(engine.level_of(NodeId(1)), Some(0));
        assert_eq!(engine.level_of(NodeId(2)), Some(1));
        assert_eq!(engine.level_of(NodeId(3)), Some(2));

        // Attaching b under a deeper parent raises b's whole subtree.
        let d = RecordingNode::create(&engine, 4, &order, true);
        let e = RecordingNode::create(&engine, 5, &order, true);
        engine.on_node_attach(&*e, &*d);
        engine.on_node_attach(&*b, &*e);
        assert_eq!(engine.level_of(NodeId(2)), Some(2));
        assert_eq!(engine.level_of(NodeId(3)), Some(3));
    }

    #[test]
    fn test_propagate_ticks_in_level_order() {
        let engine = Arc::new(TopoSortEngine::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let input = RecordingNode::create(&engine, 1, &order, true);
        let mid = RecordingNode::create(&engine, 2, &order, true);
        let leaf = RecordingNode::create(&engine, 3, &order, true);

        engine.on_node_attach(&*mid, &*input);
        engine.on_node_attach(&*leaf, &*mid);

        let turn = turn();
        engine.on_turn_admission_start(&turn);
        engine.on_turn_admission_end(&turn);
        engine.on_turn_input_change(&*input, &turn);
        engine.on_turn_propagate(&turn);
        engine.on_turn_end(&turn);

        assert_eq!(*order.lock(), vec![NodeId(2), NodeId(3)]);
    }

    #[test]
    fn test_diamond_ticks_join_once() {
        let engine = Arc::new(TopoSortEngine::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let input = RecordingNode::create(&engine, 1, &order, true);
        let left = RecordingNode::create(&engine, 2, &order, true);
        let right = RecordingNode::create(&engine, 3, &order, true);
        let join = RecordingNode::create(&engine, 4, &order, true);

        engine.on_node_attach(&*left, &*input);
        engine.on_node_attach(&*right, &*input);
        engine.on_node_attach(&*join, &*left);
        engine.on_node_attach(&*join, &*right);

        let turn = turn();
        engine.on_turn_admission_start(&turn);
        engine.on_turn_admission_end(&turn);
        engine.on_turn_input_change(&*input, &turn);
        engine.on_turn_propagate(&turn);
        engine.on_turn_end(&turn);

        let ticked = order.lock().clone();
        assert_eq!(ticked.len(), 3);
        assert_eq!(ticked[2], NodeId(4));
    }

    #[test]
    fn test_idle_pulse_stops_downstream() {
        let engine = Arc::new(TopoSortEngine::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let input = RecordingNode::create(&engine, 1, &order, true);
        let quiet = RecordingNode::create(&engine, 2, &order, false);
        let leaf = RecordingNode::create(&engine, 3, &order, true);

        engine.on_node_attach(&*quiet, &*input);
        engine.on_node_attach(&*leaf, &*quiet);

        let turn = turn();
        engine.on_turn_admission_start(&turn);
        engine.on_turn_admission_end(&turn);
        engine.on_turn_input_change(&*input, &turn);
        engine.on_turn_propagate(&turn);
        engine.on_turn_end(&turn);

        // quiet ticked but idled, so leaf never ticked.
        assert_eq!(*order.lock(), vec![NodeId(2)]);
    }

    #[test]
    fn test_destroy_scrubs_successor_lists() {
        let engine = Arc::new(TopoSortEngine::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let input = RecordingNode::create(&engine, 1, &order, true);
        let leaf = RecordingNode::create(&engine, 2, &order, true);
        engine.on_node_attach(&*leaf, &*input);

        engine.on_node_destroy(&*leaf);
        assert_eq!(engine.node_count(), 1);

        let turn = turn();
        engine.on_turn_admission_start(&turn);
        engine.on_turn_admission_end(&turn);
        engine.on_turn_input_change(&*input, &turn);
        engine.on_turn_propagate(&turn);
        engine.on_turn_end(&turn);
        assert!(order.lock().is_empty());
    }

    #[test]
    fn test_try_merge_refuses_without_flag_or_host() {
        let engine = TopoSortEngine::new();

        // No merge flag requested.
        let outcome = engine.try_merge(TurnFlags::empty(), Box::new(|| {}));
        assert!(matches!(outcome, MergeOutcome::Refused(_)));

        // Flag requested but no turn admitting; must not block.
        let outcome = engine.try_merge(TurnFlags::ENABLE_INPUT_MERGING, Box::new(|| {}));
        assert!(matches!(outcome, MergeOutcome::Refused(_)));
    }

    #[test]
    fn test_merge_window_closes_at_admission_end() {
        let engine = TopoSortEngine::new();
        let turn = turn();
        engine.on_turn_admission_start(&turn);
        engine.on_turn_admission_end(&turn);

        // Admission closed: refuse rather than queue into a dead window.
        let outcome = engine.try_merge(TurnFlags::ENABLE_INPUT_MERGING, Box::new(|| {}));
        assert!(matches!(outcome, MergeOutcome::Refused(_)));

        engine.on_turn_end(&turn);
    }
}
