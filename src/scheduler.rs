//! The topological emit loop: a priority-ordered worklist walked over the
//! dependency graph, with a cycle-breaking escape hatch and a delegate hook
//! that lets [`crate::vecstate::VecScheduleState`] intercept pack members.

use crate::entities::NodeId;
use crate::graph::DependencyGraph;
use crate::ir::{Op, ValueId};
use crate::result::{VectorizeError, VectorizeResult};
use log::trace;
use std::collections::HashMap;

/// Hook implemented by a scheduling specialization (plain or
/// vector-aware) to intercept emission of individual nodes.
pub trait Delegate {
    /// First chance at emitting `node`. Returning `Ok(true)` tells the
    /// scheduler the delegate already marked `node` (and possibly its pack
    /// siblings) emitted and appended whatever ops it wants to `oplist`;
    /// returning `Ok(false)` asks the scheduler to do the default
    /// single-node emission (`pre_emit`, `mark_emitted`, append the op).
    fn emit(&mut self, node: NodeId, scheduler: &mut SchedulerState) -> VectorizeResult<bool>;

    /// Runs immediately before a node the delegate declined to special-case
    /// is marked emitted.
    fn pre_emit(&mut self, node: NodeId, scheduler: &mut SchedulerState);

    /// Runs immediately after a node the delegate declined to special-case
    /// is marked emitted and appended.
    fn post_emit(&mut self, node: NodeId, scheduler: &mut SchedulerState);

    /// True if `node` must wait even though its in-degree is zero.
    fn delay(&self, node: NodeId, scheduler: &SchedulerState) -> bool;

    /// Runs once after the worklist has fully drained.
    fn post_schedule(&mut self, scheduler: &mut SchedulerState);
}

/// Owns the dependency graph and the scheduling state threaded through
/// `walk_and_emit`: the worklist, the emitted op list, the rename map, and
/// the invariant prefix built up for loop-invariant vector expansions.
#[derive(Debug)]
pub struct SchedulerState {
    graph: DependencyGraph,
    worklist: Vec<NodeId>,
    /// Operations emitted into the loop body, in final order.
    pub oplist: Vec<Op>,
    /// Maps an original scalar SSA name to the name downstream consumers
    /// should see (set when a value is subsumed into a vector op or
    /// otherwise renamed).
    pub renamer: HashMap<ValueId, ValueId>,
    /// Operations hoisted before the loop label (loop-invariant expansions).
    pub invariant_oplist: Vec<Op>,
    /// Loop-invariant vector values appended to the label/jump argument
    /// lists so they are live across the back-edge.
    pub invariant_vector_vars: Vec<ValueId>,
}

impl SchedulerState {
    /// Wraps a dependency graph with empty scheduling state.
    pub fn new(graph: DependencyGraph) -> Self {
        SchedulerState {
            graph,
            worklist: Vec::new(),
            oplist: Vec::new(),
            renamer: HashMap::new(),
            invariant_oplist: Vec::new(),
            invariant_vector_vars: Vec::new(),
        }
    }

    /// Read-only access to the graph.
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Mutable access to the graph, for delegates that need to rewrite
    /// node/pack bookkeeping.
    pub fn graph_mut(&mut self) -> &mut DependencyGraph {
        &mut self.graph
    }

    /// Seeds the worklist with every zero-in-degree node, ordered by
    /// `(priority, index)` ascending so equal-priority nodes drain in trace
    /// order.
    pub fn prepare(&mut self) {
        let mut zero: Vec<NodeId> = self
            .graph
            .node_ids()
            .filter(|&id| self.graph.node(id).depends_count == 0)
            .collect();
        zero.sort_by_key(|&id| (self.graph.node(id).priority, self.graph.node(id).index));
        self.worklist = zero;
    }

    /// True while the worklist still has candidates.
    pub fn has_more(&self) -> bool {
        !self.worklist.is_empty()
    }

    fn insert_sorted(&mut self, node: NodeId) {
        let key = |n: NodeId| (self.graph.node(n).priority, self.graph.node(n).index);
        let target = key(node);
        let pos = self.worklist.partition_point(|&n| key(n) <= target);
        self.worklist.insert(pos, node);
    }

    /// Pops the next node to process, honoring `delegate.delay`: a delayed
    /// node is rotated to the back of the queue (it stays ready, just not
    /// yet schedulable) and revisited after every other ready node has had
    /// a turn. Returns `None` once a full lap produces no progress.
    fn next(&mut self, delegate: &dyn Delegate) -> Option<NodeId> {
        let mut visited_without_progress = 0;
        let initial_len = self.worklist.len();
        while !self.worklist.is_empty() {
            let node = self.worklist.remove(0);
            if self.graph.node(node).emitted {
                continue;
            }
            if delegate.delay(node, self) {
                trace!("scheduler: delaying {}", node);
                self.worklist.push(node);
                visited_without_progress += 1;
                if visited_without_progress >= initial_len.max(1) {
                    return None;
                }
                continue;
            }
            return Some(node);
        }
        None
    }

    /// Marks `node` emitted: rewrites its op's arguments and fail-arguments
    /// through `self.renamer` (so a scalar consumer of a value vectorization
    /// has since subsumed, such as an accumulator seed, picks up its new
    /// identity), then removes its out-edges, promoting any consumer whose
    /// in-degree drops to zero into the worklist. Callers that need the
    /// post-rename op (the common case) must clone `self.graph().node(node)
    /// .op` only after this returns.
    pub fn mark_emitted(&mut self, node: NodeId) {
        if !self.renamer.is_empty() {
            let mut op = self.graph.node(node).op.clone();
            self.rename_op(&mut op);
            self.graph.node_mut(node).op = op;
        }
        let provides = std::mem::take(&mut self.graph.node_mut(node).provides);
        for target in &provides {
            let target = *target;
            self.graph.node_mut(target).depends_count =
                self.graph.node(target).depends_count.saturating_sub(1);
            let ready = self.graph.node(target).depends_count == 0 && !self.graph.node(target).emitted;
            if ready {
                self.insert_sorted(target);
            }
        }
        self.graph.node_mut(node).emitted = true;
    }

    /// Rewrites every argument and fail-argument of `op` still pointing at
    /// a value `self.renamer` maps elsewhere.
    fn rename_op(&self, op: &mut Op) {
        for arg in op.args.iter_mut() {
            if let Some(&renamed) = self.renamer.get(arg) {
                *arg = renamed;
            }
        }
        if let Some(failargs) = op.failargs.as_mut() {
            for fa in failargs.iter_mut() {
                if let Some(&renamed) = self.renamer.get(fa) {
                    *fa = renamed;
                }
            }
        }
    }
}

/// The scheduler itself holds no state; `walk_and_emit` is the sole public
/// operation, parameterized over a [`Delegate`].
pub struct Scheduler;

impl Scheduler {
    /// Runs the topological emit loop to completion, or returns
    /// [`VectorizeError::Cycle`] if no progress can be made even after
    /// trashing packs.
    pub fn walk_and_emit(
        scheduler: &mut SchedulerState,
        delegate: &mut dyn Delegate,
    ) -> VectorizeResult<()> {
        scheduler.prepare();
        while scheduler.has_more() {
            match scheduler.next(delegate) {
                Some(node) => {
                    if !delegate.emit(node, scheduler)? {
                        delegate.pre_emit(node, scheduler);
                        scheduler.mark_emitted(node);
                        let op = scheduler.graph().node(node).op.clone();
                        scheduler.oplist.push(op);
                        delegate.post_emit(node, scheduler);
                    }
                }
                None => {
                    if !Self::try_to_trash_pack(scheduler) {
                        return Err(VectorizeError::Cycle);
                    }
                }
            }
        }
        delegate.post_schedule(scheduler);
        Ok(())
    }

    /// Finds the first worklisted node belonging to a pack that still has
    /// an unresolved dependency, and demotes every member of that pack back
    /// to scalar scheduling (clears `node.pack`/`pack_position` for all of
    /// them). Returns `false` if no such pack exists, signalling a true
    /// cycle.
    fn try_to_trash_pack(scheduler: &mut SchedulerState) -> bool {
        let worklist_snapshot: Vec<NodeId> = scheduler.worklist.clone();
        let mut stuck_pack = None;
        for id in worklist_snapshot {
            let pack_id = match scheduler.graph().node(id).pack {
                Some(p) => p,
                None => continue,
            };
            let members: Vec<NodeId> = scheduler
                .graph()
                .node_ids()
                .filter(|&n| scheduler.graph().node(n).pack == Some(pack_id))
                .collect();
            if members.iter().any(|&m| scheduler.graph().node(m).depends_count > 0) {
                stuck_pack = Some(pack_id);
                break;
            }
        }
        let Some(pack_id) = stuck_pack else {
            return false;
        };
        let members: Vec<NodeId> = scheduler
            .graph()
            .node_ids()
            .filter(|&id| scheduler.graph().node(id).pack == Some(pack_id))
            .collect();
        for id in members {
            let node = scheduler.graph_mut().node_mut(id);
            node.pack = None;
            node.pack_position = 0;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;
    use crate::ir::{Op, Opcode};

    struct PlainDelegate;

    impl Delegate for PlainDelegate {
        fn emit(&mut self, _node: NodeId, _scheduler: &mut SchedulerState) -> VectorizeResult<bool> {
            Ok(false)
        }
        fn pre_emit(&mut self, _node: NodeId, _scheduler: &mut SchedulerState) {}
        fn post_emit(&mut self, _node: NodeId, _scheduler: &mut SchedulerState) {}
        fn delay(&self, _node: NodeId, _scheduler: &SchedulerState) -> bool {
            false
        }
        fn post_schedule(&mut self, _scheduler: &mut SchedulerState) {}
    }

    fn leaf(index: u32) -> Node {
        Node::new(Op::new(Opcode::RawLoad, vec![], None), index)
    }

    #[test]
    fn walk_and_emit_produces_topological_order() {
        let mut graph = DependencyGraph::new();
        let a = graph.push(leaf(0));
        let b = graph.push(leaf(1));
        let c = graph.push(leaf(2));
        graph.add_edge(a, c);
        graph.add_edge(b, c);

        let mut scheduler = SchedulerState::new(graph);
        let mut delegate = PlainDelegate;
        Scheduler::walk_and_emit(&mut scheduler, &mut delegate).unwrap();

        assert_eq!(scheduler.oplist.len(), 3);
        for id in [a, b, c] {
            assert!(scheduler.graph().node(id).emitted);
        }
    }
}
