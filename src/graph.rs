//! The dependency graph consumed from the upstream optimizer: a flat arena
//! of [`Node`]s linked by explicit [`NodeId`] edges, never by reference —
//! this keeps the scheduler's worklist, the pack combiner's output, and the
//! vector transformer's rewrites all cheap `Copy` handles into one arena.

use crate::entities::{NodeId, PackId};
use crate::ir::{Op, ValueId, VecInfo};
use cranelift_entity::{PrimaryMap, SecondaryMap};
use smallvec::SmallVec;

/// One node in the dependency graph: an [`Op`] plus scheduling bookkeeping.
#[derive(Debug, Clone)]
pub struct Node {
    /// The wrapped operation.
    pub op: Op,
    /// Out-edges: nodes that read a value this node produces.
    pub provides: SmallVec<[NodeId; 4]>,
    /// In-degree: how many not-yet-emitted dependencies this node has.
    pub depends_count: u32,
    /// Scheduling priority (lower emits earlier, all else equal).
    pub priority: i32,
    /// Original position in the input trace; used as a tie-breaker and to
    /// recover a stable topological order.
    pub index: u32,
    /// Set once this node has been appended to the emitted oplist (or
    /// subsumed into a pack's vector op).
    pub emitted: bool,
    /// The pack this node belongs to, if any.
    pub pack: Option<PackId>,
    /// This node's position within its pack (0 = leftmost).
    pub pack_position: u32,
}

impl Node {
    /// Wraps a bare operation with default scheduling state.
    pub fn new(op: Op, index: u32) -> Self {
        Node {
            op,
            provides: SmallVec::new(),
            depends_count: 0,
            priority: 0,
            index,
            emitted: false,
            pack: None,
            pack_position: 0,
        }
    }

    /// True if this node belongs to a pack that has more than one member.
    pub fn in_pack(&self) -> bool {
        self.pack.is_some()
    }
}

/// Trace loop metadata threaded through scheduling unchanged: input
/// arguments, the loop label op, the loop-closing jump op.
#[derive(Debug, Clone, Default)]
pub struct LoopShape {
    /// SSA values live across the loop back-edge.
    pub inputargs: Vec<ValueId>,
    /// Index of the label node, if the graph includes one.
    pub label: Option<NodeId>,
    /// Index of the jump node, if the graph includes one.
    pub jump: Option<NodeId>,
}

/// The dependency graph plus the associated per-value vectorization info and
/// loop shape, exactly the input this crate's scheduler walks.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: PrimaryMap<NodeId, Node>,
    vecinfo: SecondaryMap<NodeId, Option<VecInfo>>,
    /// Loop input arguments, label and jump.
    pub shape: LoopShape,
}

impl DependencyGraph {
    /// Builds an empty graph.
    pub fn new() -> Self {
        DependencyGraph::default()
    }

    /// Appends a node, returning its id. The node's `provides` out-edges and
    /// in-degree are expected to already reflect the argument it reads
    /// (callers build the graph bottom-up and wire edges with
    /// [`DependencyGraph::add_edge`]).
    pub fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node)
    }

    /// Number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Reference to a node.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Mutable reference to a node.
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    /// Iterates over all node ids in arena order (== original trace order).
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys()
    }

    /// Records that `consumer` depends on the value produced by `producer`:
    /// adds `consumer` to `producer`'s out-edges and increments `consumer`'s
    /// in-degree.
    pub fn add_edge(&mut self, producer: NodeId, consumer: NodeId) {
        self.nodes[producer].provides.push(consumer);
        self.nodes[consumer].depends_count += 1;
    }

    /// Per-value vectorization info, if known.
    pub fn vecinfo(&self, value: ValueId) -> Option<VecInfo> {
        self.vecinfo[value]
    }

    /// Records per-value vectorization info, typically done once when the
    /// node producing `value` is constructed.
    pub fn set_vecinfo(&mut self, value: ValueId, info: VecInfo) {
        self.vecinfo[value] = Some(info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DataType, Opcode};

    fn leaf(index: u32) -> Node {
        Node::new(Op::new(Opcode::RawLoad, vec![], None), index)
    }

    #[test]
    fn add_edge_updates_provides_and_depends_count() {
        let mut g = DependencyGraph::new();
        let a = g.push(leaf(0));
        let b = g.push(leaf(1));
        g.add_edge(a, b);
        assert_eq!(g.node(a).provides.as_slice(), &[b]);
        assert_eq!(g.node(b).depends_count, 1);
    }

    #[test]
    fn vecinfo_defaults_to_none() {
        let mut g = DependencyGraph::new();
        let a = g.push(leaf(0));
        assert_eq!(g.vecinfo(a), None);
        g.set_vecinfo(a, VecInfo::scalar(DataType::Int, 4, true));
        assert!(g.vecinfo(a).is_some());
    }
}
