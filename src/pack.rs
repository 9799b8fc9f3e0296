//! Packs: ordered groups of isomorphic, independent scalar nodes earmarked
//! to become a single vector operation, plus the accumulating-pack variant
//! used for reductions.

use crate::entities::{NodeId, PackId};
use crate::graph::DependencyGraph;
use crate::ir::{Opcode, ReduceOp};

/// An ordered list of ≥2 nodes whose scalar operations are isomorphic (same
/// opcode, compatible descriptors) and mutually independent.
///
/// Invariant, enforced by the combiner that builds packs (external to this
/// crate) and checked where this crate relies on it: every node belongs to
/// at most one pack.
#[derive(Debug, Clone)]
pub struct Pack {
    nodes: Vec<NodeId>,
}

impl Pack {
    /// Builds a pack from an already-ordered, already-validated node list.
    pub fn new(nodes: Vec<NodeId>) -> Self {
        debug_assert!(nodes.len() >= 2, "a pack must have at least two members");
        Pack { nodes }
    }

    /// Pack cardinality.
    pub fn numops(&self) -> usize {
        self.nodes.len()
    }

    /// The first (lowest-index) member.
    pub fn leftmost(&self) -> NodeId {
        self.nodes[0]
    }

    /// The last member.
    pub fn rightmost(&self) -> NodeId {
        self.nodes[self.nodes.len() - 1]
    }

    /// All members, in pack order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// The opcode shared by every member (packs are only ever built from
    /// isomorphic ops).
    pub fn opnum(&self, graph: &DependencyGraph) -> Opcode {
        graph.node(self.leftmost()).op.opcode
    }

    /// True if the pack exactly fills or overflows a vector register of
    /// `vec_reg_size` bytes (`pack_load(..) >= 0`).
    pub fn is_full(&self, graph: &DependencyGraph, vec_reg_size: u32) -> bool {
        self.pack_load(graph, vec_reg_size) >= 0
    }

    /// Bytes-over-full: negative means the pack leaves room in the vector
    /// register, zero means an exact fit, positive means overflow that must
    /// be split. Dispatches on the pack's opcode class per the design's
    /// `pack_load` semantics table.
    pub fn pack_load(&self, graph: &DependencyGraph, vec_reg_size: u32) -> i64 {
        use crate::ir::OpKind;
        let leftmost = graph.node(self.leftmost());
        let numops = self.numops() as i64;
        let vec_reg_size = i64::from(vec_reg_size);
        match leftmost.op.opcode.kind() {
            OpKind::Arith | OpKind::Compare => {
                let bytesize = i64::from(
                    graph
                        .vecinfo(self.leftmost())
                        .expect("leftmost node must carry vecinfo")
                        .bytesize,
                );
                bytesize * numops - vec_reg_size
            }
            OpKind::Typecast => {
                // Narrowing vs widening is resolved by the caller via
                // `pack_load_typecast`; plain arith-style math is a safe
                // default for same-size casts (none exist in this opcode
                // set, but keeps the function total).
                let bytesize = i64::from(
                    graph
                        .vecinfo(self.leftmost())
                        .expect("leftmost node must carry vecinfo")
                        .bytesize,
                );
                bytesize * numops - vec_reg_size
            }
            OpKind::Store => {
                let descr = leftmost
                    .op
                    .descr
                    .as_ref()
                    .and_then(|d| d.as_array())
                    .expect("store pack must carry an array descriptor");
                i64::from(descr.item_size) * numops - vec_reg_size
            }
            OpKind::Guard => {
                let arg0 = leftmost.op.getarg(0);
                let bytesize = i64::from(
                    graph
                        .vecinfo(arg0)
                        .expect("guard argument must carry vecinfo")
                        .bytesize,
                );
                bytesize * numops - vec_reg_size
            }
            _ => numops - vec_reg_size,
        }
    }

    /// True iff `self`'s last node is `other`'s first node: the condition an
    /// external combiner uses to chain two packs into a longer one.
    pub fn rightmost_match_leftmost(&self, other: &Pack) -> bool {
        self.rightmost() == other.leftmost()
    }

    /// Splits `self` against `vec_reg_size`, pushing any overflow remainder
    /// onto `packlist` as additional packs, honoring `filling_opcount` (the
    /// number of members that exactly fill one vector register). A leftover
    /// remainder smaller than `filling_opcount` is dropped (its members
    /// revert to scalar execution) unless `allow_partial` is set, which a
    /// narrowing typecast pack may set to permit a non-full final pack.
    pub fn split(mut self, packlist: &mut Vec<Pack>, filling_opcount: usize, allow_partial: bool) {
        loop {
            if self.nodes.len() <= filling_opcount {
                if self.nodes.len() == filling_opcount || allow_partial {
                    packlist.push(self);
                }
                return;
            }
            let remainder = self.nodes.split_off(filling_opcount);
            packlist.push(Pack {
                nodes: self.nodes.clone(),
            });
            self.nodes = remainder;
        }
    }
}

/// A pack whose operations form a reduction chain (`FLOAT_ADD`, `INT_ADD`,
/// `FLOAT_MUL`): the value at argument index `position` across all members
/// is the carry threaded from one loop iteration to the next.
#[derive(Debug, Clone)]
pub struct AccumPack {
    /// The underlying isomorphic node group.
    pub pack: Pack,
    /// Which reduction this carry-chain performs.
    pub operator: ReduceOp,
    /// Argument index carrying the accumulator.
    pub position: usize,
}

impl AccumPack {
    /// Builds an accumulating pack.
    pub fn new(pack: Pack, operator: ReduceOp, position: usize) -> Self {
        AccumPack {
            pack,
            operator,
            position,
        }
    }

    /// All accumulator-position arguments across the pack's members, in
    /// pack order.
    pub fn getseeds(&self, graph: &DependencyGraph) -> Vec<NodeId> {
        self.pack
            .nodes()
            .iter()
            .map(|&n| graph.node(n).op.getarg(self.position))
            .collect()
    }

    /// The accumulator-position argument of the leftmost member.
    pub fn getleftmostseed(&self, graph: &DependencyGraph) -> NodeId {
        graph.node(self.pack.leftmost()).op.getarg(self.position)
    }

    /// Identity element for this reduction's operator.
    pub fn reduce_init(&self) -> f64 {
        self.operator.identity()
    }

    /// True iff `self` and `other` could chain: same `rightmost_match_leftmost`
    /// condition as a plain pack, plus matching accumulator position.
    pub fn rightmost_match_leftmost(&self, other: &AccumPack) -> bool {
        self.pack.rightmost_match_leftmost(&other.pack) && self.position == other.position
    }
}

/// The set of candidate packs handed to the scheduler by the (external)
/// combiner, keyed by [`PackId`] so nodes can reference their pack cheaply.
#[derive(Debug, Clone, Default)]
pub struct PackSet {
    packs: cranelift_entity::PrimaryMap<PackId, Pack>,
    accum_packs: std::collections::HashMap<PackId, AccumPack>,
}

impl PackSet {
    /// Builds an empty pack set.
    pub fn new() -> Self {
        PackSet::default()
    }

    /// Registers a plain pack, returning its id.
    pub fn insert(&mut self, pack: Pack) -> PackId {
        self.packs.push(pack)
    }

    /// Registers an accumulating pack, returning its id. The underlying
    /// [`Pack`] is also reachable via [`PackSet::get`].
    pub fn insert_accum(&mut self, accum: AccumPack) -> PackId {
        let id = self.packs.push(accum.pack.clone());
        self.accum_packs.insert(id, accum);
        id
    }

    /// The plain pack for `id`.
    pub fn get(&self, id: PackId) -> &Pack {
        &self.packs[id]
    }

    /// The accumulating-pack metadata for `id`, if it is one.
    pub fn get_accum(&self, id: PackId) -> Option<&AccumPack> {
        self.accum_packs.get(&id)
    }

    /// Iterates over all pack ids.
    pub fn ids(&self) -> impl Iterator<Item = PackId> + '_ {
        self.packs.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::NodeId;
    use cranelift_entity::EntityRef;

    fn ids(n: usize) -> Vec<NodeId> {
        (0..n).map(NodeId::new).collect()
    }

    #[test]
    fn split_full_pack_needs_no_remainder() {
        let pack = Pack::new(ids(4));
        let mut packlist = Vec::new();
        pack.split(&mut packlist, 4, false);
        assert_eq!(packlist.len(), 1);
        assert_eq!(packlist[0].numops(), 4);
    }

    #[test]
    fn split_discards_small_remainder() {
        let pack = Pack::new(ids(6));
        let mut packlist = Vec::new();
        pack.split(&mut packlist, 4, false);
        assert_eq!(packlist.len(), 1);
        assert_eq!(packlist[0].numops(), 4);
    }

    #[test]
    fn split_keeps_partial_remainder_when_allowed() {
        let pack = Pack::new(ids(6));
        let mut packlist = Vec::new();
        pack.split(&mut packlist, 4, true);
        assert_eq!(packlist.len(), 2);
        assert_eq!(packlist[1].numops(), 2);
    }

    #[test]
    fn rightmost_match_leftmost_chains_adjacent_packs() {
        let a = Pack::new(ids(2));
        let b = Pack::new(vec![NodeId::new(1), NodeId::new(2)]);
        assert!(a.rightmost_match_leftmost(&b));
    }
}
