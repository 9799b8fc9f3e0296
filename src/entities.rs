//! Opaque entity references used throughout the vectorizer core.
//!
//! Every graph node, pack, vector op and heap constant is referred to by a
//! small `u32`-wrapping handle rather than by pointer or index-into-a-Vec
//! directly, so that arenas can be `cranelift_entity::PrimaryMap`s and moved,
//! resized or snapshotted without invalidating existing references.

use cranelift_entity::entity_impl;

/// A node in the [`DependencyGraph`](crate::graph::DependencyGraph).
///
/// Each `NodeId` wraps one scalar operation from the trace plus its
/// scheduling bookkeeping (see [`crate::graph::Node`]).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);
entity_impl!(NodeId, "node");

/// An isomorphic group of scalar nodes earmarked to become one vector op.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackId(u32);
entity_impl!(PackId, "pack");

/// A vector operation emitted by [`crate::vecstate::VecScheduleState`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VecOpId(u32);
entity_impl!(VecOpId, "vecop");

/// An entry in the heap constant pool (sign masks, expand masks, ...).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstId(u32);
entity_impl!(ConstId, "const");

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;

    #[test]
    fn entity_roundtrips_index() {
        let n = NodeId::new(12);
        assert_eq!(n.index(), 12);
        assert_eq!(format!("{}", n), "node12");
    }

    #[test]
    fn distinct_entity_kinds_do_not_collide() {
        let node = NodeId::new(0);
        let pack = PackId::new(0);
        assert_eq!(node.index(), pack.index());
        // Different types entirely, so this is only a same-index sanity
        // check, not an equality check across kinds.
    }
}
