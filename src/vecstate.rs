//! `VecScheduleState`: the vector-aware scheduling delegate that, on dequeue
//! of a pack member, turns the whole pack into one vector operation instead
//! of emitting it scalar, and the pack transformer logic (`turn_into_vector`
//! and its argument-preparation helpers) that does the actual rewrite.

use crate::costmodel::CostModel;
use crate::entities::NodeId;
use crate::graph::Node;
use crate::ir::{AccumInfo, DataType, Descriptor, GuardDescr, Op, Opcode, ValueId, VecInfo};
use crate::pack::{Pack, PackId, PackSet};
use crate::restrict::{restriction_for, OpRestrict};
use crate::result::{VectorizeError, VectorizeResult};
use crate::scheduler::{Delegate, SchedulerState};
use crate::settings::Flags;
use log::debug;
use std::collections::HashMap;

/// Where a scalar value lives after vectorization: lane `slot` of the
/// vector op with result value `vector`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorSlot {
    /// Lane index within `vector`.
    pub slot: u8,
    /// The vector-valued result this scalar value was folded into.
    pub vector: ValueId,
}

/// Scheduling state specialized for vectorization: extends the base
/// [`SchedulerState`] bookkeeping with the scalar→(slot, vector) map, the
/// expansion memo table, the accumulator map, and the owned cost model.
pub struct VecScheduleState {
    pack_set: PackSet,
    /// Maps a scalar value folded into a vector op to its lane.
    pub box_to_vbox: HashMap<ValueId, VectorSlot>,
    /// Memoizes broadcasts so the same constant/invariant is expanded once.
    expanded_map: HashMap<Vec<ValueId>, ValueId>,
    /// Maps a reduction's scalar seed to the [`PackId`] of its
    /// [`crate::pack::AccumPack`].
    pub accumulation: HashMap<ValueId, PackId>,
    /// Owned cost model, mutated throughout transformation.
    pub costmodel: CostModel,
    flags: Flags,
}

impl VecScheduleState {
    /// Builds vector scheduling state from a pre-built pack set.
    pub fn new(pack_set: PackSet, flags: Flags) -> Self {
        let mut accumulation = HashMap::new();
        for id in pack_set.ids() {
            if let Some(accum) = pack_set.get_accum(id) {
                // Seeds are recorded lazily once the graph is available
                // (getseeds needs it); record_accum_seeds does that once
                // scheduling starts.
                let _ = accum;
                let _ = &mut accumulation;
            }
        }
        VecScheduleState {
            pack_set,
            box_to_vbox: HashMap::new(),
            expanded_map: HashMap::new(),
            accumulation,
            costmodel: CostModel::new(flags),
            flags,
        }
    }

    /// Seeds `self.accumulation` from the pack set; must run once the
    /// dependency graph is in hand (the seeds are argument reads).
    pub fn record_accum_seeds(&mut self, scheduler: &SchedulerState) {
        for id in self.pack_set.ids() {
            if let Some(accum) = self.pack_set.get_accum(id) {
                let leftmost_seed = accum.getleftmostseed(scheduler.graph());
                self.accumulation.insert(leftmost_seed, id);
            }
        }
    }

    fn pack_of(&self, scheduler: &SchedulerState, node: NodeId) -> Option<PackId> {
        scheduler.graph().node(node).pack
    }

    fn push_vecop(
        &mut self,
        scheduler: &mut SchedulerState,
        op: Op,
        invariant: bool,
        vinfo: Option<VecInfo>,
    ) -> ValueId {
        let index = scheduler.graph().len() as u32;
        let mut node = Node::new(op, index);
        node.emitted = true;
        let id = scheduler.graph_mut().push(node);
        scheduler.graph_mut().node_mut(id).op.result = Some(id);
        if let Some(vi) = vinfo {
            scheduler.graph_mut().set_vecinfo(id, vi);
        }
        let final_op = scheduler.graph().node(id).op.clone();
        if invariant {
            scheduler.invariant_oplist.push(final_op);
        } else {
            scheduler.oplist.push(final_op);
        }
        id
    }

    /// Records that `scalar` now lives at `slot` of `vector`.
    pub fn setvector_of_box(&mut self, scalar: ValueId, slot: u8, vector: ValueId) {
        self.box_to_vbox.insert(scalar, VectorSlot { slot, vector });
    }

    /// Extracts `count` lanes of `src` starting at `pos` into a new vector
    /// (or, when `count == 1`, scalar) value.
    fn unpack_from_vector(
        &mut self,
        scheduler: &mut SchedulerState,
        src: ValueId,
        pos: u8,
        count: u8,
    ) -> ValueId {
        self.costmodel.record_vector_unpack();
        let src_info = scheduler
            .graph()
            .vecinfo(src)
            .expect("unpack source must carry vecinfo");
        let opcode = if src_info.datatype == DataType::Float {
            Opcode::VecUnpackF
        } else {
            Opcode::VecUnpackI
        };
        let result_info = if count == 1 {
            VecInfo::scalar(src_info.datatype, src_info.bytesize, src_info.signed)
        } else {
            src_info.widened(count)
        };
        let op = Op::new(opcode, vec![src], None).with_imm([i32::from(pos), i32::from(count)]);
        self.push_vecop(scheduler, op, false, Some(result_info))
    }

    /// Inserts one lane of `value` at slot `dest_slot` of `dest`, returning
    /// the new `VEC_PACK` result.
    fn pack_into_vector(
        &mut self,
        scheduler: &mut SchedulerState,
        dest: ValueId,
        dest_slot: u8,
        value: ValueId,
    ) -> ValueId {
        self.costmodel.record_vector_pack();
        let dest_info = scheduler
            .graph()
            .vecinfo(dest)
            .expect("pack destination must carry vecinfo");
        let opcode = if dest_info.datatype == DataType::Float {
            Opcode::VecPackF
        } else {
            Opcode::VecPackI
        };
        let op =
            Op::new(opcode, vec![dest, value], None).with_imm([i32::from(dest_slot), 0]);
        self.push_vecop(scheduler, op, false, Some(dest_info))
    }

    /// Broadcasts (or per-lane-packs) the scalar argument at `arg_index`
    /// across `pack`'s members into one vector value.
    ///
    /// If every member reads the same scalar, a single `VEC_EXPAND` is
    /// emitted (memoized in `expanded_map`); an all-constant or
    /// all-loop-invariant broadcast is hoisted into the invariant prefix.
    /// Otherwise a `VEC` (materialize-empty) plus one `VEC_PACK` per member
    /// assembles the per-lane values.
    fn expand(
        &mut self,
        scheduler: &mut SchedulerState,
        pack: &Pack,
        arg_index: usize,
    ) -> ValueId {
        let args: Vec<ValueId> = pack
            .nodes()
            .iter()
            .map(|&n| scheduler.graph().node(n).op.getarg(arg_index))
            .collect();
        if let Some(&cached) = self.expanded_map.get(&args) {
            return cached;
        }
        let first = args[0];
        let all_same = args.iter().all(|&a| a == first);
        let info = scheduler
            .graph()
            .vecinfo(first)
            .expect("expanded argument must carry vecinfo");
        let count = pack.numops() as u8;
        let vinfo = info.widened(count);

        let vecop_id = if all_same {
            let opcode = if info.datatype == DataType::Float {
                Opcode::VecExpandF
            } else {
                Opcode::VecExpandI
            };
            let op = Op::new(opcode, vec![first], None);
            // A single shared scalar argument is, by construction, either a
            // constant or a value defined outside the pack's loop body, so
            // the broadcast is loop-invariant and can be hoisted.
            self.push_vecop(scheduler, op, true, Some(vinfo))
        } else {
            let empty = Op::new(Opcode::VecEmpty, Vec::<ValueId>::new(), None);
            let mut vec_id = self.push_vecop(scheduler, empty, false, Some(vinfo));
            for (slot, &scalar) in args.iter().enumerate() {
                vec_id = self.pack_into_vector(scheduler, vec_id, slot as u8, scalar);
            }
            vec_id
        };
        self.expanded_map.insert(args, vecop_id);
        vecop_id
    }

    /// Assembles the pack's per-lane argument at `arg_index` from multiple
    /// distinct source vector ops into a single vector value, unpacking
    /// each lane first if needed.
    fn gather(
        &mut self,
        scheduler: &mut SchedulerState,
        pack: &Pack,
        arg_index: usize,
    ) -> ValueId {
        let scalars: Vec<ValueId> = pack
            .nodes()
            .iter()
            .map(|&n| scheduler.graph().node(n).op.getarg(arg_index))
            .collect();
        let first_info = scheduler
            .graph()
            .vecinfo(scalars[0])
            .expect("gathered argument must carry vecinfo");
        let count = pack.numops() as u8;
        let vinfo = first_info.widened(count);
        let empty = Op::new(Opcode::VecEmpty, Vec::<ValueId>::new(), None);
        let mut vec_id = self.push_vecop(scheduler, empty, false, Some(vinfo));
        for &scalar in &scalars {
            let source = if let Some(slot) = self.box_to_vbox.get(&scalar).copied() {
                self.unpack_from_vector(scheduler, slot.vector, slot.slot, 1)
            } else {
                scalar
            };
            vec_id = self.pack_into_vector(scheduler, vec_id, 0, source);
        }
        vec_id
    }

    /// Fixes up a value that lives at lane `pos` of a vector but is needed
    /// at lane 0: a no-op when `pos == 0`, otherwise a `VEC_UNPACK`.
    fn position_values(
        &mut self,
        scheduler: &mut SchedulerState,
        src: ValueId,
        pos: u8,
        count: u8,
    ) -> ValueId {
        if pos == 0 {
            src
        } else {
            self.unpack_from_vector(scheduler, src, pos, count)
        }
    }

    /// Narrows or widens `value`'s element size via `VEC_INT_SIGNEXT` to
    /// `target_bytesize`. Rejects (soft error) sign-extends whose source or
    /// target byte-size is below 4, per the design's safety filter.
    fn crop_vector(
        &mut self,
        scheduler: &mut SchedulerState,
        value: ValueId,
        target_bytesize: u8,
    ) -> VectorizeResult<ValueId> {
        let info = scheduler
            .graph()
            .vecinfo(value)
            .expect("cropped value must carry vecinfo");
        if info.bytesize == target_bytesize {
            return Ok(value);
        }
        if info.bytesize < 4 || target_bytesize < 4 {
            return Err(VectorizeError::NotAProfitableLoop {
                reason: format!(
                    "refusing sign-extend below 4 bytes ({} -> {})",
                    info.bytesize, target_bytesize
                ),
            });
        }
        self.costmodel.record_cast_int();
        let new_count = (u32::from(info.bytesize) * u32::from(info.count)
            / u32::from(target_bytesize)) as u8;
        let new_info = VecInfo::vector(info.datatype, target_bytesize, new_count, info.signed);
        let op = Op::new(Opcode::VecIntSignext, vec![value], None)
            .with_imm([i32::from(target_bytesize)]);
        Ok(self.push_vecop(scheduler, op, false, Some(new_info)))
    }

    /// Walks every argument slot of the pack's leftmost op, substituting
    /// each with the vector (or corrected) value the restriction requires.
    /// Idempotent on already-vector arguments that already satisfy the
    /// restriction.
    fn prepare_arguments(
        &mut self,
        scheduler: &mut SchedulerState,
        pack: &Pack,
        restrict: &OpRestrict,
    ) -> VectorizeResult<Vec<ValueId>> {
        let leftmost = pack.leftmost();
        let numargs = scheduler.graph().node(leftmost).op.numargs();
        let mut out = Vec::with_capacity(numargs);
        for i in 0..numargs {
            let original = scheduler.graph().node(leftmost).op.getarg(i);

            if restrict.skip_argument(i) {
                // Address/index machinery (a load/store's base pointer):
                // never carries a vecinfo and must not be walked by
                // expand/gather.
                out.push(original);
                continue;
            }

            let info = scheduler.graph().vecinfo(original);

            let resolved = if info.map(|v| !v.is_scalar()).unwrap_or(false) {
                // Already a vector value: keep as-is (idempotence case).
                original
            } else if let Some(slot) = self.box_to_vbox.get(&original).copied() {
                let same_for_all = pack.nodes().iter().all(|&n| {
                    self.box_to_vbox
                        .get(&scheduler.graph().node(n).op.getarg(i))
                        .map(|s| s.vector == slot.vector)
                        .unwrap_or(false)
                });
                let value = if !same_for_all {
                    self.gather(scheduler, pack, i)
                } else if restrict.must_crop_vector(i) {
                    self.crop_vector(scheduler, slot.vector, 4)?
                } else {
                    self.position_values(scheduler, slot.vector, slot.slot, pack.numops() as u8)
                };
                value
            } else {
                self.expand(scheduler, pack, i)
            };
            out.push(resolved);
        }
        Ok(out)
    }

    /// For a vectorized guard, substitutes every fail-argument that now
    /// lives in a vector with a single-lane `VEC_UNPACK`, preserving
    /// deoptimization state.
    fn prepare_fail_arguments(
        &mut self,
        scheduler: &mut SchedulerState,
        leftmost: NodeId,
        vec_id: ValueId,
    ) -> Vec<ValueId> {
        let failargs = scheduler
            .graph()
            .node(leftmost)
            .op
            .failargs
            .clone()
            .unwrap_or_default();
        failargs
            .into_iter()
            .map(|fa| {
                if let Some(slot) = self.box_to_vbox.get(&fa).copied() {
                    self.unpack_from_vector(scheduler, slot.vector, slot.slot, 1)
                } else if fa == leftmost {
                    vec_id
                } else {
                    fa
                }
            })
            .collect()
    }

    /// Rejects packs the hardware cannot vectorize:
    /// `INT_MUL` at 1 or 8 bytes has no SSE primitive.
    fn check_if_pack_supported(&self, scheduler: &SchedulerState, pack: &Pack) -> VectorizeResult<()> {
        let leftmost = pack.leftmost();
        let opcode = scheduler.graph().node(leftmost).op.opcode;
        if opcode.is_int_mul() {
            let bytesize = scheduler
                .graph()
                .vecinfo(leftmost)
                .map(|v| v.bytesize)
                .unwrap_or(4);
            if bytesize == 8 || bytesize == 1 {
                return Err(VectorizeError::NotAProfitableLoop {
                    reason: format!(
                        "int_mul with {}-byte elements has no SSE primitive",
                        bytesize
                    ),
                });
            }
        }
        Ok(())
    }

    /// The pack transformer's main entry point: rewrites `pack_id`'s
    /// members into a single vector operation.
    pub fn turn_into_vector(
        &mut self,
        scheduler: &mut SchedulerState,
        pack_id: PackId,
    ) -> VectorizeResult<()> {
        let pack = self.pack_set.get(pack_id).clone();
        let leftmost = pack.leftmost();
        let scalar_opcode = scheduler.graph().node(leftmost).op.opcode;

        self.check_if_pack_supported(scheduler, &pack)?;
        self.costmodel.record_pack_savings(pack.numops());

        let vec_opcode = scalar_opcode
            .vector_companion()
            .expect("pack opcode must have a vector companion");
        let restrict = restriction_for(vec_opcode);
        let original_args: Vec<ValueId> =
            scheduler.graph().node(leftmost).op.args.to_vec();
        restrict.check_operation(scheduler.graph(), &original_args)?;

        let args = self.prepare_arguments(scheduler, &pack, &restrict)?;

        let count = pack.numops() as u8;
        let leftmost_result = scheduler.graph().node(leftmost).op.result;
        let result_vinfo = leftmost_result.and_then(|r| scheduler.graph().vecinfo(r)).map(|vi| vi.widened(count));
        let descr = scheduler.graph().node(leftmost).op.descr.clone();
        let is_guard = scheduler.graph().node(leftmost).op.is_guard();

        let mut vecop = Op::new(vec_opcode, args, None);
        vecop.descr = descr;
        let vec_id = self.push_vecop(scheduler, vecop, false, result_vinfo);

        if leftmost_result.is_some() {
            for (i, &member) in pack.nodes().iter().enumerate() {
                if let Some(member_result) = scheduler.graph().node(member).op.result {
                    self.setvector_of_box(member_result, i as u8, vec_id);
                    if self.accumulation.contains_key(&member_result) {
                        scheduler.renamer.insert(member_result, vec_id);
                    }
                }
            }
        }

        if is_guard {
            let new_failargs = self.prepare_fail_arguments(scheduler, leftmost, vec_id);
            debug_assert_eq!(
                new_failargs.len(),
                scheduler
                    .graph()
                    .node(leftmost)
                    .op
                    .failargs
                    .as_ref()
                    .map(Vec::len)
                    .unwrap_or(0)
            );
            let node = scheduler.graph_mut().node_mut(vec_id);
            node.op.failargs = Some(new_failargs);
        }

        debug!(
            "vectorized {} member ops of opcode {:?} into {:?} (id {})",
            count, scalar_opcode, vec_opcode, vec_id
        );
        Ok(())
    }
}

impl Delegate for VecScheduleState {
    fn emit(&mut self, node: NodeId, scheduler: &mut SchedulerState) -> VectorizeResult<bool> {
        let pack_id = match self.pack_of(scheduler, node) {
            Some(p) => p,
            None => return Ok(false),
        };
        let pack = self.pack_set.get(pack_id).clone();
        if pack.numops() <= 1 {
            return Ok(false);
        }
        // Only act on the dequeue of the pack's first still-unemitted
        // member; every member is marked emitted together below, so later
        // dequeues of the same pack's other members will see `emitted` and
        // be skipped by the scheduler before `emit` is even called again.
        for &member in pack.nodes() {
            self.pre_emit(member, scheduler);
            scheduler.mark_emitted(member);
        }
        self.turn_into_vector(scheduler, pack_id)?;
        Ok(true)
    }

    /// For a guard, attaches an [`AccumInfo`] per fail-argument that reads a
    /// live reduction seed, recording which reduction the guard's exit must
    /// finish reducing and at which fail-argument slot. The fail-argument
    /// itself is substituted with the seed's vectorized identity by
    /// `mark_emitted`'s renamer pass, once this runs.
    fn pre_emit(&mut self, node: NodeId, scheduler: &mut SchedulerState) {
        if !scheduler.graph().node(node).op.is_guard() {
            return;
        }
        let failargs = scheduler
            .graph()
            .node(node)
            .op
            .failargs
            .clone()
            .unwrap_or_default();
        let mut accum_infos = Vec::new();
        for (i, &fa) in failargs.iter().enumerate() {
            if let Some(&pack_id) = self.accumulation.get(&fa) {
                let operator = self
                    .pack_set
                    .get_accum(pack_id)
                    .expect("accumulation map must reference an AccumPack")
                    .operator;
                accum_infos.push(AccumInfo {
                    failarg_index: i,
                    original_scalar: fa,
                    operator,
                });
            }
        }
        if accum_infos.is_empty() {
            return;
        }
        let op = &mut scheduler.graph_mut().node_mut(node).op;
        let descr = op
            .descr
            .get_or_insert_with(|| Descriptor::Guard(GuardDescr::default()));
        if let Some(guard) = descr.as_guard_mut() {
            guard.rd_vector_info.extend(accum_infos);
        }
    }

    fn post_emit(&mut self, _node: NodeId, _scheduler: &mut SchedulerState) {}

    fn delay(&self, node: NodeId, scheduler: &SchedulerState) -> bool {
        match self.pack_of(scheduler, node) {
            None => false,
            Some(pack_id) => {
                let is_accum = self.pack_set.get_accum(pack_id).is_some();
                let pack = self.pack_set.get(pack_id);
                if is_accum {
                    pack.nodes().iter().any(|&m| {
                        !(self.pack_of(scheduler, m) == Some(pack_id)
                            || scheduler.graph().node(m).emitted)
                    })
                } else {
                    pack.nodes()
                        .iter()
                        .any(|&m| scheduler.graph().node(m).depends_count != 0)
                }
            }
        }
    }

    fn post_schedule(&mut self, scheduler: &mut SchedulerState) {
        if let Some(jump) = scheduler.graph().shape.jump {
            let mut extra = self.box_to_vbox.values().map(|s| s.vector).collect::<Vec<_>>();
            extra.sort();
            extra.dedup();
            scheduler.invariant_vector_vars = extra;
            let _ = jump;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DependencyGraph;
    use crate::pack::Pack;

    fn scalar_binop_graph() -> (DependencyGraph, NodeId, NodeId, NodeId, NodeId) {
        let mut g = DependencyGraph::new();
        let a0 = g.push(Node::new(Op::new(Opcode::RawLoad, vec![], None), 0));
        g.set_vecinfo(a0, VecInfo::scalar(DataType::Float, 8, true));
        let a1 = g.push(Node::new(Op::new(Opcode::RawLoad, vec![], None), 1));
        g.set_vecinfo(a1, VecInfo::scalar(DataType::Float, 8, true));
        let mut add0 = Node::new(Op::new(Opcode::FloatAdd, vec![a0, a1], None), 2);
        add0.op.result = Some(NodeId::new(2));
        let add0_id = g.push(add0);
        g.set_vecinfo(add0_id, VecInfo::scalar(DataType::Float, 8, true));
        let mut add1 = Node::new(Op::new(Opcode::FloatAdd, vec![a0, a1], None), 3);
        add1.op.result = Some(NodeId::new(3));
        let add1_id = g.push(add1);
        g.set_vecinfo(add1_id, VecInfo::scalar(DataType::Float, 8, true));
        (g, a0, a1, add0_id, add1_id)
    }

    #[test]
    fn turn_into_vector_produces_one_op_with_full_vecinfo() {
        let (graph, _a0, _a1, add0, add1) = scalar_binop_graph();
        let mut scheduler = SchedulerState::new(graph);
        let mut pack_set = PackSet::new();
        let pack_id = pack_set.insert(Pack::new(vec![add0, add1]));
        let mut state = VecScheduleState::new(pack_set, Flags::default());

        let before_len = scheduler.oplist.len();
        state.turn_into_vector(&mut scheduler, pack_id).unwrap();
        assert_eq!(scheduler.oplist.len(), before_len + 1);
        let vec_id = scheduler.oplist.last().unwrap().result.unwrap();
        let vinfo = scheduler.graph().vecinfo(vec_id).unwrap();
        assert_eq!(vinfo.count, 2);
        assert_eq!(vinfo.total_bytes(), 16);
    }

    #[test]
    fn int_mul_at_8_bytes_is_rejected() {
        let mut g = DependencyGraph::new();
        let a = g.push(Node::new(Op::new(Opcode::RawLoad, vec![], None), 0));
        g.set_vecinfo(a, VecInfo::scalar(DataType::Int, 8, true));
        let mut m0 = Node::new(Op::new(Opcode::IntMul, vec![a, a], None), 1);
        m0.op.result = Some(NodeId::new(1));
        let m0_id = g.push(m0);
        g.set_vecinfo(m0_id, VecInfo::scalar(DataType::Int, 8, true));
        let mut m1 = Node::new(Op::new(Opcode::IntMul, vec![a, a], None), 2);
        m1.op.result = Some(NodeId::new(2));
        let m1_id = g.push(m1);
        g.set_vecinfo(m1_id, VecInfo::scalar(DataType::Int, 8, true));

        let mut scheduler = SchedulerState::new(g);
        let mut pack_set = PackSet::new();
        let pack_id = pack_set.insert(Pack::new(vec![m0_id, m1_id]));
        let mut state = VecScheduleState::new(pack_set, Flags::default());

        let result = state.turn_into_vector(&mut scheduler, pack_id);
        assert!(matches!(result, Err(VectorizeError::NotAProfitableLoop { .. })));
    }
}
