//! End-to-end round-trips through packing, scheduling, transforming and
//! x86-64 emission, exercising the scenarios a combiner upstream of this
//! crate is expected to drive it with.

use cranelift_entity::EntityRef;
use tracevec::emit::{Emitter, GuardSuccessCc};
use tracevec::entities::NodeId;
use tracevec::graph::{DependencyGraph, Node};
use tracevec::ir::{ArrayDescr, DataType, Descriptor, Op, Opcode, ReduceOp, VecInfo};
use tracevec::pack::{AccumPack, Pack, PackSet};
use tracevec::registers::XmmReg;
use tracevec::result::VectorizeError;
use tracevec::restrict::restriction_for;
use tracevec::scheduler::{Scheduler, SchedulerState};
use tracevec::settings::Flags;
use tracevec::vecstate::VecScheduleState;

fn leaf(index: u32) -> Node {
    Node::new(Op::new(Opcode::RawLoad, vec![], None), index)
}

fn array_descr(item_size: u8, base_offset: i32, floats: bool) -> Descriptor {
    Descriptor::Array(ArrayDescr {
        item_size,
        base_offset,
        is_array_of_pointers: false,
        is_array_of_structs: false,
        is_array_of_floats: floats,
        concrete_type: if floats { DataType::Float } else { DataType::Int },
    })
}

/// Scenario 1: aligned float64 load + add + store, 2 lanes. Builds the
/// already-vectorized oplist a transformer would have produced from
/// `f0 = raw_load(p,0,8); f1 = raw_load(q,0,8); f2 = fadd(f0,f1);
/// raw_store(r,0,f2,8)` run twice, and checks the emitter's byte output.
#[test]
fn float64_load_add_store_round_trip() {
    let mut g = DependencyGraph::new();
    let p = g.push(leaf(0));
    let q = g.push(leaf(1));
    let r = g.push(leaf(2));

    let mut load_p = Node::new(Op::new(Opcode::VecRawLoad, vec![p], None), 3);
    load_p.op.descr = Some(array_descr(8, 0, true));
    let load_p = g.push(load_p);
    g.node_mut(load_p).op.result = Some(load_p);
    g.set_vecinfo(load_p, VecInfo::vector(DataType::Float, 8, 2, true));

    let mut load_q = Node::new(Op::new(Opcode::VecRawLoad, vec![q], None), 4);
    load_q.op.descr = Some(array_descr(8, 0, true));
    let load_q = g.push(load_q);
    g.node_mut(load_q).op.result = Some(load_q);
    g.set_vecinfo(load_q, VecInfo::vector(DataType::Float, 8, 2, true));

    let add = g.push(Node::new(Op::new(Opcode::VecFloatAdd, vec![load_p, load_q], None), 5));
    g.node_mut(add).op.result = Some(add);
    g.set_vecinfo(add, VecInfo::vector(DataType::Float, 8, 2, true));

    let mut store = Node::new(Op::new(Opcode::VecRawStore, vec![r, add], None), 6);
    store.op.descr = Some(array_descr(8, 0, true));
    let store = g.push(store);

    let oplist = vec![
        g.node(load_p).op.clone(),
        g.node(load_q).op.clone(),
        g.node(add).op.clone(),
        g.node(store).op.clone(),
    ];

    let mut emitter = Emitter::new(Flags::default());
    let mut boundaries = vec![0usize];
    for op in &oplist {
        emitter.emit_op(&g, op).unwrap();
        boundaries.push(emitter.code.len());
    }
    let bytes = emitter.code.finish();

    // MOVUPD xmm, [mem]: 66 0F 10 ...
    assert_eq!(&bytes[boundaries[0]..boundaries[0] + 3], &[0x66, 0x0f, 0x10]);
    assert_eq!(&bytes[boundaries[1]..boundaries[1] + 3], &[0x66, 0x0f, 0x10]);
    // ADDPD xmm, xmm: 66 0F 58 /r (register form, exactly 4 bytes).
    assert_eq!(
        &bytes[boundaries[2]..boundaries[2] + 4],
        &[0x66, 0x0f, 0x58, 0xc0]
    );
    // MOVUPD [mem], xmm: 66 0F 11 ...
    assert_eq!(&bytes[boundaries[3]..boundaries[3] + 3], &[0x66, 0x0f, 0x11]);
}

/// Scenario 2: int32 multiply, 4 lanes -> PMULLD.
#[test]
fn int32_multiply_four_lanes_emits_pmulld() {
    let mut g = DependencyGraph::new();
    let a = g.push(leaf(0));
    g.set_vecinfo(a, VecInfo::scalar(DataType::Int, 4, true));
    let mut members = Vec::new();
    for i in 0..4u32 {
        let n = Node::new(Op::new(Opcode::IntMul, vec![a, a], None), i + 1);
        let id = g.push(n);
        g.node_mut(id).op.result = Some(id);
        g.set_vecinfo(id, VecInfo::scalar(DataType::Int, 4, true));
        members.push(id);
    }

    let mut pack_set = PackSet::new();
    let pack_id = pack_set.insert(Pack::new(members.clone()));
    let mut scheduler = SchedulerState::new(g);
    let mut state = VecScheduleState::new(pack_set, Flags::default());
    state.turn_into_vector(&mut scheduler, pack_id).unwrap();

    let vec_op = scheduler
        .oplist
        .iter()
        .find(|op| op.opcode == Opcode::VecIntMul)
        .expect("VEC_INT_MUL must be emitted");
    let vec_id = vec_op.result.unwrap();
    assert_eq!(scheduler.graph().vecinfo(vec_id).unwrap().count, 4);

    let mut emitter = Emitter::new(Flags::default());
    emitter.emit_op(scheduler.graph(), vec_op).unwrap();
    let bytes = emitter.code.finish();
    // PMULLD xmm, xmm: 66 0F 38 40 /r.
    assert_eq!(&bytes[..4], &[0x66, 0x0f, 0x38, 0x40]);
}

/// Scenario 3: forbidden int64 multiply — pack rejected, cost model records
/// no savings, members stay scalar once the scheduler falls back.
#[test]
fn int64_multiply_pack_is_rejected_and_falls_back_to_scalar() {
    let mut g = DependencyGraph::new();
    let a = g.push(leaf(0));
    g.set_vecinfo(a, VecInfo::scalar(DataType::Int, 8, true));
    let m0 = g.push(Node::new(Op::new(Opcode::IntMul, vec![a, a], None), 1));
    g.node_mut(m0).op.result = Some(m0);
    g.set_vecinfo(m0, VecInfo::scalar(DataType::Int, 8, true));
    let m1 = g.push(Node::new(Op::new(Opcode::IntMul, vec![a, a], None), 2));
    g.node_mut(m1).op.result = Some(m1);
    g.set_vecinfo(m1, VecInfo::scalar(DataType::Int, 8, true));

    let mut pack_set = PackSet::new();
    let pack_id = pack_set.insert(Pack::new(vec![m0, m1]));
    let mut scheduler = SchedulerState::new(g);
    let mut state = VecScheduleState::new(pack_set, Flags::default());

    let before_net = state.costmodel.net();
    let result = state.turn_into_vector(&mut scheduler, pack_id);
    assert!(matches!(result, Err(VectorizeError::NotAProfitableLoop { .. })));
    assert_eq!(state.costmodel.net(), before_net);
    assert!(scheduler.oplist.iter().all(|op| op.opcode != Opcode::VecIntMul));
}

/// Scenario 5: an argument living at lane 1 of an already-vectorized value
/// must be repositioned to lane 0 via `VEC_UNPACK` before a consumer can
/// use it.
#[test]
fn position_fixup_inserts_vec_unpack_for_non_leading_lane() {
    let mut g = DependencyGraph::new();
    let a0 = g.push(leaf(0));
    let a1 = g.push(leaf(1));
    g.set_vecinfo(a0, VecInfo::scalar(DataType::Float, 8, true));
    g.set_vecinfo(a1, VecInfo::scalar(DataType::Float, 8, true));

    let add0 = g.push(Node::new(Op::new(Opcode::FloatAdd, vec![a0, a1], None), 2));
    g.node_mut(add0).op.result = Some(add0);
    g.set_vecinfo(add0, VecInfo::scalar(DataType::Float, 8, true));

    let add1 = g.push(Node::new(Op::new(Opcode::FloatAdd, vec![a0, a1], None), 3));
    g.node_mut(add1).op.result = Some(add1);
    g.set_vecinfo(add1, VecInfo::scalar(DataType::Float, 8, true));

    let mul0 = g.push(Node::new(Op::new(Opcode::FloatMul, vec![add1, add1], None), 4));
    g.node_mut(mul0).op.result = Some(mul0);
    g.set_vecinfo(mul0, VecInfo::scalar(DataType::Float, 8, true));

    let mul1 = g.push(Node::new(Op::new(Opcode::FloatMul, vec![add1, add1], None), 5));
    g.node_mut(mul1).op.result = Some(mul1);
    g.set_vecinfo(mul1, VecInfo::scalar(DataType::Float, 8, true));

    let mut pack_set = PackSet::new();
    let add_pack = pack_set.insert(Pack::new(vec![add0, add1]));
    let mul_pack = pack_set.insert(Pack::new(vec![mul0, mul1]));
    let mut scheduler = SchedulerState::new(g);
    let mut state = VecScheduleState::new(pack_set, Flags::default());

    state.turn_into_vector(&mut scheduler, add_pack).unwrap();
    state.turn_into_vector(&mut scheduler, mul_pack).unwrap();

    let unpack = scheduler
        .oplist
        .iter()
        .find(|op| op.opcode == Opcode::VecUnpackF)
        .expect("a VEC_UNPACK must fix up lane 1 before the consumer pack");
    assert_eq!(&unpack.imm[..], &[1, 2]);

    let mul_vec = scheduler
        .oplist
        .iter()
        .rev()
        .find(|op| op.opcode == Opcode::VecFloatMul)
        .expect("VEC_FLOAT_MUL must be emitted");
    assert_eq!(mul_vec.numargs(), 2);
}

/// Scenario 6: a partial (non-register-filling) vector guard must blend its
/// unused tail lanes before `PTEST` so garbage bits can't flip the result.
#[test]
fn partial_vector_guard_true_blends_unused_slots_before_ptest() {
    let mut g = DependencyGraph::new();
    let a = g.push(leaf(0));
    g.set_vecinfo(a, VecInfo::vector(DataType::Int, 4, 2, true));
    let guard = Op::new(Opcode::VecGuardTrue, vec![a], None);

    let mut emitter = Emitter::new(Flags::default());
    emitter.genop_vec_guard(&g, &guard, true).unwrap();
    let bytes = emitter.code.finish();

    // PBLENDW xmm, xmm, ib: 66 0F 3A 0E /r ib.
    let pblendw = bytes
        .windows(4)
        .position(|w| w == [0x66, 0x0f, 0x3a, 0x0e])
        .expect("PBLENDW must blend the unused upper 64 bits");
    // PTEST xmm, xmm: 66 0F 38 17 /r, and must come after the blend.
    let ptest = bytes
        .windows(4)
        .rposition(|w| w == [0x66, 0x0f, 0x38, 0x17])
        .expect("PTEST must run the reduced guard condition");
    assert!(pblendw < ptest);
    assert_eq!(emitter.guard_success_cc, Some(GuardSuccessCc::Zero));
}

/// Boundary: `opcount_filling_vector_register` for a widening float-to-double
/// cast.
#[test]
fn opcount_filling_vector_register_for_widening_cast() {
    let mut g = DependencyGraph::new();
    let a = g.push(leaf(0));
    g.set_vecinfo(a, VecInfo::scalar(DataType::Float, 8, true));
    let restrict = restriction_for(Opcode::VecCastSinglefloatToFloat);
    assert_eq!(restrict.opcount_filling_vector_register(&g, a, 16), 2);
}

/// Boundary: splitting a 6-element int32 pack on a 16-byte vector register
/// keeps a 4-element pack and discards the 2-element remainder.
#[test]
fn six_element_int32_pack_splits_into_one_full_pack() {
    let nodes: Vec<NodeId> = (0..6usize).map(NodeId::new).collect();
    let pack = Pack::new(nodes);
    let filling = 16 / 4; // 16-byte register / 4-byte element
    let mut packlist = Vec::new();
    pack.split(&mut packlist, filling, false);
    assert_eq!(packlist.len(), 1);
    assert_eq!(packlist[0].numops(), 4);
}

/// Scenario 4: a float sum reduction over a 2-lane carry chain collapses to
/// its low lane via a single `HADDPD`.
#[test]
fn float_sum_reduction_emits_single_haddpd() {
    let mut emitter = Emitter::new(Flags::default());
    let acc = XmmReg::new(1);
    emitter.accum_reduce_sum_float(acc);
    let bytes = emitter.code.finish();
    // HADDPD xmm, xmm: 66 0F 7C /r, register form, destination == source.
    assert_eq!(
        &bytes[..],
        &[0x66, 0x0f, 0x7c, 0xc0 | (acc.encoding() & 7) | ((acc.encoding() & 7) << 3)]
    );
}

/// A 2-lane `VEC_RAW_LOAD` pack must turn into a vector op without
/// `prepare_arguments` ever walking the base-address argument (it carries no
/// `VecInfo`, so doing so would panic).
#[test]
fn load_pack_turns_into_vector_without_touching_base_address() {
    let mut g = DependencyGraph::new();
    let addr = g.push(leaf(0));

    let m0 = g.push(Node::new(Op::new(Opcode::RawLoad, vec![addr], None), 1));
    g.node_mut(m0).op.result = Some(m0);
    g.set_vecinfo(m0, VecInfo::scalar(DataType::Float, 8, true));
    let m1 = g.push(Node::new(Op::new(Opcode::RawLoad, vec![addr], None), 2));
    g.node_mut(m1).op.result = Some(m1);
    g.set_vecinfo(m1, VecInfo::scalar(DataType::Float, 8, true));

    let mut pack_set = PackSet::new();
    let pack_id = pack_set.insert(Pack::new(vec![m0, m1]));
    let mut scheduler = SchedulerState::new(g);
    let mut state = VecScheduleState::new(pack_set, Flags::default());

    state
        .turn_into_vector(&mut scheduler, pack_id)
        .expect("a load pack must vectorize without panicking");

    let vec_op = scheduler
        .oplist
        .iter()
        .find(|op| op.opcode == Opcode::VecRawLoad)
        .expect("VEC_RAW_LOAD must be emitted");
    assert_eq!(vec_op.args.as_slice(), &[addr]);
    let vec_id = vec_op.result.unwrap();
    assert_eq!(scheduler.graph().vecinfo(vec_id).unwrap().count, 2);
}

/// A 2-lane `VEC_RAW_STORE` pack must vectorize its stored value while
/// leaving the shared base address alone.
#[test]
fn store_pack_vectorizes_value_but_not_base_address() {
    let mut g = DependencyGraph::new();
    let addr = g.push(leaf(0));
    let v0 = g.push(leaf(1));
    g.set_vecinfo(v0, VecInfo::scalar(DataType::Float, 8, true));
    let v1 = g.push(leaf(2));
    g.set_vecinfo(v1, VecInfo::scalar(DataType::Float, 8, true));

    let m0 = g.push(Node::new(Op::new(Opcode::RawStore, vec![addr, v0], None), 3));
    let m1 = g.push(Node::new(Op::new(Opcode::RawStore, vec![addr, v1], None), 4));

    let mut pack_set = PackSet::new();
    let pack_id = pack_set.insert(Pack::new(vec![m0, m1]));
    let mut scheduler = SchedulerState::new(g);
    let mut state = VecScheduleState::new(pack_set, Flags::default());

    state
        .turn_into_vector(&mut scheduler, pack_id)
        .expect("a store pack must vectorize without panicking");

    let vec_op = scheduler
        .oplist
        .iter()
        .find(|op| op.opcode == Opcode::VecRawStore)
        .expect("VEC_RAW_STORE must be emitted");
    assert_eq!(vec_op.numargs(), 2);
    assert_eq!(vec_op.getarg(0), addr);
    assert_ne!(vec_op.getarg(1), v0);
    assert_ne!(vec_op.getarg(1), v1);
    let expanded = scheduler.graph().vecinfo(vec_op.getarg(1)).unwrap();
    assert_eq!(expanded.count, 2);
}

/// `mark_emitted` must rewrite an op's arguments/fail-arguments through the
/// scheduler's renamer before appending it, not just leave the renamer as a
/// write-only side channel.
#[test]
fn mark_emitted_rewrites_renamed_arguments() {
    let mut g = DependencyGraph::new();
    let old = g.push(leaf(0));
    let new = g.push(leaf(1));
    let consumer = g.push(Node::new(Op::new(Opcode::FloatNeg, vec![old], None), 2));
    g.node_mut(consumer).op.failargs = Some(vec![old]);

    let mut scheduler = SchedulerState::new(g);
    scheduler.renamer.insert(old, new);
    scheduler.mark_emitted(consumer);

    let op = &scheduler.graph().node(consumer).op;
    assert_eq!(op.getarg(0), new);
    assert_eq!(op.failargs.as_ref().unwrap()[0], new);
}

/// End-to-end: a guard whose fail-argument reads the rightmost member of a
/// float-sum accumulation pack must, once scheduled, carry an `AccumInfo` on
/// its `GuardDescr` and have that fail-argument renamed to the vectorized
/// result — exercising `pre_emit` and `mark_emitted`'s renamer together the
/// way `Scheduler::walk_and_emit` actually drives them.
#[test]
fn pre_emit_attaches_accum_info_and_renames_guard_failarg() {
    let mut g = DependencyGraph::new();
    let seed = g.push(leaf(0));
    g.set_vecinfo(seed, VecInfo::scalar(DataType::Float, 8, true));
    let x0 = g.push(leaf(1));
    g.set_vecinfo(x0, VecInfo::scalar(DataType::Float, 8, true));
    let x1 = g.push(leaf(2));
    g.set_vecinfo(x1, VecInfo::scalar(DataType::Float, 8, true));

    let m0 = g.push(Node::new(Op::new(Opcode::FloatAdd, vec![seed, x0], None), 3));
    g.node_mut(m0).op.result = Some(m0);
    g.set_vecinfo(m0, VecInfo::scalar(DataType::Float, 8, true));
    let m1 = g.push(Node::new(Op::new(Opcode::FloatAdd, vec![seed, x1], None), 4));
    g.node_mut(m1).op.result = Some(m1);
    g.set_vecinfo(m1, VecInfo::scalar(DataType::Float, 8, true));
    g.add_edge(seed, m0);
    g.add_edge(seed, m1);
    g.add_edge(x0, m0);
    g.add_edge(x1, m1);

    // The guard's exit needs the running scalar total as of the rightmost
    // pack member — the value `turn_into_vector` subsumes into the vector
    // and must therefore rename.
    let cond = g.push(leaf(5));
    let guard = g.push(Node::new(Op::new(Opcode::GuardTrue, vec![cond], None), 6));
    g.node_mut(guard).op.failargs = Some(vec![m1]);
    g.add_edge(cond, guard);
    g.add_edge(m0, guard);
    g.add_edge(m1, guard);

    let mut pack_set = PackSet::new();
    let pack_id = pack_set.insert_accum(AccumPack::new(Pack::new(vec![m0, m1]), ReduceOp::Add, 0));
    g.node_mut(m0).pack = Some(pack_id);
    g.node_mut(m1).pack = Some(pack_id);

    let mut scheduler = SchedulerState::new(g);
    let mut state = VecScheduleState::new(pack_set, Flags::default());
    state.accumulation.insert(m1, pack_id);

    Scheduler::walk_and_emit(&mut scheduler, &mut state).unwrap();

    let guard_op = &scheduler.graph().node(guard).op;
    let descr = guard_op
        .descr
        .as_ref()
        .and_then(Descriptor::as_guard)
        .expect("guard must have gained a GuardDescr from pre_emit");
    assert_eq!(descr.rd_vector_info.len(), 1);
    let info = &descr.rd_vector_info[0];
    assert_eq!(info.failarg_index, 0);
    assert_eq!(info.original_scalar, m1);
    assert_eq!(info.operator, ReduceOp::Add);

    let vec_id = scheduler
        .oplist
        .iter()
        .find(|op| op.opcode == Opcode::VecFloatAdd)
        .and_then(|op| op.result)
        .expect("VEC_FLOAT_ADD must be emitted");
    assert_eq!(guard_op.failargs.as_ref().unwrap()[0], vec_id);
}
