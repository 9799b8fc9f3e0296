//! Vector emitter: walks an already-vectorized `oplist` and produces SSE
//! machine code, driving [`crate::regalloc`] for locations and
//! [`crate::mcwriter`] for byte encoding.
//!
//! Each `genop_vec_*` here mirrors one row of the opcode→instruction
//! mapping: which concrete SSE mnemonic a vector opcode lowers to depends
//! on element byte-size and signedness, exactly like `vector_ext.py`'s
//! `VectorAssemblerMixin` dispatches by `op.getdescr()`/`arg.bytesize`.

use crate::constants::ConstantPool;
use crate::graph::DependencyGraph;
use crate::ir::{Op, Opcode};
use crate::mcwriter::{CodeSink, MachineCodeWriter, Prefix};
use crate::regalloc::{ArgLoc, RegAlloc, RegAllocState};
use crate::registers::{AddressLoc, GprReg, RegLoc, XmmReg};
use crate::result::{VectorizeError, VectorizeResult};
use crate::settings::Flags;

/// Condition code the guard's branch should test, set by [`Emitter::guard_vector`]
/// for the caller to encode the actual conditional jump against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardSuccessCc {
    /// Zero flag set (`JZ`).
    Zero,
    /// Zero flag clear (`JNZ`).
    NotZero,
}

/// Owns the machine code buffer, register allocator and constant pool for
/// one compiled loop body.
pub struct Emitter {
    /// The byte buffer instructions are appended to.
    pub code: MachineCodeWriter,
    /// Register assignments, threaded across every emitted op.
    pub regs: RegAllocState,
    /// Deduplicated heap constants (sign/abs masks, broadcast masks).
    pub constants: ConstantPool,
    flags: Flags,
    /// Set by the most recent [`Emitter::guard_vector`] call.
    pub guard_success_cc: Option<GuardSuccessCc>,
}

fn as_xmm(loc: RegLoc) -> XmmReg {
    match loc {
        RegLoc::Xmm(r) => r,
        RegLoc::Gpr(_) => panic!("expected an XMM location"),
    }
}

fn as_gpr(loc: RegLoc) -> GprReg {
    match loc {
        RegLoc::Gpr(r) => r,
        RegLoc::Xmm(_) => panic!("expected a GPR location"),
    }
}

fn arg_xmm(locs: &[ArgLoc], index: usize) -> XmmReg {
    match locs[index] {
        ArgLoc::Reg(r) => as_xmm(r),
        _ => panic!("expected a register argument"),
    }
}

fn arg_gpr(locs: &[ArgLoc], index: usize) -> GprReg {
    match locs[index] {
        ArgLoc::Reg(r) => as_gpr(r),
        _ => panic!("expected a register argument"),
    }
}

/// Packed-integer opcode byte for a two-operand `PADD*`/`PSUB*` family,
/// selected by element byte-size. All variants share the mandatory `66`
/// prefix.
fn padd_opcode(bytesize: u8) -> u8 {
    match bytesize {
        1 => 0xfc,
        2 => 0xfd,
        4 => 0xfe,
        8 => 0xd4,
        other => panic!("no PADD* encoding for {}-byte elements", other),
    }
}

fn psub_opcode(bytesize: u8) -> u8 {
    match bytesize {
        1 => 0xf8,
        2 => 0xf9,
        4 => 0xfa,
        8 => 0xfb,
        other => panic!("no PSUB* encoding for {}-byte elements", other),
    }
}

/// `PCMPEQ*` opcode, or the SSE4.1 three-byte escape form for `PCMPEQQ`.
fn pcmpeq_opcode(bytesize: u8) -> (Option<u8>, u8) {
    match bytesize {
        1 => (None, 0x74),
        2 => (None, 0x75),
        4 => (None, 0x76),
        8 => (Some(0x38), 0x29),
        other => panic!("no PCMPEQ* encoding for {}-byte elements", other),
    }
}

impl Emitter {
    /// Builds an emitter with empty code, a fresh register allocator and an
    /// empty constant pool.
    pub fn new(flags: Flags) -> Self {
        Emitter {
            code: MachineCodeWriter::new(),
            regs: RegAllocState::new(),
            constants: ConstantPool::new(),
            flags,
            guard_success_cc: None,
        }
    }

    /// Emits every op in `oplist`, in order.
    pub fn emit_oplist(&mut self, graph: &DependencyGraph, oplist: &[Op]) -> VectorizeResult<()> {
        for op in oplist {
            self.emit_op(graph, op)?;
        }
        Ok(())
    }

    /// Dispatches one op to its `genop_vec_*` handler.
    pub fn emit_op(&mut self, graph: &DependencyGraph, op: &Op) -> VectorizeResult<()> {
        use Opcode::*;
        match op.opcode {
            VecIntAdd | VecIntSub | VecIntAnd | VecIntOr | VecIntXor | VecIntMul => {
                self.genop_vec_int_arith(graph, op)
            }
            VecFloatAdd | VecFloatSub | VecFloatMul | VecFloatTrueDiv => {
                self.genop_vec_float_arith(graph, op)
            }
            VecFloatAbs | VecFloatNeg => self.genop_vec_float_unary(graph, op),
            VecIntEq | VecIntNe => self.genop_vec_int_compare(graph, op),
            VecFloatEq | VecFloatNe => self.genop_vec_float_compare(op),
            VecIntIsTrue => self.genop_vec_int_is_true(op),
            VecRawLoad | VecGetArrayItem => self.genop_vec_load(op),
            VecRawStore | VecSetArrayItem => self.genop_vec_store(op),
            VecCastFloatToSinglefloat => self.genop_vec_cast(op, 0xf2, 0x5a),
            VecCastSinglefloatToFloat => self.genop_vec_cast(op, 0x00, 0x5a),
            VecCastFloatToInt => self.genop_vec_cast(op, 0xf2, 0xe6),
            VecCastIntToFloat => self.genop_vec_cast(op, 0xf3, 0xe6),
            VecGuardTrue => self.genop_vec_guard(graph, op, true),
            VecGuardFalse => self.genop_vec_guard(graph, op, false),
            VecExpandF => self.genop_vec_expand_f(graph, op),
            VecExpandI => self.genop_vec_expand_i(graph, op),
            VecEmpty => self.genop_vec_empty(op),
            VecPackF | VecPackI => self.genop_vec_pack(graph, op),
            VecUnpackF | VecUnpackI => self.genop_vec_unpack(graph, op),
            VecIntSignext => self.genop_vec_int_signext(graph, op),
            _ => Ok(()),
        }
    }

    fn genop_vec_int_arith(&mut self, graph: &DependencyGraph, op: &Op) -> VectorizeResult<()> {
        let locs = RegAlloc::consider_vec_arith(&mut self.regs, graph, op);
        let dst = arg_xmm(&locs.args, 0);
        let src = arg_xmm(&locs.args, 1);
        let bytesize = graph.vecinfo(op.getarg(0)).unwrap().bytesize;
        match op.opcode {
            Opcode::VecIntAdd => self.code.emit_rr(Prefix::OperandSize, padd_opcode(bytesize), dst, src),
            Opcode::VecIntSub => self.code.emit_rr(Prefix::OperandSize, psub_opcode(bytesize), dst, src),
            Opcode::VecIntAnd => self.code.emit_rr(Prefix::OperandSize, 0xdb, dst, src),
            Opcode::VecIntOr => self.code.emit_rr(Prefix::OperandSize, 0xeb, dst, src),
            Opcode::VecIntXor => self.code.emit_rr(Prefix::OperandSize, 0xef, dst, src),
            Opcode::VecIntMul => match bytesize {
                2 => self.code.emit_rr(Prefix::OperandSize, 0xd5, dst, src),
                4 => self.code.emit_rr_escape(Prefix::OperandSize, 0x38, 0x40, dst, src),
                other => {
                    return Err(VectorizeError::NotAProfitableLoop {
                        reason: format!("int_mul with {}-byte elements has no SSE primitive", other),
                    })
                }
            },
            _ => unreachable!(),
        }
        Ok(())
    }

    fn genop_vec_float_arith(&mut self, graph: &DependencyGraph, op: &Op) -> VectorizeResult<()> {
        let locs = RegAlloc::consider_vec_arith(&mut self.regs, graph, op);
        let dst = arg_xmm(&locs.args, 0);
        let src = arg_xmm(&locs.args, 1);
        let double = graph.vecinfo(op.getarg(0)).unwrap().bytesize == 8;
        let prefix = if double { Prefix::OperandSize } else { Prefix::None };
        let opcode = match op.opcode {
            Opcode::VecFloatAdd => 0x58,
            Opcode::VecFloatSub => 0x5c,
            Opcode::VecFloatMul => 0x59,
            Opcode::VecFloatTrueDiv => 0x5e,
            _ => unreachable!(),
        };
        self.code.emit_rr(prefix, opcode, dst, src);
        Ok(())
    }

    fn genop_vec_float_unary(&mut self, graph: &DependencyGraph, op: &Op) -> VectorizeResult<()> {
        let arg0 = op.getarg(0);
        let dst = as_xmm(self.regs.make_sure_var_in_xmm(arg0));
        if let Some(result) = op.result {
            self.regs.make_sure_var_in_xmm(result);
        }
        let double = graph.vecinfo(arg0).unwrap().bytesize == 8;
        let prefix = if double { Prefix::OperandSize } else { Prefix::None };
        let mask = match (op.opcode, double) {
            (Opcode::VecFloatAbs, true) => self.constants.float_const_abs_addr(),
            (Opcode::VecFloatAbs, false) => self.constants.single_float_const_abs_addr(),
            (Opcode::VecFloatNeg, true) => self.constants.float_const_neg_addr(),
            (Opcode::VecFloatNeg, false) => self.constants.single_float_const_neg_addr(),
            _ => unreachable!(),
        };
        // The mask's final RIP-relative displacement is patched once the
        // constant area's layout is finalized; 0 is a placeholder offset.
        let _ = mask;
        let opcode = match op.opcode {
            Opcode::VecFloatAbs => 0x54,
            Opcode::VecFloatNeg => 0x57,
            _ => unreachable!(),
        };
        self.code.emit_rip_load(prefix, opcode, dst, 0);
        if let Some(result) = op.result {
            self.regs.free(result);
            self.regs.make_sure_var_in_xmm(result);
        }
        Ok(())
    }

    fn genop_vec_int_compare(&mut self, graph: &DependencyGraph, op: &Op) -> VectorizeResult<()> {
        let locs = RegAlloc::consider_vec_arith(&mut self.regs, graph, op);
        let dst = arg_xmm(&locs.args, 0);
        let src = arg_xmm(&locs.args, 1);
        let bytesize = graph.vecinfo(op.getarg(0)).unwrap().bytesize;
        let (escape, opcode) = pcmpeq_opcode(bytesize);
        match escape {
            Some(esc) => self.code.emit_rr_escape(Prefix::OperandSize, esc, opcode, dst, src),
            None => self.code.emit_rr(Prefix::OperandSize, opcode, dst, src),
        }
        if op.opcode == Opcode::VecIntNe {
            let scratch = XmmReg::SCRATCH;
            self.code.emit_rr(Prefix::OperandSize, 0xef, scratch, scratch);
            let (esc, all_ones) = pcmpeq_opcode(4);
            match esc {
                Some(e) => self.code.emit_rr_escape(Prefix::OperandSize, e, all_ones, scratch, scratch),
                None => self.code.emit_rr(Prefix::OperandSize, all_ones, scratch, scratch),
            }
            self.code.emit_rr(Prefix::OperandSize, 0xef, dst, scratch);
        }
        Ok(())
    }

    fn genop_vec_float_compare(&mut self, op: &Op) -> VectorizeResult<()> {
        let arg0 = op.getarg(0);
        let arg1 = op.getarg(1);
        let dst = as_xmm(self.regs.make_sure_var_in_xmm(arg0));
        let src = as_xmm(self.regs.make_sure_var_in_xmm(arg1));
        let predicate: u8 = if op.opcode == Opcode::VecFloatEq { 0x00 } else { 0x04 };
        self.code.emit_rr_imm8(Prefix::OperandSize, 0x0f, 0xc2, dst, src, predicate);
        Ok(())
    }

    fn genop_vec_int_is_true(&mut self, op: &Op) -> VectorizeResult<()> {
        let locs = RegAlloc::consider_vec_int_is_true(&mut self.regs, op);
        let arg = arg_xmm(&locs.args, 0);
        self.code.emit_rr_escape(Prefix::OperandSize, 0x38, 0x17, arg, arg);
        Ok(())
    }

    fn build_address(&self, op: &Op) -> AddressLoc {
        let descr = op
            .descr
            .as_ref()
            .and_then(|d| d.as_array())
            .expect("load/store op must carry an ArrayDescr");
        let base = as_gpr(self.regs.location_of(op.getarg(0)).expect("base must already be allocated"));
        if op.numargs() > 1 {
            let index = as_gpr(
                self.regs
                    .location_of(op.getarg(1))
                    .expect("index must already be allocated"),
            );
            AddressLoc {
                base,
                index: Some(index),
                scale: descr.item_size,
                offset: descr.base_offset,
            }
        } else {
            AddressLoc::base_offset(base, descr.base_offset)
        }
    }

    fn genop_vec_load(&mut self, op: &Op) -> VectorizeResult<()> {
        let locs = RegAlloc::consider_vec_load(&mut self.regs, op);
        let addr = self.build_address(op);
        let dst = locs.result.map(as_xmm).expect("load must produce a result");
        let descr = op.descr.as_ref().and_then(|d| d.as_array()).unwrap();
        let (prefix, opcode) = if descr.is_array_of_floats {
            if descr.item_size == 8 {
                (Prefix::OperandSize, 0x10)
            } else {
                (Prefix::None, 0x10)
            }
        } else {
            (Prefix::OperandSize, 0x6f)
        };
        self.code.emit_rm(prefix, opcode, dst, addr);
        Ok(())
    }

    fn genop_vec_store(&mut self, op: &Op) -> VectorizeResult<()> {
        let locs = RegAlloc::consider_vec_store(&mut self.regs, op);
        let addr = self.build_address(op);
        let src = arg_xmm(&locs.args, 1);
        let descr = op.descr.as_ref().and_then(|d| d.as_array()).unwrap();
        let (prefix, opcode) = if descr.is_array_of_floats {
            if descr.item_size == 8 {
                (Prefix::OperandSize, 0x11)
            } else {
                (Prefix::None, 0x11)
            }
        } else {
            (Prefix::OperandSize, 0x7f)
        };
        self.code.emit_mr(prefix, opcode, addr, src);
        Ok(())
    }

    /// `CVTPD2PS` (66 0F 5A), `CVTPS2PD` (0F 5A), `CVTPD2DQ` (F2 0F E6),
    /// `CVTDQ2PD` (F3 0F E6): the prefix/opcode pair fully determines the
    /// conversion direction, so callers just pass the byte pair straight
    /// from the dispatch table.
    fn genop_vec_cast(&mut self, op: &Op, prefix_byte: u8, opcode: u8) -> VectorizeResult<()> {
        let arg0 = op.getarg(0);
        let dst = as_xmm(self.regs.make_sure_var_in_xmm(arg0));
        if let Some(result) = op.result {
            self.regs.free(arg0);
            self.regs.make_sure_var_in_xmm(result);
        }
        let prefix = match prefix_byte {
            0x66 => Prefix::OperandSize,
            0xf2 => Prefix::RepNe,
            0xf3 => Prefix::Rep,
            _ => Prefix::None,
        };
        self.code.emit_rr(prefix, opcode, dst, dst);
        Ok(())
    }

    fn genop_vec_expand_f(&mut self, graph: &DependencyGraph, op: &Op) -> VectorizeResult<()> {
        let locs = RegAlloc::consider_expand_f(&mut self.regs, op);
        let src = arg_xmm(&locs.args, 0);
        let dst = locs.result.map(as_xmm).unwrap_or(src);
        let double = graph.vecinfo(op.getarg(0)).map(|v| v.bytesize == 8).unwrap_or(false);
        if double {
            self.code.emit_rr(Prefix::RepNe, 0x12, dst, src); // MOVDDUP
        } else {
            self.code.emit_rr_imm8(Prefix::None, 0x0f, 0xc6, dst, src, 0x00); // SHUFPS imm=0
        }
        Ok(())
    }

    fn genop_vec_expand_i(&mut self, graph: &DependencyGraph, op: &Op) -> VectorizeResult<()> {
        let locs = RegAlloc::consider_expand_i(&mut self.regs, op);
        let src = arg_gpr(&locs.args, 0);
        let dst = locs.result.map(as_xmm).expect("expand must produce a result");
        let bytesize = graph.vecinfo(op.getarg(0)).map(|v| v.bytesize).unwrap_or(4);
        match bytesize {
            8 => {
                self.code.emit_pinsr(true, dst, src, 0);
                self.code.emit_pinsr(true, dst, src, 1);
            }
            4 => {
                self.code.emit_pinsr(false, dst, src, 0);
                self.code.emit_rr_imm8(Prefix::OperandSize, 0x70, 0x00, dst, dst, 0x00); // PSHUFD
            }
            _ => {
                self.code.emit_pinsr(false, dst, src, 0);
                let mask = self.constants.expand_byte_mask_addr();
                let _ = mask;
                self.code.emit_rr_escape(Prefix::OperandSize, 0x38, 0x00, dst, dst); // PSHUFB
            }
        }
        Ok(())
    }

    fn genop_vec_empty(&mut self, op: &Op) -> VectorizeResult<()> {
        RegAlloc::consider_vec_empty(&mut self.regs, op);
        Ok(())
    }

    fn genop_vec_pack(&mut self, graph: &DependencyGraph, op: &Op) -> VectorizeResult<()> {
        let locs = RegAlloc::consider_vec_pack(&mut self.regs, op);
        let dst = arg_xmm(&locs.args, 0);
        let dest_slot = op.imm.first().copied().unwrap_or(0) as u8;
        let double = graph
            .vecinfo(op.result.unwrap_or_else(|| op.getarg(0)))
            .map(|v| v.bytesize == 8)
            .unwrap_or(false);
        if op.opcode == Opcode::VecPackI {
            let src = arg_gpr(&locs.args, 1);
            self.code.emit_pinsr(double, dst, src, dest_slot);
        } else if double {
            let src = arg_xmm(&locs.args, 1);
            if dest_slot == 0 {
                self.code.emit_rr(Prefix::RepNe, 0x10, dst, src); // MOVSD
            } else {
                self.code.emit_rr_imm8(Prefix::OperandSize, 0x0f, 0xc6, dst, src, 0x02); // SHUFPD imm selects high lane
            }
        } else {
            let src = arg_xmm(&locs.args, 1);
            self.code.emit_rr_imm8(Prefix::None, 0x3a, 0x21, dst, src, dest_slot << 4); // INSERTPS
        }
        Ok(())
    }

    fn genop_vec_unpack(&mut self, graph: &DependencyGraph, op: &Op) -> VectorizeResult<()> {
        let locs = RegAlloc::consider_vec_unpack(&mut self.regs, op);
        let src = arg_xmm(&locs.args, 0);
        let pos = op.imm.first().copied().unwrap_or(0) as u8;
        let double = graph.vecinfo(op.getarg(0)).map(|v| v.bytesize == 8).unwrap_or(false);
        if op.opcode == Opcode::VecUnpackI {
            let dst = match locs.result.expect("unpack must produce a result") {
                RegLoc::Gpr(r) => r,
                RegLoc::Xmm(_) => panic!("VEC_UNPACK_I must allocate a GPR result"),
            };
            self.code.emit_pextr(double, dst, src, pos);
        } else if double {
            let dst = as_xmm(locs.result.expect("unpack must produce a result"));
            if pos == 0 {
                self.code.emit_rr(Prefix::RepNe, 0x10, dst, src); // MOVSD dst,src
            } else {
                self.code.emit_rr_imm8(Prefix::OperandSize, 0x0f, 0xc6, dst, src, 0x01); // SHUFPD swap
            }
        } else {
            let dst = as_xmm(locs.result.expect("unpack must produce a result"));
            self.code.emit_rr_imm8(Prefix::OperandSize, 0x70, 0x00, dst, src, pos); // PSHUFD broadcast lane
        }
        Ok(())
    }

    fn genop_vec_int_signext(&mut self, graph: &DependencyGraph, op: &Op) -> VectorizeResult<()> {
        let arg0 = op.getarg(0);
        let src = as_xmm(self.regs.make_sure_var_in_xmm(arg0));
        let target_bytesize = op.imm.first().copied().unwrap_or(4);
        let source_bytesize = graph.vecinfo(arg0).map(|v| v.bytesize).unwrap_or(4);
        let scratch_gpr = GprReg::SCRATCH;
        match (source_bytesize, target_bytesize) {
            (4, 8) => {
                self.code.emit_pextr(false, scratch_gpr, src, 0);
                self.code.emit_pinsr(true, src, scratch_gpr, 0);
            }
            (8, 4) => {
                self.code.emit_pextr(true, scratch_gpr, src, 0);
                self.code.emit_pinsr(false, src, scratch_gpr, 0);
            }
            (s, t) => {
                return Err(VectorizeError::NotAProfitableLoop {
                    reason: format!("sign-extend {} -> {} bytes has no SSE lowering", s, t),
                })
            }
        }
        if let Some(result) = op.result {
            self.regs.make_sure_var_in_xmm(result);
        }
        Ok(())
    }

    /// `_blend_unused_slots`: ORs ones (guard_true) or zeros (guard_false)
    /// into the 16-bit words beyond `used_bytes`, so a partially-filled
    /// register's garbage upper lanes cannot corrupt a boolean reduction.
    fn blend_unused_slots(&mut self, arg: XmmReg, used_bytes: u8, fill_ones: bool) {
        let used_words = u32::from(used_bytes) / 2;
        let mut select: u8 = 0;
        for i in used_words..8 {
            select |= 1 << i;
        }
        if select == 0 {
            return;
        }
        let temp = XmmReg::SCRATCH;
        self.code.emit_rr(Prefix::OperandSize, 0xef, temp, temp); // PXOR temp,temp
        if fill_ones {
            let (esc, opcode) = pcmpeq_opcode(4);
            match esc {
                Some(e) => self.code.emit_rr_escape(Prefix::OperandSize, e, opcode, temp, temp),
                None => self.code.emit_rr(Prefix::OperandSize, opcode, temp, temp),
            }
        }
        self.code.emit_rr_imm8(Prefix::OperandSize, 0x3a, 0x0e, arg, temp, select); // PBLENDW
    }

    /// `guard_vector`: blends unused tail lanes, then reduces the vector to
    /// a single pass/fail condition code recorded in `guard_success_cc`.
    pub fn genop_vec_guard(&mut self, graph: &DependencyGraph, op: &Op, polarity: bool) -> VectorizeResult<()> {
        let locs = RegAlloc::consider_guard(&mut self.regs, op);
        let arg = arg_xmm(&locs.args, 0);
        let vinfo = graph
            .vecinfo(op.getarg(0))
            .expect("guarded value must carry vecinfo");
        if vinfo.total_bytes() < u32::from(self.flags.vector_register_bytes()) {
            self.blend_unused_slots(arg, vinfo.total_bytes() as u8, polarity);
        }
        if polarity {
            let temp = XmmReg::SCRATCH;
            self.code.emit_rr(Prefix::OperandSize, 0xef, temp, temp); // PXOR temp,temp
            let (esc, opcode) = pcmpeq_opcode(vinfo.bytesize);
            match esc {
                Some(e) => self.code.emit_rr_escape(Prefix::OperandSize, e, opcode, arg, temp),
                None => self.code.emit_rr(Prefix::OperandSize, opcode, arg, temp),
            }
            let (esc64, opcode64) = pcmpeq_opcode(8);
            self.code
                .emit_rr_escape(Prefix::OperandSize, esc64.unwrap(), opcode64, temp, temp); // temp = all-ones
            self.code.emit_rr_escape(Prefix::OperandSize, 0x38, 0x17, arg, temp); // PTEST arg,temp
            self.guard_success_cc = Some(GuardSuccessCc::Zero);
        } else {
            self.code.emit_rr_escape(Prefix::OperandSize, 0x38, 0x17, arg, arg); // PTEST arg,arg
            self.guard_success_cc = Some(GuardSuccessCc::NotZero);
        }
        Ok(())
    }

    /// `_update_at_exit`'s `'+'` on integer lanes: two `PEXTRQ`s plus an
    /// integer add, reconstructing the scalar sum at guard exit.
    pub fn accum_reduce_sum_int(&mut self, acc: XmmReg, dest: GprReg) {
        let scratch = GprReg::SCRATCH;
        self.code.emit_pextr(true, dest, acc, 0);
        self.code.emit_pextr(true, scratch, acc, 1);
        self.code.put1(0x48); // REX.W for a 64-bit ADD dest, scratch
        self.code.put1(0x01);
        self.code.put1(0xc0 | (dest.encoding() & 7) | ((scratch.encoding() & 7) << 3));
    }

    /// `'+'` on float lanes: `HADDPD acc, acc` leaves the sum in the low
    /// lane.
    pub fn accum_reduce_sum_float(&mut self, acc: XmmReg) {
        self.code.emit_rr(Prefix::OperandSize, 0x7c, acc, acc); // HADDPD
    }

    /// `'*'` on float lanes: swap lanes via `SHUFPD` then `MULSD`.
    pub fn accum_reduce_mul_float(&mut self, acc: XmmReg) {
        let temp = XmmReg::SCRATCH;
        self.code.emit_rr_imm8(Prefix::OperandSize, 0x0f, 0xc6, temp, acc, 0x01); // SHUFPD imm=1
        self.code.emit_rr(Prefix::RepNe, 0x59, acc, temp); // MULSD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DependencyGraph, Node};
    use crate::ir::{DataType, Opcode, VecInfo};

    fn leaf(index: u32) -> Node {
        Node::new(Op::new(Opcode::RawLoad, vec![], None), index)
    }

    #[test]
    fn int_add_emits_padd_with_mandatory_prefix() {
        let mut g = DependencyGraph::new();
        let a = g.push(leaf(0));
        let b = g.push(leaf(1));
        g.set_vecinfo(a, VecInfo::vector(DataType::Int, 4, 4, true));
        g.set_vecinfo(b, VecInfo::vector(DataType::Int, 4, 4, true));
        let result = g.push(Node::new(Op::new(Opcode::VecIntAdd, vec![a, b], None), 2));
        g.node_mut(result).op.result = Some(result);
        let add = g.node(result).op.clone();

        let mut emitter = Emitter::new(Flags::default());
        emitter.genop_vec_int_arith(&g, &add).unwrap();
        let bytes = emitter.code.finish();
        assert_eq!(&bytes[..2], &[0x66, 0x0f]);
        assert_eq!(bytes[2], 0xfe);
    }

    #[test]
    fn guard_false_sets_not_zero_condition() {
        let mut g = DependencyGraph::new();
        let a = g.push(leaf(0));
        g.set_vecinfo(a, VecInfo::vector(DataType::Int, 4, 4, true));
        let guard = Op::new(Opcode::VecGuardFalse, vec![a], None);

        let mut emitter = Emitter::new(Flags::default());
        emitter.genop_vec_guard(&g, &guard, false).unwrap();
        assert_eq!(emitter.guard_success_cc, Some(GuardSuccessCc::NotZero));
    }
}
