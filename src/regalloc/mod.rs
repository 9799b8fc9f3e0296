//! Vector register allocator for x86-64: assigns XMM (and, for
//! load/store base/offset pairs, GPR) locations to vector operations,
//! forcing in-place `result = arg0` where SSE's destructive two-operand
//! encoding requires it.

pub mod register_set;

use crate::graph::DependencyGraph;
use crate::ir::{Op, OpKind, Opcode, ValueId};
use crate::registers::{AddressLoc, FrameLoc, GprReg, ImmedLoc, RegLoc, XmmReg};
use register_set::RegisterSet;
use std::collections::HashMap;

/// A 16-bit bitmask register set specialized for the GPR file, reserving
/// [`GprReg::SCRATCH`] the allocator never assigns to a value.
#[derive(Clone)]
struct GprSet(u16);

impl GprSet {
    fn new() -> Self {
        let mut set = GprSet(0xffff);
        set.take(GprReg::SCRATCH);
        set
    }

    fn take(&mut self, reg: GprReg) {
        self.0 &= !(1 << reg.encoding());
    }

    fn free(&mut self, reg: GprReg) {
        self.0 |= 1 << reg.encoding();
    }

    fn alloc(&mut self) -> GprReg {
        let idx = self.0.trailing_zeros();
        assert!(idx < 16, "out of general-purpose registers");
        let reg = GprReg::new(idx as u8);
        self.take(reg);
        reg
    }
}

/// Persistent allocator state threaded through one loop body's
/// vectorization: the XMM and GPR availability bitmasks plus the current
/// value→location assignment table.
pub struct RegAllocState {
    xmm: RegisterSet,
    gpr: GprSet,
    assignments: HashMap<ValueId, RegLoc>,
}

impl RegAllocState {
    /// Builds an allocator with every XMM register except
    /// [`XmmReg::SCRATCH`] and every GPR except [`GprReg::SCRATCH`]
    /// available.
    pub fn new() -> Self {
        let mut xmm = RegisterSet::new();
        xmm.take(XmmReg::SCRATCH);
        RegAllocState {
            xmm,
            gpr: GprSet::new(),
            assignments: HashMap::new(),
        }
    }

    fn alloc_xmm(&mut self) -> XmmReg {
        let reg = self
            .xmm
            .iter()
            .next()
            .expect("out of XMM registers; spilling is not implemented");
        self.xmm.take(reg);
        reg
    }

    /// Returns `value`'s current location, allocating a fresh XMM register
    /// for it if it has none yet.
    pub fn make_sure_var_in_xmm(&mut self, value: ValueId) -> RegLoc {
        if let Some(&loc) = self.assignments.get(&value) {
            return loc;
        }
        let reg = self.alloc_xmm();
        let loc = RegLoc::Xmm(reg);
        self.assignments.insert(value, loc);
        loc
    }

    /// Returns `value`'s current location, allocating a fresh GPR for it if
    /// it has none yet.
    pub fn make_sure_var_in_gpr(&mut self, value: ValueId) -> RegLoc {
        if let Some(&loc) = self.assignments.get(&value) {
            return loc;
        }
        let reg = self.gpr.alloc();
        let loc = RegLoc::Gpr(reg);
        self.assignments.insert(value, loc);
        loc
    }

    /// Forces `result` into the same register as `arg0`. Matches every
    /// two-operand SSE instruction's `dst = dst OP src` shape, where the
    /// emitter has `arg0` already loaded and simply overwrites it in place.
    pub fn force_result_in_reg(&mut self, result: ValueId, arg0: ValueId) -> RegLoc {
        let loc = *self
            .assignments
            .get(&arg0)
            .expect("arg0 must already be assigned a register");
        self.assignments.insert(result, loc);
        loc
    }

    /// Releases `value`'s register, if it has one. Called once the
    /// allocator determines `value` has no further uses.
    pub fn free(&mut self, value: ValueId) {
        if let Some(loc) = self.assignments.remove(&value) {
            match loc {
                RegLoc::Xmm(r) if r != XmmReg::SCRATCH => self.xmm.free(r),
                RegLoc::Gpr(r) if r != GprReg::SCRATCH => self.gpr.free(r),
                _ => {}
            }
        }
    }

    /// The register currently holding `value`, if assigned.
    pub fn location_of(&self, value: ValueId) -> Option<RegLoc> {
        self.assignments.get(&value).copied()
    }
}

impl Default for RegAllocState {
    fn default() -> Self {
        RegAllocState::new()
    }
}

/// Argument locations plus the (optional) result location the emitter
/// consumes for one vector op.
#[derive(Debug, Clone)]
pub struct ArgLocs {
    /// One location per argument, in argument order. Small integer
    /// immediates the emitter needs beyond register/address operands
    /// (element byte-size, slot index) are appended after them.
    pub args: Vec<ArgLoc>,
    /// The result's location, if the op produces one.
    pub result: Option<RegLoc>,
}

/// One argument location: a register, a memory address, an immediate, or a
/// spilled stack slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArgLoc {
    /// A register.
    Reg(RegLoc),
    /// A memory operand.
    Address(AddressLoc),
    /// An immediate.
    Immed(ImmedLoc),
    /// A spilled stack slot. This allocator never spills; kept for parity
    /// with the location kinds the emitter understands.
    Frame(FrameLoc),
}

/// Per-opcode `consider_*` dispatch, implementing the vector register
/// allocator design.
pub struct RegAlloc;

impl RegAlloc {
    /// Arithmetic / compare: two XMMs plus the leftmost op's element
    /// byte-size immediate; result reuses `arg0`'s XMM.
    pub fn consider_vec_arith(
        state: &mut RegAllocState,
        graph: &DependencyGraph,
        op: &Op,
    ) -> ArgLocs {
        let a0 = op.getarg(0);
        let a1 = op.getarg(1);
        let loc0 = state.make_sure_var_in_xmm(a0);
        let loc1 = state.make_sure_var_in_xmm(a1);
        let bytesize = graph
            .vecinfo(a0)
            .expect("arith argument must carry vecinfo")
            .bytesize;
        let result_loc = op.result.map(|r| state.force_result_in_reg(r, a0));
        ArgLocs {
            args: vec![
                ArgLoc::Reg(loc0),
                ArgLoc::Reg(loc1),
                ArgLoc::Immed(ImmedLoc {
                    value: i64::from(bytesize),
                }),
            ],
            result: result_loc,
        }
    }

    /// `int_is_true`: the tested vector stays in `arg0`'s register; there is
    /// no separate result location because the flags are the real output.
    pub fn consider_vec_int_is_true(state: &mut RegAllocState, op: &Op) -> ArgLocs {
        let a0 = op.getarg(0);
        let loc0 = state.make_sure_var_in_xmm(a0);
        ArgLocs {
            args: vec![ArgLoc::Reg(loc0)],
            result: None,
        }
    }

    /// Loads: base (and optional offset) into GPRs, result into a fresh
    /// XMM. `itemsize`/`ofs` immediates live on the op's `ArrayDescr`, not
    /// here.
    pub fn consider_vec_load(state: &mut RegAllocState, op: &Op) -> ArgLocs {
        debug_assert_eq!(op.opcode.kind(), OpKind::Load);
        let base = op.getarg(0);
        let base_loc = state.make_sure_var_in_gpr(base);
        let mut args = vec![ArgLoc::Reg(base_loc)];
        if op.numargs() > 1 {
            args.push(ArgLoc::Reg(state.make_sure_var_in_gpr(op.getarg(1))));
        }
        let result_loc = op.result.map(|r| state.make_sure_var_in_xmm(r));
        ArgLocs {
            args,
            result: result_loc,
        }
    }

    /// Stores: base into a GPR, stored value into an XMM.
    pub fn consider_vec_store(state: &mut RegAllocState, op: &Op) -> ArgLocs {
        debug_assert_eq!(op.opcode.kind(), OpKind::Store);
        let base = op.getarg(0);
        let value = op.getarg(op.numargs() - 1);
        let base_loc = state.make_sure_var_in_gpr(base);
        let value_loc = state.make_sure_var_in_xmm(value);
        ArgLocs {
            args: vec![ArgLoc::Reg(base_loc), ArgLoc::Reg(value_loc)],
            result: None,
        }
    }

    /// `VEC_PACK`: destination vector and source scalar/lane; result reuses
    /// the destination's XMM (the vector is overwritten lane-by-lane). The
    /// scalar source sits in a GPR for `VEC_PACK_I` (`PINSR*` reads from a
    /// general-purpose register) and in an XMM for `VEC_PACK_F`.
    pub fn consider_vec_pack(state: &mut RegAllocState, op: &Op) -> ArgLocs {
        let dest = op.getarg(0);
        let src = op.getarg(1);
        let dest_loc = state.make_sure_var_in_xmm(dest);
        let src_loc = if op.opcode == Opcode::VecPackI {
            state.make_sure_var_in_gpr(src)
        } else {
            state.make_sure_var_in_xmm(src)
        };
        let result_loc = op.result.map(|r| state.force_result_in_reg(r, dest));
        ArgLocs {
            args: vec![ArgLoc::Reg(dest_loc), ArgLoc::Reg(src_loc)],
            result: result_loc,
        }
    }

    /// `VEC_UNPACK`: source XMM; result lands in a GPR for `VEC_UNPACK_I`
    /// (`PEXTR*` writes to a general-purpose register) and in a fresh XMM
    /// for `VEC_UNPACK_F`.
    pub fn consider_vec_unpack(state: &mut RegAllocState, op: &Op) -> ArgLocs {
        let src = op.getarg(0);
        let src_loc = state.make_sure_var_in_xmm(src);
        let result_loc = op.result.map(|r| {
            if op.opcode == Opcode::VecUnpackI {
                state.make_sure_var_in_gpr(r)
            } else {
                state.make_sure_var_in_xmm(r)
            }
        });
        ArgLocs {
            args: vec![ArgLoc::Reg(src_loc)],
            result: result_loc,
        }
    }

    /// `VEC` materialize-empty: no arguments, a fresh XMM result.
    pub fn consider_vec_empty(state: &mut RegAllocState, op: &Op) -> ArgLocs {
        let result_loc = op.result.map(|r| state.make_sure_var_in_xmm(r));
        ArgLocs {
            args: vec![],
            result: result_loc,
        }
    }

    /// `VEC_EXPAND_I`: the scalar source is read from a GPR so `PINSR*` can
    /// place it; result is a fresh XMM.
    pub fn consider_expand_i(state: &mut RegAllocState, op: &Op) -> ArgLocs {
        let src = op.getarg(0);
        let src_loc = state.make_sure_var_in_gpr(src);
        let result_loc = op.result.map(|r| state.make_sure_var_in_xmm(r));
        ArgLocs {
            args: vec![ArgLoc::Reg(src_loc)],
            result: result_loc,
        }
    }

    /// `VEC_EXPAND_F`: the scalar source stays in an XMM (a `ConstFloatLoc`
    /// source is read straight from the constant pool by the emitter,
    /// bypassing this allocation).
    pub fn consider_expand_f(state: &mut RegAllocState, op: &Op) -> ArgLocs {
        let src = op.getarg(0);
        let src_loc = state.make_sure_var_in_xmm(src);
        let result_loc = op.result.map(|r| state.make_sure_var_in_xmm(r));
        ArgLocs {
            args: vec![ArgLoc::Reg(src_loc)],
            result: result_loc,
        }
    }

    /// Guard: only the tested argument needs a register; the emitter
    /// consumes the (empty) result location and sets the success
    /// condition code directly from the preceding compare/is_true op.
    pub fn consider_guard(state: &mut RegAllocState, op: &Op) -> ArgLocs {
        let arg0 = op.getarg(0);
        let loc = state.make_sure_var_in_xmm(arg0);
        ArgLocs {
            args: vec![ArgLoc::Reg(loc)],
            result: None,
        }
    }
}
