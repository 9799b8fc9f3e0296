//! The trace operation model: opcodes, operations, per-value vectorization
//! info and the descriptor/fail-argument shapes consumed from outside this
//! crate.
//!
//! A scalar SSA value and the [`crate::entities::NodeId`] of the node that
//! produces it are the same thing in this IR — there is no separate value
//! arena, mirroring how the traced operations this crate consumes already
//! identify a result by the defining node.

use crate::entities::NodeId;
use smallvec::SmallVec;

/// A scalar SSA value, identified by the node that defines it.
pub type ValueId = NodeId;

/// The element kind of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// Signed or unsigned integer lanes.
    Int,
    /// IEEE-754 float or double lanes.
    Float,
    /// No value (guards, stores, jumps).
    Void,
}

/// Per-value vectorization info: `{datatype, bytesize, count, signed}`.
///
/// Invariant: `bytesize * count <= vector_register_size` (16 on x86-64).
/// Scalars always have `count == 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VecInfo {
    /// Element kind.
    pub datatype: DataType,
    /// Size of one element, in bytes (1, 2, 4 or 8).
    pub bytesize: u8,
    /// Number of lanes (1 for scalars).
    pub count: u8,
    /// Whether integer lanes are sign-interpreted.
    pub signed: bool,
}

impl VecInfo {
    /// Builds scalar vecinfo (`count == 1`).
    pub fn scalar(datatype: DataType, bytesize: u8, signed: bool) -> Self {
        VecInfo {
            datatype,
            bytesize,
            count: 1,
            signed,
        }
    }

    /// Builds vector vecinfo with the given lane count.
    pub fn vector(datatype: DataType, bytesize: u8, count: u8, signed: bool) -> Self {
        VecInfo {
            datatype,
            bytesize,
            count,
            signed,
        }
    }

    /// True when this value occupies a single lane.
    pub fn is_scalar(&self) -> bool {
        self.count == 1
    }

    /// Total size in bytes this value occupies (`bytesize * count`).
    pub fn total_bytes(&self) -> u32 {
        u32::from(self.bytesize) * u32::from(self.count)
    }

    /// Returns the vector vecinfo that would result from packing `count`
    /// copies of a value with this scalar vecinfo.
    pub fn widened(&self, count: u8) -> Self {
        VecInfo {
            datatype: self.datatype,
            bytesize: self.bytesize,
            count,
            signed: self.signed,
        }
    }
}

/// Reduction operator supported by an [`crate::pack::AccumPack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    /// Sum reduction (`FLOAT_ADD`/`INT_ADD`).
    Add,
    /// Product reduction (`FLOAT_MUL`).
    Mul,
}

impl ReduceOp {
    /// Identity element: `0` for `+`, `1` for `*`.
    pub fn identity(&self) -> f64 {
        match self {
            ReduceOp::Add => 0.0,
            ReduceOp::Mul => 1.0,
        }
    }
}

/// One entry of a guard descriptor's accumulator side channel, recording how
/// to reconstruct a scalar reduction result at a guard exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccumInfo {
    /// Index into the guard's fail-argument list that this accumulator
    /// corresponds to.
    pub failarg_index: usize,
    /// The pre-vectorization scalar seed value.
    pub original_scalar: ValueId,
    /// Which reduction this accumulator performs.
    pub operator: ReduceOp,
}

/// Descriptor for a primitive array load/store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayDescr {
    /// Size, in bytes, of one array element.
    pub item_size: u8,
    /// Constant byte offset added to the base address.
    pub base_offset: i32,
    /// True if elements are pointers (affects GC write barriers upstream;
    /// irrelevant to vectorization beyond being a disqualifying flag).
    pub is_array_of_pointers: bool,
    /// True if elements are structs (never packed).
    pub is_array_of_structs: bool,
    /// True if elements are floating point.
    pub is_array_of_floats: bool,
    /// Element datatype, redundant with `is_array_of_floats` but convenient.
    pub concrete_type: DataType,
}

/// Descriptor carried by a guard operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuardDescr {
    /// Accumulator side channel: one entry per reduction carried through
    /// this guard, consumed at guard-exit emission.
    pub rd_vector_info: Vec<AccumInfo>,
}

/// The descriptor attached to some operations, carrying data the opcode
/// alone cannot express.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    /// Attached to loads/stores.
    Array(ArrayDescr),
    /// Attached to guards.
    Guard(GuardDescr),
}

impl Descriptor {
    /// Returns the array descriptor, if this is one.
    pub fn as_array(&self) -> Option<&ArrayDescr> {
        match self {
            Descriptor::Array(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the guard descriptor, mutably, if this is one.
    pub fn as_guard_mut(&mut self) -> Option<&mut GuardDescr> {
        match self {
            Descriptor::Guard(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the guard descriptor, if this is one.
    pub fn as_guard(&self) -> Option<&GuardDescr> {
        match self {
            Descriptor::Guard(d) => Some(d),
            _ => None,
        }
    }
}

/// Broad classification of an opcode, used by the restriction registry and
/// the pack model's `pack_load` dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// `raw_load` / `getarrayitem`.
    Load,
    /// `raw_store` / `setarrayitem`.
    Store,
    /// `guard_true` / `guard_false`.
    Guard,
    /// Narrowing or widening typecast.
    Typecast,
    /// Pure arithmetic (`int_add`, `float_mul`, ...).
    Arith,
    /// Comparison (`int_eq`, `float_ne`, ...).
    Compare,
    /// Loop label.
    Label,
    /// Loop-closing jump.
    Jump,
    /// Vectorizer-internal glue op (`VEC_EXPAND`, `VEC_PACK`, `VEC_UNPACK`,
    /// `VEC_INT_SIGNEXT`, the materialize-empty `VEC` op).
    Glue,
}

/// Every opcode this crate knows about: the scalar trace opcodes it
/// vectorizes, and the vector opcode companions it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Opcode {
    // Scalar opcodes.
    RawLoad,
    RawStore,
    GetArrayItem,
    SetArrayItem,
    IntAdd,
    IntSub,
    IntMul,
    IntAnd,
    IntOr,
    IntXor,
    IntEq,
    IntNe,
    IntIsTrue,
    FloatAdd,
    FloatSub,
    FloatMul,
    FloatTrueDiv,
    FloatAbs,
    FloatNeg,
    FloatEq,
    FloatNe,
    CastFloatToSinglefloat,
    CastSinglefloatToFloat,
    CastFloatToInt,
    CastIntToFloat,
    GuardTrue,
    GuardFalse,
    Label,
    Jump,

    // Vector opcode companions.
    VecRawLoad,
    VecRawStore,
    VecGetArrayItem,
    VecSetArrayItem,
    VecIntAdd,
    VecIntSub,
    VecIntMul,
    VecIntAnd,
    VecIntOr,
    VecIntXor,
    VecIntEq,
    VecIntNe,
    VecIntIsTrue,
    VecFloatAdd,
    VecFloatSub,
    VecFloatMul,
    VecFloatTrueDiv,
    VecFloatAbs,
    VecFloatNeg,
    VecFloatEq,
    VecFloatNe,
    VecCastFloatToSinglefloat,
    VecCastSinglefloatToFloat,
    VecCastFloatToInt,
    VecCastIntToFloat,
    VecGuardTrue,
    VecGuardFalse,

    // Glue opcodes, never present before vectorization.
    VecExpandF,
    VecExpandI,
    /// Materialize an uninitialized vector value, later filled lane-by-lane
    /// by `VEC_PACK`.
    VecEmpty,
    VecPackI,
    VecPackF,
    VecUnpackI,
    VecUnpackF,
    VecIntSignext,
}

impl Opcode {
    /// The vector opcode companion used after vectorization, if any.
    pub fn vector_companion(self) -> Option<Opcode> {
        use Opcode::*;
        Some(match self {
            RawLoad => VecRawLoad,
            RawStore => VecRawStore,
            GetArrayItem => VecGetArrayItem,
            SetArrayItem => VecSetArrayItem,
            IntAdd => VecIntAdd,
            IntSub => VecIntSub,
            IntMul => VecIntMul,
            IntAnd => VecIntAnd,
            IntOr => VecIntOr,
            IntXor => VecIntXor,
            IntEq => VecIntEq,
            IntNe => VecIntNe,
            IntIsTrue => VecIntIsTrue,
            FloatAdd => VecFloatAdd,
            FloatSub => VecFloatSub,
            FloatMul => VecFloatMul,
            FloatTrueDiv => VecFloatTrueDiv,
            FloatAbs => VecFloatAbs,
            FloatNeg => VecFloatNeg,
            FloatEq => VecFloatEq,
            FloatNe => VecFloatNe,
            CastFloatToSinglefloat => VecCastFloatToSinglefloat,
            CastSinglefloatToFloat => VecCastSinglefloatToFloat,
            CastFloatToInt => VecCastFloatToInt,
            CastIntToFloat => VecCastIntToFloat,
            GuardTrue => VecGuardTrue,
            GuardFalse => VecGuardFalse,
            _ => return None,
        })
    }

    /// Broad opcode classification.
    pub fn kind(self) -> OpKind {
        use Opcode::*;
        match self {
            RawLoad | GetArrayItem | VecRawLoad | VecGetArrayItem => OpKind::Load,
            RawStore | SetArrayItem | VecRawStore | VecSetArrayItem => OpKind::Store,
            GuardTrue | GuardFalse | VecGuardTrue | VecGuardFalse => OpKind::Guard,
            CastFloatToSinglefloat
            | CastSinglefloatToFloat
            | CastFloatToInt
            | CastIntToFloat
            | VecCastFloatToSinglefloat
            | VecCastSinglefloatToFloat
            | VecCastFloatToInt
            | VecCastIntToFloat => OpKind::Typecast,
            IntEq | IntNe | IntIsTrue | FloatEq | FloatNe | VecIntEq | VecIntNe
            | VecIntIsTrue | VecFloatEq | VecFloatNe => OpKind::Compare,
            Label => OpKind::Label,
            Jump => OpKind::Jump,
            VecExpandF | VecExpandI | VecEmpty | VecPackI | VecPackF | VecUnpackI
            | VecUnpackF | VecIntSignext => OpKind::Glue,
            _ => OpKind::Arith,
        }
    }

    /// True for a `VEC_*` opcode (either a vectorized companion or a glue
    /// opcode).
    pub fn is_vector(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            VecRawLoad
                | VecRawStore
                | VecGetArrayItem
                | VecSetArrayItem
                | VecIntAdd
                | VecIntSub
                | VecIntMul
                | VecIntAnd
                | VecIntOr
                | VecIntXor
                | VecIntEq
                | VecIntNe
                | VecIntIsTrue
                | VecFloatAdd
                | VecFloatSub
                | VecFloatMul
                | VecFloatTrueDiv
                | VecFloatAbs
                | VecFloatNeg
                | VecFloatEq
                | VecFloatNe
                | VecCastFloatToSinglefloat
                | VecCastSinglefloatToFloat
                | VecCastFloatToInt
                | VecCastIntToFloat
                | VecGuardTrue
                | VecGuardFalse
                | VecExpandF
                | VecExpandI
                | VecEmpty
                | VecPackI
                | VecPackF
                | VecUnpackI
                | VecUnpackF
                | VecIntSignext
        )
    }

    /// True for `int_mul`/`VEC_INT_MUL`.
    pub fn is_int_mul(self) -> bool {
        matches!(self, Opcode::IntMul | Opcode::VecIntMul)
    }
}

/// A trace operation: an opcode, its arguments, optional result, optional
/// descriptor, and (for guards) an optional fail-argument list.
#[derive(Debug, Clone)]
pub struct Op {
    /// The operation's opcode.
    pub opcode: Opcode,
    /// Ordered argument list.
    pub args: SmallVec<[ValueId; 4]>,
    /// The value this op defines, if any (`None` for stores, guards, jumps).
    pub result: Option<ValueId>,
    /// Attached descriptor, for loads/stores/guards.
    pub descr: Option<Descriptor>,
    /// Fail-argument list, present only on guards.
    pub failargs: Option<Vec<ValueId>>,
    /// Small integer immediates a glue opcode needs beyond its value
    /// arguments: `VEC_UNPACK`'s `(position, count)`, `VEC_PACK`'s
    /// `(dest_slot, src_slot)`, `VEC_INT_SIGNEXT`'s target byte-size.
    pub imm: SmallVec<[i32; 2]>,
}

impl Op {
    /// Builds a bare operation with no descriptor, fail-args or immediates.
    pub fn new(opcode: Opcode, args: impl IntoIterator<Item = ValueId>, result: Option<ValueId>) -> Self {
        Op {
            opcode,
            args: args.into_iter().collect(),
            result,
            descr: None,
            failargs: None,
            imm: SmallVec::new(),
        }
    }

    /// Builder-style helper for attaching glue-op immediates.
    pub fn with_imm(mut self, imm: impl IntoIterator<Item = i32>) -> Self {
        self.imm = imm.into_iter().collect();
        self
    }

    /// Returns the argument at `index`.
    pub fn getarg(&self, index: usize) -> ValueId {
        self.args[index]
    }

    /// Number of arguments.
    pub fn numargs(&self) -> usize {
        self.args.len()
    }

    /// True if this op is a guard.
    pub fn is_guard(&self) -> bool {
        self.opcode.kind() == OpKind::Guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vecinfo_total_bytes_respects_register_width() {
        let vi = VecInfo::vector(DataType::Float, 8, 2, true);
        assert_eq!(vi.total_bytes(), 16);
    }

    #[test]
    fn vector_companion_round_trips_opcode_family() {
        assert_eq!(Opcode::IntAdd.vector_companion(), Some(Opcode::VecIntAdd));
        assert_eq!(Opcode::Label.vector_companion(), None);
    }

    #[test]
    fn guard_opcodes_report_guard_kind() {
        assert_eq!(Opcode::GuardTrue.kind(), OpKind::Guard);
        assert_eq!(Opcode::VecGuardFalse.kind(), OpKind::Guard);
    }
}
