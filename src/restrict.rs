//! Per-opcode argument type/shape restrictions and the opcode→restriction
//! registry.
//!
//! Dispatch is a tagged enum (`OpRestrict`) rather than a trait object: the
//! restriction kinds are a small closed set (`Generic`, `MatchSizeTypeFirst`,
//! `Load`, `Store`, `Guard`) and a `match` on the hot path keeps this crate's
//! own compile-time contribution to the surrounding JIT low, per the
//! original design's rationale for avoiding virtual calls here.

use crate::graph::DependencyGraph;
use crate::ir::{DataType, Opcode, ValueId};
use crate::result::{VectorizeError, VectorizeResult};

/// One argument-slot restriction: `{type, bytesize, count, sign}`, or `None`
/// to skip checking that slot entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeRestrict {
    /// Required datatype, or `Any` to accept either.
    pub datatype: RestrictType,
    /// Required element byte-size.
    pub bytesize: u8,
    /// Required lane count.
    pub count: u8,
    /// Required signedness (ignored for float).
    pub signed: bool,
}

/// Datatype constraint for a [`TypeRestrict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestrictType {
    /// Accept either.
    Any,
    /// Require integer.
    Int,
    /// Require float.
    Float,
}

impl TypeRestrict {
    /// Validates `value`'s vecinfo against this restriction, returning a
    /// soft [`VectorizeError::NotAVectorizeableLoop`] on mismatch.
    pub fn check(&self, graph: &DependencyGraph, value: ValueId) -> VectorizeResult<()> {
        let info = graph
            .vecinfo(value)
            .expect("checked value must carry vecinfo");
        let type_ok = match self.datatype {
            RestrictType::Any => true,
            RestrictType::Int => info.datatype == DataType::Int,
            RestrictType::Float => info.datatype == DataType::Float,
        };
        if !type_ok || info.bytesize != self.bytesize || info.count != self.count {
            return Err(VectorizeError::NotAVectorizeableLoop {
                reason: format!(
                    "argument vecinfo {:?} does not satisfy restriction {:?}",
                    info, self
                ),
            });
        }
        Ok(())
    }
}

/// Per-opcode argument/arity restriction, dispatched via a tagged enum.
#[derive(Debug, Clone)]
pub enum OpRestrict {
    /// One [`TypeRestrict`] per argument slot (`None` entries are unchecked).
    Generic(Vec<Option<TypeRestrict>>),
    /// All non-constant arguments must share the first non-constant
    /// argument's type and byte-size.
    MatchSizeTypeFirst,
    /// Load-family restriction: filling opcount derives from the array
    /// descriptor's item size.
    Load {
        /// Per-argument-slot skip list, mirroring the original's
        /// `LoadRestrict` (`restrictions[i] is None`, or `i` past the end,
        /// means `prepare_arguments` leaves that slot alone instead of
        /// expanding/gathering it into a vector). A load's only argument is
        /// the base address, which is never vectorized.
        skip_args: Vec<bool>,
    },
    /// Store-family restriction: filling opcount derives from the array
    /// descriptor's item size; narrowing sign-extends are inserted when the
    /// vector element size exceeds the stored item size.
    Store {
        /// True if a narrowing sign-extend must be inserted before storing.
        must_crop_vector: bool,
        /// Per-argument-slot skip list (see [`OpRestrict::Load`]). A
        /// store's base address is skipped; its stored value is not.
        skip_args: Vec<bool>,
    },
    /// Guard-family restriction: filling opcount derives from `arg0`'s
    /// byte-size.
    Guard,
}

impl OpRestrict {
    /// Runs the op-family-specific validation beyond plain per-slot type
    /// checks (called once per pack transformation, not per argument).
    pub fn check_operation(
        &self,
        graph: &DependencyGraph,
        args: &[ValueId],
    ) -> VectorizeResult<()> {
        match self {
            OpRestrict::MatchSizeTypeFirst => {
                let first = args
                    .iter()
                    .find_map(|&a| graph.vecinfo(a))
                    .expect("at least one argument must carry vecinfo");
                for &arg in args {
                    if let Some(info) = graph.vecinfo(arg) {
                        if info.datatype != first.datatype || info.bytesize != first.bytesize {
                            return Err(VectorizeError::NotAVectorizeableLoop {
                                reason: "heterogeneous pack rejected by MatchSizeTypeFirst"
                                    .to_string(),
                            });
                        }
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Whether a narrowing sign-extend is required before this store.
    pub fn must_crop_vector(&self, _arg_index: usize) -> bool {
        matches!(self, OpRestrict::Store { must_crop_vector: true, .. })
    }

    /// Whether `prepare_arguments` should leave argument slot `index`
    /// untouched rather than type-checking and expanding/gathering it into
    /// a vector, mirroring the original's `i >= len(restrictions) or
    /// restrictions[i] is None: continue`. Only load/store base addresses
    /// are skipped this way; every other restriction kind vectorizes all
    /// of its arguments.
    pub fn skip_argument(&self, index: usize) -> bool {
        match self {
            OpRestrict::Load { skip_args } | OpRestrict::Store { skip_args, .. } => {
                index >= skip_args.len() || skip_args[index]
            }
            _ => false,
        }
    }

    /// How many scalar operations of `op` fit into one vector register of
    /// `vec_reg_size` bytes, honoring typecasts that change element size.
    pub fn opcount_filling_vector_register(
        &self,
        graph: &DependencyGraph,
        op_result_or_arg0: ValueId,
        vec_reg_size: u32,
    ) -> usize {
        let bytesize = graph
            .vecinfo(op_result_or_arg0)
            .map(|v| v.bytesize)
            .unwrap_or(4);
        (vec_reg_size / u32::from(bytesize)) as usize
    }
}

/// Looks up the [`OpRestrict`] for a vector opcode, following the original
/// design's static `MAPPING` table. Every opcode this crate vectorizes has
/// an entry; looking up a non-vector opcode is a programmer error.
pub fn restriction_for(opcode: Opcode) -> OpRestrict {
    use Opcode::*;
    match opcode {
        VecRawLoad | VecGetArrayItem => OpRestrict::Load {
            skip_args: vec![true],
        },
        VecRawStore | VecSetArrayItem => OpRestrict::Store {
            must_crop_vector: false,
            skip_args: vec![true, false],
        },
        VecGuardTrue | VecGuardFalse => OpRestrict::Guard,
        VecIntAdd | VecIntSub | VecIntMul | VecIntAnd | VecIntOr | VecIntXor | VecIntEq
        | VecIntNe | VecIntIsTrue | VecFloatAdd | VecFloatSub | VecFloatMul
        | VecFloatTrueDiv | VecFloatEq | VecFloatNe => OpRestrict::MatchSizeTypeFirst,
        VecFloatAbs | VecFloatNeg => OpRestrict::Generic(vec![Some(TypeRestrict {
            datatype: RestrictType::Float,
            bytesize: 8,
            count: 2,
            signed: true,
        })]),
        VecCastFloatToSinglefloat
        | VecCastSinglefloatToFloat
        | VecCastFloatToInt
        | VecCastIntToFloat => OpRestrict::Generic(vec![None]),
        _ => OpRestrict::Generic(vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::NodeId;
    use crate::ir::{Op, VecInfo};
    use cranelift_entity::EntityRef;

    fn graph_with_vecinfo(count: u8, bytesize: u8) -> (DependencyGraph, ValueId) {
        let mut g = DependencyGraph::new();
        let n = g.push(crate::graph::Node::new(
            Op::new(Opcode::VecIntAdd, vec![], None),
            0,
        ));
        g.set_vecinfo(n, VecInfo::vector(DataType::Int, bytesize, count, true));
        (g, n)
    }

    #[test]
    fn type_restrict_rejects_size_mismatch() {
        let (g, v) = graph_with_vecinfo(4, 4);
        let r = TypeRestrict {
            datatype: RestrictType::Int,
            bytesize: 8,
            count: 4,
            signed: true,
        };
        assert!(r.check(&g, v).is_err());
    }

    #[test]
    fn match_size_type_first_rejects_heterogeneous_pack() {
        let mut g = DependencyGraph::new();
        let a = g.push(crate::graph::Node::new(Op::new(Opcode::VecIntAdd, vec![], None), 0));
        let b = g.push(crate::graph::Node::new(Op::new(Opcode::VecIntAdd, vec![], None), 1));
        g.set_vecinfo(a, VecInfo::vector(DataType::Int, 4, 4, true));
        g.set_vecinfo(b, VecInfo::vector(DataType::Float, 4, 4, true));
        let restrict = OpRestrict::MatchSizeTypeFirst;
        assert!(restrict.check_operation(&g, &[a, b]).is_err());
        let _ = NodeId::new(0);
    }

    #[test]
    fn restriction_for_store_defaults_to_no_crop() {
        let r = restriction_for(Opcode::VecRawStore);
        assert!(!r.must_crop_vector(0));
    }

    #[test]
    fn load_skips_its_only_argument() {
        let r = restriction_for(Opcode::VecRawLoad);
        assert!(r.skip_argument(0));
    }

    #[test]
    fn store_skips_base_but_not_value() {
        let r = restriction_for(Opcode::VecRawStore);
        assert!(r.skip_argument(0));
        assert!(!r.skip_argument(1));
    }

    #[test]
    fn arithmetic_restriction_never_skips() {
        let r = restriction_for(Opcode::VecIntAdd);
        assert!(!r.skip_argument(0));
        assert!(!r.skip_argument(1));
    }
}
