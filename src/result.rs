//! Error types returned by the scheduler and pack transformer.

use thiserror::Error;

/// The three outcomes a caller driving this crate needs to distinguish.
///
/// The two "soft" variants are recoverable: the caller falls back to the
/// scalar trace it already has. [`VectorizeError::Cycle`] indicates the
/// upstream dependency graph was malformed (a true cycle, which the
/// scheduler's trash-pack escape hatch could not route around) and is a bug
/// in the caller, not something this crate can recover from on its own.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VectorizeError {
    /// The trace body contains no isomorphic scalar op groups worth
    /// scheduling as vector ops (no pack set, or every candidate pack was
    /// rejected by a safety filter).
    #[error("loop body is not vectorizeable: {reason}")]
    NotAVectorizeableLoop {
        /// Human-readable detail, logged at `debug!` before being returned.
        reason: String,
    },

    /// Packs exist and are individually legal, but the cost model judges the
    /// pack-and-unpack overhead to exceed the savings.
    #[error("loop body is not profitable to vectorize: {reason}")]
    NotAProfitableLoop {
        /// Human-readable detail, logged at `debug!` before being returned.
        reason: String,
    },

    /// The scheduler could not make progress: every remaining node in the
    /// worklist still has unemitted dependencies, and no pack was willing to
    /// delay in order to break the cycle. This should never happen against a
    /// dependency graph built without pre-existing cycles.
    #[error("dependency graph contains a cycle the scheduler could not break")]
    Cycle,
}

/// Convenience alias matching `cranelift_codegen::CodegenResult`.
pub type VectorizeResult<T> = Result<T, VectorizeError>;
