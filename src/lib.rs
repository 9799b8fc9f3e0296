//! Auto-vectorization core for a tracing JIT compiler back-end.
//!
//! Takes a linear trace of scalar operations recorded by a tracing
//! interpreter, packs isomorphic groups of them into SIMD operations, and
//! emits x86-64 SSE2/SSSE3/SSE4.1/SSE4.2 machine code for the result. See
//! [`pack`] for how groups are discovered, [`vecstate`] for how a pack
//! becomes one vector op, and [`emit`] for how a vector op becomes bytes.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]
#![cfg_attr(
    feature = "cargo-clippy",
    allow(
        clippy::many_single_char_names,
        clippy::identity_op,
        clippy::cast_lossless,
        clippy::unreadable_literal,
        clippy::too_many_arguments,
        clippy::match_same_arms
    )
)]

pub use cranelift_entity as entity;

pub mod constants;
pub mod costmodel;
pub mod emit;
pub mod entities;
pub mod graph;
pub mod ir;
pub mod mcwriter;
pub mod pack;
pub mod regalloc;
pub mod registers;
pub mod restrict;
pub mod result;
pub mod scheduler;
pub mod settings;
pub mod vecstate;

pub use crate::result::{VectorizeError, VectorizeResult};
pub use crate::settings::Flags;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
