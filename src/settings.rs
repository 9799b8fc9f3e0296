//! Tunable knobs for the scheduler, transformer and cost model.
//!
//! Kept deliberately small: this crate has nowhere near the number of
//! target-specific flags `cranelift_codegen::settings` carries, but follows
//! the same shape (an immutable [`Flags`] built once via [`Builder`]) so that
//! callers already familiar with that crate feel at home.

/// Immutable configuration consumed by the scheduler, transformer and
/// register allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags {
    vector_register_bytes: u8,
    pack_overhead: i32,
    min_pack_size: u8,
}

impl Flags {
    /// Width, in bytes, of one vector register (16 for SSE2-class XMM
    /// registers; this crate never targets AVX's 32-byte YMM).
    pub fn vector_register_bytes(&self) -> u8 {
        self.vector_register_bytes
    }

    /// Fixed cost charged against a pack's savings for every glue op
    /// (`VEC_PACK`/`VEC_UNPACK`/`VEC_INT_SIGNEXT`) the transformer has to
    /// insert around it.
    pub fn pack_overhead(&self) -> i32 {
        self.pack_overhead
    }

    /// Packs smaller than this are never considered, regardless of cost.
    pub fn min_pack_size(&self) -> u8 {
        self.min_pack_size
    }
}

impl Default for Flags {
    fn default() -> Self {
        Builder::new().finish()
    }
}

/// Builder for [`Flags`]; only setters that this crate actually needs are
/// exposed.
#[derive(Debug, Clone, Copy)]
pub struct Builder {
    vector_register_bytes: u8,
    pack_overhead: i32,
    min_pack_size: u8,
}

impl Builder {
    /// Creates a builder with the defaults used in production: 16-byte (SSE)
    /// vector registers, a pack overhead of 1 cost unit per glue op, and a
    /// minimum pack size of 2.
    pub fn new() -> Self {
        Builder {
            vector_register_bytes: 16,
            pack_overhead: 1,
            min_pack_size: 2,
        }
    }

    /// Overrides the vector register width, in bytes.
    pub fn vector_register_bytes(mut self, bytes: u8) -> Self {
        self.vector_register_bytes = bytes;
        self
    }

    /// Overrides the per-glue-op cost overhead used by the cost model.
    pub fn pack_overhead(mut self, overhead: i32) -> Self {
        self.pack_overhead = overhead;
        self
    }

    /// Overrides the minimum pack size the transformer will consider.
    pub fn min_pack_size(mut self, size: u8) -> Self {
        self.min_pack_size = size;
        self
    }

    /// Freezes the builder into a [`Flags`] value.
    pub fn finish(self) -> Flags {
        Flags {
            vector_register_bytes: self.vector_register_bytes,
            pack_overhead: self.pack_overhead,
            min_pack_size: self.min_pack_size,
        }
    }
}

impl Default for Builder {
    fn default() -> Self {
        Builder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_sse2() {
        let flags = Flags::default();
        assert_eq!(flags.vector_register_bytes(), 16);
        assert_eq!(flags.min_pack_size(), 2);
    }

    #[test]
    fn builder_overrides_take_effect() {
        let flags = Builder::new().pack_overhead(3).min_pack_size(4).finish();
        assert_eq!(flags.pack_overhead(), 3);
        assert_eq!(flags.min_pack_size(), 4);
        assert_eq!(flags.vector_register_bytes(), 16);
    }
}
