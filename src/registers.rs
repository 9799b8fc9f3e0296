//! Register and memory location kinds the vector allocator and emitter
//! exchange, plus the fixed x86-64 XMM register file this crate targets.

use crate::entities::ConstId;

/// One of the sixteen 128-bit XMM registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct XmmReg(u8);

impl XmmReg {
    /// XMM0, never assigned to a value: reserved as the allocator's
    /// designated scratch register for shuffle/extract temporaries.
    pub const SCRATCH: XmmReg = XmmReg(0);

    /// Wraps a raw XMM register number (0-15).
    pub fn new(number: u8) -> Self {
        assert!(number < 16, "x86-64 has only 16 XMM registers");
        XmmReg(number)
    }

    /// The raw register number, as used in ModRM/SIB encoding.
    pub fn encoding(self) -> u8 {
        self.0
    }
}

/// One of the sixteen 64-bit general-purpose registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GprReg(u8);

impl GprReg {
    /// Reserved as the allocator's designated scratch GPR for
    /// extract/insert bridging sequences (`PEXTR`/`PINSR`); never assigned
    /// to a value.
    pub const SCRATCH: GprReg = GprReg(15);

    /// Wraps a raw GPR number (0-15; 4 is RSP, conventionally unused here).
    pub fn new(number: u8) -> Self {
        assert!(number < 16, "x86-64 has only 16 general-purpose registers");
        GprReg(number)
    }

    /// The raw register number.
    pub fn encoding(self) -> u8 {
        self.0
    }
}

/// A value's location after register allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegLoc {
    /// In an XMM register.
    Xmm(XmmReg),
    /// In a general-purpose register.
    Gpr(GprReg),
}

/// A spilled value's stack slot, measured in bytes from the frame base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLoc {
    /// Byte offset from the frame pointer.
    pub offset: i32,
}

/// An immediate integer operand, encoded inline in the instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImmedLoc {
    /// The immediate value.
    pub value: i64,
}

/// A float/double constant materialized in the heap constant pool and
/// referenced by a RIP-relative or absolute load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstFloatLoc {
    /// The constant pool entry holding this value's bytes.
    pub handle: ConstId,
}

/// A memory operand: `[base + index*scale + offset]`, matching x86-64 SIB
/// addressing. `index` is `None` for a plain base+offset form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressLoc {
    /// Base register.
    pub base: GprReg,
    /// Optional scaled index register.
    pub index: Option<GprReg>,
    /// Scale factor for `index` (1, 2, 4 or 8).
    pub scale: u8,
    /// Constant byte offset.
    pub offset: i32,
}

impl AddressLoc {
    /// Builds a plain base+offset address with no index.
    pub fn base_offset(base: GprReg, offset: i32) -> Self {
        AddressLoc {
            base,
            index: None,
            scale: 1,
            offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_registers_are_stable() {
        assert_eq!(XmmReg::SCRATCH.encoding(), 0);
        assert_eq!(GprReg::SCRATCH.encoding(), 15);
    }

    #[test]
    #[should_panic]
    fn xmm_register_numbers_are_bounded() {
        XmmReg::new(16);
    }
}
