//! Byte-level x86-64 SSE2/SSSE3/SSE4.1/SSE4.2 machine code writer.
//!
//! Mirrors the teacher's [`CodeSink`] split: a thin `put1`/`put2`/`put4`
//! trait for raw bytes, implemented here by an in-memory buffer rather than
//! `MemoryCodeSink`'s raw pointer, since this crate hands its caller a
//! relocatable `Vec<u8>` rather than writing directly into executable
//! memory. REX/ModRM/SIB encoding follows the Intel SDM directly; there is
//! no opcode table indirection because this crate only ever targets one
//! ISA.
//!
//! [`CodeSink`]: https://docs.rs/cranelift-codegen

use crate::registers::{AddressLoc, GprReg, XmmReg};

/// Raw byte sink an instruction encoder writes into. Kept as a trait (not
/// just `Vec<u8>` methods) so tests can swap in a sink that also records
/// offsets.
pub trait CodeSink {
    /// Current write offset, in bytes.
    fn offset(&self) -> u32;
    /// Appends one byte.
    fn put1(&mut self, x: u8);
    /// Appends a little-endian `u32`.
    fn put4(&mut self, x: u32);
    /// Appends a little-endian `i32`.
    fn put4_signed(&mut self, x: i32) {
        self.put4(x as u32);
    }
    /// Appends a little-endian `u64`.
    fn put8(&mut self, x: u64);
}

/// In-memory machine code buffer. The emitter appends fixed-width SSE
/// encodings to this and later hands the resulting bytes to a
/// `MachineCodeBlockWrapper`-shaped consumer.
#[derive(Debug, Default, Clone)]
pub struct MachineCodeWriter {
    bytes: Vec<u8>,
}

impl CodeSink for MachineCodeWriter {
    fn offset(&self) -> u32 {
        self.bytes.len() as u32
    }

    fn put1(&mut self, x: u8) {
        self.bytes.push(x);
    }

    fn put4(&mut self, x: u32) {
        self.bytes.extend_from_slice(&x.to_le_bytes());
    }

    fn put8(&mut self, x: u64) {
        self.bytes.extend_from_slice(&x.to_le_bytes());
    }
}

/// Bitfields of a REX prefix: `W` (64-bit operand), `R` (ModRM.reg
/// extension), `X` (SIB.index extension), `B` (ModRM.rm/SIB.base/opcode.reg
/// extension).
#[derive(Debug, Clone, Copy, Default)]
struct Rex {
    w: bool,
    r: bool,
    x: bool,
    b: bool,
}

impl Rex {
    fn byte(self) -> u8 {
        0x40 | (self.w as u8) << 3 | (self.r as u8) << 2 | (self.x as u8) << 1 | self.b as u8
    }

    fn needed(self) -> bool {
        self.w || self.r || self.x || self.b
    }
}

/// Mandatory SSE opcode prefix selecting which "extension" a two-byte
/// `0F xx` opcode belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefix {
    /// No mandatory prefix (packed single-precision float ops).
    None,
    /// `66` — packed integer / packed double-precision ops.
    OperandSize,
    /// `F2` — scalar double-precision ops.
    RepNe,
    /// `F3` — scalar single-precision ops.
    Rep,
}

impl MachineCodeWriter {
    /// Builds an empty writer.
    pub fn new() -> Self {
        MachineCodeWriter::default()
    }

    /// Consumes the writer, returning the encoded bytes.
    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }

    /// Current write offset.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if nothing has been emitted yet.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn modrm_reg(&mut self, modrm_reg: u8, rm: u8) {
        self.put1(0xc0 | (modrm_reg & 7) << 3 | (rm & 7));
    }

    fn modrm_mem(&mut self, modrm_reg: u8, addr: AddressLoc) {
        let base_low = addr.base.encoding() & 7;
        let needs_sib = base_low == 4 || addr.index.is_some();
        let disp_form = if addr.offset == 0 && base_low != 5 {
            0u8
        } else if (-128..=127).contains(&addr.offset) {
            1u8
        } else {
            2u8
        };
        let rm_field = if needs_sib { 4 } else { base_low };
        self.put1((disp_form << 6) | (modrm_reg & 7) << 3 | rm_field);
        if needs_sib {
            let scale_bits = match addr.scale {
                1 => 0,
                2 => 1,
                4 => 2,
                8 => 3,
                other => panic!("invalid SIB scale {}", other),
            };
            let index_low = addr.index.map(|r| r.encoding() & 7).unwrap_or(4);
            self.put1((scale_bits << 6) | (index_low << 3) | base_low);
        }
        match disp_form {
            1 => self.put1(addr.offset as i8 as u8),
            2 => self.put4_signed(addr.offset),
            _ => {}
        }
    }

    fn prefix_byte(prefix: Prefix) -> Option<u8> {
        match prefix {
            Prefix::None => None,
            Prefix::OperandSize => Some(0x66),
            Prefix::RepNe => Some(0xf2),
            Prefix::Rep => Some(0xf3),
        }
    }

    /// Encodes a two-operand `0F xx /r` SSE instruction with an XMM
    /// destination/source register pair: `OP xmm_dst, xmm_src`.
    pub fn emit_rr(&mut self, prefix: Prefix, opcode: u8, dst: XmmReg, src: XmmReg) {
        if let Some(p) = Self::prefix_byte(prefix) {
            self.put1(p);
        }
        let rex = Rex {
            r: dst.encoding() >= 8,
            b: src.encoding() >= 8,
            ..Rex::default()
        };
        if rex.needed() {
            self.put1(rex.byte());
        }
        self.put1(0x0f);
        self.put1(opcode);
        self.modrm_reg(dst.encoding(), src.encoding());
    }

    /// Encodes a three-byte `0F 38/3A xx /r` SSE4.1 instruction with no
    /// immediate (e.g. `PMULLD`, `PCMPEQQ`, `PSHUFB`, `PTEST`).
    pub fn emit_rr_escape(
        &mut self,
        prefix: Prefix,
        escape: u8,
        opcode: u8,
        dst: XmmReg,
        src: XmmReg,
    ) {
        if let Some(p) = Self::prefix_byte(prefix) {
            self.put1(p);
        }
        let rex = Rex {
            r: dst.encoding() >= 8,
            b: src.encoding() >= 8,
            ..Rex::default()
        };
        if rex.needed() {
            self.put1(rex.byte());
        }
        self.put1(0x0f);
        self.put1(escape);
        self.put1(opcode);
        self.modrm_reg(dst.encoding(), src.encoding());
    }

    /// Encodes a three-byte `0F 3A/38 xx /r ib` SSE4.1 instruction with an
    /// immediate byte (e.g. `PBLENDW`, `PEXTRD`).
    pub fn emit_rr_imm8(
        &mut self,
        prefix: Prefix,
        escape: u8,
        opcode: u8,
        dst: XmmReg,
        src: XmmReg,
        imm8: u8,
    ) {
        if let Some(p) = Self::prefix_byte(prefix) {
            self.put1(p);
        }
        let rex = Rex {
            r: dst.encoding() >= 8,
            b: src.encoding() >= 8,
            ..Rex::default()
        };
        if rex.needed() {
            self.put1(rex.byte());
        }
        self.put1(0x0f);
        self.put1(escape);
        self.put1(opcode);
        self.modrm_reg(dst.encoding(), src.encoding());
        self.put1(imm8);
    }

    /// Encodes `OP xmm_dst, [address]`: a load-form instruction reading
    /// from memory.
    pub fn emit_rm(&mut self, prefix: Prefix, opcode: u8, dst: XmmReg, addr: AddressLoc) {
        if let Some(p) = Self::prefix_byte(prefix) {
            self.put1(p);
        }
        let rex = Rex {
            r: dst.encoding() >= 8,
            x: addr.index.map(|r| r.encoding() >= 8).unwrap_or(false),
            b: addr.base.encoding() >= 8,
            ..Rex::default()
        };
        if rex.needed() {
            self.put1(rex.byte());
        }
        self.put1(0x0f);
        self.put1(opcode);
        self.modrm_mem(dst.encoding(), addr);
    }

    /// Encodes `OP [address], xmm_src`: a store-form instruction writing to
    /// memory.
    pub fn emit_mr(&mut self, prefix: Prefix, opcode: u8, addr: AddressLoc, src: XmmReg) {
        self.emit_rm(prefix, opcode, src, addr);
    }

    /// `PINSRD`/`PINSRQ xmm_dst, gpr_src, imm8` — SSE4.1 lane insert from a
    /// general-purpose register.
    pub fn emit_pinsr(&mut self, wide: bool, dst: XmmReg, src: GprReg, imm8: u8) {
        self.put1(0x66);
        let rex = Rex {
            w: wide,
            r: dst.encoding() >= 8,
            b: src.encoding() >= 8,
            ..Rex::default()
        };
        if rex.needed() {
            self.put1(rex.byte());
        }
        self.put1(0x0f);
        self.put1(0x3a);
        // PINSRD and PINSRQ share opcode 0x22; REX.W selects the 64-bit form.
        self.put1(0x22);
        self.modrm_reg(dst.encoding(), src.encoding());
        self.put1(imm8);
    }

    /// `PEXTRD`/`PEXTRQ gpr_dst, xmm_src, imm8` — SSE4.1 lane extract into a
    /// general-purpose register.
    pub fn emit_pextr(&mut self, wide: bool, dst: GprReg, src: XmmReg, imm8: u8) {
        self.put1(0x66);
        let rex = Rex {
            w: wide,
            r: src.encoding() >= 8,
            b: dst.encoding() >= 8,
            ..Rex::default()
        };
        if rex.needed() {
            self.put1(rex.byte());
        }
        self.put1(0x0f);
        self.put1(0x3a);
        self.put1(0x16);
        self.modrm_reg(src.encoding(), dst.encoding());
        self.put1(imm8);
    }

    /// `MOVD`/`MOVQ xmm_dst, gpr_src`.
    pub fn emit_movd_to_xmm(&mut self, wide: bool, dst: XmmReg, src: GprReg) {
        self.put1(0x66);
        let rex = Rex {
            w: wide,
            r: dst.encoding() >= 8,
            b: src.encoding() >= 8,
            ..Rex::default()
        };
        if rex.needed() {
            self.put1(rex.byte());
        }
        self.put1(0x0f);
        self.put1(0x6e);
        self.modrm_reg(dst.encoding(), src.encoding());
    }

    /// `MOVD`/`MOVQ gpr_dst, xmm_src`.
    pub fn emit_movd_from_xmm(&mut self, wide: bool, dst: GprReg, src: XmmReg) {
        self.put1(0x66);
        let rex = Rex {
            w: wide,
            r: src.encoding() >= 8,
            b: dst.encoding() >= 8,
            ..Rex::default()
        };
        if rex.needed() {
            self.put1(rex.byte());
        }
        self.put1(0x0f);
        self.put1(0x7e);
        self.modrm_reg(src.encoding(), dst.encoding());
    }

    /// `MOVSD`/`MOVSS xmm_dst, [rip + disp]` for loading a constant-pool
    /// entry via a RIP-relative displacement. `disp` is patched by the
    /// caller once the constant pool's final layout is known.
    pub fn emit_rip_load(&mut self, prefix: Prefix, opcode: u8, dst: XmmReg, disp: i32) {
        if let Some(p) = Self::prefix_byte(prefix) {
            self.put1(p);
        }
        if dst.encoding() >= 8 {
            self.put1(Rex { r: true, ..Rex::default() }.byte());
        }
        self.put1(0x0f);
        self.put1(opcode);
        self.put1((0 << 6) | (dst.encoding() & 7) << 3 | 5);
        self.put4_signed(disp);
    }

    /// Appends a `jcc rel32` branch with a placeholder displacement,
    /// returning the offset of the 4-byte displacement field for later
    /// patching once the target offset is known.
    pub fn emit_jcc_rel32_placeholder(&mut self, condition: u8) -> u32 {
        self.put1(0x0f);
        self.put1(0x80 | condition);
        let patch_at = self.offset();
        self.put4_signed(0);
        patch_at
    }

    /// Overwrites a previously emitted `rel32` displacement at `patch_at`
    /// (as returned by [`MachineCodeWriter::emit_jcc_rel32_placeholder`])
    /// so the branch lands at `target_offset`.
    pub fn patch_rel32(&mut self, patch_at: u32, target_offset: u32) {
        let rel = target_offset as i64 - (patch_at as i64 + 4);
        let bytes = (rel as i32).to_le_bytes();
        let at = patch_at as usize;
        self.bytes[at..at + 4].copy_from_slice(&bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_rr_without_rex_for_low_registers() {
        let mut w = MachineCodeWriter::new();
        w.emit_rr(Prefix::None, 0x58, XmmReg::new(1), XmmReg::new(2));
        assert_eq!(w.finish(), vec![0x0f, 0x58, 0xc1]);
    }

    #[test]
    fn emit_rr_sets_rex_for_high_registers() {
        let mut w = MachineCodeWriter::new();
        w.emit_rr(Prefix::OperandSize, 0xfe, XmmReg::new(9), XmmReg::new(1));
        assert_eq!(w.finish(), vec![0x66, 0x44, 0x0f, 0xfe, 0xc9]);
    }

    #[test]
    fn patch_rel32_computes_relative_displacement() {
        let mut w = MachineCodeWriter::new();
        let patch_at = w.emit_jcc_rel32_placeholder(0x4);
        w.put1(0x90);
        let target = w.offset();
        w.patch_rel32(patch_at, target);
        let bytes = w.finish();
        let rel = i32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        assert_eq!(rel, 1);
    }
}
