//! Heap constant pool for the fixed 16-byte SSE masks the emitter needs:
//! float/double sign and absolute-value masks, and the byte-expand mask used
//! by `PSHUFB`-based broadcasts.
//!
//! The pool avoids emitting the same mask twice (`insert` dedups by data,
//! exactly like a general-purpose constant pool would), but this crate only
//! ever inserts the five well-known masks named in the design notes, so
//! [`ConstantPool::well_known`] is the entry point most callers want.

use crate::entities::ConstId;
use cranelift_entity::EntityRef;
use std::collections::{BTreeMap, HashMap};

/// Raw constant bytes, always 16-byte aligned data for this crate's masks.
pub type ConstantData = Vec<u8>;

/// Byte offset of a constant from the start of the compiled loop's constant
/// area. Unknown until the loop body's machine code size is final.
pub type ConstantOffset = u32;

#[derive(Clone)]
struct ConstantPoolEntry {
    data: ConstantData,
    offset: Option<ConstantOffset>,
}

/// Deduplicating pool of heap constants referenced by `AddressLoc`s with a
/// well-known base.
#[derive(Clone)]
pub struct ConstantPool {
    handles_to_values: BTreeMap<ConstId, ConstantPoolEntry>,
    values_to_handles: HashMap<ConstantData, ConstId>,
}

impl ConstantPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        ConstantPool {
            handles_to_values: BTreeMap::new(),
            values_to_handles: HashMap::new(),
        }
    }

    /// Inserts constant data, returning a handle; duplicate data returns the
    /// previously-assigned handle.
    pub fn insert(&mut self, data: ConstantData) -> ConstId {
        if let Some(existing) = self.values_to_handles.get(&data) {
            return *existing;
        }
        let handle = ConstId::new(self.handles_to_values.len());
        self.values_to_handles.insert(data.clone(), handle);
        self.handles_to_values
            .insert(handle, ConstantPoolEntry { data, offset: None });
        handle
    }

    /// Retrieves constant data for a handle returned by this pool.
    pub fn get(&self, handle: ConstId) -> &ConstantData {
        &self.handles_to_values[&handle].data
    }

    /// Assigns a constant's offset from the start of the constant area, once
    /// the loop body's machine code size is known.
    pub fn set_offset(&mut self, handle: ConstId, offset: ConstantOffset) {
        self.handles_to_values
            .get_mut(&handle)
            .expect("constant handle must come from this pool")
            .offset = Some(offset);
    }

    /// Retrieves a previously assigned offset.
    pub fn get_offset(&self, handle: ConstId) -> ConstantOffset {
        self.handles_to_values[&handle]
            .offset
            .expect("set_offset must be called before get_offset")
    }

    /// Number of distinct constants in the pool.
    pub fn len(&self) -> usize {
        self.handles_to_values.len()
    }

    /// True if the pool holds no constants.
    pub fn is_empty(&self) -> bool {
        self.handles_to_values.is_empty()
    }

    fn well_known(&mut self, data: [u8; 16]) -> ConstId {
        self.insert(data.to_vec())
    }

    /// Absolute-value mask for packed doubles: clears the sign bit of each
    /// 8-byte lane.
    pub fn float_const_abs_addr(&mut self) -> ConstId {
        self.well_known([
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0x7f,
        ])
    }

    /// Sign-flip mask for packed doubles: flips the sign bit of each 8-byte
    /// lane.
    pub fn float_const_neg_addr(&mut self) -> ConstId {
        self.well_known([
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x80,
        ])
    }

    /// Absolute-value mask for packed singles: clears the sign bit of each
    /// 4-byte lane.
    pub fn single_float_const_abs_addr(&mut self) -> ConstId {
        self.well_known([
            0xff, 0xff, 0xff, 0x7f, 0xff, 0xff, 0xff, 0x7f, 0xff, 0xff, 0xff, 0x7f, 0xff, 0xff,
            0xff, 0x7f,
        ])
    }

    /// Sign-flip mask for packed singles: flips the sign bit of each 4-byte
    /// lane.
    pub fn single_float_const_neg_addr(&mut self) -> ConstId {
        self.well_known([
            0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00, 0x80, 0x00, 0x00,
            0x00, 0x80,
        ])
    }

    /// `PSHUFB` control mask broadcasting byte 0 of the source into every
    /// lane; used to expand a single byte to all 16 lanes of a register.
    pub fn expand_byte_mask_addr(&mut self) -> ConstId {
        self.well_known([0u8; 16])
    }
}

impl Default for ConstantPool {
    fn default() -> Self {
        ConstantPool::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_dedups_by_data() {
        let mut pool = ConstantPool::new();
        let a = pool.insert(vec![1, 2, 3]);
        let b = pool.insert(vec![1, 2, 3]);
        assert_eq!(a, b);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn well_known_masks_are_stable_handles() {
        let mut pool = ConstantPool::new();
        let abs1 = pool.float_const_abs_addr();
        let neg = pool.float_const_neg_addr();
        let abs2 = pool.float_const_abs_addr();
        assert_eq!(abs1, abs2);
        assert_ne!(abs1, neg);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn offsets_round_trip() {
        let mut pool = ConstantPool::new();
        let handle = pool.expand_byte_mask_addr();
        pool.set_offset(handle, 128);
        assert_eq!(pool.get_offset(handle), 128);
    }

    #[test]
    #[should_panic]
    fn unset_offset_panics() {
        let mut pool = ConstantPool::new();
        let handle = pool.expand_byte_mask_addr();
        pool.get_offset(handle);
    }
}
