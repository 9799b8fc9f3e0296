//! Tracks pack savings and glue-op overhead while the transformer runs, and
//! gates whether the vectorized trace is worth keeping.

use crate::settings::Flags;
use log::debug;

/// Accumulates the net benefit of vectorization across an entire loop body.
///
/// Owned by [`crate::vecstate::VecScheduleState`], mirroring the original
/// design where the scheduling state constructs and mutates its own cost
/// model rather than treating it as a pure callback interface.
#[derive(Debug, Clone)]
pub struct CostModel {
    flags: Flags,
    savings: i64,
    overhead: i64,
    casts: u32,
    unpacks: u32,
    packs: u32,
}

impl CostModel {
    /// Builds a cost model with zeroed counters.
    pub fn new(flags: Flags) -> Self {
        CostModel {
            flags,
            savings: 0,
            overhead: 0,
            casts: 0,
            unpacks: 0,
            packs: 0,
        }
    }

    /// Records that a pack of `numops` scalar operations became one vector
    /// op: `numops - 1` scalar ops are retired.
    pub fn record_pack_savings(&mut self, numops: usize) {
        self.savings += (numops as i64 - 1).max(0);
    }

    /// Records that a narrowing/widening int cast had to be inserted.
    pub fn record_cast_int(&mut self) {
        self.casts += 1;
        self.overhead += i64::from(self.flags.pack_overhead());
    }

    /// Records that a `VEC_UNPACK` glue op had to be inserted.
    pub fn record_vector_unpack(&mut self) {
        self.unpacks += 1;
        self.overhead += i64::from(self.flags.pack_overhead());
    }

    /// Records that a `VEC_PACK` glue op had to be inserted.
    pub fn record_vector_pack(&mut self) {
        self.packs += 1;
        self.overhead += i64::from(self.flags.pack_overhead());
    }

    /// Net savings recorded so far (savings minus glue overhead).
    pub fn net(&self) -> i64 {
        self.savings - self.overhead
    }

    /// Final profitability gate: true if the vectorized trace should be
    /// kept rather than discarded in favor of the scalar one.
    pub fn profitable(&self) -> bool {
        let ok = self.net() > 0;
        debug!(
            "cost model: savings={} overhead={} (casts={} unpacks={} packs={}) profitable={}",
            self.savings, self.overhead, self.casts, self.unpacks, self.packs, ok
        );
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_full_pack_with_no_glue_is_profitable() {
        let mut cm = CostModel::new(Flags::default());
        cm.record_pack_savings(4);
        assert!(cm.profitable());
    }

    #[test]
    fn heavy_glue_overhead_defeats_small_pack() {
        let mut cm = CostModel::new(Flags::default());
        cm.record_pack_savings(2);
        cm.record_vector_pack();
        cm.record_vector_unpack();
        cm.record_vector_unpack();
        assert!(!cm.profitable());
    }
}
