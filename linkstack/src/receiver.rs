//! Receive-side state of one perfect link: the delivered set.
//!
//! [`DeliveredSet`] remembers which data sequence numbers from one peer have
//! already been handed to the application.  Sequence numbers start at 1 and
//! the transport delivers nothing sent before the process started, so the set
//! is stored as a contiguous prefix (`1..=watermark`) plus the sparse numbers
//! above it.  Whenever the gap above the watermark closes, those numbers are
//! folded into the prefix and forgotten.
//!
//! ```text
//!    delivered prefix      sparse
//!  ├──────────────────┤   ┌─┐ ┌─┐
//!  1 ......... watermark   w+2 w+5
//! ```

use std::collections::BTreeSet;

#[derive(Debug, Default)]
pub struct DeliveredSet {
    /// Every sequence number in `1..=watermark` has been delivered.
    watermark: u64,
    /// Delivered sequence numbers above `watermark + 1`.
    above: BTreeSet<u64>,
}

impl DeliveredSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `seq` as delivered.
    ///
    /// Returns `true` when `seq` is new and must be delivered now; `false` for
    /// a duplicate.
    pub fn insert(&mut self, seq: u64) -> bool {
        if seq <= self.watermark || !self.above.insert(seq) {
            return false;
        }
        while self.above.remove(&(self.watermark + 1)) {
            self.watermark += 1;
        }
        true
    }

    pub fn contains(&self, seq: u64) -> bool {
        seq <= self.watermark || self.above.contains(&seq)
    }

    /// Highest sequence number below which nothing is missing.
    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    /// Number of sequence numbers tracked individually above the watermark.
    pub fn sparse_len(&self) -> usize {
        self.above.len()
    }
}
