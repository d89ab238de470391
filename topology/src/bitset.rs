//! Word-packed bitset with ascending iteration (spec Design Notes
//! "Bitsets"). Backs every `*_bitset` field in the data model: group cache
//! SP/host membership, and per-record rank membership.

use bitvec::prelude::*;

#[derive(Debug, Clone, Default)]
pub struct Bitset {
    bits: BitVec<u64, Lsb0>,
}

impl Bitset {
    /// Creates a bitset with at least `len` bits, all clear.
    pub fn new(len: usize) -> Self {
        Bitset {
            bits: bitvec![u64, Lsb0; 0; len],
        }
    }

    /// Sets bit `pos`, growing the backing storage if needed.
    pub fn set(&mut self, pos: usize) {
        if pos >= self.bits.len() {
            self.bits.resize(pos + 1, false);
        }
        self.bits.set(pos, true);
    }

    pub fn test(&self, pos: usize) -> bool {
        self.bits.get(pos).map(|b| *b).unwrap_or(false)
    }

    pub fn count(&self) -> usize {
        self.bits.count_ones()
    }

    /// Ascending positions of every set bit.
    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter_ones()
    }

    /// Resets every bit without shrinking the backing storage.
    pub fn clear(&mut self) {
        self.bits.fill(false);
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }
}
