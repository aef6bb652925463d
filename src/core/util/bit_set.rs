// Copyright 2019 Zhizhesihai (Beijing) Technology Limited.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::core::search::{DocIterator, NO_MORE_DOCS};
use crate::core::util::bit_util::bits2words;
use crate::core::util::{Bits, DocId};

use crate::error::{ErrorKind, Result};

/// BitSet of fixed length (`num_bits`), backed by a `Vec<u64>`, accessed with
/// an usize index. Used for live docs and for cached doc id sets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FixedBitSet {
    bits: Vec<u64>,
    num_bits: usize,
}

impl Default for FixedBitSet {
    fn default() -> Self {
        FixedBitSet {
            bits: Vec::with_capacity(0),
            num_bits: 0,
        }
    }
}

impl FixedBitSet {
    pub fn new(num_bits: usize) -> FixedBitSet {
        FixedBitSet {
            bits: vec![0; bits2words(num_bits)],
            num_bits,
        }
    }

    /// A bit set with every bit in `[0, num_bits)` set.
    pub fn with_all_set(num_bits: usize) -> FixedBitSet {
        let mut bits = FixedBitSet::new(num_bits);
        bits.set_range(0, num_bits);
        bits
    }

    /// Wraps the given words. Bits beyond `num_bits` must be clear.
    pub fn from_words(words: Vec<u64>, num_bits: usize) -> Result<FixedBitSet> {
        if bits2words(num_bits) > words.len() {
            bail!(ErrorKind::IllegalArgument(format!(
                "The given word array is too small to hold {} bits.",
                num_bits
            )));
        }
        let bits = FixedBitSet {
            bits: words,
            num_bits,
        };
        if !bits.verify_ghost_bits_clear() {
            bail!(ErrorKind::CorruptIndex(
                "bits beyond num_bits must be clear".into()
            ));
        }
        Ok(bits)
    }

    pub fn words(&self) -> &[u64] {
        &self.bits
    }

    fn verify_ghost_bits_clear(&self) -> bool {
        let num_words = bits2words(self.num_bits);
        if self.bits[num_words..].iter().any(|w| *w != 0) {
            return false;
        }
        if self.num_bits & 0x3f == 0 {
            return true;
        }
        let mask = !0u64 << (self.num_bits & 0x3f);
        self.bits[num_words - 1] & mask == 0
    }

    #[inline]
    pub fn get_bit(&self, index: usize) -> bool {
        debug_assert!(index < self.num_bits);
        self.bits[index >> 6] & (1u64 << (index & 0x3f)) != 0
    }

    #[inline]
    pub fn set(&mut self, index: usize) {
        debug_assert!(index < self.num_bits);
        self.bits[index >> 6] |= 1u64 << (index & 0x3f);
    }

    /// Sets the bit and returns its previous value.
    pub fn get_and_set(&mut self, index: usize) -> bool {
        let word = index >> 6;
        let mask = 1u64 << (index & 0x3f);
        let val = self.bits[word] & mask != 0;
        self.bits[word] |= mask;
        val
    }

    #[inline]
    pub fn clear(&mut self, index: usize) {
        debug_assert!(index < self.num_bits);
        self.bits[index >> 6] &= !(1u64 << (index & 0x3f));
    }

    /// Clears the bit and returns its previous value.
    pub fn get_and_clear(&mut self, index: usize) -> bool {
        let word = index >> 6;
        let mask = 1u64 << (index & 0x3f);
        let val = self.bits[word] & mask != 0;
        self.bits[word] &= !mask;
        val
    }

    /// Sets the bits in `[start, end)`.
    pub fn set_range(&mut self, start: usize, end: usize) {
        for i in start..end {
            self.set(i);
        }
    }

    pub fn clear_all(&mut self) {
        for w in &mut self.bits {
            *w = 0;
        }
    }

    pub fn cardinality(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns the index of the first set bit at or after `index`, or
    /// `NO_MORE_DOCS` if there is none.
    pub fn next_set_bit(&self, index: usize) -> DocId {
        if index >= self.num_bits {
            return NO_MORE_DOCS;
        }
        let mut i = index >> 6;
        let word = self.bits[i] >> (index & 0x3f);
        if word != 0 {
            return (index + word.trailing_zeros() as usize) as DocId;
        }
        i += 1;
        while i < bits2words(self.num_bits) {
            let word = self.bits[i];
            if word != 0 {
                return ((i << 6) + word.trailing_zeros() as usize) as DocId;
            }
            i += 1;
        }
        NO_MORE_DOCS
    }

    /// In place OR with the docs of an unpositioned iterator.
    pub fn or(&mut self, iter: &mut dyn DocIterator) -> Result<()> {
        if iter.doc_id() != -1 {
            bail!(ErrorKind::IllegalState(format!(
                "This operation only works with an unpositioned iterator, got current position = \
                 {}",
                iter.doc_id()
            )));
        }
        loop {
            let doc = iter.next()?;
            if doc == NO_MORE_DOCS {
                break;
            }
            self.set(doc as usize);
        }
        Ok(())
    }

    pub fn ram_bytes_used(&self) -> usize {
        self.bits.len() * 8 + 16
    }
}

impl Bits for FixedBitSet {
    fn get(&self, index: usize) -> Result<bool> {
        if index >= self.num_bits {
            bail!(ErrorKind::IllegalArgument(format!(
                "index {} out of bounds [0, {})",
                index, self.num_bits
            )));
        }
        Ok(self.get_bit(index))
    }

    fn len(&self) -> usize {
        self.num_bits
    }
}

/// `DocIterator` over the set bits of a `FixedBitSet`.
pub struct BitSetIterator<B: AsRef<FixedBitSet> + Send> {
    bits: B,
    doc: DocId,
    cost: usize,
}

impl<B: AsRef<FixedBitSet> + Send> BitSetIterator<B> {
    pub fn new(bits: B, cost: usize) -> Self {
        BitSetIterator {
            bits,
            doc: -1,
            cost,
        }
    }
}

impl AsRef<FixedBitSet> for FixedBitSet {
    fn as_ref(&self) -> &FixedBitSet {
        self
    }
}

impl<B: AsRef<FixedBitSet> + Send> DocIterator for BitSetIterator<B> {
    fn doc_id(&self) -> DocId {
        self.doc
    }

    fn next(&mut self) -> Result<DocId> {
        let target = self.doc + 1;
        self.advance(target)
    }

    fn advance(&mut self, target: DocId) -> Result<DocId> {
        self.doc = if target == NO_MORE_DOCS {
            NO_MORE_DOCS
        } else {
            self.bits.as_ref().next_set_bit(target as usize)
        };
        Ok(self.doc)
    }

    fn cost(&self) -> usize {
        self.cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_set_get_clear() {
        let mut bits = FixedBitSet::new(130);
        assert_eq!(bits.cardinality(), 0);
        bits.set(0);
        bits.set(64);
        bits.set(129);
        assert!(bits.get(64).unwrap());
        assert!(!bits.get(65).unwrap());
        assert_eq!(bits.cardinality(), 3);
        assert!(bits.get_and_clear(64));
        assert!(!bits.get_and_clear(64));
        assert_eq!(bits.cardinality(), 2);
        assert!(bits.get(130).is_err());
    }

    #[test]
    fn test_next_set_bit() {
        let mut bits = FixedBitSet::new(200);
        bits.set(3);
        bits.set(150);
        assert_eq!(bits.next_set_bit(0), 3);
        assert_eq!(bits.next_set_bit(4), 150);
        assert_eq!(bits.next_set_bit(151), NO_MORE_DOCS);
        assert_eq!(bits.next_set_bit(500), NO_MORE_DOCS);
    }

    #[test]
    fn test_from_words_rejects_ghost_bits() {
        assert!(FixedBitSet::from_words(vec![0b1000], 3).is_err());
        let bits = FixedBitSet::from_words(vec![0b100], 3).unwrap();
        assert!(bits.get(2).unwrap());
        assert_eq!(FixedBitSet::with_all_set(70).cardinality(), 70);
    }

    #[test]
    fn test_bit_set_iterator() {
        let mut bits = FixedBitSet::new(100);
        for i in &[1usize, 10, 99] {
            bits.set(*i);
        }
        let mut iter = BitSetIterator::new(Arc::new(bits), 3);
        assert_eq!(iter.next().unwrap(), 1);
        assert_eq!(iter.advance(11).unwrap(), 99);
        assert_eq!(iter.next().unwrap(), NO_MORE_DOCS);
    }
}
