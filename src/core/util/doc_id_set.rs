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

use std::sync::Arc;

use crate::core::search::{DocIdSet, DocIterator, EmptyDocIterator};
use crate::core::util::bit_set::BitSetIterator;
use crate::core::util::{Accountable, FixedBitSet};

use crate::error::Result;

/// A `DocIdSet` backed by a `FixedBitSet`. Cheap to iterate many times, so
/// it is the representation used when caching filter results.
pub struct BitDocIdSet {
    bits: Arc<FixedBitSet>,
    cost: usize,
}

impl BitDocIdSet {
    pub fn new(bits: FixedBitSet) -> Self {
        let cost = bits.cardinality();
        BitDocIdSet {
            bits: Arc::new(bits),
            cost,
        }
    }

    /// Collects every doc of `iter` into a new bit set of `max_doc` bits.
    pub fn from_iterator(iter: &mut dyn DocIterator, max_doc: usize) -> Result<Self> {
        let mut bits = FixedBitSet::new(max_doc);
        bits.or(iter)?;
        Ok(Self::new(bits))
    }

    pub fn bits(&self) -> &FixedBitSet {
        &self.bits
    }
}

impl DocIdSet for BitDocIdSet {
    fn iterator(&self) -> Result<Option<Box<dyn DocIterator>>> {
        Ok(Some(Box::new(BitSetIterator::new(
            Arc::clone(&self.bits),
            self.cost,
        ))))
    }

    fn is_cacheable(&self) -> bool {
        true
    }
}

impl Accountable for BitDocIdSet {
    fn ram_bytes_used(&self) -> usize {
        self.bits.ram_bytes_used() + 16
    }
}

/// A `DocIdSet` that matches nothing.
pub struct EmptyDocIdSet;

impl DocIdSet for EmptyDocIdSet {
    fn iterator(&self) -> Result<Option<Box<dyn DocIterator>>> {
        Ok(Some(Box::new(EmptyDocIterator::default())))
    }

    fn is_cacheable(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::search::tests::MockDocIterator;
    use crate::core::search::NO_MORE_DOCS;

    #[test]
    fn test_bit_doc_id_set_replays() {
        let mut source = MockDocIterator::new(vec![2, 5, 9]);
        let set = BitDocIdSet::from_iterator(&mut source, 10).unwrap();
        assert_eq!(set.bits().cardinality(), 3);
        for _ in 0..2 {
            let mut iter = set.iterator().unwrap().unwrap();
            assert_eq!(iter.next().unwrap(), 2);
            assert_eq!(iter.advance(6).unwrap(), 9);
            assert_eq!(iter.next().unwrap(), NO_MORE_DOCS);
        }
    }
}
