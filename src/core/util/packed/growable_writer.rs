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

use crate::core::util::packed::{get_mutable_by_ratio, max_value, unsigned_bits_required};
use crate::core::util::packed::{Mutable, Reader};
use crate::core::store::io::DataOutput;

use crate::error::Result;

/// Implements `Mutable`, but grows the bit count of the underlying packed
/// ints on-demand.
///
/// Beware that this class will accept to set negative values but in order to
/// do this, it will grow the number of bits per value to 64.
pub struct GrowableWriter {
    current_mask: i64,
    current: Box<dyn Mutable>,
    acceptable_overhead_ratio: f32,
}

impl GrowableWriter {
    pub fn new(start_bits_per_value: i32, value_count: usize, acceptable_overhead_ratio: f32) -> Self {
        let current =
            get_mutable_by_ratio(value_count, start_bits_per_value, acceptable_overhead_ratio);
        let current_mask = mask(current.get_bits_per_value());
        GrowableWriter {
            current_mask,
            current,
            acceptable_overhead_ratio,
        }
    }

    fn ensure_capacity(&mut self, value: i64) {
        if (value & self.current_mask) == value {
            return;
        }
        let bits_required = unsigned_bits_required(value);
        debug_assert!(bits_required > self.current.get_bits_per_value());
        let value_count = self.size();
        let mut next =
            get_mutable_by_ratio(value_count, bits_required, self.acceptable_overhead_ratio);
        for i in 0..value_count {
            next.set(i, self.current.get(i));
        }
        self.current = next;
        self.current_mask = mask(self.current.get_bits_per_value());
    }

    /// Copy of the values in a new writer of `new_size` values.
    pub fn resize(&self, new_size: usize) -> GrowableWriter {
        let mut next = GrowableWriter::new(
            self.get_bits_per_value(),
            new_size,
            self.acceptable_overhead_ratio,
        );
        for i in 0..self.size().min(new_size) {
            next.set(i, self.get(i));
        }
        next
    }
}

fn mask(bits_per_value: i32) -> i64 {
    if bits_per_value == 64 {
        !0
    } else {
        max_value(bits_per_value)
    }
}

impl Reader for GrowableWriter {
    fn get(&self, index: usize) -> i64 {
        self.current.get(index)
    }

    fn size(&self) -> usize {
        self.current.size()
    }

    fn ram_bytes_used(&self) -> usize {
        self.current.ram_bytes_used() + 24
    }
}

impl Mutable for GrowableWriter {
    fn get_bits_per_value(&self) -> i32 {
        self.current.get_bits_per_value()
    }

    fn set(&mut self, index: usize, value: i64) {
        self.ensure_capacity(value);
        self.current.set(index, value);
    }

    fn save(&self, out: &mut dyn DataOutput) -> Result<()> {
        self.current.save(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::util::packed::COMPACT;

    #[test]
    fn test_grows_on_demand() {
        let mut writer = GrowableWriter::new(1, 5, COMPACT);
        writer.set(0, 1);
        assert_eq!(writer.get_bits_per_value(), 1);
        writer.set(1, 1000);
        assert!(writer.get_bits_per_value() >= 10);
        writer.set(2, -1);
        assert_eq!(writer.get_bits_per_value(), 64);
        assert_eq!(writer.get(0), 1);
        assert_eq!(writer.get(1), 1000);
        assert_eq!(writer.get(2), -1);

        let bigger = writer.resize(8);
        assert_eq!(bigger.size(), 8);
        assert_eq!(bigger.get(1), 1000);
        assert_eq!(bigger.get(7), 0);
    }
}
