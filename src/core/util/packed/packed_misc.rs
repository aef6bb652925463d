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

//! Simplistic compression for arrays of unsigned long values: each value is
//! stored with `bits_per_value` bits, trading random-access speed against
//! memory through an acceptable overhead ratio.

use crate::core::codec::codec_util;
use crate::core::store::io::{DataInput, DataOutput};
use crate::core::util::BitsRequired;

use crate::error::{ErrorKind::IllegalArgument, Result};

use std::cmp::min;

/// At most 700% memory overhead, always select a direct implementation.
pub const FASTEST: f32 = 7.0;

/// At most 50% memory overhead, always select a reasonably fast implementation.
pub const FAST: f32 = 0.5;

/// At most 25% memory overhead.
pub const DEFAULT: f32 = 0.25;

/// No memory overhead at all, but the returned implementation may be slow.
pub const COMPACT: f32 = 0.0;

pub const CODEC_NAME: &str = "PackedInts";
pub const VERSION_START: i32 = 2;
pub const VERSION_CURRENT: i32 = VERSION_START;

/// Id of the only on-disk format: all bits written contiguously.
const FORMAT_PACKED: i32 = 0;

/// `>>>` operator for i64
#[inline]
pub fn rshift_64(value: i64, bits: i32) -> i64 {
    ((value as u64) >> bits) as i64
}

pub fn unsigned_bits_required(bits: i64) -> i32 {
    (bits as u64).bits_required() as i32
}

pub fn max_value(bits_per_value: i32) -> i64 {
    debug_assert!(bits_per_value > 0 && bits_per_value <= 64);
    if bits_per_value == 64 {
        i64::max_value()
    } else {
        !(!0i64 << bits_per_value)
    }
}

/// Number of bytes needed to store `value_count` values of `bits_per_value`.
fn byte_count(value_count: usize, bits_per_value: i32) -> usize {
    (value_count * bits_per_value as usize + 7) / 8
}

fn long_count(value_count: usize, bits_per_value: i32) -> usize {
    (byte_count(value_count, bits_per_value) + 7) / 8
}

/// Chosen storage width for a value count, bits per value and overhead.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FormatAndBits {
    pub bits_per_value: i32,
}

impl FormatAndBits {
    /// Picks the fastest width whose overhead stays within
    /// `acceptable_overhead_ratio` (clamped to `[COMPACT, FASTEST]`).
    pub fn fastest(bits_per_value: i32, acceptable_overhead_ratio: f32) -> FormatAndBits {
        let ratio = FASTEST.min(COMPACT.max(acceptable_overhead_ratio));
        let acceptable_overhead_per_value = ratio * bits_per_value as f32;
        let max_bits_per_value = bits_per_value + acceptable_overhead_per_value as i32;

        let actual = [8, 16, 32, 64]
            .iter()
            .cloned()
            .find(|&width| bits_per_value <= width && max_bits_per_value >= width)
            .unwrap_or(bits_per_value);
        FormatAndBits {
            bits_per_value: actual,
        }
    }
}

/// A read-only random access array of positive integers.
pub trait Reader: Send + Sync {
    fn get(&self, index: usize) -> i64;

    /// Bulk get: read at least one and at most `len` values starting from
    /// `index` into `output`, returning the number of values read.
    fn bulk_get(&self, index: usize, output: &mut [i64], len: usize) -> usize {
        let gets = min(self.size() - index, min(len, output.len()));
        for (i, v) in output.iter_mut().enumerate().take(gets) {
            *v = self.get(index + i);
        }
        gets
    }

    fn size(&self) -> usize;

    fn ram_bytes_used(&self) -> usize;
}

/// A packed integer array that can be modified.
pub trait Mutable: Reader {
    fn get_bits_per_value(&self) -> i32;

    fn set(&mut self, index: usize, value: i64);

    fn fill(&mut self, from: usize, to: usize, val: i64) {
        debug_assert!(val <= max_value(self.get_bits_per_value()));
        debug_assert!(from <= to);
        for i in from..to {
            self.set(i, val);
        }
    }

    fn clear(&mut self) {
        let len = self.size();
        self.fill(0, len, 0);
    }

    /// Save this mutable into `out`, header included. Instantiating a reader
    /// from the stream with `get_reader` gives back the same values.
    fn save(&self, out: &mut dyn DataOutput) -> Result<()> {
        let bpv = self.get_bits_per_value();
        codec_util::write_header(out, CODEC_NAME, VERSION_CURRENT)?;
        out.write_vint(bpv)?;
        out.write_vint(self.size() as i32)?;
        out.write_vint(FORMAT_PACKED)?;

        let mut packed = Packed64::new(self.size(), bpv);
        for i in 0..self.size() {
            packed.set(i, self.get(i));
        }
        packed.write_blocks(out)
    }
}

pub fn get_mutable_by_ratio(
    value_count: usize,
    bits_per_value: i32,
    acceptable_overhead_ratio: f32,
) -> Box<dyn Mutable> {
    let format_and_bits = FormatAndBits::fastest(bits_per_value, acceptable_overhead_ratio);
    get_mutable_by_bits(value_count, format_and_bits.bits_per_value)
}

pub fn get_mutable_by_bits(value_count: usize, bits_per_value: i32) -> Box<dyn Mutable> {
    match bits_per_value {
        8 => Box::new(Direct8::new(value_count)),
        16 => Box::new(Direct16::new(value_count)),
        32 => Box::new(Direct32::new(value_count)),
        64 => Box::new(Direct64::new(value_count)),
        _ => Box::new(Packed64::new(value_count, bits_per_value)),
    }
}

/// Restore a `Reader` from a stream written by `Mutable::save`.
pub fn get_reader<T: DataInput + ?Sized>(input: &mut T) -> Result<Box<dyn Reader>> {
    codec_util::check_header(input, CODEC_NAME, VERSION_START, VERSION_CURRENT)?;
    let bits_per_value = input.read_vint()?;
    if bits_per_value <= 0 || bits_per_value > 64 {
        bail!(IllegalArgument(format!(
            "invalid bits_per_value: {}",
            bits_per_value
        )));
    }
    let value_count = input.read_vint()? as usize;
    let format = input.read_vint()?;
    if format != FORMAT_PACKED {
        bail!(IllegalArgument(format!("unknown packed format: {}", format)));
    }
    let packed = Packed64::from_input(input, value_count, bits_per_value)?;
    Ok(match bits_per_value {
        8 | 16 | 32 | 64 => {
            let mut direct = get_mutable_by_bits(value_count, bits_per_value);
            for i in 0..value_count {
                direct.set(i, packed.get(i));
            }
            into_reader(direct)
        }
        _ => Box::new(packed),
    })
}

fn into_reader(mutable: Box<dyn Mutable>) -> Box<dyn Reader> {
    Box::new(MutableReader(mutable))
}

struct MutableReader(Box<dyn Mutable>);

impl Reader for MutableReader {
    fn get(&self, index: usize) -> i64 {
        self.0.get(index)
    }

    fn size(&self) -> usize {
        self.0.size()
    }

    fn ram_bytes_used(&self) -> usize {
        self.0.ram_bytes_used()
    }
}

macro_rules! direct_impl {
    ($name:ident, $ty:ty, $bits:expr) => {
        /// Direct wrapping of a primitive array, no packing.
        pub struct $name {
            values: Vec<$ty>,
        }

        impl $name {
            pub fn new(value_count: usize) -> Self {
                $name {
                    values: vec![0; value_count],
                }
            }
        }

        impl Reader for $name {
            #[inline]
            fn get(&self, index: usize) -> i64 {
                self.values[index] as i64
            }

            fn size(&self) -> usize {
                self.values.len()
            }

            fn ram_bytes_used(&self) -> usize {
                self.values.len() * ($bits / 8) + 24
            }
        }

        impl Mutable for $name {
            fn get_bits_per_value(&self) -> i32 {
                $bits
            }

            #[inline]
            fn set(&mut self, index: usize, value: i64) {
                self.values[index] = value as $ty;
            }
        }
    };
}

direct_impl!(Direct8, u8, 8);
direct_impl!(Direct16, u16, 16);
direct_impl!(Direct32, u32, 32);
direct_impl!(Direct64, i64, 64);

const PACKED64_BLOCK_SIZE: i32 = 64;
const PACKED64_BLOCK_BITS: usize = 6;
const PACKED64_BLOCK_MOD_MASK: usize = 63;

/// Space optimized random access capable array of values with a fixed number
/// of bits/value. Values are packed contiguously, the first value occupying
/// the highest bits of the first block.
pub struct Packed64 {
    value_count: usize,
    bits_per_value: i32,
    blocks: Vec<u64>,
    mask_right: u64,
    bpv_minus_block_size: i32,
}

impl Packed64 {
    pub fn new(value_count: usize, bits_per_value: i32) -> Packed64 {
        debug_assert!(bits_per_value > 0 && bits_per_value <= 64);
        Packed64 {
            value_count,
            bits_per_value,
            blocks: vec![0u64; long_count(value_count, bits_per_value)],
            mask_right: !0u64 >> (PACKED64_BLOCK_SIZE - bits_per_value),
            bpv_minus_block_size: bits_per_value - PACKED64_BLOCK_SIZE,
        }
    }

    pub fn from_input<T: DataInput + ?Sized>(
        input: &mut T,
        value_count: usize,
        bits_per_value: i32,
    ) -> Result<Packed64> {
        let mut packed = Packed64::new(value_count, bits_per_value);
        let byte_count = byte_count(value_count, bits_per_value);
        for i in 0..byte_count / 8 {
            packed.blocks[i] = input.read_long()? as u64;
        }
        let remain = byte_count % 8;
        if remain != 0 {
            let mut last = 0u64;
            for i in 0..remain {
                last |= u64::from(input.read_byte()?) << (56 - i * 8);
            }
            let idx = packed.blocks.len() - 1;
            packed.blocks[idx] = last;
        }
        Ok(packed)
    }

    fn write_blocks(&self, out: &mut dyn DataOutput) -> Result<()> {
        let byte_count = byte_count(self.value_count, self.bits_per_value);
        for i in 0..byte_count / 8 {
            out.write_long(self.blocks[i] as i64)?;
        }
        let remain = byte_count % 8;
        if remain != 0 {
            let last = self.blocks[self.blocks.len() - 1];
            for i in 0..remain {
                out.write_byte((last >> (56 - i * 8)) as u8)?;
            }
        }
        Ok(())
    }
}

impl Reader for Packed64 {
    fn get(&self, index: usize) -> i64 {
        let major_bit_pos = index * self.bits_per_value as usize;
        let element_pos = major_bit_pos >> PACKED64_BLOCK_BITS;
        let end_bits =
            (major_bit_pos & PACKED64_BLOCK_MOD_MASK) as i32 + self.bpv_minus_block_size;

        if end_bits <= 0 {
            ((self.blocks[element_pos] >> -end_bits) & self.mask_right) as i64
        } else {
            (((self.blocks[element_pos] << end_bits)
                | (self.blocks[element_pos + 1] >> (PACKED64_BLOCK_SIZE - end_bits)))
                & self.mask_right) as i64
        }
    }

    fn size(&self) -> usize {
        self.value_count
    }

    fn ram_bytes_used(&self) -> usize {
        self.blocks.len() * 8 + 40
    }
}

impl Mutable for Packed64 {
    fn get_bits_per_value(&self) -> i32 {
        self.bits_per_value
    }

    fn set(&mut self, index: usize, value: i64) {
        let value = value as u64;
        let major_bit_pos = index * self.bits_per_value as usize;
        let element_pos = major_bit_pos >> PACKED64_BLOCK_BITS;
        let end_bits =
            (major_bit_pos & PACKED64_BLOCK_MOD_MASK) as i32 + self.bpv_minus_block_size;

        if end_bits <= 0 {
            self.blocks[element_pos] = self.blocks[element_pos]
                & !(self.mask_right << -end_bits)
                | (value << -end_bits);
        } else {
            self.blocks[element_pos] =
                self.blocks[element_pos] & !(self.mask_right >> end_bits) | (value >> end_bits);
            self.blocks[element_pos + 1] = self.blocks[element_pos + 1]
                & (!0u64 >> end_bits)
                | (value << (PACKED64_BLOCK_SIZE - end_bits));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::io::ByteArrayDataInput;

    #[test]
    fn test_fastest_width() {
        assert_eq!(FormatAndBits::fastest(7, COMPACT).bits_per_value, 7);
        assert_eq!(FormatAndBits::fastest(7, FAST).bits_per_value, 8);
        assert_eq!(FormatAndBits::fastest(17, FAST).bits_per_value, 17);
        assert_eq!(FormatAndBits::fastest(17, FASTEST).bits_per_value, 32);
        assert_eq!(FormatAndBits::fastest(64, COMPACT).bits_per_value, 64);
    }

    #[test]
    fn test_packed64_get_set_across_blocks() {
        for bpv in &[1, 3, 7, 13, 31, 33, 63] {
            let count = 200;
            let mut packed = Packed64::new(count, *bpv);
            let max = max_value(*bpv);
            for i in 0..count {
                packed.set(i, (i as i64 * 7919) & max);
            }
            for i in 0..count {
                assert_eq!(packed.get(i), (i as i64 * 7919) & max, "bpv={}", bpv);
            }
        }
    }

    #[test]
    fn test_save_and_load() {
        for bpv in &[5, 8, 16, 21] {
            let mut mutable = get_mutable_by_ratio(37, *bpv, COMPACT);
            for i in 0..37 {
                mutable.set(i, (i as i64 * 3) & max_value(*bpv));
            }
            let mut out: Vec<u8> = Vec::new();
            mutable.save(&mut out).unwrap();

            let mut input = ByteArrayDataInput::new(out);
            let reader = get_reader(&mut input).unwrap();
            assert_eq!(reader.size(), 37);
            for i in 0..37 {
                assert_eq!(reader.get(i), mutable.get(i));
            }
        }
    }

    #[test]
    fn test_bulk_get() {
        let mut mutable = get_mutable_by_bits(10, 8);
        mutable.fill(0, 10, 9);
        let mut buf = [0i64; 4];
        assert_eq!(mutable.bulk_get(8, &mut buf, 4), 2);
        assert_eq!(&buf[..2], &[9, 9]);
        assert_eq!(unsigned_bits_required(255), 8);
    }
}
