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

pub trait ZigZagEncoding {
    fn encode(&self) -> Self;
    fn decode(&self) -> Self;
}

impl ZigZagEncoding for i32 {
    fn encode(&self) -> i32 {
        (*self >> 31) ^ (self << 1)
    }
    fn decode(&self) -> i32 {
        (*self as u32 >> 1) as i32 ^ -(self & 1)
    }
}

impl ZigZagEncoding for i64 {
    fn encode(&self) -> i64 {
        (*self >> 63) ^ (self << 1)
    }
    fn decode(&self) -> i64 {
        (*self as u64 >> 1) as i64 ^ -(self & 1)
    }
}

pub trait UnsignedShift: Sized {
    fn unsigned_shift(&self, by: usize) -> Self;
}

macro_rules! impl_unsigned_shift {
    ($type: ty, $utype: ty) => {
        impl UnsignedShift for $type {
            #[inline]
            fn unsigned_shift(&self, by: usize) -> Self {
                (*self as $utype >> by) as $type
            }
        }
    };
}

impl_unsigned_shift!(i32, u32);
impl_unsigned_shift!(i64, u64);

/// number of bits needed to represent the value, at least 1
pub trait BitsRequired {
    fn bits_required(&self) -> u32;
}

macro_rules! impl_bits_required {
    ($type:ty, $width: expr) => {
        impl BitsRequired for $type {
            #[inline]
            fn bits_required(&self) -> u32 {
                1.max($width - (*self).leading_zeros())
            }
        }
    };
}

impl_bits_required!(i32, 32);
impl_bits_required!(u32, 32);
impl_bits_required!(i64, 64);
impl_bits_required!(u64, 64);

/// Number of u64 words needed to hold `num_bits` bits.
#[inline]
pub fn bits2words(num_bits: usize) -> usize {
    if num_bits == 0 {
        0
    } else {
        ((num_bits - 1) >> 6) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zig_zag() {
        for v in &[0i32, -1, 1, -64, 63, i32::min_value(), i32::max_value()] {
            assert_eq!(v.encode().decode(), *v);
        }
        assert_eq!((-1i64).encode(), 1);
        assert_eq!(1i64.encode(), 2);
    }

    #[test]
    fn test_bits_required() {
        assert_eq!(0u64.bits_required(), 1);
        assert_eq!(255u64.bits_required(), 8);
        assert_eq!(256i64.bits_required(), 9);
        assert_eq!(bits2words(0), 0);
        assert_eq!(bits2words(64), 1);
        assert_eq!(bits2words(65), 2);
    }
}
