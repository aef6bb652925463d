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

//! Floating point numbers squeezed into a single byte, used to store
//! per-document length normalization factors.

/// Converts a 32 bit float to an 8 bit float with `num_mantissa_bits` of
/// mantissa and an exponent offset of `zero_exp`.
///
/// Values less than zero are all mapped to zero, values too small to be
/// represented map to the smallest positive value and values too large map
/// to the largest one.
pub fn float_to_byte(f: f32, num_mantissa_bits: u32, zero_exp: i32) -> u8 {
    let four_zero_exp = (63 - zero_exp) << num_mantissa_bits;
    let bits = f.to_bits() as i32;
    let small_float = bits >> (24 - num_mantissa_bits);
    if small_float <= four_zero_exp {
        return if bits <= 0 { 0 } else { 1 };
    }
    if small_float >= four_zero_exp + 0x100 {
        return 255;
    }
    (small_float - four_zero_exp) as u8
}

/// Inverse of `float_to_byte`.
pub fn byte_to_float(b: u8, num_mantissa_bits: u32, zero_exp: i32) -> f32 {
    if b == 0 {
        return 0f32;
    }
    let mut bits = u32::from(b) << (24 - num_mantissa_bits);
    bits += ((63 - zero_exp) as u32) << 24;
    f32::from_bits(bits)
}

pub struct SmallFloat;

impl SmallFloat {
    /// 3 bits of mantissa, exponent offset 15: covers `[5.8e-10, 7.5e9]`
    /// with roughly one significant decimal digit.
    pub fn float_to_byte315(f: f32) -> u8 {
        float_to_byte(f, 3, 15)
    }

    pub fn byte315_to_float(b: u8) -> f32 {
        byte_to_float(b, 3, 15)
    }

    /// 5 bits of mantissa, exponent offset 2.
    pub fn float_to_byte52(f: f32) -> u8 {
        float_to_byte(f, 5, 2)
    }

    pub fn byte52_to_float(b: u8) -> f32 {
        byte_to_float(b, 5, 2)
    }
}
