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

use crate::core::util::ZigZagEncoding;
use crate::error::ErrorKind::{CorruptIndex, IllegalArgument, UnexpectedEOF};
use crate::error::Result;

use byteorder::{BigEndian, ReadBytesExt};

use std::collections::{HashMap, HashSet};
use std::io::Read;

/// Abstract base for performing read operations of the index's low-level
/// data types. Fixed width integers are big endian.
pub trait DataInput: Read {
    fn read_byte(&mut self) -> Result<u8> {
        let mut buffer = [0u8; 1];
        if self.read(&mut buffer)? != 1 {
            bail!(UnexpectedEOF(
                "Reached EOF when a single byte is expected".to_owned()
            ))
        } else {
            Ok(buffer[0])
        }
    }

    fn read_bytes(&mut self, b: &mut [u8], offset: usize, length: usize) -> Result<()> {
        let end = offset + length;
        if b.len() < end {
            bail!(IllegalArgument(format!(
                "Buffer too small: writing [{}, {}) to [0, {})",
                offset,
                end,
                b.len(),
            )));
        }
        if self.read_exact(&mut b[offset..end]).is_err() {
            bail!(UnexpectedEOF(format!(
                "Reached EOF when {} bytes are expected",
                length
            )));
        }
        Ok(())
    }

    fn read_short(&mut self) -> Result<i16> {
        Ok(self.read_i16::<BigEndian>()?)
    }

    fn read_int(&mut self) -> Result<i32> {
        Ok(self.read_i32::<BigEndian>()?)
    }

    /// Reads an int stored in variable-length format. Reads between one and
    /// five bytes. Smaller values take fewer bytes. Negative numbers are
    /// supported, but should be avoided.
    fn read_vint(&mut self) -> Result<i32> {
        let mut b = self.read_byte()?;
        let mut i = i32::from(b & 0x7f);
        let mut shift = 7;
        while b & 0x80 != 0 {
            if shift > 28 {
                bail!(CorruptIndex("Invalid vInt detected (too many bits)".into()));
            }
            b = self.read_byte()?;
            if shift == 28 && b & 0xf0 != 0 {
                bail!(CorruptIndex("Invalid vInt detected (too many bits)".into()));
            }
            i |= i32::from(b & 0x7f) << shift;
            shift += 7;
        }
        Ok(i)
    }

    fn read_zint(&mut self) -> Result<i32> {
        Ok(self.read_vint()?.decode())
    }

    fn read_long(&mut self) -> Result<i64> {
        Ok(self.read_i64::<BigEndian>()?)
    }

    /// Reads a long stored in variable-length format. Reads between one and
    /// nine bytes. Negative numbers are not supported.
    fn read_vlong(&mut self) -> Result<i64> {
        read_vlong_ex(self, false)
    }

    fn read_zlong(&mut self) -> Result<i64> {
        Ok(read_vlong_ex(self, true)?.decode())
    }

    fn read_string(&mut self) -> Result<String> {
        let length = self.read_vint()?;
        if length < 0 {
            bail!(CorruptIndex(format!("Invalid string length: {}", length)));
        }
        let mut buffer = vec![0u8; length as usize];
        self.read_bytes(&mut buffer, 0, length as usize)?;
        Ok(String::from_utf8(buffer)?)
    }

    fn read_map_of_strings(&mut self) -> Result<HashMap<String, String>> {
        let count = self.read_vint()?;
        if count < 0 {
            bail!(CorruptIndex("Invalid StringMap detected".to_owned()));
        }
        let mut map = HashMap::with_capacity(count as usize);
        for _ in 0..count {
            let k = self.read_string()?;
            let v = self.read_string()?;
            map.insert(k, v);
        }
        Ok(map)
    }

    fn read_set_of_strings(&mut self) -> Result<HashSet<String>> {
        let count = self.read_vint()?;
        if count < 0 {
            bail!(CorruptIndex("Invalid StringSet detected".to_owned()));
        }
        let mut set = HashSet::with_capacity(count as usize);
        for _ in 0..count {
            set.insert(self.read_string()?);
        }
        Ok(set)
    }

    fn skip_bytes(&mut self, count: usize) -> Result<()> {
        const SKIP_BUFFER_SIZE: usize = 1024;
        let mut skip_buffer = [0u8; SKIP_BUFFER_SIZE];
        let mut skipped = 0;

        while skipped < count {
            let step = ::std::cmp::min(SKIP_BUFFER_SIZE, count - skipped);
            self.read_bytes(&mut skip_buffer, 0, step)?;
            skipped += step;
        }
        Ok(())
    }
}

fn read_vlong_ex<T: DataInput + ?Sized>(input: &mut T, negative_allowed: bool) -> Result<i64> {
    let max_shift = if negative_allowed { 63 } else { 56 };
    let mut b = input.read_byte()?;
    let mut i = i64::from(b & 0x7f);
    let mut shift = 7;
    while b & 0x80 != 0 {
        if shift > max_shift {
            bail!(CorruptIndex("Invalid vLong detected".into()));
        }
        b = input.read_byte()?;
        if shift == 63 && b > 1 {
            bail!(CorruptIndex("Invalid vLong detected".into()));
        }
        i |= i64::from(b & 0x7f) << shift;
        shift += 7;
    }
    Ok(i)
}

impl<'a> DataInput for &'a [u8] {
    fn read_byte(&mut self) -> Result<u8> {
        if self.is_empty() {
            bail!(UnexpectedEOF("failed to fill whole buffer".into()));
        }
        let b = self[0];
        *self = &self[1..];
        Ok(b)
    }

    fn skip_bytes(&mut self, count: usize) -> Result<()> {
        if self.len() < count {
            bail!(UnexpectedEOF("failed to fill whole buffer".into()));
        }
        *self = &self[count..];
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::io::DataOutput;

    #[test]
    fn test_vint_300_is_two_bytes() {
        let mut out: Vec<u8> = Vec::new();
        out.write_vint(300).unwrap();
        assert_eq!(out, vec![0xAC, 0x02]);

        let mut input: &[u8] = &out;
        assert_eq!(input.read_vint().unwrap(), 300);
        assert!(input.is_empty());
    }

    #[test]
    fn test_variable_length_sizes() {
        let cases: Vec<(i64, usize)> = vec![
            (0, 1),
            (127, 1),
            (128, 2),
            (16_383, 2),
            (16_384, 3),
            (i64::from(i32::max_value()), 5),
            (i64::max_value(), 9),
        ];
        for (value, size) in cases {
            let mut out: Vec<u8> = Vec::new();
            out.write_vlong(value).unwrap();
            assert_eq!(out.len(), size, "value {}", value);
            let mut input: &[u8] = &out;
            assert_eq!(input.read_vlong().unwrap(), value);
        }
    }

    #[test]
    fn test_negative_vint_and_zigzag() {
        let mut out: Vec<u8> = Vec::new();
        out.write_vint(-1).unwrap();
        out.write_zint(-3).unwrap();
        out.write_zlong(i64::min_value()).unwrap();
        assert_eq!(out.len(), 5 + 1 + 10);

        let mut input: &[u8] = &out;
        assert_eq!(input.read_vint().unwrap(), -1);
        assert_eq!(input.read_zint().unwrap(), -3);
        assert_eq!(input.read_zlong().unwrap(), i64::min_value());
    }

    #[test]
    fn test_strings_maps_and_sets() {
        let mut map = HashMap::new();
        map.insert("b".to_string(), "2".to_string());
        map.insert("a".to_string(), "1".to_string());
        let mut set = HashSet::new();
        set.insert("x".to_string());

        let mut out: Vec<u8> = Vec::new();
        out.write_string("héllo").unwrap();
        out.write_map_of_strings(&map).unwrap();
        out.write_set_of_strings(&set).unwrap();
        out.write_short(-2).unwrap();
        out.write_long(0x0102_0304_0506_0708).unwrap();

        let mut input: &[u8] = &out;
        assert_eq!(input.read_string().unwrap(), "héllo");
        assert_eq!(input.read_map_of_strings().unwrap(), map);
        assert_eq!(input.read_set_of_strings().unwrap(), set);
        assert_eq!(input.read_short().unwrap(), -2);
        assert_eq!(input.read_long().unwrap(), 0x0102_0304_0506_0708);
        assert!(input.read_byte().is_err());
    }

    #[test]
    fn test_corrupt_vint() {
        let bytes = [0xffu8, 0xff, 0xff, 0xff, 0xff, 0x01];
        let mut input: &[u8] = &bytes;
        assert!(input.read_vint().is_err());
    }
}
