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

use crate::core::store::io::{DataInput, DataOutput};

use crate::error::Result;
use std::cmp::min;
use std::io::{self, Read, Write};

/// DataInput backed by a byte array.
pub struct ByteArrayDataInput<T: AsRef<[u8]>> {
    bytes: T,
    pos: usize,
}

impl<T: AsRef<[u8]>> ByteArrayDataInput<T> {
    pub fn new(bytes: T) -> ByteArrayDataInput<T> {
        ByteArrayDataInput { bytes, pos: 0usize }
    }

    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn set_position(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn length(&self) -> usize {
        self.bytes.as_ref().len()
    }

    pub fn eof(&self) -> bool {
        self.pos >= self.length()
    }

    pub fn reset(&mut self, bytes: T) {
        self.bytes = bytes;
        self.pos = 0;
    }
}

impl<T: AsRef<[u8]>> DataInput for ByteArrayDataInput<T> {
    fn read_byte(&mut self) -> Result<u8> {
        if self.eof() {
            bail!(crate::error::ErrorKind::UnexpectedEOF(format!(
                "read past end of {} bytes",
                self.length()
            )));
        }
        let b = self.bytes.as_ref()[self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn skip_bytes(&mut self, count: usize) -> Result<()> {
        self.pos += count;
        Ok(())
    }
}

impl<T: AsRef<[u8]>> Read for ByteArrayDataInput<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let bytes = self.bytes.as_ref();
        if self.pos >= bytes.len() {
            return Ok(0);
        }
        let size = min(buf.len(), bytes.len() - self.pos);
        buf[..size].copy_from_slice(&bytes[self.pos..self.pos + size]);
        self.pos += size;
        Ok(size)
    }
}

/// DataOutput writing into a fixed slice.
pub struct ByteArrayDataOutput<'a> {
    bytes: &'a mut [u8],
    pos: usize,
    limit: usize,
}

impl<'a> ByteArrayDataOutput<'a> {
    pub fn new(bytes: &'a mut [u8], offset: usize, len: usize) -> ByteArrayDataOutput<'a> {
        ByteArrayDataOutput {
            bytes,
            pos: offset,
            limit: offset + len,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }
}

impl<'a> Write for ByteArrayDataOutput<'a> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let size = min(buf.len(), self.limit - self.pos);
        self.bytes[self.pos..self.pos + size].copy_from_slice(&buf[..size]);
        self.pos += size;
        Ok(size)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> DataOutput for ByteArrayDataOutput<'a> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_output_and_input() {
        let mut buf = [0u8; 8];
        {
            let mut out = ByteArrayDataOutput::new(&mut buf, 2, 6);
            out.write_vint(300).unwrap();
            out.write_short(7).unwrap();
            assert_eq!(out.position(), 6);
            out.write_int(1).unwrap_err();
        }
        let mut input = ByteArrayDataInput::new(&buf[..]);
        input.set_position(2);
        assert_eq!(input.read_vint().unwrap(), 300);
        assert_eq!(input.read_short().unwrap(), 7);
        assert_eq!(input.position(), 6);
        input.skip_bytes(2).unwrap();
        assert!(input.eof());
        assert!(input.read_byte().is_err());
        input.rewind();
        assert_eq!(input.read_byte().unwrap(), 0);
    }
}
