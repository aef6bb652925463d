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

use crate::core::store::io::{DataInput, IndexInput};

use crate::error::ErrorKind::{IllegalArgument, UnexpectedEOF};
use crate::error::Result;

use std::cmp::min;
use std::io::{self, Read};
use std::sync::Arc;

/// `IndexInput` over a shared, immutable in-memory file.
pub struct RAMIndexInput {
    name: String,
    data: Arc<Vec<u8>>,
    offset: usize,
    length: usize,
    pos: usize,
}

impl RAMIndexInput {
    pub fn new(name: String, data: Arc<Vec<u8>>) -> Self {
        let length = data.len();
        RAMIndexInput {
            name,
            data,
            offset: 0,
            length,
            pos: 0,
        }
    }

    #[inline]
    fn remaining(&self) -> &[u8] {
        &self.data[self.offset + self.pos..self.offset + self.length]
    }
}

impl Read for RAMIndexInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let size = {
            let rest = self.remaining();
            let size = min(buf.len(), rest.len());
            buf[..size].copy_from_slice(&rest[..size]);
            size
        };
        self.pos += size;
        Ok(size)
    }
}

impl DataInput for RAMIndexInput {
    fn read_byte(&mut self) -> Result<u8> {
        if self.pos >= self.length {
            bail!(UnexpectedEOF(format!("read past EOF: {}", self.name)));
        }
        let b = self.data[self.offset + self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn skip_bytes(&mut self, count: usize) -> Result<()> {
        if self.pos + count > self.length {
            bail!(UnexpectedEOF(format!("skip past EOF: {}", self.name)));
        }
        self.pos += count;
        Ok(())
    }
}

impl IndexInput for RAMIndexInput {
    fn clone(&self) -> Result<Box<dyn IndexInput>> {
        Ok(Box::new(RAMIndexInput {
            name: self.name.clone(),
            data: Arc::clone(&self.data),
            offset: self.offset,
            length: self.length,
            pos: self.pos,
        }))
    }

    fn file_pointer(&self) -> i64 {
        self.pos as i64
    }

    fn seek(&mut self, pos: i64) -> Result<()> {
        if pos < 0 || pos as usize > self.length {
            bail!(IllegalArgument(format!(
                "seek to {} out of bounds [0, {}] in {}",
                pos, self.length, self.name
            )));
        }
        self.pos = pos as usize;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.length as u64
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn slice(&self, description: &str, offset: i64, length: i64) -> Result<Box<dyn IndexInput>> {
        if offset < 0 || length < 0 || (offset + length) as usize > self.length {
            bail!(IllegalArgument(format!(
                "slice() {} out of bounds: offset={},length={},fileLength={}",
                description, offset, length, self.length
            )));
        }
        Ok(Box::new(RAMIndexInput {
            name: format!("{} [slice={}]", self.name, description),
            data: Arc::clone(&self.data),
            offset: self.offset + offset as usize,
            length: length as usize,
            pos: 0,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_and_seek() {
        let data = Arc::new((0u8..100).collect::<Vec<u8>>());
        let input = RAMIndexInput::new("data".into(), data);
        let mut slice = input.slice("middle", 10, 20).unwrap();
        assert_eq!(slice.len(), 20);
        assert_eq!(slice.read_byte().unwrap(), 10);
        slice.seek(19).unwrap();
        assert_eq!(slice.read_byte().unwrap(), 29);
        assert!(slice.read_byte().is_err());
        assert!(slice.seek(21).is_err());

        let mut nested = slice.slice("inner", 5, 5).unwrap();
        assert_eq!(nested.read_byte().unwrap(), 15);
        let mut cloned = nested.clone().unwrap();
        assert_eq!(cloned.file_pointer(), 1);
        assert_eq!(cloned.read_byte().unwrap(), 16);

        assert!(input.slice("bad", 90, 20).is_err());
    }
}
