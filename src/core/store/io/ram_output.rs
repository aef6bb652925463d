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

use crate::core::store::io::{DataOutput, IndexOutput};

use crate::error::Result;

use flate2::Crc;
use std::io::{self, Write};

/// A memory-resident `IndexOutput` with a running CRC32.
pub struct RAMOutputStream {
    name: String,
    buffer: Vec<u8>,
    crc: Crc,
}

impl RAMOutputStream {
    pub fn new(name: String) -> Self {
        RAMOutputStream {
            name,
            buffer: Vec::new(),
            crc: Crc::new(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Copies the buffered bytes into `out`.
    pub fn write_to(&self, out: &mut dyn DataOutput) -> Result<()> {
        out.write_bytes(&self.buffer, 0, self.buffer.len())
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.crc.reset();
    }
}

impl Write for RAMOutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        self.crc.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl DataOutput for RAMOutputStream {}

impl IndexOutput for RAMOutputStream {
    fn name(&self) -> &str {
        &self.name
    }

    fn file_pointer(&self) -> i64 {
        self.buffer.len() as i64
    }

    fn checksum(&self) -> Result<i64> {
        Ok(i64::from(self.crc.sum()))
    }
}
