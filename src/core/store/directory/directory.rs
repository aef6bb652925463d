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

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::core::store::io::{BufferedChecksumIndexInput, ChecksumIndexInput};
use crate::core::store::io::{IndexInput, IndexOutput};
use crate::core::store::{IOContext, Lock};
use crate::error::Result;

pub type DirectoryRc = Arc<dyn Directory>;

/// A Directory is a flat list of files.
///
/// Files may be written once, when they are created. Once a file is created it
/// may only be opened for read, or deleted. Random access is permitted when
/// reading.
pub trait Directory: fmt::Display + Send + Sync {
    /// Returns the names of all files in the directory, sorted.
    fn list_all(&self) -> Result<Vec<String>>;

    /// Returns the length of a file in the directory, fails with an io
    /// `NotFound` error when the file does not exist.
    fn file_length(&self, name: &str) -> Result<i64>;

    fn file_exists(&self, name: &str) -> Result<bool> {
        Ok(self.list_all()?.iter().any(|n| n == name))
    }

    /// Creates a new, empty file in the directory with the given name.
    /// Returns a stream writing this file.
    fn create_output(&self, name: &str, ctx: &IOContext) -> Result<Box<dyn IndexOutput>>;

    fn open_input(&self, name: &str, ctx: &IOContext) -> Result<Box<dyn IndexInput>>;

    fn open_checksum_input(
        &self,
        name: &str,
        ctx: &IOContext,
    ) -> Result<Box<dyn ChecksumIndexInput>> {
        let input = self.open_input(name, ctx)?;
        Ok(Box::new(BufferedChecksumIndexInput::new(input)))
    }

    /// Opens a handle from which byte range views of `name` can be sliced
    /// without reopening the file.
    fn create_slicer(&self, name: &str, ctx: &IOContext) -> Result<IndexInputSlicer> {
        let base = self.open_input(name, ctx)?;
        Ok(IndexInputSlicer { base })
    }

    /// Acquires the lock named `name` scoped to this directory.
    fn obtain_lock(&self, name: &str) -> Result<Box<dyn Lock>>;

    /// Identifies the lock namespace of this directory: two directories
    /// with the same id share their locks.
    fn lock_id(&self) -> String;

    fn delete_file(&self, name: &str) -> Result<()>;

    /// Ensure that any writes to these files are moved to stable storage.
    fn sync(&self, names: &HashSet<String>) -> Result<()>;

    /// Ensure that directory metadata, such as recent file renames, are made
    /// durable.
    fn sync_meta_data(&self) -> Result<()>;

    /// Renames `source` to `dest`, replacing `dest` if it exists.
    fn rename(&self, source: &str, dest: &str) -> Result<()>;

    fn copy_from(&self, from: &dyn Directory, src: &str, dest: &str, ctx: &IOContext) -> Result<()> {
        let mut is = from.open_input(src, ctx)?;
        let mut os = self.create_output(dest, ctx)?;

        let length = is.len();
        os.copy_bytes(is.as_mut(), length as usize)?;

        Ok(())
    }
}

/// A shareable handle over one open file handing out sub-views.
pub struct IndexInputSlicer {
    base: Box<dyn IndexInput>,
}

impl IndexInputSlicer {
    pub fn new(base: Box<dyn IndexInput>) -> Self {
        IndexInputSlicer { base }
    }

    pub fn open_slice(&self, desc: &str, offset: i64, length: i64) -> Result<Box<dyn IndexInput>> {
        self.base.slice(desc, offset, length)
    }

    /// Returns a clone of the full file.
    pub fn open_full_slice(&self) -> Result<Box<dyn IndexInput>> {
        let mut input = self.base.clone()?;
        input.seek(0)?;
        Ok(input)
    }

    pub fn len(&self) -> u64 {
        self.base.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }
}
