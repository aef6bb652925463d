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

use crate::core::store::directory::Directory;
use crate::core::store::io::{DataOutput, IndexInput, IndexOutput, RAMIndexInput};
use crate::core::store::{IOContext, Lock, LockFactory, SingleInstanceLockFactory};

use crate::error::ErrorKind::IllegalArgument;
use crate::error::Result;

use flate2::Crc;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

lazy_static! {
    static ref NEXT_DIRECTORY_ID: AtomicUsize = AtomicUsize::new(0);
}

type FileMap = Arc<RwLock<BTreeMap<String, Arc<Vec<u8>>>>>;

/// A memory-resident `Directory`.
///
/// A file is visible from `create_output` on, its bytes are published when the
/// output is dropped. Cloning gives another handle on the same files and locks.
#[derive(Clone)]
pub struct RAMDirectory {
    id: usize,
    files: FileMap,
    lock_factory: SingleInstanceLockFactory,
}

impl RAMDirectory {
    pub fn new() -> RAMDirectory {
        RAMDirectory {
            id: NEXT_DIRECTORY_ID.fetch_add(1, Ordering::AcqRel),
            files: Arc::new(RwLock::new(BTreeMap::new())),
            lock_factory: SingleInstanceLockFactory::new(),
        }
    }

    /// Total bytes held by published files.
    pub fn ram_bytes_used(&self) -> Result<usize> {
        Ok(self.files.read()?.values().map(|f| f.len()).sum())
    }

    fn not_found(name: &str) -> io::Error {
        io::Error::new(io::ErrorKind::NotFound, format!("file '{}' not found", name))
    }
}

impl Default for RAMDirectory {
    fn default() -> Self {
        RAMDirectory::new()
    }
}

impl Directory for RAMDirectory {
    fn list_all(&self) -> Result<Vec<String>> {
        // BTreeMap keys are already sorted
        Ok(self.files.read()?.keys().cloned().collect())
    }

    fn file_length(&self, name: &str) -> Result<i64> {
        match self.files.read()?.get(name) {
            Some(f) => Ok(f.len() as i64),
            None => Err(Self::not_found(name).into()),
        }
    }

    fn file_exists(&self, name: &str) -> Result<bool> {
        Ok(self.files.read()?.contains_key(name))
    }

    fn create_output(&self, name: &str, _ctx: &IOContext) -> Result<Box<dyn IndexOutput>> {
        let mut files = self.files.write()?;
        if files.contains_key(name) {
            bail!(IllegalArgument(format!("file '{}' already exists", name)));
        }
        files.insert(name.to_string(), Arc::new(Vec::new()));
        Ok(Box::new(RAMFileOutput {
            name: name.to_string(),
            buffer: Vec::new(),
            crc: Crc::new(),
            files: Arc::clone(&self.files),
        }))
    }

    fn open_input(&self, name: &str, _ctx: &IOContext) -> Result<Box<dyn IndexInput>> {
        match self.files.read()?.get(name) {
            Some(f) => Ok(Box::new(RAMIndexInput::new(name.to_string(), Arc::clone(f)))),
            None => Err(Self::not_found(name).into()),
        }
    }

    fn obtain_lock(&self, name: &str) -> Result<Box<dyn Lock>> {
        self.lock_factory.obtain_lock(&self.lock_id(), name)
    }

    fn lock_id(&self) -> String {
        format!("ram@{}", self.id)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        match self.files.write()?.remove(name) {
            Some(_) => Ok(()),
            None => Err(Self::not_found(name).into()),
        }
    }

    fn sync(&self, _names: &HashSet<String>) -> Result<()> {
        Ok(())
    }

    fn sync_meta_data(&self) -> Result<()> {
        Ok(())
    }

    fn rename(&self, source: &str, dest: &str) -> Result<()> {
        let mut files = self.files.write()?;
        match files.remove(source) {
            Some(f) => {
                files.insert(dest.to_string(), f);
                Ok(())
            }
            None => Err(Self::not_found(source).into()),
        }
    }
}

impl fmt::Display for RAMDirectory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RAMDirectory({})", self.id)
    }
}

struct RAMFileOutput {
    name: String,
    buffer: Vec<u8>,
    crc: Crc,
    files: FileMap,
}

impl Write for RAMFileOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        self.crc.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl DataOutput for RAMFileOutput {}

impl IndexOutput for RAMFileOutput {
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

impl Drop for RAMFileOutput {
    fn drop(&mut self) {
        let data = Arc::new(::std::mem::replace(&mut self.buffer, Vec::new()));
        match self.files.write() {
            Ok(mut files) => {
                // a file deleted while still being written stays deleted
                if let Some(f) = files.get_mut(&self.name) {
                    *f = data;
                }
            }
            Err(e) => error!("RAMDirectory: publish '{}' failed: {:?}", self.name, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::io::DataInput;

    #[test]
    fn test_write_read_list() {
        let dir = RAMDirectory::new();
        {
            let mut out = dir.create_output("b.bin", &IOContext::Default).unwrap();
            out.write_vint(300).unwrap();
            out.write_string("hello").unwrap();
            assert_eq!(out.file_pointer(), 8);
            assert!(dir.file_exists("b.bin").unwrap());
        }
        {
            let mut out = dir.create_output("a.bin", &IOContext::Default).unwrap();
            out.write_int(7).unwrap();
        }
        assert!(dir.create_output("a.bin", &IOContext::Default).is_err());
        assert_eq!(dir.list_all().unwrap(), vec!["a.bin", "b.bin"]);
        assert_eq!(dir.file_length("b.bin").unwrap(), 8);

        let mut input = dir.open_input("b.bin", &IOContext::READ).unwrap();
        assert_eq!(input.read_vint().unwrap(), 300);
        assert_eq!(input.read_string().unwrap(), "hello");
    }

    #[test]
    fn test_rename_delete_copy() {
        let dir = RAMDirectory::new();
        {
            let mut out = dir.create_output("x", &IOContext::Default).unwrap();
            out.write_long(99).unwrap();
        }
        dir.rename("x", "y").unwrap();
        assert!(!dir.file_exists("x").unwrap());
        assert!(dir.rename("x", "z").is_err());

        let other = RAMDirectory::new();
        other.copy_from(&dir, "y", "y2", &IOContext::Default).unwrap();
        let mut input = other.open_input("y2", &IOContext::READ).unwrap();
        assert_eq!(input.read_long().unwrap(), 99);

        dir.delete_file("y").unwrap();
        assert!(dir.delete_file("y").is_err());
        assert!(dir.open_input("y", &IOContext::READ).is_err());
        assert!(dir.list_all().unwrap().is_empty());
    }

    #[test]
    fn test_slicer_and_checksum() {
        let dir = RAMDirectory::new();
        let expected = {
            let mut out = dir.create_output("s", &IOContext::Default).unwrap();
            for i in 0..10u8 {
                out.write_byte(i).unwrap();
            }
            out.checksum().unwrap()
        };
        let slicer = dir.create_slicer("s", &IOContext::READ).unwrap();
        let mut a = slicer.open_slice("a", 2, 3).unwrap();
        let mut b = slicer.open_slice("b", 8, 2).unwrap();
        assert_eq!(a.read_byte().unwrap(), 2);
        assert_eq!(b.read_byte().unwrap(), 8);

        let mut input = dir.open_checksum_input("s", &IOContext::READ).unwrap();
        input.seek(10).unwrap();
        assert_eq!(input.checksum(), expected);
    }

    #[test]
    fn test_locks_are_per_directory() {
        let dir = RAMDirectory::new();
        let shared = dir.clone();
        let lock = dir.obtain_lock("write.lock").unwrap();
        assert!(shared.obtain_lock("write.lock").is_err());
        RAMDirectory::new().obtain_lock("write.lock").unwrap();
        lock.close().unwrap();
        shared.obtain_lock("write.lock").unwrap();
    }
}
