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

use crate::core::store::directory::{Directory, DirectoryRc};
use crate::core::store::io::{IndexInput, IndexOutput};
use crate::core::store::{IOContext, Lock};

use crate::error::Result;

use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

/// A delegating Directory that records which files were written to and deleted.
pub struct TrackingDirectoryWrapper {
    create_file_names: Mutex<HashSet<String>>,
    pub directory: DirectoryRc,
}

impl TrackingDirectoryWrapper {
    pub fn new(directory: DirectoryRc) -> TrackingDirectoryWrapper {
        TrackingDirectoryWrapper {
            create_file_names: Mutex::new(HashSet::new()),
            directory,
        }
    }

    pub fn create_files(&self) -> Result<HashSet<String>> {
        Ok(self.create_file_names.lock()?.clone())
    }
}

impl Directory for TrackingDirectoryWrapper {
    fn list_all(&self) -> Result<Vec<String>> {
        self.directory.list_all()
    }

    fn file_length(&self, name: &str) -> Result<i64> {
        self.directory.file_length(name)
    }

    fn file_exists(&self, name: &str) -> Result<bool> {
        self.directory.file_exists(name)
    }

    fn create_output(&self, name: &str, ctx: &IOContext) -> Result<Box<dyn IndexOutput>> {
        let output = self.directory.create_output(name, ctx)?;
        self.create_file_names.lock()?.insert(name.to_string());
        Ok(output)
    }

    fn open_input(&self, name: &str, ctx: &IOContext) -> Result<Box<dyn IndexInput>> {
        self.directory.open_input(name, ctx)
    }

    fn obtain_lock(&self, name: &str) -> Result<Box<dyn Lock>> {
        self.directory.obtain_lock(name)
    }

    fn lock_id(&self) -> String {
        self.directory.lock_id()
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.directory.delete_file(name)?;
        self.create_file_names.lock()?.remove(name);
        Ok(())
    }

    fn sync(&self, names: &HashSet<String>) -> Result<()> {
        self.directory.sync(names)
    }

    fn sync_meta_data(&self) -> Result<()> {
        self.directory.sync_meta_data()
    }

    fn rename(&self, source: &str, dest: &str) -> Result<()> {
        self.directory.rename(source, dest)?;
        let mut guard = self.create_file_names.lock()?;
        guard.insert(dest.to_string());
        guard.remove(source);
        Ok(())
    }
}

impl fmt::Display for TrackingDirectoryWrapper {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TrackingDirectoryWrapper({})", &*self.directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::directory::RAMDirectory;
    use std::sync::Arc;

    #[test]
    fn test_tracks_created_files() {
        let dir: DirectoryRc = Arc::new(RAMDirectory::new());
        let tracking = TrackingDirectoryWrapper::new(Arc::clone(&dir));
        drop(tracking.create_output("_0.doc", &IOContext::Default).unwrap());
        drop(tracking.create_output("_0.tmp", &IOContext::Default).unwrap());
        tracking.rename("_0.tmp", "_0.tim").unwrap();
        drop(dir.create_output("other", &IOContext::Default).unwrap());

        let mut files: Vec<String> = tracking.create_files().unwrap().into_iter().collect();
        files.sort();
        assert_eq!(files, vec!["_0.doc", "_0.tim"]);

        tracking.delete_file("_0.doc").unwrap();
        assert_eq!(tracking.create_files().unwrap().len(), 1);
    }
}
