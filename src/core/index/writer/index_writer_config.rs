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

use crate::core::analysis::{Analyzer, WhitespaceAnalyzer};
use crate::core::index::merge::{
    MergePolicy, MergeScheduler, PayloadProcessorProvider, SerialMergeScheduler,
    TieredMergePolicy,
};
use crate::core::index::writer::{IndexDeletionPolicy, KeepOnlyLastCommitDeletionPolicy};
use crate::core::search::similarity::{BM25Similarity, Similarity};
use crate::core::store::LOCK_OBTAIN_WAIT_FOREVER;

use std::fmt;
use std::sync::Arc;

/// Default value is 16 MB (which means flush when buffered docs consume
/// approximately 16 MB RAM).
pub const DEFAULT_RAM_BUFFER_SIZE_MB: f64 = 16.0;

/// Default for `use_compound_file` of newly written segments.
pub const DEFAULT_USE_COMPOUND_FILE_SYSTEM: bool = true;

/// Default timeout for obtaining the write lock, in milliseconds.
pub const DEFAULT_WRITE_LOCK_TIMEOUT: i64 = 1000;

/// Holds all the configuration used to create an `IndexWriter`. Changes to
/// this object after the writer was created have no effect on it.
pub struct IndexWriterConfig {
    pub open_mode: OpenMode,
    /// Flushes the in-memory segment once it holds this many docs.
    pub max_buffered_docs: Option<u32>,
    /// Flushes the in-memory segment once its estimated size exceeds this.
    pub ram_buffer_size_mb: Option<f64>,
    pub use_compound_file: bool,
    pub analyzer: Arc<dyn Analyzer>,
    pub similarity: Arc<dyn Similarity>,
    pub merge_policy: Arc<dyn MergePolicy>,
    pub merge_scheduler: Arc<dyn MergeScheduler>,
    pub deletion_policy: Arc<dyn IndexDeletionPolicy>,
    pub payload_processor_provider: Option<Arc<dyn PayloadProcessorProvider>>,
    /// How long to wait for the write lock, `LOCK_OBTAIN_WAIT_FOREVER`
    /// waits forever.
    pub write_lock_timeout: i64,
    /// Whether `close` commits pending changes or discards them.
    pub commit_on_close: bool,
    /// True if segment readers opened for deletes, merges and NRT readers
    /// are kept open by the writer.
    pub reader_pooling: bool,
}

impl Default for IndexWriterConfig {
    fn default() -> Self {
        IndexWriterConfig {
            open_mode: OpenMode::CreateOrAppend,
            max_buffered_docs: None,
            ram_buffer_size_mb: Some(DEFAULT_RAM_BUFFER_SIZE_MB),
            use_compound_file: DEFAULT_USE_COMPOUND_FILE_SYSTEM,
            analyzer: Arc::new(WhitespaceAnalyzer::default()),
            similarity: Arc::new(BM25Similarity::default()),
            merge_policy: Arc::new(TieredMergePolicy::default()),
            merge_scheduler: Arc::new(SerialMergeScheduler {}),
            deletion_policy: Arc::new(KeepOnlyLastCommitDeletionPolicy),
            payload_processor_provider: None,
            write_lock_timeout: DEFAULT_WRITE_LOCK_TIMEOUT,
            commit_on_close: true,
            reader_pooling: true,
        }
    }
}

impl IndexWriterConfig {
    pub fn with_analyzer(analyzer: Arc<dyn Analyzer>) -> Self {
        IndexWriterConfig {
            analyzer,
            ..Default::default()
        }
    }

    pub fn flush_on_ram(&self) -> bool {
        self.ram_buffer_size_mb.is_some()
    }

    pub fn flush_on_doc_count(&self) -> bool {
        self.max_buffered_docs.is_some()
    }

    pub fn ram_buffer_size(&self) -> usize {
        (self.ram_buffer_size_mb.unwrap_or(0.0) * 1024.0 * 1024.0) as usize
    }

    /// Waits forever for the write lock.
    pub fn wait_for_lock(mut self) -> Self {
        self.write_lock_timeout = LOCK_OBTAIN_WAIT_FOREVER;
        self
    }
}

impl fmt::Debug for IndexWriterConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("IndexWriterConfig")
            .field("open_mode", &self.open_mode)
            .field("max_buffered_docs", &self.max_buffered_docs)
            .field("ram_buffer_size_mb", &self.ram_buffer_size_mb)
            .field("use_compound_file", &self.use_compound_file)
            .field("write_lock_timeout", &self.write_lock_timeout)
            .field("commit_on_close", &self.commit_on_close)
            .field("reader_pooling", &self.reader_pooling)
            .finish()
    }
}

/// How an `IndexWriter` treats the index already in its directory.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum OpenMode {
    /// Creates a new index or overwrites an existing one.
    Create,
    /// Opens an existing index, failing with `IndexNotFound` if there is
    /// none.
    Append,
    /// Creates a new index if none exists, otherwise opens it.
    CreateOrAppend,
}
