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

use crate::core::index;
use crate::core::index::merge::MergerTrigger;
use crate::core::index::writer::IndexWriter;
use crate::error::{Error, ErrorKind, Result};

/// Expert: `IndexWriter` uses an instance implementing this interface to
/// execute the merges selected by a `MergePolicy`. The default
/// MergeScheduler is `SerialMergeScheduler`.
///
/// A scheduler pulls registered merges with `IndexWriter::next_merge` and
/// runs them with `IndexWriter::merge`. Pending merges it leaves behind are
/// dropped by the writer once `merge` returns.
pub trait MergeScheduler: Send + Sync {
    fn merge(
        &self,
        writer: &IndexWriter,
        trigger: MergerTrigger,
        new_merges_found: bool,
    ) -> Result<()>;

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Runs every pending merge in the calling thread, one at a time.
///
/// Aborted merges are expected (rollback and close abort them) and are
/// skipped; any other failure stops the scheduling and is reported as a
/// `MergeException`.
#[derive(Copy, Clone, Debug, Default)]
pub struct SerialMergeScheduler {}

impl MergeScheduler for SerialMergeScheduler {
    fn merge(
        &self,
        writer: &IndexWriter,
        _trigger: MergerTrigger,
        _new_merges_found: bool,
    ) -> Result<()> {
        while let Some(mut merge) = writer.next_merge()? {
            match writer.merge(&mut merge) {
                Ok(()) => {}
                Err(Error(ErrorKind::Index(index::ErrorKind::MergeAborted(msg)), _)) => {
                    debug!("merge {} is aborted: {}", merge, msg);
                }
                Err(e) => {
                    error!("merge {} failed: {:?}", merge, e);
                    bail!(ErrorKind::MergeException(
                        e.to_string(),
                        writer.directory().to_string()
                    ));
                }
            }
        }
        Ok(())
    }
}

/// A `MergeScheduler` which never executes any merges. Merges stay limited
/// to explicit calls on the writer's segments, e.g. for tests that need a
/// fixed segment layout.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoMergeScheduler {}

impl MergeScheduler for NoMergeScheduler {
    fn merge(
        &self,
        _writer: &IndexWriter,
        _trigger: MergerTrigger,
        _new_merges_found: bool,
    ) -> Result<()> {
        Ok(())
    }
}
