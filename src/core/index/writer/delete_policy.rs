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

use crate::core::index::writer::CommitPoint;
use crate::error::Result;

/// Expert: policy for deletion of stale commit points.
///
/// The writer hands the policy every commit point present in the directory,
/// sorted by age (the first one is the oldest), once when it is opened and
/// again after each commit. The policy marks the commits to drop with
/// `CommitPoint::delete`; the `IndexFileDeleter` then removes the files no
/// remaining commit references.
///
/// The last commit point is the current state of the index. Deleting it
/// loses the index content.
pub trait IndexDeletionPolicy: Send + Sync {
    /// Called once when a writer is first instantiated. For a new index the
    /// list is empty.
    fn on_init(&self, commits: &mut [CommitPoint]) -> Result<()>;

    /// Called each time the writer completed a commit.
    fn on_commit(&self, commits: &mut [CommitPoint]) -> Result<()>;
}

/// Keeps only the most recent commit and removes all prior ones as soon as
/// a new commit is done.
#[derive(Default, Debug)]
pub struct KeepOnlyLastCommitDeletionPolicy;

impl IndexDeletionPolicy for KeepOnlyLastCommitDeletionPolicy {
    fn on_init(&self, commits: &mut [CommitPoint]) -> Result<()> {
        self.on_commit(commits)
    }

    fn on_commit(&self, commits: &mut [CommitPoint]) -> Result<()> {
        if let Some((_, older)) = commits.split_last_mut() {
            for commit in older {
                commit.delete();
            }
        }
        Ok(())
    }
}

/// Never deletes a commit, so every generation stays readable.
#[derive(Default, Debug)]
pub struct NoDeletionPolicy;

impl IndexDeletionPolicy for NoDeletionPolicy {
    fn on_init(&self, _commits: &mut [CommitPoint]) -> Result<()> {
        Ok(())
    }

    fn on_commit(&self, _commits: &mut [CommitPoint]) -> Result<()> {
        Ok(())
    }
}
