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

use crate::core::codec::segment_infos::{SegmentCommitInfo, SegmentInfos};
use crate::core::index::merge::{
    MergeContext, MergePolicy, MergeSpecification, MergerTrigger, OneMerge,
    DEFAULT_MAX_CFS_SEGMENT_SIZE, DEFAULT_NO_CFS_RATIO,
};
use crate::error::{ErrorKind::IllegalArgument, Result};

use std::collections::HashMap;
use std::sync::Arc;

/// Default merge factor: how many segments are merged at once.
pub const DEFAULT_MERGE_FACTOR: u32 = 10;

/// Default minimum segment size in documents.
pub const DEFAULT_MIN_MERGE_DOCS: i64 = 1000;

/// Segments whose levels are within this span of the top level count as
/// one level.
const LEVEL_LOG_SPAN: f64 = 0.75;

/// Merges adjacent segments whose document counts fall in the same
/// logarithmic level (base `merge_factor`), so segments of about the same
/// size are combined and merges cascade into bigger segments over time.
///
/// Segments below `min_merge_docs` all count as the lowest level; segments
/// with more than `max_merge_docs` are never merged by `find_merges`.
/// Document counts are pro-rated by deletions.
#[derive(Debug)]
pub struct LogDocMergePolicy {
    merge_factor: u32,
    min_merge_docs: i64,
    max_merge_docs: i64,
    no_cfs_ratio: f64,
    max_cfs_segment_size: u64,
}

impl Default for LogDocMergePolicy {
    fn default() -> Self {
        LogDocMergePolicy {
            merge_factor: DEFAULT_MERGE_FACTOR,
            min_merge_docs: DEFAULT_MIN_MERGE_DOCS,
            max_merge_docs: i64::from(i32::max_value()),
            no_cfs_ratio: DEFAULT_NO_CFS_RATIO,
            max_cfs_segment_size: DEFAULT_MAX_CFS_SEGMENT_SIZE,
        }
    }
}

impl LogDocMergePolicy {
    pub fn set_merge_factor(&mut self, merge_factor: u32) -> Result<()> {
        if merge_factor < 2 {
            bail!(IllegalArgument(format!(
                "merge_factor cannot be less than 2, got {}",
                merge_factor
            )));
        }
        self.merge_factor = merge_factor;
        Ok(())
    }

    pub fn set_min_merge_docs(&mut self, min_merge_docs: i64) {
        self.min_merge_docs = min_merge_docs;
    }

    pub fn set_max_merge_docs(&mut self, max_merge_docs: i64) {
        self.max_merge_docs = max_merge_docs;
    }

    fn doc_size(&self, info: &SegmentCommitInfo, context: &dyn MergeContext) -> i64 {
        i64::from(info.info.max_doc() - context.num_deleted_docs(info))
    }

    fn is_fully_merged(
        &self,
        infos: &SegmentInfos,
        max_num_segments: usize,
        segments_to_merge: &HashMap<String, bool>,
        context: &dyn MergeContext,
    ) -> bool {
        let mut num_to_merge = 0;
        let mut merge_info = None;
        for info in &infos.segments {
            if segments_to_merge.contains_key(info.name()) {
                num_to_merge += 1;
                merge_info = Some(info);
            }
        }
        num_to_merge <= max_num_segments
            && (num_to_merge != 1
                || merge_info.map_or(true, |info| self.is_merged(infos, info.as_ref(), context)))
    }

    fn new_merge(
        &self,
        segments: &[Arc<SegmentCommitInfo>],
        context: &dyn MergeContext,
    ) -> Result<OneMerge> {
        OneMerge::new(segments.to_vec(), context.next_merge_id())
    }
}

impl MergePolicy for LogDocMergePolicy {
    fn find_merges(
        &self,
        _merge_trigger: MergerTrigger,
        segment_infos: &SegmentInfos,
        context: &dyn MergeContext,
    ) -> Result<Option<MergeSpecification>> {
        let segments = &segment_infos.segments;
        let num_segments = segments.len();
        let merging = context.merging_segments();
        let norm = f64::from(self.merge_factor).ln();

        let levels: Vec<f64> = segments
            .iter()
            .map(|info| (self.doc_size(info.as_ref(), context).max(1) as f64).ln() / norm)
            .collect();
        let level_floor = if self.min_merge_docs <= 0 {
            0.0
        } else {
            (self.min_merge_docs as f64).ln() / norm
        };

        // Now, we quantize the log values into levels. The first level is
        // any segment whose level is within LEVEL_LOG_SPAN of the max
        // level, then the next level up to the next LEVEL_LOG_SPAN and so
        // on, scanning from the oldest segments.
        let mut spec = MergeSpecification::default();
        let merge_factor = self.merge_factor as usize;
        let mut start = 0;
        while start < num_segments {
            let max_level = levels[start..]
                .iter()
                .cloned()
                .fold(f64::NEG_INFINITY, f64::max);

            let level_bottom = if max_level <= level_floor {
                // All remaining segments fall into the min level
                -1.0
            } else {
                let bottom = max_level - LEVEL_LOG_SPAN;
                // Force a boundary at the level floor
                if bottom < level_floor && max_level >= level_floor {
                    level_floor
                } else {
                    bottom
                }
            };

            let mut upto = num_segments - 1;
            while upto > start && levels[upto] < level_bottom {
                upto -= 1;
            }

            // Finally, record all merges that are viable at this level:
            let mut end = start + merge_factor;
            while end <= 1 + upto {
                let window = &segments[start..end];
                let any_too_large = window
                    .iter()
                    .any(|info| self.doc_size(info.as_ref(), context) >= self.max_merge_docs);
                let any_merging = window.iter().any(|info| merging.contains(info.name()));
                if !any_too_large && !any_merging {
                    spec.add(self.new_merge(window, context)?);
                } else {
                    debug!(
                        "level {} to {}: {} segments, skipping (too large={} merging={})",
                        level_bottom,
                        max_level,
                        window.len(),
                        any_too_large,
                        any_merging
                    );
                }
                start = end;
                end = start + merge_factor;
            }
            start = upto + 1;
        }

        Ok(if spec.merges.is_empty() {
            None
        } else {
            Some(spec)
        })
    }

    fn find_forced_merges(
        &self,
        segment_infos: &SegmentInfos,
        max_segment_count: u32,
        segments_to_merge: &HashMap<String, bool>,
        context: &dyn MergeContext,
    ) -> Result<Option<MergeSpecification>> {
        if max_segment_count < 1 {
            bail!(IllegalArgument(format!(
                "max_segment_count must be >= 1, got {}",
                max_segment_count
            )));
        }
        let max_num_segments = max_segment_count as usize;
        if self.is_fully_merged(segment_infos, max_num_segments, segments_to_merge, context) {
            return Ok(None);
        }

        let segments = &segment_infos.segments;
        let merging = context.merging_segments();

        // Find the newest (rightmost) segment that needs to be merged (other
        // segments may have been flushed since merging started):
        let mut last = segments.len();
        while last > 0 {
            let info = &segments[last - 1];
            if segments_to_merge.contains_key(info.name()) {
                break;
            }
            last -= 1;
        }
        if last == 0 || segments[..last].iter().any(|s| merging.contains(s.name())) {
            return Ok(None);
        }

        let merge_factor = self.merge_factor as usize;
        let mut spec = MergeSpecification::default();

        // First, enroll all "full" merges (size merge_factor) to
        // potentially be run concurrently:
        while last + 1 >= merge_factor + max_num_segments {
            spec.add(self.new_merge(&segments[last - merge_factor..last], context)?);
            last -= merge_factor;
        }

        // Only if there are no full merges pending do we add a final
        // partial (< merge_factor segments) merge:
        if spec.merges.is_empty() {
            if max_num_segments == 1 {
                // Since we must merge down to 1 segment, the choice is simple:
                if last > 1 || !self.is_merged(segment_infos, segments[0].as_ref(), context) {
                    spec.add(self.new_merge(&segments[..last], context)?);
                }
            } else if last > max_num_segments {
                // Take care to pick a partial merge that is least cost, but
                // does not make the index too lopsided. If we always just
                // picked the partial tail then we could produce a highly
                // lopsided index over time:

                // We must merge this many segments to leave max_num_segments
                // in the index (from when force_merge was first kicked off):
                let final_merge_size = last - max_num_segments + 1;

                // Consider all possible starting points:
                let mut best_size = 0;
                let mut best_start = 0;
                for i in 0..=last - final_merge_size {
                    let sum_size: i64 = segments[i..i + final_merge_size]
                        .iter()
                        .map(|s| self.doc_size(s.as_ref(), context))
                        .sum();
                    let prev_size = if i > 0 {
                        self.doc_size(segments[i - 1].as_ref(), context)
                    } else {
                        0
                    };
                    if i == 0 || (sum_size < 2 * prev_size && sum_size < best_size) {
                        best_start = i;
                        best_size = sum_size;
                    }
                }
                spec.add(self.new_merge(
                    &segments[best_start..best_start + final_merge_size],
                    context,
                )?);
            }
        }

        Ok(if spec.merges.is_empty() {
            None
        } else {
            Some(spec)
        })
    }

    fn find_forced_deletes_merges(
        &self,
        segment_infos: &SegmentInfos,
        context: &dyn MergeContext,
    ) -> Result<Option<MergeSpecification>> {
        let segments = &segment_infos.segments;
        let merge_factor = self.merge_factor as usize;
        let mut spec = MergeSpecification::default();

        // Merge runs of adjacent segments with deletions, at most
        // merge_factor at a time.
        let mut first_with_deletions: Option<usize> = None;
        for (i, info) in segments.iter().enumerate() {
            if context.num_deleted_docs(info.as_ref()) > 0 {
                match first_with_deletions {
                    None => first_with_deletions = Some(i),
                    Some(first) if i - first == merge_factor => {
                        spec.add(self.new_merge(&segments[first..i], context)?);
                        first_with_deletions = Some(i);
                    }
                    _ => {}
                }
            } else if let Some(first) = first_with_deletions.take() {
                spec.add(self.new_merge(&segments[first..i], context)?);
            }
        }
        if let Some(first) = first_with_deletions {
            spec.add(self.new_merge(&segments[first..], context)?);
        }

        Ok(if spec.merges.is_empty() {
            None
        } else {
            Some(spec)
        })
    }

    fn max_cfs_segment_size(&self) -> u64 {
        self.max_cfs_segment_size
    }

    fn no_cfs_ratio(&self) -> f64 {
        self.no_cfs_ratio
    }
}
