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
use crate::core::index::merge::MergeState;
use crate::core::index::reader::SegmentReader;
use crate::core::index::ErrorKind::MergeAborted;
use crate::core::store::MergeInfo;
use crate::core::util::FixedBitSet;
use crate::error::{
    ErrorKind::{IllegalArgument, Index, RuntimeError},
    Result,
};

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::f64;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

pub const DEFAULT_NO_CFS_RATIO: f64 = 0.1;

pub const DEFAULT_MAX_CFS_SEGMENT_SIZE: u64 = i64::max_value() as u64;

/// Units of merge work (documents, terms, positions) done between two
/// abort checks of `OneMerge::check_abort`.
pub const ABORT_CHECK_UNITS: f64 = 10000.0;

/// Merge is passed to `MergePolicy#find_merges` to indicate the
/// event that triggered the merge.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MergerTrigger {
    /// Merge was triggered by a segment flush.
    SegmentFlush,
    /// Merge was triggered by a full flush. Full flushes can be caused
    /// by a commit, NRT reader reopen or a close call on the IndexWriter.
    FullFlush,
    /// Merge has been triggered explicitly by the user,
    Explicit,
    /// Merge was triggered by a successfully finished merge.
    MergeFinished,
    /// Merge was triggered by a closing IndexWriter,
    Closing,
}

/// The view of the `IndexWriter` a `MergePolicy` selects merges against.
pub trait MergeContext {
    /// Deleted documents of `info`, counting deletions not yet written.
    fn num_deleted_docs(&self, info: &SegmentCommitInfo) -> i32;

    /// Names of the segments registered in a pending or running merge.
    fn merging_segments(&self) -> &HashSet<String>;

    fn next_merge_id(&self) -> u32;
}

/// Expert: a MergePolicy determines the sequence of
/// primitive merge operations.
///
/// Whenever the segments in an index have been altered by `IndexWriter`,
/// either the addition of a newly flushed segment or a previous merge that
/// may now need to cascade, `IndexWriter` invokes `find_merges` to give the
/// MergePolicy a chance to pick merges that are now required. This method
/// returns a `MergeSpecification` instance describing the set of merges
/// that should be done, or `None` if no merges are necessary. When
/// `IndexWriter::force_merge` is called, it calls `find_forced_merges` and
/// the MergePolicy should then return the necessary merges.
///
/// The policy is always called with the writer's state locked, so only
/// one thread at a time will call it. The default MergePolicy is
/// `TieredMergePolicy`.
pub trait MergePolicy: Send + Sync {
    /// Determine what set of merge operations are now necessary on the index.
    fn find_merges(
        &self,
        merge_trigger: MergerTrigger,
        segment_infos: &SegmentInfos,
        context: &dyn MergeContext,
    ) -> Result<Option<MergeSpecification>>;

    /// Determine what set of merge operations is necessary in order to merge
    /// to `<=` the specified segment count. `segments_to_merge` maps the
    /// names of the segments that may be merged to whether they were in the
    /// index when the forced merge started.
    fn find_forced_merges(
        &self,
        segment_infos: &SegmentInfos,
        max_segment_count: u32,
        segments_to_merge: &HashMap<String, bool>,
        context: &dyn MergeContext,
    ) -> Result<Option<MergeSpecification>>;

    /// Determine what set of merge operations is necessary in order to
    /// expunge all deletes from the index.
    fn find_forced_deletes_merges(
        &self,
        segment_infos: &SegmentInfos,
        context: &dyn MergeContext,
    ) -> Result<Option<MergeSpecification>>;

    fn max_cfs_segment_size(&self) -> u64;

    fn no_cfs_ratio(&self) -> f64;

    /// Returns true if a new segment (regardless of its origin) should use
    /// the compound file format. The default implementation returns true iff
    /// the size of the given merged info is less or equal to
    /// `max_cfs_segment_size` and the size is less or equal to the total
    /// index size times `no_cfs_ratio`.
    fn use_compound_file(
        &self,
        infos: &SegmentInfos,
        merged_info: &SegmentCommitInfo,
        context: &dyn MergeContext,
    ) -> bool {
        let no_cfs_ratio = self.no_cfs_ratio();
        if no_cfs_ratio <= 0.0 {
            return false;
        }

        let merged_info_size = self.size(merged_info, context);
        if merged_info_size > self.max_cfs_segment_size() as i64 {
            return false;
        }

        if no_cfs_ratio >= 1.0 {
            return true;
        }

        let total_size: i64 = infos
            .segments
            .iter()
            .map(|info| self.size(info.as_ref(), context))
            .sum();
        merged_info_size as f64 <= no_cfs_ratio * total_size as f64
    }

    /// Byte size of `info`, pro-rated by its percentage of deletions.
    fn size(&self, info: &SegmentCommitInfo, context: &dyn MergeContext) -> i64 {
        let byte_size = info.size_in_bytes();
        let max_doc = info.info.max_doc();
        if max_doc <= 0 {
            return byte_size;
        }
        let del_ratio = context.num_deleted_docs(info) as f64 / max_doc as f64;
        (byte_size as f64 * (1.0 - del_ratio)) as i64
    }

    /// Returns true if this single info is already fully merged: it has no
    /// pending deletes and matches the current compound file setting.
    fn is_merged(
        &self,
        infos: &SegmentInfos,
        info: &SegmentCommitInfo,
        context: &dyn MergeContext,
    ) -> bool {
        context.num_deleted_docs(info) == 0
            && self.use_compound_file(infos, info, context) == info.info.is_compound_file()
    }
}

/// A MergeSpecification instance provides the information necessary to
/// perform multiple merges. It simply contains a list of `OneMerge`
/// instances.
#[derive(Debug, Default)]
pub struct MergeSpecification {
    pub merges: Vec<OneMerge>,
}

impl MergeSpecification {
    pub fn add(&mut self, merge: OneMerge) {
        self.merges.push(merge);
    }

    fn into_option(self) -> Option<MergeSpecification> {
        if self.merges.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

/// Shared abort flag of a `OneMerge`, usable from other threads while the
/// merge runs.
#[derive(Clone, Debug, Default)]
pub struct MergeAbortHandle {
    aborted: Arc<AtomicBool>,
}

impl MergeAbortHandle {
    pub fn abort(&self) {
        self.aborted.store(true, AtomicOrdering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(AtomicOrdering::Acquire)
    }
}

/// OneMerge provides the information necessary to perform an individual
/// primitive merge operation, resulting in a single new segment. The merge
/// spec includes the subset of segments to be merged as well as whether the
/// new segment should use the compound file format.
pub struct OneMerge {
    pub id: u32,
    /// The merged segment, set by the writer once the merge is registered.
    pub info: Option<Arc<SegmentCommitInfo>>,
    /// Segments to be merged.
    pub segments: Vec<Arc<SegmentCommitInfo>>,
    /// Total number of documents in segments to be merged, not accounting
    /// for deletions.
    pub total_max_doc: i32,
    /// Set for merges of a `force_merge` call.
    pub max_num_segments: Option<u32>,
    /// Sum of `size_in_bytes` of the merged segments, set at registration.
    pub total_merge_bytes: u64,
    /// Point in time readers of the merged segments and their live docs,
    /// taken when the merge starts.
    pub readers: Vec<Arc<SegmentReader>>,
    pub live_docs: Vec<Option<Arc<FixedBitSet>>>,
    /// Doc id maps of a finished merge, used to carry over the deletions
    /// that arrived while the merge ran.
    pub merge_state: Option<MergeState>,
    abort: MergeAbortHandle,
    work_count: f64,
}

impl OneMerge {
    pub fn new(segments: Vec<Arc<SegmentCommitInfo>>, id: u32) -> Result<Self> {
        if segments.is_empty() {
            bail!(RuntimeError("segments must not be empty!".into()));
        }

        let total_max_doc = segments.iter().map(|s| s.info.max_doc()).sum();
        Ok(OneMerge {
            id,
            info: None,
            segments,
            total_max_doc,
            max_num_segments: None,
            total_merge_bytes: 0,
            readers: vec![],
            live_docs: vec![],
            merge_state: None,
            abort: MergeAbortHandle::default(),
            work_count: 0.0,
        })
    }

    /// Marks the merge as aborted; the merging thread stops at its next
    /// abort check.
    pub fn abort(&self) {
        self.abort.abort();
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    pub fn abort_handle(&self) -> MergeAbortHandle {
        self.abort.clone()
    }

    /// Fails with `MergeAborted` if the merge was aborted.
    pub fn check_aborted(&self) -> Result<()> {
        if self.is_aborted() {
            bail!(Index(MergeAborted(format!("merge {} is aborted", self))));
        }
        Ok(())
    }

    /// Records `units` of work and checks for abort once
    /// `ABORT_CHECK_UNITS` units accumulated since the last check.
    pub fn check_abort(&mut self, units: f64) -> Result<()> {
        self.work_count += units;
        if self.work_count >= ABORT_CHECK_UNITS {
            self.work_count = 0.0;
            self.check_aborted()?;
        }
        Ok(())
    }

    pub fn segment_names(&self) -> Vec<&str> {
        self.segments.iter().map(|s| s.name()).collect()
    }

    pub fn store_merge_info(&self) -> MergeInfo {
        MergeInfo::new(
            self.total_max_doc as u32,
            self.total_merge_bytes,
            false,
            self.max_num_segments,
        )
    }
}

impl fmt::Display for OneMerge {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{} [", self.id)?;
        for (i, s) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", s)?;
        }
        write!(f, "]")?;
        if let Some(info) = &self.info {
            write!(f, " into {}", info.name())?;
        }
        if self.is_aborted() {
            write!(f, " [ABORTED]")?;
        }
        Ok(())
    }
}

impl fmt::Debug for OneMerge {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

/// Merges segments of approximately equal size, subject to
/// an allowed number of segments per tier. This is similar
/// to a log merge policy, except this merge policy is able to merge
/// non-adjacent segment, and separates how many segments are merged at
/// once (`set_max_merge_at_once`) from how many segments are allowed
/// per tier (`set_segs_per_tier`). This merge policy also does not
/// over-merge (i.e. cascade merges).
///
/// For normal merging, this policy first computes a
/// "budget" of how many segments are allowed to be in the
/// index. If the index is over-budget, then the policy
/// sorts segments by decreasing size (pro-rating by percent
/// deletes), and then finds the least-cost merge. Merge
/// cost is measured by a combination of the "skew" of the
/// merge (size of largest segment divided by smallest segment),
/// total merge size and percent deletes reclaimed,
/// so that merges with lower skew, smaller size
/// and those reclaiming more deletes, are favored.
///
/// If a merge will produce a segment that's larger than
/// `set_max_merged_segment_mb`, then the policy will
/// merge fewer segments (down to 1 at once, if that one has
/// deletions) to keep the segment size under budget.
///
/// NOTE: This policy always merges by byte size of the segments, always
/// pro-rates by percent deletes, and does not apply any maximum segment
/// size during `force_merge`.
#[derive(Debug)]
pub struct TieredMergePolicy {
    no_cfs_ratio: f64,
    max_cfs_segment_size: u64,
    max_merge_at_once: u32,
    max_merged_segment_bytes: u64,
    max_merge_at_once_explicit: u32,
    floor_segment_bytes: u64,
    segs_per_tier: f64,
    force_merge_deletes_pct_allowed: f64,
    reclaim_deletes_weight: f64,
}

impl Default for TieredMergePolicy {
    fn default() -> Self {
        TieredMergePolicy {
            no_cfs_ratio: DEFAULT_NO_CFS_RATIO,
            max_cfs_segment_size: DEFAULT_MAX_CFS_SEGMENT_SIZE,
            max_merge_at_once: 10,
            max_merged_segment_bytes: 5 * 1024 * 1024 * 1024,
            max_merge_at_once_explicit: 30,
            floor_segment_bytes: 2 * 1024 * 1024,
            segs_per_tier: 10.0,
            force_merge_deletes_pct_allowed: 10.0,
            reclaim_deletes_weight: 2.0,
        }
    }
}

impl TieredMergePolicy {
    pub fn set_max_merge_at_once(&mut self, v: u32) -> Result<()> {
        if v < 2 {
            bail!(IllegalArgument(format!(
                "max_merge_at_once must be > 1, got {}",
                v
            )));
        }
        self.max_merge_at_once = v;
        Ok(())
    }

    pub fn set_max_merge_at_once_explicit(&mut self, v: u32) -> Result<()> {
        if v < 2 {
            bail!(IllegalArgument(format!(
                "max_merge_at_once_explicit must be > 1, got {}",
                v
            )));
        }
        self.max_merge_at_once_explicit = v;
        Ok(())
    }

    pub fn set_segs_per_tier(&mut self, v: f64) -> Result<()> {
        if v < 2.0 {
            bail!(IllegalArgument(format!(
                "segs_per_tier must be >= 2, got {}",
                v
            )));
        }
        self.segs_per_tier = v;
        Ok(())
    }

    pub fn set_max_merged_segment_mb(&mut self, mut v: f64) -> Result<()> {
        if v < 0.0 {
            bail!(IllegalArgument(format!(
                "max_merged_segment_mb must be >= 0, got {}",
                v
            )));
        }
        v *= 1024.0 * 1024.0;
        self.max_merged_segment_bytes = if v > i64::max_value() as f64 {
            i64::max_value() as u64
        } else {
            v as u64
        };
        Ok(())
    }

    pub fn set_floor_segment_mb(&mut self, v: f64) -> Result<()> {
        if v <= 0.0 {
            bail!(IllegalArgument(format!(
                "floor_segment_mb must be > 0, got {}",
                v
            )));
        }
        self.floor_segment_bytes = (v * 1024.0 * 1024.0) as u64;
        Ok(())
    }

    pub fn set_force_merge_deletes_pct_allowed(&mut self, v: f64) -> Result<()> {
        if v < 0.0 || v > 100.0 {
            bail!(IllegalArgument(format!(
                "force_merge_deletes_pct_allowed must be between 0 and 100, got {}",
                v
            )));
        }
        self.force_merge_deletes_pct_allowed = v;
        Ok(())
    }

    pub fn set_no_cfs_ratio(&mut self, v: f64) -> Result<()> {
        if v < 0.0 || v > 1.0 {
            bail!(IllegalArgument(format!(
                "no_cfs_ratio must be 0.0 to 1.0 inclusive, got {}",
                v
            )));
        }
        self.no_cfs_ratio = v;
        Ok(())
    }

    fn floor_size(&self, bytes: i64) -> i64 {
        bytes.max(self.floor_segment_bytes as i64)
    }

    /// Sorts by decreasing pro-rated size, then by name.
    fn sort_by_size_desc(&self, infos: &mut Vec<Arc<SegmentCommitInfo>>, context: &dyn MergeContext) {
        infos.sort_by(|o1, o2| {
            let sz1 = self.size(o1.as_ref(), context);
            let sz2 = self.size(o2.as_ref(), context);
            match sz2.cmp(&sz1) {
                Ordering::Equal => o1.name().cmp(o2.name()),
                cmp => cmp,
            }
        });
    }

    /// Scores one merge candidate, lower is better.
    fn score(
        &self,
        candidate: &[&Arc<SegmentCommitInfo>],
        hit_too_large: bool,
        context: &dyn MergeContext,
    ) -> MergeScore {
        let mut total_before_merge_bytes = 0;
        let mut total_after_merge_bytes = 0;
        let mut total_after_merge_bytes_floored = 0;
        for info in candidate {
            let seg_bytes = self.size(info.as_ref(), context);
            total_after_merge_bytes += seg_bytes;
            total_after_merge_bytes_floored += self.floor_size(seg_bytes);
            total_before_merge_bytes += info.size_in_bytes();
        }

        // Roughly measure "skew" of the merge, i.e. how
        // "balanced" the merge is (whether the segments are
        // about the same size), which can range from
        // 1.0/numSegsBeingMerged (good) to 1.0 (poor). Heavily
        // lopsided merges (skew near 1.0) is no good; it means
        // O(N^2) merge cost over time:
        let skew = if hit_too_large {
            // Pretend the merge has perfect skew; skew doesn't
            // matter in this case because this merge will not
            // "cascade" and so it cannot lead to N^2 merge cost
            // over time:
            1.0 / self.max_merge_at_once as f64
        } else {
            self.floor_size(self.size(candidate[0].as_ref(), context)) as f64
                / total_after_merge_bytes_floored as f64
        };

        // Strongly favor merges with less skew (smaller
        // merge_score is better):
        let mut merge_score = skew;

        // Gently favor smaller merges over bigger ones. We
        // don't want to make this exponent too large else we
        // can end up doing poor merges of small segments in
        // order to avoid the large merges:
        merge_score *= f64::powf(total_after_merge_bytes as f64, 0.05);

        // Strongly favor merges that reclaim deletes:
        let non_del_ratio = if total_before_merge_bytes > 0 {
            total_after_merge_bytes as f64 / total_before_merge_bytes as f64
        } else {
            1.0
        };
        merge_score *= f64::powf(non_del_ratio, self.reclaim_deletes_weight);

        MergeScore::new(merge_score, skew, non_del_ratio)
    }
}

impl MergePolicy for TieredMergePolicy {
    fn find_merges(
        &self,
        _merge_trigger: MergerTrigger,
        segment_infos: &SegmentInfos,
        context: &dyn MergeContext,
    ) -> Result<Option<MergeSpecification>> {
        if segment_infos.len() == 0 {
            return Ok(None);
        }

        let merging = context.merging_segments();
        let mut infos_sorted = segment_infos.segments.clone();
        self.sort_by_size_desc(&mut infos_sorted, context);

        // Compute total index bytes & print details about the index
        let mut total_index_bytes = 0;
        let mut min_segment_bytes = i64::max_value();
        for info in &infos_sorted {
            let seg_bytes = self.size(info.as_ref(), context);
            min_segment_bytes = seg_bytes.min(min_segment_bytes);
            total_index_bytes += seg_bytes;
        }

        // If we have too-large segments, grace them out
        // of the max_segment_count:
        let mut too_big_count = 0;
        while too_big_count < infos_sorted.len() {
            let seg_bytes = self.size(infos_sorted[too_big_count].as_ref(), context);
            if seg_bytes < self.max_merged_segment_bytes as i64 / 2 {
                break;
            }
            total_index_bytes -= seg_bytes;
            too_big_count += 1;
        }

        // Compute max allowed segs in the index
        let mut level_size = self.floor_size(min_segment_bytes);
        let mut bytes_left = total_index_bytes;
        let mut allowed_seg_count = 0.0;
        loop {
            let seg_count_level = bytes_left as f64 / level_size as f64;
            if seg_count_level < self.segs_per_tier {
                allowed_seg_count += seg_count_level.ceil();
                break;
            }
            allowed_seg_count += self.segs_per_tier;
            bytes_left -= (self.segs_per_tier * level_size as f64) as i64;
            level_size *= self.max_merge_at_once as i64;
        }
        let allowed_seg_count_int = allowed_seg_count as usize;

        let mut to_be_merged: HashSet<String> = HashSet::new();
        let mut spec = MergeSpecification::default();

        // Cycle to possibly select more than one merge:
        loop {
            let mut merging_bytes = 0;

            // Gather eligible segments for merging, ie segments
            // not already being merged and not already picked (by
            // prior iteration of this loop) for merging:
            let mut eligible = vec![];
            for info in &infos_sorted[too_big_count..] {
                if merging.contains(info.name()) {
                    merging_bytes += self.size(info.as_ref(), context);
                } else if !to_be_merged.contains(info.name()) {
                    eligible.push(info);
                }
            }

            let max_merge_is_running = merging_bytes >= self.max_merged_segment_bytes as i64;

            if eligible.len() <= allowed_seg_count_int {
                return Ok(spec.into_option());
            }

            // OK we are over budget -- find best merge!
            let mut best_score = MergeScore::new(f64::INFINITY, 0.0, 0.0);
            let mut best: Vec<&Arc<SegmentCommitInfo>> = vec![];
            let mut best_too_large = false;
            let mut best_merge_bytes = 0;

            // Consider all merge starts:
            let max_merge_at_once = self.max_merge_at_once as usize;
            if eligible.len() >= max_merge_at_once {
                for start_idx in 0..=eligible.len() - max_merge_at_once {
                    let mut total_after_merge_bytes = 0;
                    let mut candidate = vec![];
                    let mut hit_too_large = false;
                    let mut idx = start_idx;
                    while idx < eligible.len() && candidate.len() < max_merge_at_once {
                        let info = eligible[idx];
                        let seg_bytes = self.size(info.as_ref(), context);

                        if total_after_merge_bytes + seg_bytes > self.max_merged_segment_bytes as i64
                        {
                            hit_too_large = true;
                        // NOTE: we continue, so that we can try
                        // "packing" smaller segments into this merge
                        // to see if we can get closer to the max
                        // size; this in general is not perfect since
                        // this is really "bin packing" and we'd have
                        // to try different permutations.
                        } else {
                            candidate.push(info);
                            total_after_merge_bytes += seg_bytes;
                        }
                        idx += 1;
                    }

                    // We should never see an empty candidate: we iterated over
                    // max_merge_at_once segments, and already pre-excluded the
                    // too-large segments:
                    debug_assert!(!candidate.is_empty());
                    if candidate.is_empty() {
                        continue;
                    }

                    let score = self.score(&candidate, hit_too_large, context);
                    debug!(
                        "maybe={:?}, score={} {}, too_large={} size={} MB",
                        candidate.iter().map(|s| s.name()).collect::<Vec<_>>(),
                        score.score(),
                        score.explanation(),
                        hit_too_large,
                        (total_after_merge_bytes as f64) / 1024.0 / 1024.0
                    );
                    // If we are already running a max sized merge
                    // (max_merge_is_running), don't allow another max
                    // sized merge to kick off:
                    if score.score() < best_score.score() && (!hit_too_large || !max_merge_is_running)
                    {
                        best = candidate;
                        best_score = score;
                        best_too_large = hit_too_large;
                        best_merge_bytes = total_after_merge_bytes;
                    }
                }
            }

            if best.len() <= 1 {
                return Ok(spec.into_option());
            }

            let segments: Vec<_> = best.into_iter().map(Arc::clone).collect();
            let merge = OneMerge::new(segments, context.next_merge_id())?;
            for info in &merge.segments {
                to_be_merged.insert(info.name().to_string());
            }
            debug!(
                "add merge={:?} size={} MB, score={} {}, {}",
                merge.segment_names(),
                (best_merge_bytes as f64) / 1024.0 / 1024.0,
                best_score.score(),
                best_score.explanation(),
                if best_too_large { "[max merge]" } else { "" }
            );
            spec.add(merge);
        }
    }

    fn find_forced_merges(
        &self,
        segment_infos: &SegmentInfos,
        max_segment_count: u32,
        segments_to_merge: &HashMap<String, bool>,
        context: &dyn MergeContext,
    ) -> Result<Option<MergeSpecification>> {
        let mut eligible = vec![];
        let mut force_merge_running = false;
        let merging = context.merging_segments();
        let mut segment_is_original = false;

        for info in &segment_infos.segments {
            if let Some(is_original) = segments_to_merge.get(info.name()) {
                segment_is_original = *is_original;
                if !merging.contains(info.name()) {
                    eligible.push(Arc::clone(info));
                } else {
                    force_merge_running = true;
                }
            }
        }

        if eligible.is_empty() {
            return Ok(None);
        }

        if (max_segment_count > 1 && eligible.len() <= max_segment_count as usize)
            || (max_segment_count == 1
                && eligible.len() == 1
                && (!segment_is_original
                    || self.is_merged(segment_infos, eligible[0].as_ref(), context)))
        {
            return Ok(None);
        }

        self.sort_by_size_desc(&mut eligible, context);

        let explicit = self.max_merge_at_once_explicit as usize;
        let mut end = eligible.len();
        let mut spec = MergeSpecification::default();

        // Do full merges, first, backwards:
        while end >= explicit + max_segment_count as usize - 1 {
            let segments = eligible[end - explicit..end].to_vec();
            spec.add(OneMerge::new(segments, context.next_merge_id())?);
            end -= explicit;
        }

        if spec.merges.is_empty() && !force_merge_running {
            // Do final merge
            let num_to_merge = end + 1 - max_segment_count as usize;
            let segments = eligible[end - num_to_merge..end].to_vec();
            spec.add(OneMerge::new(segments, context.next_merge_id())?);
        }

        Ok(spec.into_option())
    }

    fn find_forced_deletes_merges(
        &self,
        segment_infos: &SegmentInfos,
        context: &dyn MergeContext,
    ) -> Result<Option<MergeSpecification>> {
        let merging = context.merging_segments();
        let mut eligible = vec![];

        for info in &segment_infos.segments {
            let pct_deletes =
                100.0 * context.num_deleted_docs(info.as_ref()) as f64 / info.info.max_doc() as f64;
            if pct_deletes > self.force_merge_deletes_pct_allowed && !merging.contains(info.name()) {
                eligible.push(Arc::clone(info));
            }
        }

        if eligible.is_empty() {
            return Ok(None);
        }
        self.sort_by_size_desc(&mut eligible, context);

        let mut start = 0;
        let mut spec = MergeSpecification::default();
        while start < eligible.len() {
            // Don't enforce max merged size here: app is explicitly
            // calling force_merge_deletes, and knows this may take a
            // long time / produce big segments (like force_merge):
            let end = eligible
                .len()
                .min(start + self.max_merge_at_once_explicit as usize);
            let segments = eligible[start..end].to_vec();
            spec.add(OneMerge::new(segments, context.next_merge_id())?);
            start = end;
        }
        Ok(spec.into_option())
    }

    fn max_cfs_segment_size(&self) -> u64 {
        self.max_cfs_segment_size
    }

    fn no_cfs_ratio(&self) -> f64 {
        self.no_cfs_ratio
    }
}

struct MergeScore {
    merge_score: f64,
    skew: f64,
    non_del_ratio: f64,
}

impl MergeScore {
    fn new(merge_score: f64, skew: f64, non_del_ratio: f64) -> Self {
        MergeScore {
            merge_score,
            skew,
            non_del_ratio,
        }
    }

    /// Returns the score for this merge candidate; lower scores are better.
    fn score(&self) -> f64 {
        self.merge_score
    }

    /// Human readable explanation of how the merge got this score.
    fn explanation(&self) -> String {
        format!("skew {} non_del_ratio: {}", self.skew, self.non_del_ratio)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::core::codec::segment_infos::SegmentInfo;
    use crate::core::index::tests::new_directory;
    use crate::core::store::io::DataOutput;
    use crate::core::store::IOContext;
    use crate::core::util::random_id;

    use std::cell::Cell;

    pub struct MockMergeContext {
        pub deleted: HashMap<String, i32>,
        pub merging: HashSet<String>,
        next_id: Cell<u32>,
    }

    impl Default for MockMergeContext {
        fn default() -> Self {
            MockMergeContext {
                deleted: HashMap::new(),
                merging: HashSet::new(),
                next_id: Cell::new(0),
            }
        }
    }

    impl MergeContext for MockMergeContext {
        fn num_deleted_docs(&self, info: &SegmentCommitInfo) -> i32 {
            self.deleted.get(info.name()).cloned().unwrap_or(0)
        }

        fn merging_segments(&self) -> &HashSet<String> {
            &self.merging
        }

        fn next_merge_id(&self) -> u32 {
            let id = self.next_id.get();
            self.next_id.set(id + 1);
            id
        }
    }

    /// Segment infos with one segment per entry of `max_docs`, each sized
    /// `max_doc` kilobytes.
    pub fn segment_infos(max_docs: &[i32]) -> SegmentInfos {
        let dir = new_directory();
        let mut infos = SegmentInfos::default();
        for (i, max_doc) in max_docs.iter().enumerate() {
            let name = format!("_{}", i);
            let mut si = SegmentInfo::new(
                &name,
                *max_doc,
                Arc::clone(&dir),
                false,
                HashMap::new(),
                random_id(),
                HashMap::new(),
            );
            let file = format!("{}.fdt", name);
            let len = *max_doc as usize * 1024;
            let mut out = dir.create_output(&file, &IOContext::Default).unwrap();
            out.write_bytes(&vec![0u8; len], 0, len).unwrap();
            drop(out);
            si.add_file(&file).unwrap();
            infos.add(Arc::new(SegmentCommitInfo::new(Arc::new(si), 0, -1)));
        }
        infos
    }

    #[test]
    fn test_one_merge_abort() {
        let infos = segment_infos(&[1, 2]);
        let mut merge = OneMerge::new(infos.segments.clone(), 7).unwrap();
        assert_eq!(merge.total_max_doc, 3);
        assert!(merge.check_aborted().is_ok());

        let handle = merge.abort_handle();
        handle.abort();
        assert!(merge.is_aborted());
        // below the check interval no check is done
        assert!(merge.check_abort(ABORT_CHECK_UNITS / 2.0).is_ok());
        match merge.check_abort(ABORT_CHECK_UNITS / 2.0) {
            Err(crate::error::Error(Index(MergeAborted(_)), _)) => {}
            other => panic!("expected merge aborted, got {:?}", other.map(|_| ())),
        }
        assert!(OneMerge::new(vec![], 0).is_err());
    }

    #[test]
    fn test_tiered_merges_small_segments() {
        let mut policy = TieredMergePolicy::default();
        policy.set_max_merge_at_once(2).unwrap();
        policy.set_segs_per_tier(2.0).unwrap();
        let context = MockMergeContext::default();

        let infos = segment_infos(&[1, 1, 1]);
        let spec = policy
            .find_merges(MergerTrigger::SegmentFlush, &infos, &context)
            .unwrap()
            .unwrap();
        assert_eq!(spec.merges.len(), 1);
        assert_eq!(spec.merges[0].segments.len(), 2);

        // a single segment is never merged by the natural policy
        let single = segment_infos(&[5]);
        assert!(policy
            .find_merges(MergerTrigger::SegmentFlush, &single, &context)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_tiered_skips_merging_segments() {
        let mut policy = TieredMergePolicy::default();
        policy.set_max_merge_at_once(2).unwrap();
        policy.set_segs_per_tier(2.0).unwrap();
        let mut context = MockMergeContext::default();
        let infos = segment_infos(&[1, 1, 1]);
        context.merging.insert("_0".into());
        context.merging.insert("_1".into());
        assert!(policy
            .find_merges(MergerTrigger::SegmentFlush, &infos, &context)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_tiered_forced_merges() {
        let policy = TieredMergePolicy::default();
        let mut context = MockMergeContext::default();
        let infos = segment_infos(&[3, 1, 2]);
        let all: HashMap<String, bool> = infos
            .segments
            .iter()
            .map(|s| (s.name().to_string(), true))
            .collect();

        let spec = policy
            .find_forced_merges(&infos, 1, &all, &context)
            .unwrap()
            .unwrap();
        assert_eq!(spec.merges.len(), 1);
        assert_eq!(spec.merges[0].segments.len(), 3);

        let spec = policy
            .find_forced_merges(&infos, 2, &all, &context)
            .unwrap()
            .unwrap();
        // the two smallest segments are merged
        let mut names = spec.merges[0].segment_names();
        names.sort();
        assert_eq!(names, vec!["_1", "_2"]);

        assert!(policy
            .find_forced_merges(&infos, 3, &all, &context)
            .unwrap()
            .is_none());

        // a lone segment is merged again only to drop deletions
        let single = segment_infos(&[4]);
        let one: HashMap<String, bool> = vec![("_0".to_string(), true)].into_iter().collect();
        assert!(policy
            .find_forced_merges(&single, 1, &one, &context)
            .unwrap()
            .is_none());
        context.deleted.insert("_0".into(), 1);
        assert!(policy
            .find_forced_merges(&single, 1, &one, &context)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_forced_deletes_merges() {
        let policy = TieredMergePolicy::default();
        let mut context = MockMergeContext::default();
        let infos = segment_infos(&[10, 10, 10]);
        context.deleted.insert("_1".into(), 5);
        let spec = policy
            .find_forced_deletes_merges(&infos, &context)
            .unwrap()
            .unwrap();
        assert_eq!(spec.merges.len(), 1);
        assert_eq!(spec.merges[0].segment_names(), vec!["_1"]);
    }
}
