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

use crate::core::codec::field_infos::FieldInfos;
use crate::core::codec::segment_infos::SegmentInfo;
use crate::core::index::reader::{LeafReader, SegmentReader};
use crate::core::util::packed::{get_mutable_by_ratio, unsigned_bits_required, Mutable, COMPACT};
use crate::core::util::{DocId, FixedBitSet};
use crate::error::ErrorKind::IllegalArgument;
use crate::error::Result;

use std::sync::Arc;

/// Holds common state used during segment merging.
pub struct MergeState {
    /// `SegmentInfo` of the newly merged segment, `max_doc` is the number of
    /// live documents of the merged readers.
    pub segment_info: SegmentInfo,
    /// `FieldInfos` of the newly merged segment.
    pub merge_field_infos: Option<Arc<FieldInfos>>,
    pub readers: Vec<Arc<SegmentReader>>,
    /// Live docs of each reader as of the start of the merge.
    pub live_docs: Vec<Option<Arc<FixedBitSet>>>,
    /// Maps document IDs from old segments to document IDs in the new
    /// segment.
    pub doc_maps: Vec<DocMap>,
    pub max_docs: Vec<i32>,
}

impl MergeState {
    pub fn new(
        readers: Vec<Arc<SegmentReader>>,
        live_docs: Vec<Option<Arc<FixedBitSet>>>,
        mut segment_info: SegmentInfo,
    ) -> Result<MergeState> {
        if readers.len() != live_docs.len() {
            bail!(IllegalArgument(format!(
                "{} readers but {} live docs",
                readers.len(),
                live_docs.len()
            )));
        }
        let mut doc_maps = Vec::with_capacity(readers.len());
        let mut max_docs = Vec::with_capacity(readers.len());
        let mut doc_base = 0;
        for (reader, live) in readers.iter().zip(live_docs.iter()) {
            let doc_map = DocMap::new(reader.max_doc(), live.clone(), doc_base);
            doc_base += doc_map.num_docs();
            doc_maps.push(doc_map);
            max_docs.push(reader.max_doc());
        }
        segment_info.set_max_doc(doc_base)?;
        Ok(MergeState {
            segment_info,
            merge_field_infos: None,
            readers,
            live_docs,
            doc_maps,
            max_docs,
        })
    }
}

/// Remaps the doc ids of one merged segment around its deletions.
pub struct DocMap {
    live_docs: Option<Arc<FixedBitSet>>,
    // new local doc per old doc, only built when there are deletions
    del_docs: Option<Box<dyn Mutable>>,
    doc_base: DocId,
    num_docs: i32,
}

impl DocMap {
    pub fn new(max_doc: i32, live_docs: Option<Arc<FixedBitSet>>, doc_base: DocId) -> DocMap {
        let (del_docs, num_docs) = match &live_docs {
            Some(live) => {
                let bits = unsigned_bits_required(i64::from(max_doc.max(1)));
                let mut remap = get_mutable_by_ratio(max_doc as usize, bits, COMPACT);
                let mut del = 0;
                for i in 0..max_doc {
                    remap.set(i as usize, i64::from(i - del));
                    if !live.get_bit(i as usize) {
                        del += 1;
                    }
                }
                (Some(remap), max_doc - del)
            }
            None => (None, max_doc),
        };
        DocMap {
            live_docs,
            del_docs,
            doc_base,
            num_docs,
        }
    }

    /// The doc id of `doc` in the merged segment, -1 if it was deleted.
    pub fn get(&self, doc: DocId) -> DocId {
        match (&self.live_docs, &self.del_docs) {
            (Some(live), Some(remap)) => {
                if live.get_bit(doc as usize) {
                    self.doc_base + remap.get(doc as usize) as DocId
                } else {
                    -1
                }
            }
            _ => self.doc_base + doc,
        }
    }

    pub fn doc_base(&self) -> DocId {
        self.doc_base
    }

    /// Live documents carried into the merged segment.
    pub fn num_docs(&self) -> i32 {
        self.num_docs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_map_skips_deletions() {
        let mut live = FixedBitSet::with_all_set(5);
        live.clear(1);
        live.clear(3);
        let map = DocMap::new(5, Some(Arc::new(live)), 10);
        assert_eq!(map.num_docs(), 3);
        let mapped: Vec<DocId> = (0..5).map(|d| map.get(d)).collect();
        assert_eq!(mapped, vec![10, -1, 11, -1, 12]);

        let identity = DocMap::new(3, None, 4);
        assert_eq!(identity.get(2), 6);
        assert_eq!(identity.num_docs(), 3);
    }
}
