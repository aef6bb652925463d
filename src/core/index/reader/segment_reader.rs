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

use crate::core::codec::compound::segment_directory;
use crate::core::codec::field_infos::{read_field_infos, FieldInfos};
use crate::core::codec::live_docs::read_live_docs;
use crate::core::codec::norms::{NormValues, NormsReader};
use crate::core::codec::postings::PostingsReader;
use crate::core::codec::segment_infos::{SegmentCommitInfo, SegmentReadState};
use crate::core::codec::stored_fields::StoredFieldsReader;
use crate::core::index::reader::{new_cache_key, CloseListener, LeafReader, ReaderRefs};
use crate::core::index::{Fields, StoredFieldVisitor};
use crate::core::store::directory::DirectoryRc;
use crate::core::store::IOContext;
use crate::core::util::{Bits, BitsRef, DocId, FixedBitSet};
use crate::error::Result;

use std::fmt;
use std::sync::Arc;

/// Holds the per-segment structures that do not change when deletions are
/// applied, so they are shared by every `SegmentReader` of a segment.
///
/// Core close listeners run when the last reader sharing the core is gone.
pub struct SegmentCoreReaders {
    pub segment: String,
    pub field_infos: Arc<FieldInfos>,
    pub fields: Arc<PostingsReader>,
    pub stored_fields: StoredFieldsReader,
    pub norms: NormsReader,
    core_cache_key: String,
    refs: ReaderRefs,
}

impl SegmentCoreReaders {
    pub fn new(
        directory: &DirectoryRc,
        si: &SegmentCommitInfo,
        context: &IOContext,
    ) -> Result<SegmentCoreReaders> {
        let info = si.info.as_ref();
        let dir = segment_directory(directory, info, context)?;
        let field_infos = Arc::new(read_field_infos(dir.as_ref(), info, context)?);
        let state = SegmentReadState::new(
            Arc::clone(&dir),
            info,
            Arc::clone(&field_infos),
            *context,
        );
        let fields = Arc::new(PostingsReader::open(&state)?);
        let stored_fields =
            StoredFieldsReader::open(dir.as_ref(), info, Arc::clone(&field_infos), context)?;
        let norms = if field_infos.has_norms {
            NormsReader::open(dir.as_ref(), info, &field_infos, context)?
        } else {
            NormsReader::default()
        };

        Ok(SegmentCoreReaders {
            segment: info.name.clone(),
            field_infos,
            fields,
            stored_fields,
            norms,
            core_cache_key: new_cache_key(&info.name),
            refs: ReaderRefs::default(),
        })
    }

    pub fn core_cache_key(&self) -> &str {
        &self.core_cache_key
    }

    pub fn add_close_listener(&self, listener: CloseListener) -> Result<()> {
        self.refs.add_listener(listener)
    }

    pub fn check_integrity(&self) -> Result<()> {
        self.fields.check_integrity()?;
        self.stored_fields.check_integrity()
    }
}

impl Drop for SegmentCoreReaders {
    fn drop(&mut self) {
        debug!("releasing core readers of segment {}", self.segment);
        if let Err(e) = self.refs.notify(&self.core_cache_key) {
            warn!(
                "core close listeners of segment {} failed: {:?}",
                self.segment, e
            );
        }
    }
}

/// `LeafReader` over one committed (or NRT flushed) segment: the shared
/// core plus the live docs of one deletion generation.
pub struct SegmentReader {
    si: SegmentCommitInfo,
    core: Arc<SegmentCoreReaders>,
    live_docs: Option<Arc<FixedBitSet>>,
    num_docs: i32,
}

impl SegmentReader {
    /// Opens a new reader, with a new core, for `si`.
    pub fn open(si: &SegmentCommitInfo, context: &IOContext) -> Result<SegmentReader> {
        let core = Arc::new(SegmentCoreReaders::new(&si.info.directory, si, context)?);
        SegmentReader::with_core(si, core, context)
    }

    /// Opens a reader sharing `core`, reading the live docs of the current
    /// deletion generation of `si`.
    pub fn with_core(
        si: &SegmentCommitInfo,
        core: Arc<SegmentCoreReaders>,
        context: &IOContext,
    ) -> Result<SegmentReader> {
        let live_docs = if si.has_deletions() {
            Some(Arc::new(read_live_docs(
                si.info.directory.as_ref(),
                si,
                context,
            )?))
        } else {
            None
        };
        let num_docs = si.num_docs();
        Ok(SegmentReader::with_live_docs(si, core, live_docs, num_docs))
    }

    /// Creates a reader over in-memory live docs, which may be ahead of the
    /// ones on disk.
    pub fn with_live_docs(
        si: &SegmentCommitInfo,
        core: Arc<SegmentCoreReaders>,
        live_docs: Option<Arc<FixedBitSet>>,
        num_docs: i32,
    ) -> SegmentReader {
        SegmentReader {
            si: si.clone(),
            core,
            live_docs,
            num_docs,
        }
    }

    pub fn segment_info(&self) -> &SegmentCommitInfo {
        &self.si
    }

    pub fn core(&self) -> &Arc<SegmentCoreReaders> {
        &self.core
    }

    pub fn live_docs_bits(&self) -> Option<&Arc<FixedBitSet>> {
        self.live_docs.as_ref()
    }

    pub fn check_integrity(&self) -> Result<()> {
        self.core.check_integrity()
    }
}

impl LeafReader for SegmentReader {
    fn name(&self) -> &str {
        &self.core.segment
    }

    fn fields(&self) -> Result<Arc<dyn Fields>> {
        Ok(Arc::clone(&self.core.fields) as Arc<dyn Fields>)
    }

    fn document(&self, doc_id: DocId, visitor: &mut dyn StoredFieldVisitor) -> Result<()> {
        self.core.stored_fields.visit_document(doc_id, visitor)
    }

    fn live_docs(&self) -> Option<BitsRef> {
        self.live_docs
            .as_ref()
            .map(|bits| Arc::clone(bits) as BitsRef)
    }

    fn field_infos(&self) -> &FieldInfos {
        &self.core.field_infos
    }

    fn norm_values(&self, field: &str) -> Result<Option<Arc<NormValues>>> {
        Ok(match self.core.field_infos.field_info_by_name(field) {
            Some(info) if info.has_norms() => self.core.norms.norms(info.number),
            _ => None,
        })
    }

    fn max_doc(&self) -> DocId {
        self.si.info.max_doc()
    }

    fn num_docs(&self) -> i32 {
        self.num_docs
    }

    fn core_cache_key(&self) -> &str {
        self.core.core_cache_key()
    }

    fn add_core_close_listener(&self, listener: CloseListener) -> Result<()> {
        self.core.add_close_listener(listener)
    }
}

impl fmt::Display for SegmentReader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.si)?;
        if let Some(live) = &self.live_docs {
            if live.len() as i32 - self.num_docs != self.si.del_count() {
                write!(f, "(pending {})", live.len() as i32 - self.num_docs)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::index::reader::IndexReader;
    use crate::core::index::tests::*;
    use crate::core::index::Term;
    use crate::core::search::posting_iterator::PostingIteratorFlags;
    use crate::core::search::{DocIterator, NO_MORE_DOCS};

    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_shared_core_and_listener() {
        let dir = new_directory();
        let writer = build_index(&dir, &["a b", "b c", "c d"], 3);
        let reader = writer.get_reader(true).unwrap();
        let leaves = reader.leaves();
        assert_eq!(leaves.len(), 1);
        let segment_info = leaves[0].reader.name().to_string();
        assert!(segment_info.starts_with('_'));

        let infos = writer.segment_infos().unwrap();
        let si = &infos.segments[0];
        let first = SegmentReader::open(si, &IOContext::READ).unwrap();
        let second =
            SegmentReader::with_core(si, Arc::clone(first.core()), &IOContext::READ).unwrap();
        assert_eq!(first.core_cache_key(), second.core_cache_key());

        let fired = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&fired);
        first
            .add_core_close_listener(Box::new(move |_| {
                count.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }))
            .unwrap();
        drop(first);
        assert_eq!(fired.load(Ordering::Acquire), 0);

        let mut postings = second
            .postings(&Term::from_str("body", "c"), PostingIteratorFlags::FREQS)
            .unwrap()
            .unwrap();
        assert_eq!(postings.next().unwrap(), 1);
        assert_eq!(postings.next().unwrap(), 2);
        assert_eq!(postings.next().unwrap(), NO_MORE_DOCS);
        assert!(second.norm_values("body").unwrap().is_some());
        assert!(second.norm_values("id").unwrap().is_none());

        drop(second);
        assert_eq!(fired.load(Ordering::Acquire), 1);
        reader.close().unwrap();
        writer.close().unwrap();
    }
}
