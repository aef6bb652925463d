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

use crate::core::codec::segment_infos::{run_with_find_segment_file, SegmentInfos};
use crate::core::index::reader::{
    new_cache_key, IndexReader, IndexReaderRef, LeafReader, LeafReaderContext, ReaderRefs,
    SegmentReader,
};
use crate::core::index::writer::{CommitPoint, IndexWriter, IndexWriterInner};
use crate::core::store::directory::DirectoryRc;
use crate::core::store::IOContext;
use crate::core::util::DocId;
use crate::error::Result;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, Weak};

/// Composite reader over the segments of one commit point, or over the
/// uncommitted state of an `IndexWriter` for near real time readers.
pub struct StandardDirectoryReader {
    directory: DirectoryRc,
    segment_infos: SegmentInfos,
    readers: RwLock<Vec<Arc<SegmentReader>>>,
    starts: Vec<DocId>,
    max_doc: i32,
    num_docs: i32,
    writer: Option<Weak<IndexWriterInner>>,
    apply_all_deletes: bool,
    cache_key: String,
    refs: ReaderRefs,
}

impl StandardDirectoryReader {
    pub(crate) fn new(
        directory: DirectoryRc,
        readers: Vec<Arc<SegmentReader>>,
        segment_infos: SegmentInfos,
        writer: Option<Weak<IndexWriterInner>>,
        apply_all_deletes: bool,
    ) -> StandardDirectoryReader {
        let mut starts = Vec::with_capacity(readers.len() + 1);
        let mut max_doc = 0;
        let mut num_docs = 0;
        for r in &readers {
            starts.push(max_doc);
            max_doc += r.max_doc();
            num_docs += r.num_docs();
        }
        starts.push(max_doc);
        let cache_key = new_cache_key(
            &segment_infos
                .segment_file_name()
                .unwrap_or_else(|| "segments".to_string()),
        );

        StandardDirectoryReader {
            directory,
            segment_infos,
            readers: RwLock::new(readers),
            starts,
            max_doc,
            num_docs,
            writer,
            apply_all_deletes,
            cache_key,
            refs: ReaderRefs::default(),
        }
    }

    /// Opens the latest commit of `directory`.
    pub fn open(directory: DirectoryRc) -> Result<StandardDirectoryReader> {
        Self::open_commit_point(directory, None)
    }

    /// Opens the given commit of `directory`.
    pub fn open_commit(
        directory: DirectoryRc,
        commit: &CommitPoint,
    ) -> Result<StandardDirectoryReader> {
        Self::open_commit_point(directory, Some(commit))
    }

    fn open_commit_point(
        directory: DirectoryRc,
        commit: Option<&CommitPoint>,
    ) -> Result<StandardDirectoryReader> {
        run_with_find_segment_file(&directory, commit, |(dir, file_name)| {
            let infos = SegmentInfos::read_commit(dir, file_name)?;
            Self::open_segments(Arc::clone(dir), infos, &HashMap::new())
        })
    }

    /// Opens every segment of `infos`, sharing the core of readers in
    /// `previous` whose segment did not change.
    fn open_segments(
        directory: DirectoryRc,
        infos: SegmentInfos,
        previous: &HashMap<String, Arc<SegmentReader>>,
    ) -> Result<StandardDirectoryReader> {
        let mut readers = Vec::with_capacity(infos.len());
        for si in &infos.segments {
            let reader = match previous.get(si.name()) {
                Some(old) if old.segment_info().info.get_id() == si.info.get_id() => {
                    if old.segment_info().del_gen() == si.del_gen() {
                        Arc::clone(old)
                    } else {
                        // same core, new deletions
                        Arc::new(SegmentReader::with_core(
                            si,
                            Arc::clone(old.core()),
                            &IOContext::READ,
                        )?)
                    }
                }
                _ => Arc::new(SegmentReader::open(si, &IOContext::READ)?),
            };
            readers.push(reader);
        }
        debug!(
            "opened reader on {:?} with {} segments",
            infos.segment_file_name(),
            readers.len()
        );
        Ok(StandardDirectoryReader::new(
            directory, readers, infos, None, false,
        ))
    }

    /// Returns a new reader if the index changed since this reader was
    /// opened, `None` otherwise. Unchanged segments are shared with this
    /// reader.
    pub fn open_if_changed(&self) -> Result<Option<StandardDirectoryReader>> {
        self.ensure_open()?;
        if let Some(writer) = self.writer() {
            return self.open_if_changed_nrt(&writer, self.apply_all_deletes);
        }
        if self.is_current()? {
            return Ok(None);
        }
        let previous = self.readers_by_name()?;
        let reader = run_with_find_segment_file(&self.directory, None, |(dir, file_name)| {
            let infos = SegmentInfos::read_commit(dir, file_name)?;
            Self::open_segments(Arc::clone(dir), infos, &previous)
        })?;
        Ok(Some(reader))
    }

    /// Returns a near real time reader from `writer` if it holds changes not
    /// visible to this reader.
    pub fn open_if_changed_nrt(
        &self,
        writer: &IndexWriter,
        apply_all_deletes: bool,
    ) -> Result<Option<StandardDirectoryReader>> {
        self.ensure_open()?;
        if writer.is_current(&self.segment_infos)? {
            return Ok(None);
        }
        Ok(Some(writer.get_reader(apply_all_deletes)?))
    }

    /// Whether this reader still reflects the latest state of the index: the
    /// latest commit, or for a near real time reader the writer's state.
    pub fn is_current(&self) -> Result<bool> {
        self.ensure_open()?;
        if let Some(writer) = self.writer() {
            return writer.is_current(&self.segment_infos);
        }
        let latest = SegmentInfos::read_latest_commit(&self.directory)?;
        Ok(latest.version == self.segment_infos.version
            && latest.generation == self.segment_infos.generation)
    }

    /// Version of the `SegmentInfos` this reader was opened on.
    pub fn version(&self) -> i64 {
        self.segment_infos.version
    }

    pub fn segment_infos(&self) -> &SegmentInfos {
        &self.segment_infos
    }

    pub fn directory(&self) -> &DirectoryRc {
        &self.directory
    }

    pub fn segment_readers(&self) -> Result<Vec<Arc<SegmentReader>>> {
        Ok(self.readers.read()?.clone())
    }

    fn readers_by_name(&self) -> Result<HashMap<String, Arc<SegmentReader>>> {
        Ok(self
            .readers
            .read()?
            .iter()
            .map(|r| (r.name().to_string(), Arc::clone(r)))
            .collect())
    }

    fn writer(&self) -> Option<IndexWriter> {
        self.writer
            .as_ref()
            .and_then(Weak::upgrade)
            .map(IndexWriter::from_inner)
    }
}

impl IndexReader for StandardDirectoryReader {
    fn leaves(&self) -> Vec<LeafReaderContext> {
        match self.readers.read() {
            Ok(readers) => readers
                .iter()
                .enumerate()
                .map(|(ord, r)| {
                    LeafReaderContext::new(
                        ord,
                        self.starts[ord],
                        Arc::clone(r) as Arc<dyn LeafReader>,
                    )
                })
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    fn max_doc(&self) -> i32 {
        self.max_doc
    }

    fn num_docs(&self) -> i32 {
        self.num_docs
    }

    fn refs(&self) -> &ReaderRefs {
        &self.refs
    }

    fn do_close(&self) -> Result<()> {
        let released: Vec<Arc<SegmentReader>> = self.readers.write()?.drain(..).collect();
        debug!(
            "closing reader {} over {} segments",
            self.cache_key,
            released.len()
        );
        Ok(())
    }

    fn cache_key(&self) -> &str {
        &self.cache_key
    }

    fn refresh(&self) -> Result<Option<IndexReaderRef>> {
        Ok(self
            .open_if_changed()?
            .map(|reader| Arc::new(reader) as IndexReaderRef))
    }
}

impl fmt::Display for StandardDirectoryReader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "StandardDirectoryReader(")?;
        if let Some(name) = self.segment_infos.segment_file_name() {
            write!(f, "{}:{}", name, self.segment_infos.version)?;
        }
        if self.writer.is_some() {
            write!(f, ":nrt")?;
        }
        if let Ok(readers) = self.readers.read() {
            for r in readers.iter() {
                write!(f, " {}", r)?;
            }
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::index::tests::*;
    use crate::core::index::writer::IndexWriter;
    use crate::core::index::Term;
    use crate::error::{Error, ErrorKind};

    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_round_trip() {
        let dir = new_directory();
        let bodies = ["alpha beta", "beta gamma", "gamma delta", "delta alpha", "omega"];
        let writer = build_index(&dir, &bodies, 2);
        writer
            .delete_documents(&[Term::from_str("id", "3")])
            .unwrap();
        writer.close().unwrap();

        let reader = StandardDirectoryReader::open(Arc::clone(&dir)).unwrap();
        assert_eq!(reader.max_doc(), 5);
        assert_eq!(reader.num_docs(), 4);
        assert_eq!(reader.leaves().len(), 3);
        assert_eq!(reader.leaves()[2].doc_base, 4);
        for (i, body) in bodies.iter().enumerate() {
            let doc = reader.document(i as i32, &[]).unwrap();
            assert_eq!(doc.get("id"), Some(i.to_string().as_str()));
            assert_eq!(doc.get("body"), Some(*body));
        }
        let only_id = reader.document(1, &["id".to_string()]).unwrap();
        assert_eq!(only_id.get("body"), None);
        assert!(reader.document(5, &[]).is_err());
    }

    #[test]
    fn test_ref_count_and_close_listeners() {
        let dir = new_directory();
        build_index(&dir, &["a", "b"], 2).close().unwrap();
        let reader = StandardDirectoryReader::open(Arc::clone(&dir)).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&fired);
        reader
            .add_close_listener(Box::new(move |_| {
                count.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }))
            .unwrap();

        for _ in 0..3 {
            reader.inc_ref().unwrap();
        }
        assert_eq!(reader.ref_count(), 4);
        for _ in 0..3 {
            reader.dec_ref().unwrap();
            assert_eq!(fired.load(Ordering::Acquire), 0);
            reader.document(0, &[]).unwrap();
        }
        reader.close().unwrap();
        assert_eq!(fired.load(Ordering::Acquire), 1);
        assert!(reader.leaves().is_empty());
        match reader.document(0, &[]) {
            Err(Error(ErrorKind::AlreadyClosed(_), _)) => {}
            r => panic!("expected AlreadyClosed, got {:?}", r.is_ok()),
        }
        assert!(reader.inc_ref().is_err());
        assert!(!reader.try_inc_ref());
        assert!(reader.close().is_err());
        assert_eq!(fired.load(Ordering::Acquire), 1);
    }

    #[test]
    fn test_open_if_changed_shares_segments() {
        let dir = new_directory();
        let writer = build_index(&dir, &["a", "b", "c", "d"], 2);
        let first = StandardDirectoryReader::open(Arc::clone(&dir)).unwrap();
        assert!(first.is_current().unwrap());
        assert!(first.open_if_changed().unwrap().is_none());

        writer.delete_documents(&[Term::from_str("id", "3")]).unwrap();
        writer.add_document(text_doc("4", "e")).unwrap();
        writer.commit().unwrap();
        assert!(!first.is_current().unwrap());

        let second = first.open_if_changed().unwrap().unwrap();
        assert_eq!(second.num_docs(), 4);
        assert_eq!(second.max_doc(), 5);
        let old = first.segment_readers().unwrap();
        let new = second.segment_readers().unwrap();
        // untouched segment is shared, the one with a deletion shares its core
        assert!(Arc::ptr_eq(&old[0], &new[0]));
        assert!(!Arc::ptr_eq(&old[1], &new[1]));
        assert!(Arc::ptr_eq(old[1].core(), new[1].core()));
        assert_eq!(first.num_docs(), 4);
        assert_eq!(first.max_doc(), 4);
        writer.close().unwrap();
    }

    #[test]
    fn test_old_generation_survives_new_commit() {
        let dir = new_directory();
        let mut config = manual_config();
        config.merge_scheduler = Arc::new(crate::core::index::merge::SerialMergeScheduler {});
        let writer = IndexWriter::new(Arc::clone(&dir), config).unwrap();
        for i in 0..6 {
            writer
                .add_document(text_doc(&i.to_string(), "shared words"))
                .unwrap();
            writer.flush().unwrap();
        }
        writer.commit().unwrap();
        let g1 = StandardDirectoryReader::open(Arc::clone(&dir)).unwrap();
        let g1_gen = g1.segment_infos().generation;

        writer.delete_documents(&[Term::from_str("id", "0")]).unwrap();
        writer.force_merge(1).unwrap();
        writer.commit().unwrap();

        // g1's files are gone from the directory listing, yet g1 reads on
        let g2 = StandardDirectoryReader::open(Arc::clone(&dir)).unwrap();
        assert!(g2.segment_infos().generation > g1_gen);
        assert_eq!(g2.leaves().len(), 1);
        assert_eq!(g2.num_docs(), 5);
        assert_eq!(g1.num_docs(), 6);
        assert_eq!(g1.doc_freq(&Term::from_str("body", "shared")).unwrap(), 6);
        for i in 0..6 {
            assert_eq!(g1.document(i, &[]).unwrap().get("id"), Some(i.to_string().as_str()));
        }
        assert!(!g1.is_current().unwrap());
        assert!(g2.is_current().unwrap());
        writer.close().unwrap();
    }

    #[test]
    fn test_nrt_reader_sees_uncommitted_changes() {
        let dir = new_directory();
        let writer = build_index(&dir, &["a", "b"], 2);
        let nrt = writer.get_reader(true).unwrap();
        assert_eq!(nrt.num_docs(), 2);
        assert!(nrt.is_current().unwrap());

        writer.add_document(text_doc("2", "c")).unwrap();
        assert!(!nrt.is_current().unwrap());
        let refreshed = nrt.open_if_changed().unwrap().unwrap();
        assert_eq!(refreshed.num_docs(), 3);
        assert!(refreshed.open_if_changed().unwrap().is_none());

        writer.delete_documents(&[Term::from_str("id", "0")]).unwrap();
        let after_delete = refreshed.open_if_changed_nrt(&writer, true).unwrap().unwrap();
        assert_eq!(after_delete.num_docs(), 2);
        // nothing was committed
        let committed = StandardDirectoryReader::open(Arc::clone(&dir)).unwrap();
        assert_eq!(committed.num_docs(), 2);

        nrt.close().unwrap();
        refreshed.close().unwrap();
        after_delete.close().unwrap();
        writer.close().unwrap();
    }
}
