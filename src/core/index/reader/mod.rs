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

mod segment_reader;

pub use self::segment_reader::*;

mod directory_reader;

pub use self::directory_reader::*;

use crate::core::codec::field_infos::FieldInfos;
use crate::core::codec::norms::NormValues;
use crate::core::doc::{Document, DocumentStoredFieldVisitor};
use crate::core::index::{Fields, StoredFieldVisitor, Term, Terms};
use crate::core::search::posting_iterator::PostingIterator;
use crate::core::util::{BitsRef, DocId};
use crate::error::ErrorKind::{AlreadyClosed, IllegalArgument, IllegalState};
use crate::error::Result;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Callback invoked with the cache key of a reader once the reader (or its
/// core) is released.
pub type CloseListener = Box<dyn FnOnce(&str) -> Result<()> + Send>;

lazy_static! {
    static ref READER_ID: AtomicUsize = AtomicUsize::new(0);
}

/// Returns a process wide unique key for a new reader of `name`.
pub fn new_cache_key(name: &str) -> String {
    format!("{}@{}", name, READER_ID.fetch_add(1, Ordering::AcqRel))
}

/// Reference count and close listeners shared by every `IndexReader`
/// implementation.
///
/// The count starts at one; the reader becomes unusable once it drops to
/// zero, and the listeners run exactly once at that moment.
pub struct ReaderRefs {
    ref_count: AtomicUsize,
    listeners: Mutex<Vec<CloseListener>>,
}

impl Default for ReaderRefs {
    fn default() -> Self {
        ReaderRefs {
            ref_count: AtomicUsize::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl ReaderRefs {
    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.ref_count() == 0
    }

    /// Increments the count only if it is still positive.
    pub fn try_inc_ref(&self) -> bool {
        let mut count = self.ref_count.load(Ordering::Acquire);
        while count > 0 {
            match self.ref_count.compare_exchange_weak(
                count,
                count + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => count = actual,
            }
        }
        false
    }

    /// Decrements the count, returns `true` for the call that released the
    /// last reference.
    pub fn dec_ref(&self) -> Result<bool> {
        let mut count = self.ref_count.load(Ordering::Acquire);
        loop {
            if count == 0 {
                bail!(IllegalState("too many dec_ref calls".into()));
            }
            match self.ref_count.compare_exchange_weak(
                count,
                count - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(count == 1),
                Err(actual) => count = actual,
            }
        }
    }

    pub fn add_listener(&self, listener: CloseListener) -> Result<()> {
        self.listeners.lock()?.push(listener);
        Ok(())
    }

    /// Runs and forgets every registered listener.
    pub fn notify(&self, cache_key: &str) -> Result<()> {
        let listeners: Vec<CloseListener> = self.listeners.lock()?.drain(..).collect();
        for listener in listeners {
            if let Err(e) = listener(cache_key) {
                warn!("close listener of reader '{}' failed: {:?}", cache_key, e);
            }
        }
        Ok(())
    }
}

/// Index reader over one segment.
///
/// Doc ids are local to the segment, in `[0, max_doc)`.
pub trait LeafReader: Send + Sync {
    /// Name of the segment this reader reads.
    fn name(&self) -> &str;

    fn fields(&self) -> Result<Arc<dyn Fields>>;

    fn terms(&self, field: &str) -> Result<Option<Arc<dyn Terms>>> {
        self.fields()?.terms(field)
    }

    fn doc_freq(&self, term: &Term) -> Result<i32> {
        if let Some(terms) = self.terms(&term.field)? {
            let mut terms_iter = terms.iterator()?;
            if terms_iter.seek_exact(&term.bytes)? {
                return terms_iter.doc_freq();
            }
        }
        Ok(0)
    }

    /// Postings of `term`, skipping deleted documents.
    fn postings(&self, term: &Term, flags: u16) -> Result<Option<Box<dyn PostingIterator>>> {
        if let Some(terms) = self.terms(&term.field)? {
            let mut terms_iter = terms.iterator()?;
            if terms_iter.seek_exact(&term.bytes)? {
                return Ok(Some(terms_iter.postings_with_live_docs(self.live_docs(), flags)?));
            }
        }
        Ok(None)
    }

    fn document(&self, doc_id: DocId, visitor: &mut dyn StoredFieldVisitor) -> Result<()>;

    /// `None` when the segment has no deletions.
    fn live_docs(&self) -> Option<BitsRef>;

    fn field_infos(&self) -> &FieldInfos;

    fn norm_values(&self, field: &str) -> Result<Option<Arc<NormValues>>>;

    fn max_doc(&self) -> DocId;

    fn num_docs(&self) -> i32;

    /// Key shared by every reader of the same segment core, regardless of its
    /// deletions. Caches of per-segment data are keyed by it.
    fn core_cache_key(&self) -> &str;

    /// Registers a listener fired once the segment core is released.
    fn add_core_close_listener(&self, listener: CloseListener) -> Result<()>;
}

pub type LeafReaderRef = Arc<dyn LeafReader>;

/// A leaf of a composite reader together with its position in it.
#[derive(Clone)]
pub struct LeafReaderContext {
    /// Index of this leaf in `IndexReader::leaves`.
    pub ord: usize,
    /// Absolute doc id of the first document of this leaf.
    pub doc_base: DocId,
    pub reader: LeafReaderRef,
}

impl LeafReaderContext {
    pub fn new(ord: usize, doc_base: DocId, reader: LeafReaderRef) -> Self {
        LeafReaderContext {
            ord,
            doc_base,
            reader,
        }
    }
}

impl fmt::Debug for LeafReaderContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LeafReaderContext")
            .field("ord", &self.ord)
            .field("doc_base", &self.doc_base)
            .field("reader", &self.reader.name())
            .finish()
    }
}

/// Index of the leaf holding absolute doc `doc`.
pub fn sub_index(doc: DocId, leaves: &[LeafReaderContext]) -> Option<usize> {
    if leaves.is_empty() || doc < 0 {
        return None;
    }
    let idx = match leaves.binary_search_by(|l| l.doc_base.cmp(&doc)) {
        Ok(mut i) => {
            // skip empty leaves sharing the same base
            while i + 1 < leaves.len() && leaves[i + 1].doc_base == doc {
                i += 1;
            }
            i
        }
        Err(i) => i - 1,
    };
    let leaf = &leaves[idx];
    if doc - leaf.doc_base < leaf.reader.max_doc() {
        Some(idx)
    } else {
        None
    }
}

/// A point in time view over a list of segments.
///
/// Readers are reference counted: `close` is one `dec_ref`, and using a
/// reader whose count reached zero fails with `AlreadyClosed`.
pub trait IndexReader: Send + Sync {
    fn leaves(&self) -> Vec<LeafReaderContext>;

    fn max_doc(&self) -> i32;

    fn num_docs(&self) -> i32;

    fn num_deleted_docs(&self) -> i32 {
        self.max_doc() - self.num_docs()
    }

    fn has_deletions(&self) -> bool {
        self.num_deleted_docs() > 0
    }

    fn refs(&self) -> &ReaderRefs;

    /// Releases the resources held by this reader, called once when the
    /// reference count drops to zero.
    fn do_close(&self) -> Result<()>;

    /// Key identifying this reader instance.
    fn cache_key(&self) -> &str;

    fn ensure_open(&self) -> Result<()> {
        if self.refs().is_closed() {
            bail!(AlreadyClosed(format!(
                "reader '{}' is already closed",
                self.cache_key()
            )));
        }
        Ok(())
    }

    fn ref_count(&self) -> usize {
        self.refs().ref_count()
    }

    fn inc_ref(&self) -> Result<()> {
        if !self.try_inc_ref() {
            self.ensure_open()?;
        }
        Ok(())
    }

    fn try_inc_ref(&self) -> bool {
        self.refs().try_inc_ref()
    }

    fn dec_ref(&self) -> Result<()> {
        self.ensure_open()?;
        if self.refs().dec_ref()? {
            let res = self.do_close();
            self.refs().notify(self.cache_key())?;
            res?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.dec_ref()
    }

    /// A reader over the latest state of the index, or `None` when this one
    /// is current or cannot be reopened.
    fn refresh(&self) -> Result<Option<IndexReaderRef>> {
        Ok(None)
    }

    fn add_close_listener(&self, listener: CloseListener) -> Result<()> {
        self.ensure_open()?;
        self.refs().add_listener(listener)
    }

    fn document_with_visitor(&self, doc: DocId, visitor: &mut dyn StoredFieldVisitor) -> Result<()> {
        self.ensure_open()?;
        let leaves = self.leaves();
        match sub_index(doc, &leaves) {
            Some(i) => {
                let leaf = &leaves[i];
                leaf.reader.document(doc - leaf.doc_base, visitor)
            }
            None => bail!(IllegalArgument(format!(
                "doc {} is out of bounds [0, {})",
                doc,
                self.max_doc()
            ))),
        }
    }

    /// Loads the stored fields of `doc`; an empty `fields_to_load` loads all.
    fn document(&self, doc: DocId, fields_to_load: &[String]) -> Result<Document> {
        let mut visitor = DocumentStoredFieldVisitor::new(fields_to_load);
        self.document_with_visitor(doc, &mut visitor)?;
        Ok(visitor.document())
    }

    fn doc_freq(&self, term: &Term) -> Result<i32> {
        self.ensure_open()?;
        let mut total = 0;
        for leaf in self.leaves() {
            total += leaf.reader.doc_freq(term)?;
        }
        Ok(total)
    }
}

pub type IndexReaderRef = Arc<dyn IndexReader>;

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_ref_counting() {
        let refs = ReaderRefs::default();
        assert!(refs.try_inc_ref());
        assert_eq!(refs.ref_count(), 2);
        assert!(!refs.dec_ref().unwrap());
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        refs.add_listener(Box::new(move |_| {
            assert!(!flag.swap(true, Ordering::AcqRel), "fired twice");
            Ok(())
        }))
        .unwrap();
        assert!(refs.dec_ref().unwrap());
        refs.notify("key").unwrap();
        refs.notify("key").unwrap();
        assert!(fired.load(Ordering::Acquire));
        assert!(refs.is_closed());
        assert!(!refs.try_inc_ref());
        assert!(refs.dec_ref().is_err());
    }

    #[test]
    fn test_cache_keys_are_unique() {
        assert_ne!(new_cache_key("_0"), new_cache_key("_0"));
        assert!(new_cache_key("_1").starts_with("_1@"));
    }
}
