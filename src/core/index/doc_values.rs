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

use crate::core::index::reader::LeafReader;
use crate::core::index::{SeekStatus, TermIterator, Terms};
use crate::core::search::posting_iterator::PostingIteratorFlags;
use crate::core::search::NO_MORE_DOCS;
use crate::core::util::{Accountable, DocId};
use crate::error::ErrorKind::IllegalArgument;
use crate::error::Result;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, Weak};

/// Every `INDEX_INTERVAL`th term is kept when ords are counted privately.
pub const INDEX_INTERVAL: usize = 128;

/// Calls `f(ord, doc)` for every doc of every term of `field`, ords
/// counting from 0 in term order.
fn for_each_posting<F>(terms: &dyn Terms, mut f: F) -> Result<Vec<Vec<u8>>>
where
    F: FnMut(usize, DocId),
{
    let mut iter = terms.iterator()?;
    let mut seen = Vec::new();
    while let Some(term) = iter.next()? {
        let ord = seen.len();
        let mut postings = iter.postings(PostingIteratorFlags::NONE)?;
        loop {
            let doc = postings.next()?;
            if doc == NO_MORE_DOCS {
                break;
            }
            f(ord, doc);
        }
        seen.push(term);
    }
    Ok(seen)
}

/// Single valued terms of a field uninverted to a per-doc ord.
///
/// Ords start at 1 in term order, ord 0 means the doc has no term. A doc
/// with several terms keeps the largest one.
pub struct DocTermsIndex {
    field: String,
    terms: Vec<Vec<u8>>,
    doc_to_ord: Vec<u32>,
}

impl DocTermsIndex {
    pub fn build(reader: &dyn LeafReader, field: &str) -> Result<DocTermsIndex> {
        let max_doc = reader.max_doc() as usize;
        let mut doc_to_ord = vec![0u32; max_doc];
        let terms = match reader.terms(field)? {
            Some(terms) => for_each_posting(terms.as_ref(), |ord, doc| {
                doc_to_ord[doc as usize] = ord as u32 + 1;
            })?,
            None => Vec::new(),
        };
        Ok(DocTermsIndex {
            field: field.to_string(),
            terms,
            doc_to_ord,
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn ord(&self, doc: DocId) -> i32 {
        self.doc_to_ord[doc as usize] as i32
    }

    /// The term of `ord`, `None` for the missing ord 0.
    pub fn lookup_ord(&self, ord: i32) -> Option<&[u8]> {
        if ord <= 0 {
            None
        } else {
            self.terms.get(ord as usize - 1).map(Vec::as_slice)
        }
    }

    /// The ord of `term`, or `-(insertion ord) - 1` when absent.
    pub fn lookup_term(&self, term: &[u8]) -> i32 {
        match self.terms.binary_search_by(|t| t.as_slice().cmp(term)) {
            Ok(idx) => idx as i32 + 1,
            Err(idx) => -(idx as i32 + 1) - 1,
        }
    }

    /// Number of distinct terms, ords run from 1 to this value.
    pub fn value_count(&self) -> usize {
        self.terms.len()
    }

    pub fn term(&self, doc: DocId) -> Option<&[u8]> {
        self.lookup_ord(self.ord(doc))
    }
}

impl Accountable for DocTermsIndex {
    fn ram_bytes_used(&self) -> usize {
        let terms: usize = self
            .terms
            .iter()
            .map(|t| t.len() + mem::size_of::<Vec<u8>>())
            .sum();
        terms + self.doc_to_ord.len() * mem::size_of::<u32>()
    }
}

impl fmt::Debug for DocTermsIndex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DocTermsIndex")
            .field("field", &self.field)
            .field("value_count", &self.value_count())
            .field("max_doc", &self.doc_to_ord.len())
            .finish()
    }
}

/// Multi valued terms of a field uninverted to per-doc ord lists, in
/// increasing ord order.
///
/// Ords come from the terms dictionary when it exposes them. Otherwise they
/// are counted here and every `INDEX_INTERVAL`th term is kept so
/// `lookup_term` can seek near an ord and step forward.
pub struct DocTermOrds {
    field: String,
    terms: Arc<dyn Terms>,
    native_ords: bool,
    num_terms: usize,
    indexed_terms: Vec<Vec<u8>>,
    doc_starts: Vec<u32>,
    ords: Vec<i64>,
}

impl DocTermOrds {
    pub fn uninvert(reader: &dyn LeafReader, field: &str) -> Result<Option<DocTermOrds>> {
        let terms = match reader.terms(field)? {
            Some(terms) => terms,
            None => return Ok(None),
        };
        let max_doc = reader.max_doc() as usize;

        let native_ords = {
            let mut iter = terms.iterator()?;
            iter.next()?.is_some() && iter.ord().is_ok()
        };

        let mut per_doc: Vec<Vec<i64>> = vec![Vec::new(); max_doc];
        let mut indexed_terms = Vec::new();
        let mut num_terms = 0;
        let mut iter = terms.iterator()?;
        while let Some(term) = iter.next()? {
            let ord = if native_ords {
                iter.ord()?
            } else {
                if num_terms % INDEX_INTERVAL == 0 {
                    indexed_terms.push(term.clone());
                }
                num_terms as i64
            };
            let mut postings = iter.postings(PostingIteratorFlags::NONE)?;
            loop {
                let doc = postings.next()?;
                if doc == NO_MORE_DOCS {
                    break;
                }
                per_doc[doc as usize].push(ord);
            }
            num_terms += 1;
        }

        let mut doc_starts = Vec::with_capacity(max_doc + 1);
        let mut ords = Vec::new();
        for mut doc_ords in per_doc {
            doc_starts.push(ords.len() as u32);
            doc_ords.sort();
            ords.extend(doc_ords);
        }
        doc_starts.push(ords.len() as u32);

        debug!(
            "uninverted field '{}' of {}: {} terms, native ords {}",
            field,
            reader.name(),
            num_terms,
            native_ords
        );
        Ok(Some(DocTermOrds {
            field: field.to_string(),
            terms,
            native_ords,
            num_terms,
            indexed_terms,
            doc_starts,
            ords,
        }))
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Whether the ords come from the terms dictionary.
    pub fn is_native_ords(&self) -> bool {
        self.native_ords
    }

    pub fn num_terms(&self) -> usize {
        self.num_terms
    }

    pub fn ords(&self, doc: DocId) -> &[i64] {
        let doc = doc as usize;
        let start = self.doc_starts[doc] as usize;
        let end = self.doc_starts[doc + 1] as usize;
        &self.ords[start..end]
    }

    /// A term iterator positioned on `ord`.
    pub fn seek_ord(&self, ord: i64) -> Result<Box<dyn TermIterator>> {
        if ord < 0 || ord as usize >= self.num_terms {
            bail!(IllegalArgument(format!(
                "ord {} out of range for field '{}' with {} terms",
                ord, self.field, self.num_terms
            )));
        }
        let mut iter = self.terms.iterator()?;
        if self.native_ords {
            iter.seek_exact_ord(ord)?;
            return Ok(iter);
        }
        let ord = ord as usize;
        let base = &self.indexed_terms[ord / INDEX_INTERVAL];
        if iter.seek_ceil(base)? != SeekStatus::Found {
            bail!(IllegalArgument(format!(
                "indexed term of ord {} is missing in field '{}'",
                ord, self.field
            )));
        }
        for _ in 0..ord % INDEX_INTERVAL {
            iter.next()?;
        }
        Ok(iter)
    }

    pub fn lookup_term(&self, ord: i64) -> Result<Vec<u8>> {
        let iter = self.seek_ord(ord)?;
        Ok(iter.term()?.to_vec())
    }
}

impl Accountable for DocTermOrds {
    fn ram_bytes_used(&self) -> usize {
        let indexed: usize = self
            .indexed_terms
            .iter()
            .map(|t| t.len() + mem::size_of::<Vec<u8>>())
            .sum();
        indexed
            + self.doc_starts.len() * mem::size_of::<u32>()
            + self.ords.len() * mem::size_of::<i64>()
    }
}

type CacheKey = (String, String);

#[derive(Default)]
struct FieldCacheEntries {
    terms_index: HashMap<CacheKey, Arc<DocTermsIndex>>,
    term_ords: HashMap<CacheKey, Arc<DocTermOrds>>,
    // core keys that already carry an eviction listener
    registered: HashSet<String>,
}

/// Uninverted field values per segment core.
///
/// Entries are keyed by the core cache key of the leaf and dropped by the
/// core's close listener, so readers sharing a core share the values.
#[derive(Default)]
pub struct FieldCache {
    entries: Mutex<FieldCacheEntries>,
}

lazy_static! {
    static ref DEFAULT_FIELD_CACHE: Arc<FieldCache> = Arc::new(FieldCache::default());
}

impl FieldCache {
    pub fn new() -> Arc<FieldCache> {
        Arc::new(FieldCache::default())
    }

    /// The process wide cache used by sorting.
    pub fn default_cache() -> Arc<FieldCache> {
        Arc::clone(&DEFAULT_FIELD_CACHE)
    }

    pub fn doc_terms_index(
        self: &Arc<Self>,
        reader: &dyn LeafReader,
        field: &str,
    ) -> Result<Arc<DocTermsIndex>> {
        let key = (reader.core_cache_key().to_string(), field.to_string());
        if let Some(index) = self.entries.lock()?.terms_index.get(&key) {
            return Ok(Arc::clone(index));
        }
        let index = Arc::new(DocTermsIndex::build(reader, field)?);
        self.register_listener(reader)?;
        let mut entries = self.entries.lock()?;
        Ok(Arc::clone(entries.terms_index.entry(key).or_insert(index)))
    }

    pub fn doc_term_ords(
        self: &Arc<Self>,
        reader: &dyn LeafReader,
        field: &str,
    ) -> Result<Option<Arc<DocTermOrds>>> {
        let key = (reader.core_cache_key().to_string(), field.to_string());
        if let Some(ords) = self.entries.lock()?.term_ords.get(&key) {
            return Ok(Some(Arc::clone(ords)));
        }
        let ords = match DocTermOrds::uninvert(reader, field)? {
            Some(ords) => Arc::new(ords),
            None => return Ok(None),
        };
        self.register_listener(reader)?;
        let mut entries = self.entries.lock()?;
        Ok(Some(Arc::clone(entries.term_ords.entry(key).or_insert(ords))))
    }

    fn register_listener(self: &Arc<Self>, reader: &dyn LeafReader) -> Result<()> {
        let core_key = reader.core_cache_key().to_string();
        if !self.entries.lock()?.registered.insert(core_key) {
            return Ok(());
        }
        let cache: Weak<FieldCache> = Arc::downgrade(self);
        reader.add_core_close_listener(Box::new(move |key: &str| {
            if let Some(cache) = cache.upgrade() {
                cache.purge(key)?;
            }
            Ok(())
        }))
    }

    /// Drops every entry of a segment core.
    pub fn purge(&self, core_key: &str) -> Result<()> {
        let mut entries = self.entries.lock()?;
        entries.terms_index.retain(|k, _| k.0 != core_key);
        entries.term_ords.retain(|k, _| k.0 != core_key);
        entries.registered.remove(core_key);
        Ok(())
    }

    /// Number of cached entries.
    pub fn size(&self) -> usize {
        match self.entries.lock() {
            Ok(entries) => entries.terms_index.len() + entries.term_ords.len(),
            Err(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::index::reader::{IndexReader, StandardDirectoryReader};
    use crate::core::index::tests::*;

    fn open(bodies: &[&str], per_segment: usize) -> StandardDirectoryReader {
        let dir = new_directory();
        let writer = build_index(&dir, bodies, per_segment);
        writer.close().unwrap();
        StandardDirectoryReader::open(dir).unwrap()
    }

    #[test]
    fn test_doc_terms_index() {
        let reader = open(&["b", "a", "c", "b"], 4);
        let leaves = reader.leaves();
        let index = DocTermsIndex::build(leaves[0].reader.as_ref(), "body").unwrap();

        assert_eq!(index.value_count(), 3);
        assert_eq!(index.ord(0), 2);
        assert_eq!(index.ord(1), 1);
        assert_eq!(index.ord(3), 2);
        assert_eq!(index.term(2), Some(&b"c"[..]));
        assert_eq!(index.lookup_ord(0), None);

        assert_eq!(index.lookup_term(b"a"), 1);
        assert_eq!(index.lookup_term(b"c"), 3);
        // "bb" would be inserted at ord 3
        assert_eq!(index.lookup_term(b"bb"), -4);
        assert_eq!(index.lookup_term(b"0"), -2);
        assert!(index.ram_bytes_used() > 0);
    }

    #[test]
    fn test_missing_field() {
        let reader = open(&["a", "b"], 2);
        let leaves = reader.leaves();
        let index = DocTermsIndex::build(leaves[0].reader.as_ref(), "missing").unwrap();
        assert_eq!(index.value_count(), 0);
        assert_eq!(index.ord(1), 0);
        assert!(DocTermOrds::uninvert(leaves[0].reader.as_ref(), "missing")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_doc_term_ords() {
        let reader = open(&["x y", "y", "z x", "w"], 4);
        let leaves = reader.leaves();
        let ords = DocTermOrds::uninvert(leaves[0].reader.as_ref(), "body")
            .unwrap()
            .unwrap();

        assert_eq!(ords.num_terms(), 4);
        assert_eq!(ords.ords(0), &[1, 2]);
        assert_eq!(ords.ords(1), &[2]);
        assert_eq!(ords.ords(2), &[1, 3]);
        assert_eq!(ords.ords(3), &[0]);
        assert_eq!(ords.lookup_term(3).unwrap(), b"z".to_vec());
        assert_eq!(ords.lookup_term(0).unwrap(), b"w".to_vec());
        assert!(ords.lookup_term(4).is_err());
        assert!(ords.ram_bytes_used() > 0);
    }

    #[test]
    fn test_field_cache_evicts_on_core_close() {
        let cache = FieldCache::new();
        let reader = open(&["a", "b", "c"], 2);
        {
            let leaves = reader.leaves();
            let first = cache
                .doc_terms_index(leaves[0].reader.as_ref(), "body")
                .unwrap();
            let again = cache
                .doc_terms_index(leaves[0].reader.as_ref(), "body")
                .unwrap();
            assert!(Arc::ptr_eq(&first, &again));
            cache
                .doc_term_ords(leaves[1].reader.as_ref(), "body")
                .unwrap()
                .unwrap();
            assert_eq!(cache.size(), 2);
        }
        reader.close().unwrap();
        drop(reader);
        assert_eq!(cache.size(), 0);
    }
}
