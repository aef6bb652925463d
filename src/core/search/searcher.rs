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

use crate::core::doc::Document;
use crate::core::index::reader::{sub_index, IndexReaderRef, LeafReaderContext};
use crate::core::index::{Term, TermContext};
use crate::core::search::cache::{
    LRUQueryCache, QueryCachingPolicy, UsageTrackingQueryCachingPolicy,
};
use crate::core::search::collector::{
    collection_stop, CollectionStop, SearchCollector, TopDocsCollector, TopFieldCollector,
};
use crate::core::search::explanation::Explanation;
use crate::core::search::query::{BooleanQuery, Occur, Query, Weight};
use crate::core::search::scorer::BulkScorer;
use crate::core::search::similarity::{BM25Similarity, Similarity};
use crate::core::search::sort_field::Sort;
use crate::core::search::statistics::{CollectionStatistics, TermStatistics};
use crate::core::search::top_docs::{ScoreDoc, TopDocs};
use crate::core::search::NO_MORE_DOCS;
use crate::core::util::{Bits, DocId};
use crate::error::ErrorKind::IllegalArgument;
use crate::error::Result;

use std::cmp::{max, min};
use std::sync::Arc;

/// Implements search over a single IndexReader.
///
/// For performance reasons, if your index is unchanging, you
/// should share a single IndexSearcher instance across
/// multiple searches instead of creating a new one
/// per-search.  If your index has changed and you wish to
/// see the changes reflected in searching, you should
/// use `StandardDirectoryReader::open_if_changed`
/// to obtain a new reader and
/// then create a new IndexSearcher from that, or let a
/// `SearcherManager` do it.
///
/// Once you have a new `IndexReader`, it's relatively
/// cheap to create a new IndexSearcher from it.
///
/// *NOTE:* `IndexSearcher` instances are completely
/// thread safe, meaning multiple threads can call any of its
/// methods, concurrently.
pub struct IndexSearcher {
    reader: IndexReaderRef,
    leaves: Vec<LeafReaderContext>,
    similarity: Arc<dyn Similarity>,
    query_cache: Option<Arc<LRUQueryCache>>,
    cache_policy: Arc<dyn QueryCachingPolicy>,
}

impl IndexSearcher {
    pub fn new(reader: IndexReaderRef) -> IndexSearcher {
        let leaves = reader.leaves();
        IndexSearcher {
            reader,
            leaves,
            similarity: Arc::new(BM25Similarity::default()),
            query_cache: None,
            cache_policy: Arc::new(UsageTrackingQueryCachingPolicy::default()),
        }
    }

    pub fn with_similarity(mut self, similarity: Arc<dyn Similarity>) -> IndexSearcher {
        self.similarity = similarity;
        self
    }

    /// Caches the doc sets of non scoring clauses in `cache`, `policy`
    /// deciding which ones are worth it.
    pub fn with_query_cache(
        mut self,
        cache: Arc<LRUQueryCache>,
        policy: Arc<dyn QueryCachingPolicy>,
    ) -> IndexSearcher {
        self.query_cache = Some(cache);
        self.cache_policy = policy;
        self
    }

    pub fn reader(&self) -> &IndexReaderRef {
        &self.reader
    }

    pub fn leaves(&self) -> &[LeafReaderContext] {
        &self.leaves
    }

    pub fn similarity(&self) -> &Arc<dyn Similarity> {
        &self.similarity
    }

    pub fn query_cache(&self) -> Option<&Arc<LRUQueryCache>> {
        self.query_cache.as_ref()
    }

    pub fn max_doc(&self) -> i32 {
        self.reader.max_doc()
    }

    /// Expands `query` into primitive queries until no more rewriting
    /// applies.
    pub fn rewrite(&self, query: &dyn Query) -> Result<Box<dyn Query>> {
        let mut query = query.clone_box();
        while let Some(rewritten) = query.rewrite(self.reader.as_ref())? {
            query = rewritten;
        }
        Ok(query)
    }

    /// Creates a `Weight` for an already rewritten query. Non scoring weights
    /// go through the query cache when one is set.
    pub fn create_weight(&self, query: &dyn Query, needs_scores: bool) -> Result<Box<dyn Weight>> {
        let weight = query.create_weight(self, needs_scores)?;
        match &self.query_cache {
            Some(cache) if !needs_scores => Ok(cache.do_cache(
                weight,
                query.to_string(),
                Arc::clone(&self.cache_policy),
            )),
            _ => Ok(weight),
        }
    }

    /// Rewrites `query`, creates its weight and normalizes it, ready to
    /// create scorers.
    pub fn create_normalized_weight(
        &self,
        query: &dyn Query,
        needs_scores: bool,
    ) -> Result<Box<dyn Weight>> {
        let query = self.rewrite(query)?;
        let mut weight = self.create_weight(query.as_ref(), needs_scores)?;
        let v = weight.value_for_normalization();
        let mut norm = self.similarity.query_norm(v);
        if !norm.is_finite() {
            norm = 1.0;
        }
        weight.normalize(norm, 1.0);
        Ok(weight)
    }

    /// Lower-level search API.
    ///
    /// `Collector::collect` is called for every live matching document.
    /// Collectors may stop the current leaf or the whole search early, the
    /// hits collected so far are kept.
    pub fn search(&self, query: &dyn Query, collector: &mut dyn SearchCollector) -> Result<()> {
        self.reader.ensure_open()?;
        let weight = self.create_normalized_weight(query, collector.needs_scores())?;
        self.search_with_weight(weight.as_ref(), collector)
    }

    fn search_with_weight(
        &self,
        weight: &dyn Weight,
        mut collector: &mut dyn SearchCollector,
    ) -> Result<()> {
        for leaf in &self.leaves {
            let res = match collector.set_next_reader(leaf) {
                Ok(()) => self.score_leaf(weight, leaf, &mut collector),
                Err(e) => Err(e),
            };
            if let Err(e) = res {
                match collection_stop(&e) {
                    Some(CollectionStop::Leaf) => {
                        debug!("collection of leaf {} terminated early", leaf.ord);
                    }
                    Some(CollectionStop::All) => {
                        debug!("collection terminated at leaf {}: {}", leaf.ord, e);
                        break;
                    }
                    None => return Err(e),
                }
            }
        }
        collector.finish()
    }

    fn score_leaf(
        &self,
        weight: &dyn Weight,
        leaf: &LeafReaderContext,
        collector: &mut &mut dyn SearchCollector,
    ) -> Result<()> {
        let mut scorer = match weight.create_scorer(leaf)? {
            Some(scorer) => scorer,
            None => return Ok(()),
        };
        let live_docs = leaf.reader.live_docs();
        let accept_docs: Option<&dyn Bits> = live_docs.as_ref().map(|bits| &**bits);
        BulkScorer::new(scorer.as_mut()).score_all(collector, accept_docs, NO_MORE_DOCS)?;
        Ok(())
    }

    /// Finds the top `n` hits for `query`.
    pub fn search_top(&self, query: &dyn Query, n: usize) -> Result<TopDocs> {
        let n = self.check_num_hits(n)?;
        let mut collector = TopDocsCollector::new(n);
        self.search(query, &mut collector)?;
        Ok(collector.top_docs())
    }

    /// Finds the top `n` hits ranking after `after`, the last hit of the
    /// previous page.
    pub fn search_after(&self, after: &ScoreDoc, query: &dyn Query, n: usize) -> Result<TopDocs> {
        if after.doc >= self.max_doc() {
            bail!(IllegalArgument(format!(
                "after.doc exceeds the number of documents in the reader: after.doc={} \
                 limit={}",
                after.doc,
                self.max_doc()
            )));
        }
        let n = self.check_num_hits(n)?;
        let mut collector = TopDocsCollector::with_after(n, after.clone());
        self.search(query, &mut collector)?;
        Ok(collector.top_docs())
    }

    /// Finds the top `n` hits for `query` among the documents matching
    /// `filter`. The filter does not contribute to scores.
    pub fn search_with_filter(
        &self,
        query: &dyn Query,
        filter: &dyn Query,
        n: usize,
    ) -> Result<TopDocs> {
        let mut filtered = BooleanQuery::new();
        filtered.add(query.clone_box(), Occur::Must)?;
        filtered.add(filter.clone_box(), Occur::Filter)?;
        self.search_top(&filtered, n)
    }

    /// Finds the top `n` hits for `query` ordered by `sort`. Hits carry a
    /// score only when the sort itself needs scores.
    pub fn search_sorted(&self, query: &dyn Query, n: usize, sort: &Sort) -> Result<TopDocs> {
        let n = self.check_num_hits(n)?;
        let mut collector = TopFieldCollector::new(sort.clone(), n, false);
        self.search(query, &mut collector)?;
        Ok(collector.top_docs())
    }

    fn check_num_hits(&self, n: usize) -> Result<usize> {
        if n == 0 {
            bail!(IllegalArgument("num_hits must be > 0".into()));
        }
        Ok(min(n, max(1, self.max_doc()) as usize))
    }

    /// Explains how `doc`, an absolute doc id, scores against `query`.
    pub fn explain(&self, query: &dyn Query, doc: DocId) -> Result<Explanation> {
        self.reader.ensure_open()?;
        let weight = self.create_normalized_weight(query, true)?;
        match sub_index(doc, &self.leaves) {
            Some(i) => {
                let leaf = &self.leaves[i];
                weight.explain(leaf, doc - leaf.doc_base)
            }
            None => bail!(IllegalArgument(format!(
                "doc {} is out of bounds [0, {})",
                doc,
                self.max_doc()
            ))),
        }
    }

    pub fn document(&self, doc: DocId, fields_to_load: &[String]) -> Result<Document> {
        self.reader.document(doc, fields_to_load)
    }

    pub fn doc_freq(&self, term: &Term) -> Result<i32> {
        self.reader.ensure_open()?;
        self.reader.doc_freq(term)
    }

    /// Per leaf states of `term`, shared by every scorer of a query.
    pub fn term_context(&self, term: &Term) -> Result<TermContext> {
        self.reader.ensure_open()?;
        TermContext::build(&self.leaves, term)
    }

    pub fn term_statistics(&self, term: &Term, context: &TermContext) -> TermStatistics {
        TermStatistics::new(
            term.bytes.clone(),
            i64::from(context.doc_freq),
            context.total_term_freq,
        )
    }

    /// Statistics of `field` summed over every leaf.
    pub fn collection_statistics(&self, field: &str) -> Result<CollectionStatistics> {
        self.reader.ensure_open()?;
        let mut stats =
            CollectionStatistics::empty(field.to_string(), i64::from(self.reader.max_doc()));
        for leaf in &self.leaves {
            if let Some(terms) = leaf.reader.terms(field)? {
                stats.merge(
                    i64::from(terms.doc_count()?),
                    terms.sum_total_term_freq()?,
                    terms.sum_doc_freq()?,
                );
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::search::collector::{
        ChainedCollector, Collector, EarlyTerminatingSortingCollector,
    };
    use crate::core::search::query::{MatchAllDocsQuery, TermQuery};
    use crate::core::search::scorer::Scorer;
    use crate::core::search::sort_field::SortField;
    use crate::core::search::tests::open_reader;
    use crate::core::search::top_docs::ScoreDocHit;
    use crate::error::ErrorKind;

    fn searcher(bodies: &[&str], per_segment: usize) -> IndexSearcher {
        IndexSearcher::new(Arc::new(open_reader(bodies, per_segment)))
    }

    fn term(text: &str) -> Box<dyn Query> {
        Box::new(TermQuery::new(Term::from_str("body", text), 1.0))
    }

    fn docs(top: &TopDocs) -> Vec<DocId> {
        top.score_docs().iter().map(|d| d.doc_id()).collect()
    }

    #[test]
    fn test_search_top_and_after() {
        let searcher = searcher(&["a", "a a", "b", "a a a", "a"], 2);
        let query = term("a");
        let first = searcher.search_top(query.as_ref(), 2).unwrap();
        assert_eq!(first.total_hits(), 4);
        assert_eq!(first.score_docs().len(), 2);

        let last = match first.score_docs().last() {
            Some(ScoreDocHit::Score(hit)) => hit.clone(),
            other => panic!("unexpected hit {:?}", other),
        };
        let second = searcher.search_after(&last, query.as_ref(), 10).unwrap();
        assert_eq!(second.score_docs().len(), 2);
        let mut all = docs(&first);
        all.extend(docs(&second));
        all.sort();
        assert_eq!(all, vec![0, 1, 3, 4]);

        // n is capped by max_doc
        let capped = searcher.search_top(query.as_ref(), 100).unwrap();
        assert_eq!(capped.score_docs().len(), 4);
        assert!(searcher.search_top(query.as_ref(), 0).is_err());
    }

    #[test]
    fn test_search_with_filter() {
        let searcher = searcher(&["a b", "a", "a b", "b"], 2);
        let top = searcher
            .search_with_filter(term("a").as_ref(), term("b").as_ref(), 10)
            .unwrap();
        let mut hits = docs(&top);
        hits.sort();
        assert_eq!(hits, vec![0, 2]);

        let unfiltered = searcher.search_top(term("a").as_ref(), 10).unwrap();
        let score_of = |top: &TopDocs, doc: DocId| {
            top.score_docs()
                .iter()
                .find(|d| d.doc_id() == doc)
                .map(|d| d.score())
        };
        assert_eq!(score_of(&top, 0), score_of(&unfiltered, 0));
    }

    #[test]
    fn test_search_sorted() {
        let searcher = searcher(&["x", "x", "x", "x"], 3);
        let sort = Sort::new(vec![SortField::string("id", true)]);
        let top = searcher
            .search_sorted(&MatchAllDocsQuery::new(), 3, &sort)
            .unwrap();
        assert_eq!(top.total_hits(), 4);
        assert_eq!(docs(&top), vec![3, 2, 1]);
    }

    #[test]
    fn test_early_termination_per_leaf() {
        let searcher = searcher(&["a", "a", "a", "a", "a"], 2);
        let mut top = TopDocsCollector::new(10);
        let mut early = EarlyTerminatingSortingCollector::new(1);
        {
            let mut chain = ChainedCollector::new(vec![
                &mut top as &mut dyn SearchCollector,
                &mut early as &mut dyn SearchCollector,
            ]);
            searcher.search(term("a").as_ref(), &mut chain).unwrap();
        }
        assert!(early.early_terminated);
        // one hit from each of the three leaves
        assert_eq!(top.total_hits(), 3);
    }

    #[derive(Default)]
    struct StopAfterFirst {
        collected: Vec<DocId>,
        doc_base: DocId,
        finished: bool,
    }

    impl Collector for StopAfterFirst {
        fn needs_scores(&self) -> bool {
            false
        }

        fn collect(&mut self, doc: DocId, _scorer: &mut dyn Scorer) -> Result<()> {
            self.collected.push(self.doc_base + doc);
            bail!(ErrorKind::Collector(
                crate::core::search::collector::ErrorKind::CollectionTerminated
            ))
        }
    }

    impl SearchCollector for StopAfterFirst {
        fn set_next_reader(&mut self, reader: &LeafReaderContext) -> Result<()> {
            self.doc_base = reader.doc_base;
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.finished = true;
            Ok(())
        }
    }

    #[test]
    fn test_collection_terminated_keeps_results() {
        let searcher = searcher(&["a", "a", "a", "a"], 2);
        let mut collector = StopAfterFirst::default();
        searcher.search(term("a").as_ref(), &mut collector).unwrap();
        assert_eq!(collector.collected, vec![0]);
        assert!(collector.finished);
    }

    #[test]
    fn test_statistics() {
        let searcher = searcher(&["a b", "a", "b c d"], 2);
        let a = Term::from_str("body", "a");
        assert_eq!(searcher.doc_freq(&a).unwrap(), 2);

        let ctx = searcher.term_context(&a).unwrap();
        let stats = searcher.term_statistics(&a, &ctx);
        assert_eq!(stats.doc_freq, 2);
        assert_eq!(stats.total_term_freq, 2);

        let field = searcher.collection_statistics("body").unwrap();
        assert_eq!(field.max_doc, 3);
        assert_eq!(field.doc_count, 3);
        assert_eq!(field.sum_total_term_freq, 6);
        assert_eq!(field.sum_doc_freq, 6);

        let missing = searcher.collection_statistics("nope").unwrap();
        assert_eq!(missing.doc_count, 0);
        assert_eq!(missing.max_doc, 3);
    }

    #[test]
    fn test_document_and_explain() {
        let searcher = searcher(&["a", "b", "a b"], 2);
        let doc = searcher.document(2, &[]).unwrap();
        assert_eq!(doc.get("id"), Some("2"));
        assert_eq!(doc.get("body"), Some("a b"));

        let expl = searcher.explain(term("a").as_ref(), 2).unwrap();
        assert!(expl.is_match());
        let expl = searcher.explain(term("a").as_ref(), 1).unwrap();
        assert!(!expl.is_match());
        assert!(searcher.explain(term("a").as_ref(), 3).is_err());
    }

    #[test]
    fn test_closed_reader_cannot_be_searched() {
        let searcher = searcher(&["a", "a b"], 1);
        let a = Term::from_str("body", "a");
        assert_eq!(searcher.search_top(term("a").as_ref(), 10).unwrap().total_hits(), 2);

        searcher.reader().close().unwrap();
        let is_closed = |e: &crate::error::Error| match e.kind() {
            ErrorKind::AlreadyClosed(_) => true,
            _ => false,
        };
        assert!(is_closed(&searcher.search_top(term("a").as_ref(), 10).unwrap_err()));
        assert!(is_closed(&searcher.explain(term("a").as_ref(), 0).unwrap_err()));
        assert!(is_closed(&searcher.doc_freq(&a).unwrap_err()));
        assert!(is_closed(&searcher.term_context(&a).unwrap_err()));
        assert!(is_closed(&searcher.collection_statistics("body").unwrap_err()));
    }

    #[test]
    fn test_rewrite_reaches_fixed_point() {
        let searcher = searcher(&["apple", "apricot", "banana"], 3);
        let prefix = crate::core::search::query::PrefixQuery::new(Term::from_str("body", "ap"));
        let rewritten = searcher.rewrite(&prefix).unwrap();
        assert!(rewritten.rewrite(searcher.reader().as_ref()).unwrap().is_none());
        assert_eq!(searcher.search_top(&prefix, 10).unwrap().total_hits(), 2);
        assert_eq!(searcher.reader().num_docs(), 3);
    }
}
