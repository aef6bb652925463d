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

use crate::core::index::reader::LeafReaderContext;
use crate::core::index::{DocTermsIndex, FieldCache};
use crate::core::search::sort_field::SortFieldType;
use crate::core::util::{DocId, VariantValue};
use crate::error::ErrorKind::IllegalState;
use crate::error::Result;

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// What a comparator reads of the hit being collected: the leaf local doc,
/// or the score for the relevance comparator.
#[derive(Copy, Clone, Debug)]
pub enum ComparatorValue {
    Doc(DocId),
    Score(f32), // this is only used in RelevanceComparator
}

impl ComparatorValue {
    fn doc(self) -> DocId {
        match self {
            ComparatorValue::Doc(d) => d,
            ComparatorValue::Score(_) => -1,
        }
    }

    fn score(self) -> f32 {
        match self {
            ComparatorValue::Score(s) => s,
            ComparatorValue::Doc(_) => 0.0,
        }
    }
}

/// Compares hits held in a fixed number of slots for sorting.
///
/// `Ordering::Less` means the first slot sorts first. The slot of the worst
/// retained hit is the "bottom"; `compare_bottom(v)` must return what
/// `compare(bottom, slot)` would return had `v` been copied into `slot`, so
/// `Ordering::Greater` means the new hit is competitive.
pub trait FieldComparator: fmt::Display {
    fn compare(&self, slot1: usize, slot2: usize) -> Ordering;

    fn value(&self, slot: usize) -> VariantValue;

    fn set_bottom(&mut self, slot: usize);

    fn compare_bottom(&mut self, value: ComparatorValue) -> Result<Ordering>;

    fn copy(&mut self, slot: usize, value: ComparatorValue) -> Result<()>;

    /// Called before collecting the docs of a new leaf.
    fn set_next_reader(&mut self, reader: &LeafReaderContext) -> Result<()>;

    fn get_type(&self) -> SortFieldType;
}

pub enum FieldComparatorEnum {
    Score(RelevanceComparator),
    Doc(DocComparator),
    TermOrdVal(TermOrdValComparator),
}

impl FieldComparator for FieldComparatorEnum {
    fn compare(&self, slot1: usize, slot2: usize) -> Ordering {
        match self {
            FieldComparatorEnum::Score(c) => c.compare(slot1, slot2),
            FieldComparatorEnum::Doc(c) => c.compare(slot1, slot2),
            FieldComparatorEnum::TermOrdVal(c) => c.compare(slot1, slot2),
        }
    }

    fn value(&self, slot: usize) -> VariantValue {
        match self {
            FieldComparatorEnum::Score(c) => c.value(slot),
            FieldComparatorEnum::Doc(c) => c.value(slot),
            FieldComparatorEnum::TermOrdVal(c) => c.value(slot),
        }
    }

    fn set_bottom(&mut self, slot: usize) {
        match self {
            FieldComparatorEnum::Score(c) => c.set_bottom(slot),
            FieldComparatorEnum::Doc(c) => c.set_bottom(slot),
            FieldComparatorEnum::TermOrdVal(c) => c.set_bottom(slot),
        }
    }

    fn compare_bottom(&mut self, value: ComparatorValue) -> Result<Ordering> {
        match self {
            FieldComparatorEnum::Score(c) => c.compare_bottom(value),
            FieldComparatorEnum::Doc(c) => c.compare_bottom(value),
            FieldComparatorEnum::TermOrdVal(c) => c.compare_bottom(value),
        }
    }

    fn copy(&mut self, slot: usize, value: ComparatorValue) -> Result<()> {
        match self {
            FieldComparatorEnum::Score(c) => c.copy(slot, value),
            FieldComparatorEnum::Doc(c) => c.copy(slot, value),
            FieldComparatorEnum::TermOrdVal(c) => c.copy(slot, value),
        }
    }

    fn set_next_reader(&mut self, reader: &LeafReaderContext) -> Result<()> {
        match self {
            FieldComparatorEnum::Score(c) => c.set_next_reader(reader),
            FieldComparatorEnum::Doc(c) => c.set_next_reader(reader),
            FieldComparatorEnum::TermOrdVal(c) => c.set_next_reader(reader),
        }
    }

    fn get_type(&self) -> SortFieldType {
        match self {
            FieldComparatorEnum::Score(c) => c.get_type(),
            FieldComparatorEnum::Doc(c) => c.get_type(),
            FieldComparatorEnum::TermOrdVal(c) => c.get_type(),
        }
    }
}

impl fmt::Display for FieldComparatorEnum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldComparatorEnum::Score(c) => write!(f, "FieldComparatorEnum({})", c),
            FieldComparatorEnum::Doc(c) => write!(f, "FieldComparatorEnum({})", c),
            FieldComparatorEnum::TermOrdVal(c) => write!(f, "FieldComparatorEnum({})", c),
        }
    }
}

/// Sorts by descending relevance.
pub struct RelevanceComparator {
    scores: Vec<f32>,
    bottom: f32,
}

impl RelevanceComparator {
    pub fn new(num_hits: usize) -> RelevanceComparator {
        let scores = vec![0f32; num_hits];

        RelevanceComparator {
            scores,
            bottom: 0f32,
        }
    }
}

impl FieldComparator for RelevanceComparator {
    fn compare(&self, slot1: usize, slot2: usize) -> Ordering {
        self.scores[slot2]
            .partial_cmp(&self.scores[slot1])
            .unwrap_or(Ordering::Equal)
    }

    fn value(&self, slot: usize) -> VariantValue {
        VariantValue::Float(self.scores[slot])
    }

    fn set_bottom(&mut self, slot: usize) {
        self.bottom = self.scores[slot];
    }

    fn compare_bottom(&mut self, value: ComparatorValue) -> Result<Ordering> {
        Ok(value
            .score()
            .partial_cmp(&self.bottom)
            .unwrap_or(Ordering::Equal))
    }

    fn copy(&mut self, slot: usize, value: ComparatorValue) -> Result<()> {
        self.scores[slot] = value.score();
        Ok(())
    }

    fn set_next_reader(&mut self, _reader: &LeafReaderContext) -> Result<()> {
        Ok(())
    }

    fn get_type(&self) -> SortFieldType {
        SortFieldType::Score
    }
}

impl fmt::Display for RelevanceComparator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "bottom: {:?}\tscores: {:?}", self.bottom, self.scores)
    }
}

/// Sorts by ascending absolute doc id.
pub struct DocComparator {
    doc_ids: Vec<DocId>,
    bottom: DocId,
    doc_base: DocId,
}

impl DocComparator {
    pub fn new(num_hits: usize) -> DocComparator {
        DocComparator {
            doc_ids: vec![0; num_hits],
            bottom: 0,
            doc_base: 0,
        }
    }
}

impl FieldComparator for DocComparator {
    fn compare(&self, slot1: usize, slot2: usize) -> Ordering {
        self.doc_ids[slot1].cmp(&self.doc_ids[slot2])
    }

    fn value(&self, slot: usize) -> VariantValue {
        VariantValue::Int(self.doc_ids[slot])
    }

    fn set_bottom(&mut self, slot: usize) {
        self.bottom = self.doc_ids[slot];
    }

    fn compare_bottom(&mut self, value: ComparatorValue) -> Result<Ordering> {
        Ok(self.bottom.cmp(&(value.doc() + self.doc_base)))
    }

    fn copy(&mut self, slot: usize, value: ComparatorValue) -> Result<()> {
        self.doc_ids[slot] = value.doc() + self.doc_base;
        Ok(())
    }

    fn set_next_reader(&mut self, reader: &LeafReaderContext) -> Result<()> {
        self.doc_base = reader.doc_base;
        Ok(())
    }

    fn get_type(&self) -> SortFieldType {
        SortFieldType::Doc
    }
}

impl fmt::Display for DocComparator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "bottom: {:?}\tdoc_base: {:?}\tdoc_ids: {:?}",
            self.bottom, self.doc_base, self.doc_ids
        )
    }
}

/// Sorts by the term of a single valued field using per segment ords.
///
/// Slots filled from the current leaf compare by ord, slots of earlier
/// leaves fall back to their term bytes. The bottom is translated into the
/// current leaf's ords when a leaf starts, so `compare_bottom` stays an
/// integer compare.
pub struct TermOrdValComparator {
    field: String,
    cache: Arc<FieldCache>,
    ords: Vec<i32>,
    values: Vec<Option<Vec<u8>>>,
    reader_gen: Vec<i32>,
    current_reader_gen: i32,
    terms_index: Option<Arc<DocTermsIndex>>,
    bottom_slot: Option<usize>,
    bottom_ord: i32,
    bottom_same_reader: bool,
}

impl TermOrdValComparator {
    pub fn new(num_hits: usize, field: String, cache: Arc<FieldCache>) -> TermOrdValComparator {
        TermOrdValComparator {
            field,
            cache,
            ords: vec![0; num_hits],
            values: vec![None; num_hits],
            reader_gen: vec![-1; num_hits],
            current_reader_gen: -1,
            terms_index: None,
            bottom_slot: None,
            bottom_ord: 0,
            bottom_same_reader: false,
        }
    }

    fn terms_index(&self) -> Result<&DocTermsIndex> {
        match &self.terms_index {
            Some(index) => Ok(index.as_ref()),
            None => bail!(IllegalState(format!(
                "no reader set for sorting on field '{}'",
                self.field
            ))),
        }
    }
}

impl FieldComparator for TermOrdValComparator {
    fn compare(&self, slot1: usize, slot2: usize) -> Ordering {
        if self.reader_gen[slot1] == self.reader_gen[slot2] {
            return self.ords[slot1].cmp(&self.ords[slot2]);
        }
        // None sorts first
        self.values[slot1].cmp(&self.values[slot2])
    }

    fn value(&self, slot: usize) -> VariantValue {
        VariantValue::Binary(self.values[slot].clone().unwrap_or_default())
    }

    fn set_bottom(&mut self, slot: usize) {
        self.bottom_slot = Some(slot);
        if self.current_reader_gen == self.reader_gen[slot] {
            self.bottom_ord = self.ords[slot];
            self.bottom_same_reader = true;
            return;
        }
        let index = match &self.terms_index {
            Some(index) => Arc::clone(index),
            None => {
                self.bottom_same_reader = false;
                return;
            }
        };
        match &self.values[slot] {
            None => {
                self.bottom_ord = 0;
                self.bottom_same_reader = true;
                self.reader_gen[slot] = self.current_reader_gen;
                self.ords[slot] = 0;
            }
            Some(value) => {
                let ord = index.lookup_term(value);
                if ord < 0 {
                    // the bottom sorts right after ord `-ord - 2`
                    self.bottom_ord = -ord - 2;
                    self.bottom_same_reader = false;
                } else {
                    self.bottom_ord = ord;
                    self.bottom_same_reader = true;
                    self.reader_gen[slot] = self.current_reader_gen;
                    self.ords[slot] = ord;
                }
            }
        }
    }

    fn compare_bottom(&mut self, value: ComparatorValue) -> Result<Ordering> {
        let doc_ord = self.terms_index()?.ord(value.doc());
        if self.bottom_same_reader {
            Ok(self.bottom_ord.cmp(&doc_ord))
        } else if self.bottom_ord >= doc_ord {
            Ok(Ordering::Greater)
        } else {
            Ok(Ordering::Less)
        }
    }

    fn copy(&mut self, slot: usize, value: ComparatorValue) -> Result<()> {
        let (ord, term) = {
            let index = self.terms_index()?;
            let ord = index.ord(value.doc());
            (ord, index.lookup_ord(ord).map(|t| t.to_vec()))
        };
        self.ords[slot] = ord;
        self.values[slot] = term;
        self.reader_gen[slot] = self.current_reader_gen;
        Ok(())
    }

    fn set_next_reader(&mut self, reader: &LeafReaderContext) -> Result<()> {
        self.terms_index = Some(
            self.cache
                .doc_terms_index(reader.reader.as_ref(), &self.field)?,
        );
        self.current_reader_gen += 1;
        if let Some(slot) = self.bottom_slot {
            self.set_bottom(slot);
        }
        Ok(())
    }

    fn get_type(&self) -> SortFieldType {
        SortFieldType::String
    }
}

impl fmt::Display for TermOrdValComparator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "field: {}\tbottom_ord: {}\tsame_reader: {}",
            self.field, self.bottom_ord, self.bottom_same_reader
        )
    }
}
