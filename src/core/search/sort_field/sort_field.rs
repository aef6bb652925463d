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

use crate::core::index::FieldCache;
use crate::core::search::sort_field::{
    DocComparator, FieldComparatorEnum, RelevanceComparator, TermOrdValComparator,
};

use std::fmt;

#[derive(PartialEq, Debug, Clone, Copy, Eq)]
pub enum SortFieldType {
    /// Sort by the term of a single valued field, in byte order. Docs
    /// without a term sort first.
    String,
    /// Sort by relevance, highest score first.
    Score,
    /// Sort by doc id, index order.
    Doc,
}

/// One criterion of a `Sort`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SortField {
    field: String,
    field_type: SortFieldType,
    is_reverse: bool,
}

impl SortField {
    pub fn new(field: String, field_type: SortFieldType, is_reverse: bool) -> SortField {
        SortField {
            field,
            field_type,
            is_reverse,
        }
    }

    pub fn score() -> SortField {
        SortField::new(String::new(), SortFieldType::Score, false)
    }

    pub fn doc() -> SortField {
        SortField::new(String::new(), SortFieldType::Doc, false)
    }

    pub fn string(field: &str, is_reverse: bool) -> SortField {
        SortField::new(field.to_string(), SortFieldType::String, is_reverse)
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn field_type(&self) -> SortFieldType {
        self.field_type
    }

    pub fn is_reverse(&self) -> bool {
        self.is_reverse
    }

    pub fn needs_scores(&self) -> bool {
        self.field_type == SortFieldType::Score
    }

    pub fn get_comparator(&self, num_hits: usize) -> FieldComparatorEnum {
        match self.field_type {
            SortFieldType::Score => FieldComparatorEnum::Score(RelevanceComparator::new(num_hits)),
            SortFieldType::Doc => FieldComparatorEnum::Doc(DocComparator::new(num_hits)),
            SortFieldType::String => FieldComparatorEnum::TermOrdVal(TermOrdValComparator::new(
                num_hits,
                self.field.clone(),
                FieldCache::default_cache(),
            )),
        }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.field_type {
            SortFieldType::Score => write!(f, "<score>")?,
            SortFieldType::Doc => write!(f, "<doc>")?,
            SortFieldType::String => write!(f, "<string: \"{}\">", self.field)?,
        }
        if self.is_reverse {
            write!(f, "!")?;
        }
        Ok(())
    }
}
