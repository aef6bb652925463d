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

mod field_comparator;

pub use self::field_comparator::*;

mod sort_field;

pub use self::sort_field::*;

use std::fmt;

/// Encapsulates sort criteria for returned hits, applied in order.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Sort {
    fields: Vec<SortField>,
}

impl Sort {
    pub fn new(fields: Vec<SortField>) -> Sort {
        Sort { fields }
    }

    /// Sorts by relevance, highest score first.
    pub fn relevance() -> Sort {
        Sort::new(vec![SortField::score()])
    }

    /// Sorts by index order.
    pub fn index_order() -> Sort {
        Sort::new(vec![SortField::doc()])
    }

    pub fn get_sort(&self) -> &[SortField] {
        &self.fields
    }

    pub fn needs_scores(&self) -> bool {
        self.fields.iter().any(|f| f.needs_scores())
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", field)?;
        }
        Ok(())
    }
}
