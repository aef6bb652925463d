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

use crate::core::index::IndexOptions;

use std::fmt;

/// Describes how a field is indexed and stored.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FieldType {
    pub stored: bool,
    pub tokenized: bool,
    pub omit_norms: bool,
    pub store_payloads: bool,
    pub index_options: IndexOptions,
}

impl FieldType {
    pub fn new(
        stored: bool,
        tokenized: bool,
        omit_norms: bool,
        store_payloads: bool,
        index_options: IndexOptions,
    ) -> FieldType {
        FieldType {
            stored,
            tokenized,
            omit_norms,
            store_payloads,
            index_options,
        }
    }

    /// Indexed verbatim as a single token, without norms or frequencies.
    pub fn string() -> FieldType {
        FieldType::new(false, false, true, false, IndexOptions::Docs)
    }

    pub fn string_stored() -> FieldType {
        FieldType {
            stored: true,
            ..FieldType::string()
        }
    }

    /// Tokenized by the analyzer, with positions and offsets.
    pub fn text() -> FieldType {
        FieldType::new(
            false,
            true,
            false,
            false,
            IndexOptions::DocsAndFreqsAndPositionsAndOffsets,
        )
    }

    pub fn text_stored() -> FieldType {
        FieldType {
            stored: true,
            ..FieldType::text()
        }
    }

    /// Tokenized text whose tokens may carry payloads.
    pub fn text_with_payloads() -> FieldType {
        FieldType {
            store_payloads: true,
            ..FieldType::text()
        }
    }

    /// Stored but not indexed.
    pub fn stored_only() -> FieldType {
        FieldType::new(true, false, true, false, IndexOptions::Null)
    }

    pub fn indexed(&self) -> bool {
        self.index_options != IndexOptions::Null
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Ok(s) = ::serde_json::to_string(self) {
            write!(f, "{}", s)?;
        }

        Ok(())
    }
}
