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

pub mod merge;
pub mod reader;
pub mod writer;

mod index_options;

pub use self::index_options::*;

mod term;

pub use self::term::*;

mod doc_values;

pub use self::doc_values::*;

mod stored_field_visitor;

pub use self::stored_field_visitor::*;

error_chain! {
    types {
        Error, ErrorKind, ResultExt;
    }

    errors {
        MergeAborted(desc: String) {
            description(desc)
            display("merge is aborted: {}", desc)
        }
    }
}

#[cfg(test)]
pub mod tests {
    use crate::core::doc::{Document, Field, FieldType};
    use crate::core::index::writer::{IndexWriter, IndexWriterConfig};
    use crate::core::store::directory::{DirectoryRc, RAMDirectory};

    use std::sync::Arc;

    pub fn new_directory() -> DirectoryRc {
        Arc::new(RAMDirectory::new())
    }

    /// A document with a stored `id` and an analyzed, stored `body`.
    pub fn text_doc(id: &str, body: &str) -> Document {
        let mut doc = Document::new();
        doc.add(Field::new("id", FieldType::string_stored(), id));
        doc.add(Field::new("body", FieldType::text_stored(), body));
        doc
    }

    /// Config that never flushes or merges on its own.
    pub fn manual_config() -> IndexWriterConfig {
        let mut config = IndexWriterConfig::default();
        config.max_buffered_docs = None;
        config.use_compound_file = false;
        config.merge_scheduler = Arc::new(crate::core::index::merge::NoMergeScheduler {});
        config
    }

    /// Writes every body as one document and commits, one segment per
    /// `docs_per_segment` documents.
    pub fn build_index(
        dir: &DirectoryRc,
        bodies: &[&str],
        docs_per_segment: usize,
    ) -> IndexWriter {
        let writer = IndexWriter::new(Arc::clone(dir), manual_config()).unwrap();
        for (i, body) in bodies.iter().enumerate() {
            writer.add_document(text_doc(&i.to_string(), body)).unwrap();
            if (i + 1) % docs_per_segment == 0 {
                writer.flush().unwrap();
            }
        }
        writer.commit().unwrap();
        writer
    }
}
