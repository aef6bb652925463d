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

//! Stored fields.
//!
//! `.fdt` holds, for each document, the number of stored fields followed by
//! `(field number, type, value)` entries. `.fdx` holds the start pointer of
//! every document in `.fdt` as a packed array with one extra trailing entry.

mod stored_fields_writer;

pub use self::stored_fields_writer::*;

mod stored_fields_reader;

pub use self::stored_fields_reader::*;

pub const FIELDS_EXTENSION: &str = "fdt";
pub const FIELDS_INDEX_EXTENSION: &str = "fdx";

const FIELDS_CODEC: &str = "QuarryStoredFieldsData";
const FIELDS_INDEX_CODEC: &str = "QuarryStoredFieldsIndex";
const VERSION_START: i32 = 0;
const VERSION_CURRENT: i32 = VERSION_START;

const TYPE_STRING: u8 = 0;
const TYPE_BINARY: u8 = 1;
const TYPE_INT: u8 = 2;
const TYPE_LONG: u8 = 3;
const TYPE_FLOAT: u8 = 4;
const TYPE_DOUBLE: u8 = 5;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::field_infos::{FieldInfos, FieldInfosBuilder};
    use crate::core::codec::segment_infos::SegmentInfo;
    use crate::core::doc::DocumentStoredFieldVisitor;
    use crate::core::index::IndexOptions;
    use crate::core::store::directory::{DirectoryRc, RAMDirectory};
    use crate::core::store::IOContext;
    use crate::core::util::{random_id, VariantValue};

    use std::collections::HashMap;
    use std::sync::Arc;

    fn setup() -> (DirectoryRc, SegmentInfo, Arc<FieldInfos>) {
        let dir: DirectoryRc = Arc::new(RAMDirectory::new());
        let si = SegmentInfo::new(
            "_0",
            3,
            Arc::clone(&dir),
            false,
            HashMap::new(),
            random_id(),
            HashMap::new(),
        );
        let mut builder = FieldInfosBuilder::default();
        for name in &["title", "count", "blob"] {
            builder.get_or_add(name, IndexOptions::Null, true, false).unwrap();
        }
        (dir, si, Arc::new(builder.finish().unwrap()))
    }

    #[test]
    fn test_write_and_visit() {
        let (dir, si, infos) = setup();
        let title = infos.field_info_by_name("title").unwrap().clone();
        let count = infos.field_info_by_name("count").unwrap().clone();
        let blob = infos.field_info_by_name("blob").unwrap().clone();

        let mut writer = StoredFieldsWriter::new(dir.as_ref(), &si, &IOContext::Default).unwrap();
        writer.start_document();
        writer.write_field(&title, &VariantValue::from("first")).unwrap();
        writer.write_field(&count, &VariantValue::Long(-42)).unwrap();
        writer.finish_document().unwrap();
        writer.start_document();
        writer.finish_document().unwrap();
        writer.start_document();
        writer.write_field(&blob, &VariantValue::Binary(vec![1, 2, 3])).unwrap();
        writer.write_field(&count, &VariantValue::Double(0.5)).unwrap();
        writer.write_field(&title, &VariantValue::Float(1.5)).unwrap();
        writer.finish_document().unwrap();
        writer.finish(3).unwrap();
        drop(writer);

        let reader =
            StoredFieldsReader::open(dir.as_ref(), &si, Arc::clone(&infos), &IOContext::READ)
                .unwrap();
        let mut visitor = DocumentStoredFieldVisitor::new(&[]);
        reader.visit_document(0, &mut visitor).unwrap();
        let doc = visitor.document();
        assert_eq!(doc.get("title"), Some("first"));
        assert_eq!(doc.get_values("count"), vec![&VariantValue::Long(-42)]);

        let mut visitor = DocumentStoredFieldVisitor::new(&[]);
        reader.visit_document(1, &mut visitor).unwrap();
        assert!(visitor.document().is_empty());

        let mut visitor = DocumentStoredFieldVisitor::new(&["title".to_string()]);
        reader.visit_document(2, &mut visitor).unwrap();
        let doc = visitor.document();
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.get_values("title"), vec![&VariantValue::Float(1.5)]);

        assert!(reader.visit_document(3, &mut DocumentStoredFieldVisitor::new(&[])).is_err());
    }

    #[test]
    fn test_doc_count_mismatch() {
        let (dir, si, _) = setup();
        let mut writer = StoredFieldsWriter::new(dir.as_ref(), &si, &IOContext::Default).unwrap();
        writer.start_document();
        writer.finish_document().unwrap();
        assert!(writer.finish(2).is_err());
    }
}
