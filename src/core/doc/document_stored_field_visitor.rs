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

use crate::core::codec::field_infos::FieldInfo;
use crate::core::doc::{Document, Field, FieldType};
use crate::core::index::{Status, StoredFieldVisitor};
use crate::core::util::VariantValue;
use crate::error::Result;

use std::collections::HashSet;

/// A `StoredFieldVisitor` that creates a `Document` from the stored fields,
/// loading only `fields_to_add` when it is not empty.
pub struct DocumentStoredFieldVisitor {
    fields: Vec<Field>,
    fields_to_add: HashSet<String>,
}

impl DocumentStoredFieldVisitor {
    pub fn new(fields_to_add: &[String]) -> DocumentStoredFieldVisitor {
        DocumentStoredFieldVisitor {
            fields: vec![],
            fields_to_add: fields_to_add.iter().cloned().collect(),
        }
    }

    pub fn document(self) -> Document {
        Document::from_fields(self.fields)
    }

    fn push(&mut self, field_info: &FieldInfo, value: VariantValue) {
        let field_type = FieldType::new(
            true,
            false,
            !field_info.has_norms(),
            field_info.has_store_payloads,
            field_info.index_options,
        );
        self.fields
            .push(Field::new(&field_info.name, field_type, value));
    }
}

impl StoredFieldVisitor for DocumentStoredFieldVisitor {
    fn binary_field(&mut self, field_info: &FieldInfo, value: Vec<u8>) -> Result<()> {
        self.push(field_info, VariantValue::Binary(value));
        Ok(())
    }

    fn string_field(&mut self, field_info: &FieldInfo, value: Vec<u8>) -> Result<()> {
        let s = String::from_utf8(value)?;
        self.push(field_info, VariantValue::VString(s));
        Ok(())
    }

    fn int_field(&mut self, field_info: &FieldInfo, value: i32) -> Result<()> {
        self.push(field_info, VariantValue::Int(value));
        Ok(())
    }

    fn long_field(&mut self, field_info: &FieldInfo, value: i64) -> Result<()> {
        self.push(field_info, VariantValue::Long(value));
        Ok(())
    }

    fn float_field(&mut self, field_info: &FieldInfo, value: f32) -> Result<()> {
        self.push(field_info, VariantValue::Float(value));
        Ok(())
    }

    fn double_field(&mut self, field_info: &FieldInfo, value: f64) -> Result<()> {
        self.push(field_info, VariantValue::Double(value));
        Ok(())
    }

    fn needs_field(&self, field_info: &FieldInfo) -> Status {
        if self.fields_to_add.is_empty() || self.fields_to_add.contains(&field_info.name) {
            Status::Yes
        } else {
            Status::No
        }
    }
}
