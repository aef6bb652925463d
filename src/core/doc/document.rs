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

use crate::core::doc::Field;
use crate::core::util::VariantValue;

/// A set of fields, the unit of indexing and search.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub fields: Vec<Field>,
}

impl Document {
    pub fn new() -> Document {
        Document { fields: vec![] }
    }

    pub fn from_fields(fields: Vec<Field>) -> Document {
        Document { fields }
    }

    pub fn add(&mut self, field: Field) {
        self.fields.push(field);
    }

    /// The first field named `name`.
    pub fn get_field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name() == name)
    }

    /// The string value of the first field named `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_field(name).and_then(Field::string_value)
    }

    pub fn get_values(&self, name: &str) -> Vec<&VariantValue> {
        self.fields
            .iter()
            .filter(|f| f.name() == name)
            .map(Field::value)
            .collect()
    }

    pub fn remove_field(&mut self, name: &str) {
        if let Some(i) = self.fields.iter().position(|f| f.name() == name) {
            self.fields.remove(i);
        }
    }

    pub fn remove_fields(&mut self, name: &str) {
        self.fields.retain(|f| f.name() != name);
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
