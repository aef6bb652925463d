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

mod field_infos_format;

pub use self::field_infos_format::*;

use crate::core::index::IndexOptions;
use crate::error::ErrorKind::{IllegalArgument, IllegalState};
use crate::error::Result;

use std::cmp::max;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Access to the Field Info file that describes document fields and whether or
/// not they are indexed. Each segment has a separate Field Info file.
#[derive(Clone, Debug, Serialize)]
pub struct FieldInfo {
    pub name: String,
    pub number: u32,
    pub index_options: IndexOptions,
    pub omit_norms: bool,
    pub has_store_payloads: bool,
    pub attributes: HashMap<String, String>,
}

impl FieldInfo {
    pub fn new(
        name: String,
        number: u32,
        index_options: IndexOptions,
        omit_norms: bool,
        store_payloads: bool,
        attributes: HashMap<String, String>,
    ) -> Result<FieldInfo> {
        let info = FieldInfo {
            name,
            number,
            index_options,
            omit_norms,
            has_store_payloads: store_payloads,
            attributes,
        };

        info.check_consistency()?;
        Ok(info)
    }

    pub fn check_consistency(&self) -> Result<()> {
        if self.has_store_payloads && !self.index_options.has_positions() {
            bail!(IllegalState(format!(
                "field '{}' cannot have payloads without positions",
                &self.name
            )));
        }
        Ok(())
    }

    pub fn has_norms(&self) -> bool {
        self.index_options.is_indexed() && !self.omit_norms
    }

    /// Folds the options of another instance of the same field into this one.
    /// Options only ever downgrade, and norms once omitted stay omitted.
    fn update(&mut self, index_options: IndexOptions, omit_norms: bool, store_payloads: bool) {
        if self.index_options != index_options {
            if self.index_options == IndexOptions::Null {
                self.index_options = index_options;
            } else if index_options != IndexOptions::Null && self.index_options > index_options {
                // downgrade
                self.index_options = index_options;
            }
        }

        if self.index_options.is_indexed() {
            self.has_store_payloads |= store_payloads;
            if index_options.is_indexed() && self.omit_norms != omit_norms {
                self.omit_norms = true;
            }
        }

        if !self.index_options.has_positions() {
            // cannot store payloads if we don't store positions:
            self.has_store_payloads = false;
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn put_attribute(&mut self, key: String, value: String) -> Option<String> {
        self.attributes.insert(key, value)
    }
}

impl fmt::Display for FieldInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Ok(s) = ::serde_json::to_string_pretty(self) {
            write!(f, "{}", s)?;
        }

        Ok(())
    }
}

/// Tracks the number and position / offset parameters of terms
/// being added to the index. The information collected here is
/// also used to calculate the normalization factor for a field.
#[derive(Debug, Clone)]
pub struct FieldInvertState {
    pub name: String,
    pub position: i32,
    pub length: i32,
    pub num_overlap: i32,
    pub offset: i32,
    pub max_term_frequency: u32,
    pub unique_term_count: u32,
    pub boost: f32,
}

impl FieldInvertState {
    pub fn new(name: String) -> Self {
        FieldInvertState {
            name,
            position: -1,
            length: 0,
            num_overlap: 0,
            offset: 0,
            max_term_frequency: 0,
            unique_term_count: 0,
            boost: 1.0,
        }
    }

    pub fn reset(&mut self) {
        self.position = -1;
        self.length = 0;
        self.num_overlap = 0;
        self.offset = 0;
        self.max_term_frequency = 0;
        self.unique_term_count = 0;
        self.boost = 1.0f32;
    }
}

/// Collection of `FieldInfo`s (accessible by number or by name).
#[derive(Clone, Debug, Default, Serialize)]
pub struct FieldInfos {
    pub has_freq: bool,
    pub has_prox: bool,
    pub has_payloads: bool,
    pub has_offsets: bool,
    pub has_norms: bool,

    #[serde(skip)]
    pub by_number: BTreeMap<u32, Arc<FieldInfo>>,
    pub by_name: HashMap<String, Arc<FieldInfo>>,
}

impl fmt::Display for FieldInfos {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Ok(s) = ::serde_json::to_string_pretty(self) {
            write!(f, "{}", s)?;
        }

        Ok(())
    }
}

impl FieldInfos {
    pub fn new(infos: Vec<FieldInfo>) -> Result<FieldInfos> {
        let mut field_infos = FieldInfos::default();
        let mut max_number = 0;

        for info in infos {
            let info = Arc::new(info);
            let number = info.number;
            max_number = max(max_number, number);

            field_infos.has_prox |= info.index_options.has_positions();
            field_infos.has_freq |= info.index_options.has_freqs();
            field_infos.has_offsets |= info.index_options.has_offsets();
            field_infos.has_norms |= info.has_norms();
            field_infos.has_payloads |= info.has_store_payloads;

            if let Some(previous) = field_infos.by_number.insert(number, Arc::clone(&info)) {
                bail!(IllegalArgument(format!(
                    "duplicated field numbers: {} and {} have: {}",
                    previous.name, &info.name, number
                )));
            }

            let name = info.name.clone();
            if let Some(previous) = field_infos.by_name.insert(name.clone(), info) {
                bail!(IllegalArgument(format!(
                    "duplicated field names: {} and {} have: {}",
                    previous.number, number, &name
                )));
            }
        }
        Ok(field_infos)
    }

    pub fn field_info_by_number(&self, field_number: u32) -> Option<&FieldInfo> {
        self.by_number.get(&field_number).map(Arc::as_ref)
    }

    pub fn field_info_by_name(&self, field_name: &str) -> Option<&FieldInfo> {
        self.by_name.get(field_name).map(Arc::as_ref)
    }

    /// Fields in number order.
    pub fn iter(&self) -> impl Iterator<Item = &FieldInfo> {
        self.by_number.values().map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Accumulates the `FieldInfo`s of one segment, taking numbers from the
/// writer wide `FieldNumbers` so a field keeps its number across segments.
pub struct FieldInfosBuilder {
    pub by_name: HashMap<String, FieldInfo>,
    global_field_numbers: Arc<FieldNumbers>,
}

impl Default for FieldInfosBuilder {
    fn default() -> Self {
        Self::new(Arc::new(FieldNumbers::new()))
    }
}

impl FieldInfosBuilder {
    pub fn new(global_field_numbers: Arc<FieldNumbers>) -> Self {
        FieldInfosBuilder {
            by_name: HashMap::new(),
            global_field_numbers,
        }
    }

    pub fn global_field_numbers(&self) -> Arc<FieldNumbers> {
        Arc::clone(&self.global_field_numbers)
    }

    pub fn add_infos(&mut self, other: &FieldInfos) -> Result<()> {
        for v in other.by_number.values() {
            self.add(v.as_ref())?;
        }
        Ok(())
    }

    /// Create a new field, or update the existing one with `index_options`.
    pub fn get_or_add(
        &mut self,
        name: &str,
        index_options: IndexOptions,
        omit_norms: bool,
        store_payloads: bool,
    ) -> Result<&FieldInfo> {
        self.add_or_update_internal(name, 0, index_options, omit_norms, store_payloads)?;
        match self.by_name.get(name) {
            Some(fi) => Ok(fi),
            None => bail!(IllegalState(format!("field '{}' was not registered", name))),
        }
    }

    pub fn add(&mut self, fi: &FieldInfo) -> Result<()> {
        self.add_or_update_internal(
            &fi.name,
            fi.number,
            fi.index_options,
            fi.omit_norms,
            fi.has_store_payloads,
        )
    }

    fn add_or_update_internal(
        &mut self,
        name: &str,
        preferred_field_number: u32,
        index_options: IndexOptions,
        omit_norms: bool,
        store_payloads: bool,
    ) -> Result<()> {
        if let Some(field_info) = self.by_name.get_mut(name) {
            field_info.update(index_options, omit_norms, store_payloads);
            return Ok(());
        }
        // This field wasn't yet added to this in-RAM segment's FieldInfo, so
        // now we get a global number for it. If the field was seen before
        // we'll get the same name and number, else we'll allocate a new one.
        let field_number = self
            .global_field_numbers
            .add_or_get(name, preferred_field_number)?;
        let mut fi = FieldInfo::new(
            name.to_string(),
            field_number,
            IndexOptions::Null,
            false,
            false,
            HashMap::new(),
        )?;
        fi.update(index_options, omit_norms, store_payloads);
        self.by_name.insert(name.to_string(), fi);
        Ok(())
    }

    pub fn finish(&self) -> Result<FieldInfos> {
        let infos: Vec<FieldInfo> = self.by_name.values().cloned().collect();
        FieldInfos::new(infos)
    }
}

/// Writer wide mapping between field names and numbers.
#[derive(Default)]
pub struct FieldNumbers {
    inner: Mutex<FieldNumbersInner>,
}

impl FieldNumbers {
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns the global field number for the given field name. If the name
    /// does not exist yet it is added with the preferred number when that is
    /// free, otherwise with the lowest unassigned number.
    pub fn add_or_get(&self, field_name: &str, preferred_field_number: u32) -> Result<u32> {
        let mut inner = self.inner.lock()?;
        if let Some(number) = inner.name_to_number.get(field_name) {
            return Ok(*number);
        }
        let field_number = if !inner.number_to_name.contains_key(&preferred_field_number) {
            preferred_field_number
        } else {
            while inner
                .number_to_name
                .contains_key(&inner.lowest_unassigned_field_number)
            {
                inner.lowest_unassigned_field_number += 1;
            }
            inner.lowest_unassigned_field_number
        };
        inner
            .name_to_number
            .insert(field_name.to_string(), field_number);
        inner
            .number_to_name
            .insert(field_number, field_name.to_string());
        Ok(field_number)
    }

    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock()?;
        *inner = FieldNumbersInner::default();
        Ok(())
    }
}

#[derive(Default)]
struct FieldNumbersInner {
    number_to_name: HashMap<u32, String>,
    name_to_number: HashMap<String, u32>,
    lowest_unassigned_field_number: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers_are_stable_across_builders() {
        let numbers = Arc::new(FieldNumbers::new());
        let mut first = FieldInfosBuilder::new(Arc::clone(&numbers));
        first
            .get_or_add("title", IndexOptions::Docs, false, false)
            .unwrap();
        first
            .get_or_add("body", IndexOptions::DocsAndFreqsAndPositions, false, true)
            .unwrap();
        let first = first.finish().unwrap();

        let mut second = FieldInfosBuilder::new(Arc::clone(&numbers));
        second
            .get_or_add("body", IndexOptions::DocsAndFreqs, false, true)
            .unwrap();
        let second = second.finish().unwrap();

        let body = second.field_info_by_name("body").unwrap();
        assert_eq!(first.field_info_by_name("body").unwrap().number, body.number);
        assert_ne!(first.field_info_by_name("title").unwrap().number, body.number);
        // downgraded to freqs only, so payloads are dropped
        assert_eq!(body.index_options, IndexOptions::DocsAndFreqs);
        assert!(!body.has_store_payloads);
        assert!(first.has_payloads && first.has_prox);
        assert!(!second.has_prox);
    }

    #[test]
    fn test_omit_norms_is_sticky() {
        let mut builder = FieldInfosBuilder::default();
        builder
            .get_or_add("f", IndexOptions::Docs, true, false)
            .unwrap();
        builder
            .get_or_add("f", IndexOptions::Docs, false, false)
            .unwrap();
        let infos = builder.finish().unwrap();
        assert!(!infos.field_info_by_name("f").unwrap().has_norms());
        assert!(!infos.has_norms);
    }

    #[test]
    fn test_duplicate_numbers_rejected() {
        let a = FieldInfo::new("a".into(), 1, IndexOptions::Docs, false, false, HashMap::new())
            .unwrap();
        let b = FieldInfo::new("b".into(), 1, IndexOptions::Docs, false, false, HashMap::new())
            .unwrap();
        assert!(FieldInfos::new(vec![a, b]).is_err());
        assert!(FieldInfo::new("c".into(), 2, IndexOptions::Docs, false, true, HashMap::new())
            .is_err());
    }
}
