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
use crate::error::Result;

/// Answer of `StoredFieldVisitor::needs_field`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Visit the field.
    Yes,
    /// Skip the field.
    No,
    /// Stop visiting the document.
    Stop,
}

/// Low level API to load the stored fields of a document selectively.
/// Values of fields the visitor does not need are skipped without being
/// decoded.
pub trait StoredFieldVisitor {
    fn binary_field(&mut self, field_info: &FieldInfo, value: Vec<u8>) -> Result<()>;
    fn string_field(&mut self, field_info: &FieldInfo, value: Vec<u8>) -> Result<()>;
    fn int_field(&mut self, field_info: &FieldInfo, value: i32) -> Result<()>;
    fn long_field(&mut self, field_info: &FieldInfo, value: i64) -> Result<()>;
    fn float_field(&mut self, field_info: &FieldInfo, value: f32) -> Result<()>;
    fn double_field(&mut self, field_info: &FieldInfo, value: f64) -> Result<()>;

    fn needs_field(&self, field_info: &FieldInfo) -> Status;
}
