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

use crate::core::analysis::{Analyzer, StringTokenStream, TokenStream};
use crate::core::doc::FieldType;
use crate::core::util::VariantValue;

use crate::error::ErrorKind::IllegalArgument;
use crate::error::Result;

/// A named value of a document.
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    field_type: FieldType,
    value: VariantValue,
    boost: f32,
}

impl Field {
    pub fn new<V: Into<VariantValue>>(name: &str, field_type: FieldType, value: V) -> Field {
        Field {
            name: name.to_string(),
            field_type,
            value: value.into(),
            boost: 1.0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> &FieldType {
        &self.field_type
    }

    pub fn value(&self) -> &VariantValue {
        &self.value
    }

    pub fn string_value(&self) -> Option<&str> {
        self.value.get_string()
    }

    pub fn binary_value(&self) -> Option<&[u8]> {
        self.value.get_binary()
    }

    pub fn boost(&self) -> f32 {
        self.boost
    }

    /// Index time boost, folded into the field's norm.
    pub fn set_boost(&mut self, boost: f32) {
        self.boost = boost;
    }

    /// The tokens to index for this field. Untokenized values are indexed
    /// as a single term.
    pub fn token_stream(&self, analyzer: &dyn Analyzer) -> Result<Box<dyn TokenStream>> {
        if !self.field_type.indexed() {
            bail!(IllegalArgument(format!(
                "field '{}' is not indexed",
                self.name
            )));
        }
        if self.field_type.tokenized {
            match self.value.get_string() {
                Some(text) => analyzer.token_stream(&self.name, text),
                None => bail!(IllegalArgument(format!(
                    "tokenized field '{}' must have a string value",
                    self.name
                ))),
            }
        } else {
            let text = match &self.value {
                VariantValue::VString(s) => s.clone(),
                VariantValue::Binary(_) => bail!(IllegalArgument(format!(
                    "binary field '{}' can not be indexed",
                    self.name
                ))),
                v => v.to_string(),
            };
            Ok(Box::new(StringTokenStream::new(text)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::analysis::WhitespaceAnalyzer;

    #[test]
    fn test_untokenized_number_is_one_term() {
        let field = Field::new("year", FieldType::string(), 2019);
        let mut stream = field.token_stream(&WhitespaceAnalyzer::new(true)).unwrap();
        stream.reset().unwrap();
        assert!(stream.next_token().unwrap());
        assert_eq!(stream.token().term, b"2019".to_vec());
        assert!(!stream.next_token().unwrap());
    }

    #[test]
    fn test_stored_only_field_is_not_analyzed() {
        let field = Field::new("raw", FieldType::stored_only(), &b"\x00\x01"[..]);
        assert!(field.token_stream(&WhitespaceAnalyzer::default()).is_err());
        assert_eq!(field.binary_value(), Some(&b"\x00\x01"[..]));
    }
}
