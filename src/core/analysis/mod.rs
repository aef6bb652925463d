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

//! Turning field text into the tokens that get indexed.

mod token_stream;

pub use self::token_stream::*;

mod whitespace_tokenizer;

pub use self::whitespace_tokenizer::*;

use crate::error::ErrorKind::IllegalArgument;
use crate::error::Result;

pub const MIN_BUFFER_SIZE: usize = 10;
pub const MAX_WORD_LEN: usize = 255;

#[derive(Debug, Clone)]
pub struct Token {
    pub term: Vec<u8>,
    /// Determines the position of this token relative to the previous Token in a
    /// TokenStream, used in phrase searching.
    ///
    /// The default value is one.
    ///
    /// * Set it to zero to put multiple terms in the same position.
    /// * Set it to values greater than one to inhibit exact phrase matches
    /// across removed tokens.
    pub position: usize,
    /// The start and end byte offset of a Token.
    pub start_offset: usize,
    pub end_offset: usize,
    /// The payload of a Token, stored in the index at each position.
    pub payload: Vec<u8>,
}

impl Default for Token {
    fn default() -> Self {
        Token::new()
    }
}

impl Token {
    pub fn new() -> Token {
        Token {
            term: Vec::with_capacity(MIN_BUFFER_SIZE),
            position: 1,
            start_offset: 0,
            end_offset: 0,
            payload: Vec::with_capacity(0),
        }
    }

    pub fn clear(&mut self) {
        self.position = 1;
        self.start_offset = 0;
        self.end_offset = 0;
        self.payload.clear();
        self.term.clear();
    }

    pub fn end(&mut self) {
        self.clear();
        self.position = 0;
    }

    /// Set the starting and ending offset.
    pub fn set_offset(&mut self, start_offset: usize, end_offset: usize) -> Result<()> {
        if end_offset < start_offset {
            bail!(IllegalArgument(format!(
                "end_offset must be >= start_offset; got start_offset={}, end_offset={}",
                start_offset, end_offset
            )))
        }
        self.start_offset = start_offset;
        self.end_offset = end_offset;
        Ok(())
    }
}

/// Builds the `TokenStream` of a tokenized field value.
pub trait Analyzer: Send + Sync {
    fn token_stream(&self, field: &str, text: &str) -> Result<Box<dyn TokenStream>>;

    /// Position gap inserted between two values of the same field.
    fn position_increment_gap(&self, _field: &str) -> usize {
        0
    }
}

/// Splits on whitespace, optionally lower casing terms and splitting a
/// payload off each token at `payload_delimiter`.
#[derive(Debug, Clone, Default)]
pub struct WhitespaceAnalyzer {
    pub lowercase: bool,
    pub payload_delimiter: Option<u8>,
}

impl WhitespaceAnalyzer {
    pub fn new(lowercase: bool) -> WhitespaceAnalyzer {
        WhitespaceAnalyzer {
            lowercase,
            payload_delimiter: None,
        }
    }

    pub fn with_payloads(lowercase: bool, delimiter: u8) -> WhitespaceAnalyzer {
        WhitespaceAnalyzer {
            lowercase,
            payload_delimiter: Some(delimiter),
        }
    }
}

impl Analyzer for WhitespaceAnalyzer {
    fn token_stream(&self, _field: &str, text: &str) -> Result<Box<dyn TokenStream>> {
        let tokenizer = WhitespaceTokenizer::new(text.to_string(), self.lowercase);
        Ok(match self.payload_delimiter {
            Some(delimiter) => Box::new(DelimitedPayloadTokenFilter::new(
                Box::new(tokenizer),
                delimiter,
            )),
            None => Box::new(tokenizer),
        })
    }
}
