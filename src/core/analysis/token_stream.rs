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

use crate::core::analysis::Token;

use crate::error::Result;

use std::fmt::Debug;

pub trait TokenStream: Debug + Send {
    /// Advances the stream to the next token, returning false at the end of
    /// the stream. The current token is available through `token()`.
    fn next_token(&mut self) -> Result<bool>;

    /// Called after `next_token` returned false, to set the final offset of
    /// the stream.
    fn end(&mut self) -> Result<()>;

    /// Resets this stream to a clean state, as if it had been created fresh.
    fn reset(&mut self) -> Result<()>;

    fn token(&self) -> &Token;

    fn token_mut(&mut self) -> &mut Token;

    fn clear_token(&mut self) {
        self.token_mut().clear();
    }

    fn end_token(&mut self) {
        self.token_mut().end();
    }
}

/// Emits the whole value as a single token, used for untokenized fields.
#[derive(Debug)]
pub struct StringTokenStream {
    token: Token,
    used: bool,
    value: String,
}

impl StringTokenStream {
    pub fn new(value: String) -> Self {
        StringTokenStream {
            token: Token::new(),
            used: true,
            value,
        }
    }
}

impl TokenStream for StringTokenStream {
    fn next_token(&mut self) -> Result<bool> {
        if self.used {
            return Ok(false);
        }

        self.clear_token();
        self.token.term = self.value.as_bytes().to_vec();
        self.token.set_offset(0, self.value.len())?;

        self.used = true;

        Ok(true)
    }

    fn end(&mut self) -> Result<()> {
        self.end_token();
        self.token.set_offset(self.value.len(), self.value.len())
    }

    fn reset(&mut self) -> Result<()> {
        self.used = false;

        Ok(())
    }

    fn token(&self) -> &Token {
        &self.token
    }

    fn token_mut(&mut self) -> &mut Token {
        &mut self.token
    }
}

/// Splits every token of `input` at the first `delimiter` byte: the head is
/// the term and the tail becomes the payload.
#[derive(Debug)]
pub struct DelimitedPayloadTokenFilter {
    input: Box<dyn TokenStream>,
    delimiter: u8,
}

impl DelimitedPayloadTokenFilter {
    pub fn new(input: Box<dyn TokenStream>, delimiter: u8) -> Self {
        DelimitedPayloadTokenFilter { input, delimiter }
    }
}

impl TokenStream for DelimitedPayloadTokenFilter {
    fn next_token(&mut self) -> Result<bool> {
        if !self.input.next_token()? {
            return Ok(false);
        }
        let delimiter = self.delimiter;
        let token = self.input.token_mut();
        if let Some(idx) = token.term.iter().position(|b| *b == delimiter) {
            token.payload = token.term.split_off(idx + 1);
            token.term.pop();
        } else {
            token.payload.clear();
        }
        Ok(true)
    }

    fn end(&mut self) -> Result<()> {
        self.input.end()
    }

    fn reset(&mut self) -> Result<()> {
        self.input.reset()
    }

    fn token(&self) -> &Token {
        self.input.token()
    }

    fn token_mut(&mut self) -> &mut Token {
        self.input.token_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::analysis::WhitespaceTokenizer;

    #[test]
    fn test_string_token_stream() {
        let mut stream = StringTokenStream::new("New York".to_string());
        stream.reset().unwrap();
        assert!(stream.next_token().unwrap());
        assert_eq!(stream.token().term, b"New York".to_vec());
        assert_eq!(stream.token().end_offset, 8);
        assert!(!stream.next_token().unwrap());
        stream.end().unwrap();
        assert_eq!(stream.token().start_offset, 8);
    }

    #[test]
    fn test_delimited_payloads() {
        let tokenizer = WhitespaceTokenizer::new("red|1 green blue|xy".to_string(), false);
        let mut stream = DelimitedPayloadTokenFilter::new(Box::new(tokenizer), b'|');
        stream.reset().unwrap();

        let mut tokens = vec![];
        while stream.next_token().unwrap() {
            let token = stream.token();
            tokens.push((token.term.clone(), token.payload.clone()));
        }
        assert_eq!(
            tokens,
            vec![
                (b"red".to_vec(), b"1".to_vec()),
                (b"green".to_vec(), vec![]),
                (b"blue".to_vec(), b"xy".to_vec()),
            ]
        );
    }
}
