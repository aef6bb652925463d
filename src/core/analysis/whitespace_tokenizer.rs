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

use crate::core::analysis::{Token, TokenStream, MAX_WORD_LEN};

use crate::error::Result;

/// A tokenizer that divides text at whitespace characters.
///
/// Adjacent sequences of non-whitespace characters form tokens. Tokens
/// longer than `MAX_WORD_LEN` bytes are split. Offsets are byte offsets into
/// the text.
#[derive(Debug)]
pub struct WhitespaceTokenizer {
    text: String,
    offset: usize,
    final_offset: usize,
    lowercase: bool,
    token: Token,
}

impl WhitespaceTokenizer {
    pub fn new(text: String, lowercase: bool) -> Self {
        WhitespaceTokenizer {
            text,
            offset: 0,
            final_offset: 0,
            lowercase,
            token: Token::new(),
        }
    }

    pub fn is_token_char(c: char) -> bool {
        !c.is_whitespace()
    }
}

impl TokenStream for WhitespaceTokenizer {
    fn next_token(&mut self) -> Result<bool> {
        self.clear_token();
        let rest = &self.text[self.offset..];
        let mut start = None;
        let mut end = rest.len();
        for (i, c) in rest.char_indices() {
            if Self::is_token_char(c) {
                if start.is_none() {
                    start = Some(i);
                }
                if i + c.len_utf8() - start.unwrap_or(i) > MAX_WORD_LEN {
                    end = i;
                    break;
                }
            } else if start.is_some() {
                end = i;
                break;
            }
        }

        let start = match start {
            Some(s) => s,
            None => {
                self.offset = self.text.len();
                self.final_offset = self.offset;
                return Ok(false);
            }
        };
        let word = &rest[start..end];
        if self.lowercase {
            self.token.term = word.to_lowercase().into_bytes();
        } else {
            self.token.term = word.as_bytes().to_vec();
        }
        let base = self.offset;
        self.token.set_offset(base + start, base + end)?;
        self.offset = base + end;
        self.final_offset = self.offset;
        Ok(true)
    }

    fn end(&mut self) -> Result<()> {
        self.end_token();
        let final_offset = self.final_offset;
        self.token.set_offset(final_offset, final_offset)
    }

    fn reset(&mut self) -> Result<()> {
        self.offset = 0;
        self.final_offset = 0;
        self.clear_token();
        Ok(())
    }

    fn token(&self) -> &Token {
        &self.token
    }

    fn token_mut(&mut self) -> &mut Token {
        &mut self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_tokenizer() {
        let source = "The quick brown fox jumps over a lazy dog";
        let offsets = [
            (0usize, 3usize),
            (4, 9),
            (10, 15),
            (16, 19),
            (20, 25),
            (26, 30),
            (31, 32),
            (33, 37),
            (38, 41),
        ];
        let words: Vec<&str> = source.split(' ').collect();

        let mut tokenizer = WhitespaceTokenizer::new(source.to_string(), false);
        tokenizer.reset().unwrap();

        for i in 0..9 {
            assert!(tokenizer.next_token().unwrap());
            assert_eq!(tokenizer.token().start_offset, offsets[i].0);
            assert_eq!(tokenizer.token().end_offset, offsets[i].1);
            assert_eq!(tokenizer.token().term, words[i].as_bytes());
            assert_eq!(tokenizer.token().position, 1);
        }
        assert!(!tokenizer.next_token().unwrap());
        tokenizer.end().unwrap();
        assert_eq!(tokenizer.token().end_offset, 41);
    }

    #[test]
    fn test_lowercase_and_leading_space() {
        let mut tokenizer = WhitespaceTokenizer::new("  Hello\tWORLD ".to_string(), true);
        tokenizer.reset().unwrap();
        assert!(tokenizer.next_token().unwrap());
        assert_eq!(tokenizer.token().term, b"hello".to_vec());
        assert_eq!(tokenizer.token().start_offset, 2);
        assert!(tokenizer.next_token().unwrap());
        assert_eq!(tokenizer.token().term, b"world".to_vec());
        assert_eq!((tokenizer.token().start_offset, tokenizer.token().end_offset), (8, 13));
        assert!(!tokenizer.next_token().unwrap());
    }
}
