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

use crate::error::{ErrorKind::IllegalArgument, Result};

/// Controls how much information is stored in the postings lists.
///
/// Variants are ordered: each one indexes everything the previous one does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum IndexOptions {
    Null,
    Docs,
    DocsAndFreqs,
    DocsAndFreqsAndPositions,
    DocsAndFreqsAndPositionsAndOffsets,
}

impl Default for IndexOptions {
    fn default() -> IndexOptions {
        IndexOptions::Null
    }
}

impl IndexOptions {
    pub fn from(options: &str) -> Result<IndexOptions> {
        let res = match options {
            "offsets" => IndexOptions::DocsAndFreqsAndPositionsAndOffsets,
            "positions" => IndexOptions::DocsAndFreqsAndPositions,
            "freqs" => IndexOptions::DocsAndFreqs,
            "docs" => IndexOptions::Docs,
            "none" => IndexOptions::Null,
            _ => {
                bail!(IllegalArgument(format!(
                    "failed to parse index option [{}]",
                    options
                )));
            }
        };
        Ok(res)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IndexOptions::DocsAndFreqsAndPositionsAndOffsets => "offsets",
            IndexOptions::DocsAndFreqsAndPositions => "positions",
            IndexOptions::DocsAndFreqs => "freqs",
            IndexOptions::Docs => "docs",
            IndexOptions::Null => "none",
        }
    }

    /// Byte used by the field infos file.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(b: u8) -> Result<IndexOptions> {
        Ok(match b {
            0 => IndexOptions::Null,
            1 => IndexOptions::Docs,
            2 => IndexOptions::DocsAndFreqs,
            3 => IndexOptions::DocsAndFreqsAndPositions,
            4 => IndexOptions::DocsAndFreqsAndPositionsAndOffsets,
            _ => bail!(IllegalArgument(format!("invalid index options byte: {}", b))),
        })
    }

    pub fn is_indexed(self) -> bool {
        self != IndexOptions::Null
    }

    pub fn has_freqs(self) -> bool {
        self >= IndexOptions::DocsAndFreqs
    }

    pub fn has_positions(self) -> bool {
        self >= IndexOptions::DocsAndFreqsAndPositions
    }

    pub fn has_offsets(self) -> bool {
        self >= IndexOptions::DocsAndFreqsAndPositionsAndOffsets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_and_bytes() {
        assert!(IndexOptions::Docs < IndexOptions::DocsAndFreqs);
        assert!(IndexOptions::DocsAndFreqsAndPositionsAndOffsets.has_positions());
        assert!(!IndexOptions::DocsAndFreqs.has_positions());
        for opt in &["none", "docs", "freqs", "positions", "offsets"] {
            let o = IndexOptions::from(opt).unwrap();
            assert_eq!(o.as_str(), *opt);
            assert_eq!(IndexOptions::from_byte(o.as_byte()).unwrap(), o);
        }
        assert!(IndexOptions::from_byte(9).is_err());
    }
}
