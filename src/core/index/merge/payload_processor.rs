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

use crate::core::index::Term;
use crate::error::Result;

/// Rewrites the payloads of the segments being merged, so indexes built
/// from different sources can agree on one payload encoding without
/// decoding whole documents.
///
/// The provider is asked once per merged segment, the reader processor once
/// per term. Returning `None` at either level copies the payloads unchanged.
pub trait PayloadProcessorProvider: Send + Sync {
    fn reader_processor(&self, segment: &str) -> Result<Option<Box<dyn ReaderPayloadProcessor>>>;
}

/// Payload processors of one segment.
pub trait ReaderPayloadProcessor {
    fn processor(&mut self, field: &str, term: &[u8]) -> Result<Option<Box<dyn PayloadProcessor>>>;
}

/// Processes the payloads of one term, in place. An empty payload after
/// processing is written as no payload.
pub trait PayloadProcessor {
    fn process(&mut self, payload: &mut Vec<u8>) -> Result<()>;
}

/// Wraps a closure as the processor of every term of a segment.
pub struct FnReaderPayloadProcessor<F> {
    f: F,
}

impl<F> FnReaderPayloadProcessor<F>
where
    F: FnMut(&Term, &mut Vec<u8>) -> Result<()> + Clone + 'static,
{
    pub fn new(f: F) -> Self {
        FnReaderPayloadProcessor { f }
    }
}

impl<F> ReaderPayloadProcessor for FnReaderPayloadProcessor<F>
where
    F: FnMut(&Term, &mut Vec<u8>) -> Result<()> + Clone + 'static,
{
    fn processor(&mut self, field: &str, term: &[u8]) -> Result<Option<Box<dyn PayloadProcessor>>> {
        Ok(Some(Box::new(TermPayloadProcessor {
            term: Term::new(field.to_string(), term.to_vec()),
            f: self.f.clone(),
        })))
    }
}

struct TermPayloadProcessor<F> {
    term: Term,
    f: F,
}

impl<F> PayloadProcessor for TermPayloadProcessor<F>
where
    F: FnMut(&Term, &mut Vec<u8>) -> Result<()>,
{
    fn process(&mut self, payload: &mut Vec<u8>) -> Result<()> {
        (self.f)(&self.term, payload)
    }
}
