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

//! On-disk formats of a segment.
//!
//! Every file starts with an index header (codec name, version, segment id
//! and suffix) and ends with a checksummed footer, see `codec_util`.

pub mod codec_util;
pub mod compound;
pub mod field_infos;
pub mod live_docs;
pub mod norms;
pub mod postings;
pub mod segment_infos;
pub mod stored_fields;

/// Codec recorded for every segment of a commit.
pub const CODEC_NAME: &str = "Quarry10";
