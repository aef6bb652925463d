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

//! Index writing: buffering, flushing, committing and merging segments.

mod delete_policy;

pub use self::delete_policy::*;

mod index_file_deleter;

pub use self::index_file_deleter::*;

mod index_writer;

pub use self::index_writer::*;

mod index_writer_config;

pub use self::index_writer_config::*;

mod reader_pool;

pub use self::reader_pool::*;

mod segment_buffer;

pub use self::segment_buffer::*;
