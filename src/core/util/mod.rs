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

pub mod bit_set;
pub mod bit_util;
pub mod packed;
pub mod small_float;

mod bits;

pub use self::bits::*;

mod doc_id_set;

pub use self::doc_id_set::*;

mod numeric;

pub use self::numeric::*;

mod reference_manager;

pub use self::reference_manager::*;

mod string_util;

pub use self::string_util::*;

mod variant_value;

pub use self::variant_value::*;

pub use self::bit_set::FixedBitSet;
pub use self::bit_util::{BitsRequired, UnsignedShift, ZigZagEncoding};

/// Document identifier inside one segment, or an absolute doc id once the
/// leaf doc base has been added.
pub type DocId = i32;

/// Estimates the heap usage of a structure, used to report the cost of
/// in-memory caches and buffers.
pub trait Accountable {
    fn ram_bytes_used(&self) -> usize;
}
