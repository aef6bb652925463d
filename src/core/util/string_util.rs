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

use rand::{thread_rng, Rng};

/// length in bytes of an ID
pub const ID_LENGTH: usize = 16;

/// Generates a non-cryptographic globally unique id.
pub fn random_id() -> [u8; ID_LENGTH] {
    let mut id = [0u8; ID_LENGTH];
    thread_rng().fill(&mut id);
    id
}

pub fn id2str(id: &[u8]) -> String {
    let strs: Vec<String> = id.iter().map(|b| format!("{:02X}", b)).collect();
    strs.join("")
}

/// Returns the number of leading bytes common to both slices.
pub fn bytes_difference(left: &[u8], right: &[u8]) -> usize {
    left.iter()
        .zip(right.iter())
        .take_while(|(l, r)| l == r)
        .count()
}

/// Whether `bytes` begins with `prefix`.
pub fn starts_with(bytes: &[u8], prefix: &[u8]) -> bool {
    bytes.len() >= prefix.len() && &bytes[..prefix.len()] == prefix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id2str() {
        let v = vec![65u8, 97u8, 4u8, 127u8];
        assert_eq!("4161047F", id2str(&v[..]));
    }

    #[test]
    fn test_bytes_difference() {
        assert_eq!(bytes_difference(b"apple", b"apply"), 4);
        assert_eq!(bytes_difference(b"app", b"apple"), 3);
        assert_eq!(bytes_difference(b"", b"a"), 0);
        assert!(starts_with(b"apple", b"app"));
        assert!(!starts_with(b"ap", b"app"));
    }

    #[test]
    fn test_random_id_differs() {
        assert_ne!(random_id(), random_id());
    }
}
