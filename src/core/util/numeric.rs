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

const BASE36_DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Renders a non-negative value in radix 36, the form used by generation
/// suffixes of index file names.
pub fn to_base36(val: u64) -> String {
    let mut val = val;
    let mut digits = Vec::with_capacity(14);
    loop {
        digits.push(BASE36_DIGITS[(val % 36) as usize]);
        val /= 36;
        if val == 0 {
            break;
        }
    }
    digits.reverse();
    digits.into_iter().map(char::from).collect()
}

pub fn from_base36(s: &str) -> Result<u64> {
    if s.is_empty() {
        bail!(IllegalArgument("empty base36 string".into()));
    }
    Ok(u64::from_str_radix(s, 36)?)
}

/// Converts an i64 to i32, failing if the value does not fit.
pub fn long_to_int_exact(val: i64) -> Result<i32> {
    let ans = val as i32;
    if i64::from(ans) != val {
        bail!(IllegalArgument(format!("value {} out of i32 range", val)));
    }
    Ok(ans)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(from_base36("10").unwrap(), 36);
        assert_eq!(from_base36(&to_base36(123_456_789)).unwrap(), 123_456_789);
        assert!(from_base36("").is_err());
    }

    #[test]
    fn test_long_to_int_exact() {
        assert_eq!(long_to_int_exact(42).unwrap(), 42);
        assert!(long_to_int_exact(i64::from(i32::max_value()) + 1).is_err());
    }
}
