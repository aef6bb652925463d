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

use serde::ser::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use num_traits::ToPrimitive;

/// A dynamically typed value, used for stored field values and for the sort
/// values attached to a `FieldDoc`.
#[derive(Debug, Clone)]
pub enum VariantValue {
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    VString(String),
    Binary(Vec<u8>),
}

impl VariantValue {
    pub fn get_bool(&self) -> Option<bool> {
        match self {
            VariantValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
    pub fn get_int(&self) -> Option<i32> {
        match self {
            VariantValue::Int(i) => Some(*i),
            _ => None,
        }
    }
    pub fn get_long(&self) -> Option<i64> {
        match self {
            VariantValue::Long(l) => Some(*l),
            _ => None,
        }
    }
    pub fn get_float(&self) -> Option<f32> {
        match self {
            VariantValue::Float(f) => Some(*f),
            _ => None,
        }
    }
    pub fn get_double(&self) -> Option<f64> {
        match self {
            VariantValue::Double(d) => Some(*d),
            _ => None,
        }
    }
    pub fn get_string(&self) -> Option<&str> {
        match self {
            VariantValue::VString(s) => Some(s.as_str()),
            _ => None,
        }
    }
    pub fn get_binary(&self) -> Option<&[u8]> {
        match self {
            VariantValue::Binary(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    /// Numeric view of the value, `None` for strings and binaries.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            VariantValue::Bool(b) => Some(if b { 1.0 } else { 0.0 }),
            VariantValue::Int(i) => i.to_f64(),
            VariantValue::Long(l) => l.to_f64(),
            VariantValue::Float(f) => f.to_f64(),
            VariantValue::Double(d) => Some(d),
            _ => None,
        }
    }

    /// The raw bytes indexed for this value when it is used as a term.
    pub fn term_bytes(&self) -> Vec<u8> {
        match self {
            VariantValue::VString(s) => s.as_bytes().to_vec(),
            VariantValue::Binary(b) => b.clone(),
            v => v.to_string().into_bytes(),
        }
    }

    fn type_order(&self) -> u8 {
        match self {
            VariantValue::Bool(_) => 0,
            VariantValue::Int(_)
            | VariantValue::Long(_)
            | VariantValue::Float(_)
            | VariantValue::Double(_) => 1,
            VariantValue::VString(_) => 2,
            VariantValue::Binary(_) => 3,
        }
    }
}

impl fmt::Display for VariantValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VariantValue::Bool(b) => write!(f, "{}", b),
            VariantValue::Int(i) => write!(f, "{}", i),
            VariantValue::Long(l) => write!(f, "{}", l),
            VariantValue::Float(v) => write!(f, "{}", v),
            VariantValue::Double(d) => write!(f, "{}", d),
            VariantValue::VString(s) => write!(f, "{}", s),
            VariantValue::Binary(b) => write!(f, "{:?}", b),
        }
    }
}

impl Serialize for VariantValue {
    fn serialize<S>(&self, serializer: S) -> ::std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            VariantValue::Bool(b) => serializer.serialize_bool(*b),
            VariantValue::Int(i) => serializer.serialize_i32(*i),
            VariantValue::Long(l) => serializer.serialize_i64(*l),
            VariantValue::Float(f) => serializer.serialize_f32(*f),
            VariantValue::Double(d) => serializer.serialize_f64(*d),
            VariantValue::VString(s) => serializer.serialize_str(s),
            VariantValue::Binary(b) => serializer.serialize_bytes(b),
        }
    }
}

impl Hash for VariantValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            VariantValue::Bool(b) => b.hash(state),
            VariantValue::Int(i) => i.hash(state),
            VariantValue::Long(l) => l.hash(state),
            VariantValue::Float(f) => f.to_bits().hash(state),
            VariantValue::Double(d) => d.to_bits().hash(state),
            VariantValue::VString(s) => s.hash(state),
            VariantValue::Binary(b) => b.hash(state),
        }
    }
}

impl PartialEq for VariantValue {
    fn eq(&self, other: &VariantValue) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VariantValue {}

impl Ord for VariantValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (VariantValue::Bool(a), VariantValue::Bool(b)) => a.cmp(b),
            (VariantValue::Int(a), VariantValue::Int(b)) => a.cmp(b),
            (VariantValue::Long(a), VariantValue::Long(b)) => a.cmp(b),
            (VariantValue::VString(a), VariantValue::VString(b)) => a.cmp(b),
            (VariantValue::Binary(a), VariantValue::Binary(b)) => a.cmp(b),
            (a, b) if a.type_order() == 1 && b.type_order() == 1 => {
                // as_f64 is always Some for numeric variants
                let l = a.as_f64().unwrap_or(0.0);
                let r = b.as_f64().unwrap_or(0.0);
                l.partial_cmp(&r).unwrap_or(Ordering::Equal)
            }
            (a, b) => a.type_order().cmp(&b.type_order()),
        }
    }
}

impl PartialOrd for VariantValue {
    fn partial_cmp(&self, other: &VariantValue) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<bool> for VariantValue {
    fn from(val: bool) -> Self {
        VariantValue::Bool(val)
    }
}

impl From<i32> for VariantValue {
    fn from(val: i32) -> Self {
        VariantValue::Int(val)
    }
}

impl From<i64> for VariantValue {
    fn from(val: i64) -> Self {
        VariantValue::Long(val)
    }
}

impl From<f32> for VariantValue {
    fn from(val: f32) -> Self {
        VariantValue::Float(val)
    }
}

impl From<f64> for VariantValue {
    fn from(val: f64) -> Self {
        VariantValue::Double(val)
    }
}

impl<'a> From<&'a str> for VariantValue {
    fn from(val: &'a str) -> Self {
        VariantValue::VString(val.to_string())
    }
}

impl From<String> for VariantValue {
    fn from(val: String) -> Self {
        VariantValue::VString(val)
    }
}

impl<'a> From<&'a [u8]> for VariantValue {
    fn from(val: &'a [u8]) -> Self {
        VariantValue::Binary(val.to_vec())
    }
}
