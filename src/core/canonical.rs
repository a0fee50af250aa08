// Copyright (c) 2026 Memoria
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Deterministic normalization of argument graphs into a stable byte sequence.
//!
//! `Value` stands in for the source language's duck-typed argument graph:
//! primitives, ordered sequences, sets, mappings, array-like objects exposing
//! shape/dtype/raw bytes, and structs with named fields. Normalization
//! (sorting map keys and set elements by their own canonical bytes) happens
//! while the tree is built; the already-sorted tree is then handed to the
//! shared deterministic codec and hashed with SHA-256.
//!
//! Array-like values carry their raw bytes rather than any textual
//! coercion — collapsing `tobytes()` through a lossy text form is exactly
//! the truncation-collision class of bug this type is built to avoid.

use crate::core::codec::{self, CodecError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A canonicalized value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absence of a value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Finite float, canonicalized via its bit pattern.
    Float(u64),
    /// A typed marker for a non-finite float (NaN, +Inf, -Inf).
    NonFinite(NonFiniteKind),
    /// UTF-8 string.
    Str(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Ordered sequence (also used for canonicalized sets, post-sort).
    Seq(Vec<Value>),
    /// Mapping, canonicalized as sorted `[key, value]` pairs.
    Map(Vec<(Value, Value)>),
    /// A duck-typed array: shape/dtype/raw bytes, no textual coercion.
    Array {
        /// Type tag distinguishing array families (e.g. "ndarray").
        type_tag: String,
        /// Shape dimensions.
        shape: Vec<u64>,
        /// Element dtype string (e.g. "float32").
        dtype: String,
        /// Raw little-endian backing bytes.
        data: Vec<u8>,
    },
    /// An arbitrary object reduced to `(type-name, attribute pairs)`.
    Struct {
        /// The type's name.
        type_name: String,
        /// Field name/value pairs, canonicalized in the order provided
        /// (callers should pass fields pre-sorted by name for stability;
        /// `ToValue` impls generated here always do).
        fields: Vec<(String, Value)>,
    },
}

/// Non-finite float markers. NaN is considered equal to itself for keying.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NonFiniteKind {
    /// Not-a-number.
    Nan,
    /// Positive infinity.
    PosInf,
    /// Negative infinity.
    NegInf,
}

/// Canonicalization failure.
#[derive(Debug, thiserror::Error)]
pub enum CanonicalError {
    /// The value tree could not be encoded.
    #[error("canonical encode failed: {0}")]
    Encode(#[from] CodecError),
}

impl Value {
    /// Build a float value, routing non-finite values to their typed marker.
    pub fn float(f: f64) -> Value {
        if f.is_nan() {
            Value::NonFinite(NonFiniteKind::Nan)
        } else if f.is_infinite() {
            if f > 0.0 {
                Value::NonFinite(NonFiniteKind::PosInf)
            } else {
                Value::NonFinite(NonFiniteKind::NegInf)
            }
        } else {
            // +0.0 and -0.0 normalize to the same bit pattern so they key
            // identically, matching ordinary floating-point equality.
            let normalized = if f == 0.0 { 0.0 } else { f };
            Value::Float(normalized.to_bits())
        }
    }

    /// Build a mapping value, sorting entries by each key's canonical bytes.
    pub fn map(mut entries: Vec<(Value, Value)>) -> Result<Value, CanonicalError> {
        let mut keyed = Vec::with_capacity(entries.len());
        for (k, v) in entries.drain(..) {
            let kb = canonicalize(&k)?;
            keyed.push((kb, k, v));
        }
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Value::Map(keyed.into_iter().map(|(_, k, v)| (k, v)).collect()))
    }

    /// Build a set value: a sequence sorted by each element's canonical bytes.
    pub fn set(mut elems: Vec<Value>) -> Result<Value, CanonicalError> {
        let mut keyed = Vec::with_capacity(elems.len());
        for v in elems.drain(..) {
            let b = canonicalize(&v)?;
            keyed.push((b, v));
        }
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Value::Seq(keyed.into_iter().map(|(_, v)| v).collect()))
    }
}

/// Types that can enter the canonicalization pipeline.
pub trait ToValue {
    /// Convert `self` into a canonical `Value` tree.
    fn to_value(&self) -> Result<Value, CanonicalError>;
}

macro_rules! impl_to_value_int {
    ($($t:ty),+) => {
        $(impl ToValue for $t {
            fn to_value(&self) -> Result<Value, CanonicalError> {
                Ok(Value::Int(*self as i64))
            }
        })+
    };
}
impl_to_value_int!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize);

impl ToValue for bool {
    fn to_value(&self) -> Result<Value, CanonicalError> {
        Ok(Value::Bool(*self))
    }
}

impl ToValue for f32 {
    fn to_value(&self) -> Result<Value, CanonicalError> {
        Ok(Value::float(*self as f64))
    }
}

impl ToValue for f64 {
    fn to_value(&self) -> Result<Value, CanonicalError> {
        Ok(Value::float(*self))
    }
}

impl ToValue for str {
    fn to_value(&self) -> Result<Value, CanonicalError> {
        Ok(Value::Str(self.to_string()))
    }
}

impl ToValue for String {
    fn to_value(&self) -> Result<Value, CanonicalError> {
        Ok(Value::Str(self.clone()))
    }
}

impl ToValue for [u8] {
    fn to_value(&self) -> Result<Value, CanonicalError> {
        Ok(Value::Bytes(self.to_vec()))
    }
}

impl<T: ToValue> ToValue for Vec<T> {
    fn to_value(&self) -> Result<Value, CanonicalError> {
        let mut out = Vec::with_capacity(self.len());
        for v in self {
            out.push(v.to_value()?);
        }
        Ok(Value::Seq(out))
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(&self) -> Result<Value, CanonicalError> {
        match self {
            Some(v) => v.to_value(),
            None => Ok(Value::Null),
        }
    }
}

impl<T: ToValue> ToValue for &T {
    fn to_value(&self) -> Result<Value, CanonicalError> {
        (*self).to_value()
    }
}

/// An array-like value: anything duck-typed with shape/dtype/raw bytes.
pub trait ArrayLike {
    /// Family tag (e.g. "ndarray", "tensor").
    fn type_tag(&self) -> &str;
    /// Shape dimensions.
    fn shape(&self) -> Vec<u64>;
    /// Element dtype string.
    fn dtype(&self) -> &str;
    /// Raw backing bytes, with no textual coercion.
    fn tobytes(&self) -> Vec<u8>;
}

/// Canonicalize any `ArrayLike` into its `Value::Array` form.
pub fn array_to_value<A: ArrayLike>(a: &A) -> Value {
    Value::Array {
        type_tag: a.type_tag().to_string(),
        shape: a.shape(),
        dtype: a.dtype().to_string(),
        data: a.tobytes(),
    }
}

/// Canonicalize a value tree to its deterministic byte sequence.
pub fn canonicalize(value: &Value) -> Result<Vec<u8>, CanonicalError> {
    Ok(codec::encode(value)?)
}

/// Canonicalize and hash a value tree with SHA-256.
pub fn hash(value: &Value) -> Result<[u8; 32], CanonicalError> {
    let bytes = canonicalize(value)?;
    let digest = ring::digest::digest(&ring::digest::SHA256, &bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_ref());
    Ok(out)
}

/// Order two values by their canonical byte representation.
///
/// Exposed for callers that need to sort heterogeneous `Value`s without
/// themselves reaching into the codec (e.g. a custom `ArrayLike` collection).
pub fn cmp_canonical(a: &Value, b: &Value) -> Result<Ordering, CanonicalError> {
    Ok(canonicalize(a)?.cmp(&canonicalize(b)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_key_order_is_irrelevant() {
        let a = Value::map(vec![
            (Value::Str("a".into()), Value::Int(1)),
            (Value::Str("b".into()), Value::Int(2)),
        ])
        .unwrap();
        let b = Value::map(vec![
            (Value::Str("b".into()), Value::Int(2)),
            (Value::Str("a".into()), Value::Int(1)),
        ])
        .unwrap();
        assert_eq!(canonicalize(&a).unwrap(), canonicalize(&b).unwrap());
    }

    #[test]
    fn set_order_is_irrelevant() {
        let a = Value::set(vec![Value::Int(3), Value::Int(1), Value::Int(2)]).unwrap();
        let b = Value::set(vec![Value::Int(1), Value::Int(2), Value::Int(3)]).unwrap();
        assert_eq!(canonicalize(&a).unwrap(), canonicalize(&b).unwrap());
    }

    #[test]
    fn nan_is_stable_and_equal_to_itself() {
        let a = Value::float(f64::NAN);
        let b = Value::float(-f64::NAN);
        assert_eq!(canonicalize(&a).unwrap(), canonicalize(&b).unwrap());
    }

    #[test]
    fn positive_and_negative_zero_key_identically() {
        let a = Value::float(0.0);
        let b = Value::float(-0.0);
        assert_eq!(canonicalize(&a).unwrap(), canonicalize(&b).unwrap());
    }

    #[test]
    fn arrays_differ_on_shape_dtype_or_bytes_with_no_truncation_collision() {
        let mk = |shape: Vec<u64>, dtype: &str, data: Vec<u8>| Value::Array {
            type_tag: "ndarray".into(),
            shape,
            dtype: dtype.into(),
            data,
        };
        let base = mk(vec![2, 2], "float32", vec![0u8; 16]);
        let diff_shape = mk(vec![4], "float32", vec![0u8; 16]);
        let diff_dtype = mk(vec![2, 2], "float64", vec![0u8; 16]);
        let mut bytes = vec![0u8; 16];
        bytes[0] = 1;
        let diff_bytes = mk(vec![2, 2], "float32", bytes);

        let base_bytes = canonicalize(&base).unwrap();
        assert_ne!(base_bytes, canonicalize(&diff_shape).unwrap());
        assert_ne!(base_bytes, canonicalize(&diff_dtype).unwrap());
        assert_ne!(base_bytes, canonicalize(&diff_bytes).unwrap());
    }
}
