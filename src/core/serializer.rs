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

//! A length-prefixed binary codec with a user-extensible type registry.
//!
//! `Envelope` is the on-wire frame: either a primitive atom or an
//! `Extension(code, payload)`. Decoding an extension recursively decodes its
//! payload before handing it to the registered decoder — the nesting lets
//! user encoders target a structured intermediate (commonly a `Map`) and
//! leaves the binary framing to this module.
//!
//! `TypeRegistry` keeps the process-global injective `code <-> type` mapping
//! used to reject duplicate registrations. Recursive encode/decode dispatch
//! itself is expressed through the [`Encodable`]/[`Decodable`] traits rather
//! than an `Any`-keyed closure table, so a cache hit's expected return type
//! is checked at compile time instead of downcast at runtime; `TypeRegistry`
//! is consulted only to validate that a given extension code is the one the
//! caller's type actually registered.

use crate::core::codec::{self, CodecError};
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

/// On-wire representation of an encoded value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Envelope {
    /// Absence of a value.
    Null,
    /// Boolean atom.
    Bool(bool),
    /// Signed integer atom.
    Int(i64),
    /// Float atom, stored as its bit pattern for determinism.
    Float(u64),
    /// UTF-8 string atom.
    Str(String),
    /// Raw bytes atom.
    Bytes(Vec<u8>),
    /// Ordered sequence.
    Seq(Vec<Envelope>),
    /// Mapping with string keys.
    Map(Vec<(String, Envelope)>),
    /// A user-registered extension: `(code, recursively-encoded payload)`.
    Extension(u8, Box<Envelope>),
}

impl Envelope {
    /// Convenience: build a float envelope from an `f64`.
    pub fn float(f: f64) -> Envelope {
        Envelope::Float(f.to_bits())
    }

    /// Convenience: read a float envelope back as `f64`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Envelope::Float(bits) => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }
}

/// Serialization failure.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// The concrete type has no registered extension and is not a primitive.
    #[error("type {0:?} is not serializable; call TypeRegistry::register for it")]
    Unregistered(&'static str),
    /// An extension's payload decoded to the wrong envelope code.
    #[error("extension code mismatch: expected {expected}, found {found}")]
    CodeMismatch {
        /// Code the decoder expected.
        expected: u8,
        /// Code actually present on the wire.
        found: u8,
    },
    /// An envelope frame's shape did not match what the decoder expected.
    #[error("unexpected envelope shape")]
    UnexpectedShape,
    /// An unknown extension code was encountered.
    #[error("unknown extension code {0}")]
    UnknownCode(u8),
    /// The binary framing itself failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Registration failure: duplicate code or duplicate type.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// The extension code is already bound to a different type.
    #[error("extension code {0} is already registered")]
    DuplicateCode(u8),
    /// This concrete type already has a registered extension code.
    #[error("type is already registered under code {0}")]
    DuplicateType(u8),
    /// Extension codes must fall in `0..=127`.
    #[error("extension code {0} is out of range (0..=127)")]
    OutOfRange(u8),
}

/// Types that can be recursively encoded into an [`Envelope`].
pub trait Encodable {
    /// Encode `self` into its wire envelope.
    fn encode(&self, registry: &TypeRegistry) -> Result<Envelope, SerializationError>;
}

/// Types that can be recursively decoded from an [`Envelope`].
pub trait Decodable: Sized {
    /// Decode `self` from its wire envelope.
    fn decode(env: Envelope, registry: &TypeRegistry) -> Result<Self, SerializationError>;
}

macro_rules! impl_codable_int {
    ($($t:ty),+) => {
        $(impl Encodable for $t {
            fn encode(&self, _r: &TypeRegistry) -> Result<Envelope, SerializationError> {
                Ok(Envelope::Int(*self as i64))
            }
        }
        impl Decodable for $t {
            fn decode(env: Envelope, _r: &TypeRegistry) -> Result<Self, SerializationError> {
                match env {
                    Envelope::Int(i) => Ok(i as $t),
                    _ => Err(SerializationError::UnexpectedShape),
                }
            }
        })+
    };
}
impl_codable_int!(i8, i16, i32, i64, u16, u32, u64, usize, isize);

impl Encodable for bool {
    fn encode(&self, _r: &TypeRegistry) -> Result<Envelope, SerializationError> {
        Ok(Envelope::Bool(*self))
    }
}
impl Decodable for bool {
    fn decode(env: Envelope, _r: &TypeRegistry) -> Result<Self, SerializationError> {
        match env {
            Envelope::Bool(b) => Ok(b),
            _ => Err(SerializationError::UnexpectedShape),
        }
    }
}

impl Encodable for f64 {
    fn encode(&self, _r: &TypeRegistry) -> Result<Envelope, SerializationError> {
        Ok(Envelope::float(*self))
    }
}
impl Decodable for f64 {
    fn decode(env: Envelope, _r: &TypeRegistry) -> Result<Self, SerializationError> {
        env.as_float().ok_or(SerializationError::UnexpectedShape)
    }
}

impl Encodable for String {
    fn encode(&self, _r: &TypeRegistry) -> Result<Envelope, SerializationError> {
        Ok(Envelope::Str(self.clone()))
    }
}
impl Decodable for String {
    fn decode(env: Envelope, _r: &TypeRegistry) -> Result<Self, SerializationError> {
        match env {
            Envelope::Str(s) => Ok(s),
            _ => Err(SerializationError::UnexpectedShape),
        }
    }
}

impl Encodable for Vec<u8> {
    fn encode(&self, _r: &TypeRegistry) -> Result<Envelope, SerializationError> {
        Ok(Envelope::Bytes(self.clone()))
    }
}
impl Decodable for Vec<u8> {
    fn decode(env: Envelope, _r: &TypeRegistry) -> Result<Self, SerializationError> {
        match env {
            Envelope::Bytes(b) => Ok(b),
            _ => Err(SerializationError::UnexpectedShape),
        }
    }
}

impl<T: Encodable> Encodable for Vec<T> {
    fn encode(&self, registry: &TypeRegistry) -> Result<Envelope, SerializationError> {
        let mut out = Vec::with_capacity(self.len());
        for v in self {
            out.push(v.encode(registry)?);
        }
        Ok(Envelope::Seq(out))
    }
}
impl<T: Decodable> Decodable for Vec<T> {
    fn decode(env: Envelope, registry: &TypeRegistry) -> Result<Self, SerializationError> {
        match env {
            Envelope::Seq(items) => items.into_iter().map(|e| T::decode(e, registry)).collect(),
            _ => Err(SerializationError::UnexpectedShape),
        }
    }
}

impl<T: Encodable> Encodable for Option<T> {
    fn encode(&self, registry: &TypeRegistry) -> Result<Envelope, SerializationError> {
        match self {
            Some(v) => v.encode(registry),
            None => Ok(Envelope::Null),
        }
    }
}
impl<T: Decodable> Decodable for Option<T> {
    fn decode(env: Envelope, registry: &TypeRegistry) -> Result<Self, SerializationError> {
        match env {
            Envelope::Null => Ok(None),
            other => Ok(Some(T::decode(other, registry)?)),
        }
    }
}

/// Identity passthrough, letting a user's intermediate simply be an `Envelope`.
impl Encodable for Envelope {
    fn encode(&self, _r: &TypeRegistry) -> Result<Envelope, SerializationError> {
        Ok(self.clone())
    }
}
impl Decodable for Envelope {
    fn decode(env: Envelope, _r: &TypeRegistry) -> Result<Self, SerializationError> {
        Ok(env)
    }
}

struct RegistryInner {
    codes: HashMap<u8, TypeId>,
    types: HashMap<TypeId, u8>,
}

/// The process-global injective `code <-> type` mapping.
///
/// Mutated only during setup; once registration is done, `encode_extension`/
/// `decode_extension` only read the table (still behind the mutex, since
/// registration can in principle happen lazily).
pub struct TypeRegistry {
    inner: Mutex<RegistryInner>,
}

impl TypeRegistry {
    /// A registry with no extensions registered.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                codes: HashMap::new(),
                types: HashMap::new(),
            }),
        }
    }

    /// Reserve `code` for type `T`. Duplicate code or duplicate type is an error.
    pub fn register<T: Any>(&self, code: u8) -> Result<(), RegistrationError> {
        if code > 127 {
            return Err(RegistrationError::OutOfRange(code));
        }
        let tid = TypeId::of::<T>();
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        if let Some(existing) = inner.codes.get(&code) {
            if *existing != tid {
                return Err(RegistrationError::DuplicateCode(code));
            }
        }
        if let Some(existing_code) = inner.types.get(&tid) {
            if *existing_code != code {
                return Err(RegistrationError::DuplicateType(*existing_code));
            }
            return Ok(()); // idempotent re-registration of the same (type, code) pair
        }
        inner.codes.insert(code, tid);
        inner.types.insert(tid, code);
        Ok(())
    }

    /// Whether `T` currently owns `code`.
    fn owns<T: Any>(&self, code: u8) -> bool {
        let inner = self.inner.lock().expect("registry mutex poisoned");
        inner.codes.get(&code) == Some(&TypeId::of::<T>())
    }

    /// Encode `intermediate` and wrap it as `Extension(code, payload)`.
    ///
    /// `T` must have been registered under `code` first.
    pub fn encode_extension<T: Any, I: Encodable>(
        &self,
        code: u8,
        intermediate: &I,
    ) -> Result<Envelope, SerializationError> {
        if !self.owns::<T>(code) {
            return Err(SerializationError::Unregistered(std::any::type_name::<T>()));
        }
        let payload = intermediate.encode(self)?;
        Ok(Envelope::Extension(code, Box::new(payload)))
    }

    /// Unwrap an `Extension(expected_code, payload)` and recursively decode
    /// its payload into `I`.
    pub fn decode_extension<I: Decodable>(
        &self,
        expected_code: u8,
        env: Envelope,
    ) -> Result<I, SerializationError> {
        match env {
            Envelope::Extension(code, payload) if code == expected_code => {
                I::decode(*payload, self)
            }
            Envelope::Extension(code, _) => Err(SerializationError::CodeMismatch {
                expected: expected_code,
                found: code,
            }),
            _ => Err(SerializationError::UnexpectedShape),
        }
    }

    /// Encode any `Encodable` value to bytes.
    pub fn encode<T: Encodable>(&self, value: &T) -> Result<Vec<u8>, SerializationError> {
        let env = value.encode(self)?;
        Ok(codec::encode(&env)?)
    }

    /// Decode bytes into any `Decodable` value.
    pub fn decode<T: Decodable>(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        let env: Envelope = codec::decode(bytes)?;
        T::decode(env, self)
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Obj {
        v: i64,
    }

    impl Encodable for Obj {
        fn encode(&self, registry: &TypeRegistry) -> Result<Envelope, SerializationError> {
            registry.encode_extension::<Obj, _>(10, &Envelope::Map(vec![("v".into(), Envelope::Int(self.v))]))
        }
    }

    impl Decodable for Obj {
        fn decode(env: Envelope, registry: &TypeRegistry) -> Result<Self, SerializationError> {
            let intermediate: Envelope = registry.decode_extension(10, env)?;
            match intermediate {
                Envelope::Map(fields) => {
                    let v = fields
                        .into_iter()
                        .find(|(k, _)| k == "v")
                        .and_then(|(_, e)| match e {
                            Envelope::Int(i) => Some(i),
                            _ => None,
                        })
                        .ok_or(SerializationError::UnexpectedShape)?;
                    Ok(Obj { v })
                }
                _ => Err(SerializationError::UnexpectedShape),
            }
        }
    }

    #[test]
    fn custom_type_round_trips() {
        let registry = TypeRegistry::new();
        registry.register::<Obj>(10).unwrap();
        let obj = Obj { v: 7 };
        let bytes = registry.encode(&obj).unwrap();
        let back: Obj = registry.decode(&bytes).unwrap();
        assert_eq!(obj, back);
    }

    #[test]
    fn duplicate_code_for_a_different_type_is_rejected() {
        let registry = TypeRegistry::new();
        registry.register::<Obj>(10).unwrap();
        let err = registry.register::<i64>(10).unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateCode(10)));
    }

    #[test]
    fn primitives_round_trip_without_registration() {
        let registry = TypeRegistry::new();
        let bytes = registry.encode(&42i64).unwrap();
        let back: i64 = registry.decode(&bytes).unwrap();
        assert_eq!(back, 42);

        let bytes = registry.encode(&"hello".to_string()).unwrap();
        let back: String = registry.decode(&bytes).unwrap();
        assert_eq!(back, "hello");
    }

    #[test]
    fn unknown_code_on_decode_is_an_error() {
        let registry = TypeRegistry::new();
        let env = Envelope::Extension(99, Box::new(Envelope::Null));
        let bytes = codec::encode(&env).unwrap();
        let result: Result<Obj, _> = registry.decode(&bytes);
        assert!(result.is_err());
    }
}
