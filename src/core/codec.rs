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

//! Deterministic binary codec shared by the canonicalizer and the serializer.
//!
//! Both subsystems encode trees of the same shape (atoms, sequences, nested
//! frames) and both require byte-for-byte stable output across processes.
//! A single set of bincode options, fixed-width integers with no trailing
//! bytes tolerated, backs both of them.

use bincode::Options;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Codec failure.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The value could not be written to bytes.
    #[error("encode failed")]
    Encode,
    /// The bytes did not match the expected shape.
    #[error("decode failed")]
    Decode,
    /// The input exceeded the configured size limit.
    #[error("size limit exceeded")]
    TooLarge,
}

/// Canonical bincode options: fixed-width integers, no trailing bytes.
pub(crate) fn bincode_opts() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Encode a value with the canonical, deterministic rules.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    bincode_opts().serialize(value).map_err(|_| CodecError::Encode)
}

/// Decode a value, enforcing a hard cap on the input size.
pub fn decode_limited<T: DeserializeOwned>(bytes: &[u8], max: usize) -> Result<T, CodecError> {
    if bytes.len() > max {
        return Err(CodecError::TooLarge);
    }
    bincode_opts()
        .with_limit(max as u64)
        .deserialize(bytes)
        .map_err(|_| CodecError::Decode)
}

/// Decode a value with the default 16 MiB cap.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    decode_limited(bytes, 16 * 1024 * 1024)
}
