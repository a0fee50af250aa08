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

//! Shared data model: cache keys and the persisted record shape.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte SHA-256 digest identifying a memoized call.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Wrap a raw 32-byte digest.
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding, the on-disk/primary-key form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Derive a cache key per the bit-exact formula:
    /// `SHA256(func_name ‖ 0x00 ‖ canonical_bytes ‖ 0x00 ‖ (version or ""))`.
    pub fn derive(func_name: &str, canonical_bytes: &[u8], version: Option<&str>) -> Self {
        let mut input = Vec::with_capacity(func_name.len() + canonical_bytes.len() + 2);
        input.extend_from_slice(func_name.as_bytes());
        input.push(0u8);
        input.extend_from_slice(canonical_bytes);
        input.push(0u8);
        input.extend_from_slice(version.unwrap_or("").as_bytes());

        let digest = ring::digest::digest(&ring::digest::SHA256, &input);
        let mut out = [0u8; 32];
        out.copy_from_slice(digest.as_ref());
        Self(out)
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.to_hex())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Where a record's payload physically lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultType {
    /// Payload is stored inline in `result_data`.
    DirectBlob,
    /// Payload lives in the blob store; `result_value` is its claim-check.
    File,
}

/// A persisted memoization record. Exactly one of `result_value`/`result_data`
/// is populated, matching `result_type`. Writes are upserts (last-writer-wins).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Primary identifier.
    pub cache_key: CacheKey,
    /// Informational function name.
    pub func_name: String,
    /// Informational canonical hash of the arguments (hex).
    pub input_id: String,
    /// Opaque version tag mixed into the cache key.
    pub version: Option<String>,
    /// Where the payload lives.
    pub result_type: ResultType,
    /// MIME-like hint for downstream viewers.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Blob-store claim-check, populated when `result_type == File`.
    #[serde(default)]
    pub result_value: Option<String>,
    /// Inline payload, populated when `result_type == DirectBlob`.
    #[serde(default)]
    pub result_data: Option<Vec<u8>>,
    /// Milliseconds since the UNIX epoch.
    pub updated_at: u64,
}

impl CacheRecord {
    /// Basic shape check: exactly one of the two payload fields is present,
    /// matching `result_type`.
    pub fn is_well_formed(&self) -> bool {
        match self.result_type {
            ResultType::DirectBlob => self.result_data.is_some() && self.result_value.is_none(),
            ResultType::File => self.result_value.is_some() && self.result_data.is_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic_across_calls() {
        let a = CacheKey::derive("f", b"seed", Some("v1"));
        let b = CacheKey::derive("f", b"seed", Some("v1"));
        assert_eq!(a, b);
    }

    #[test]
    fn version_isolation_changes_the_key() {
        let a = CacheKey::derive("f", b"seed", Some("v1"));
        let b = CacheKey::derive("f", b"seed", Some("v2"));
        let c = CacheKey::derive("f", b"seed", None);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn hex_round_trips_through_display() {
        let k = CacheKey::derive("f", b"seed", None);
        assert_eq!(k.to_hex().len(), 64);
    }
}
