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

//! Embedded, sled-backed `MetadataStore`.
//!
//! Records are bincode-encoded `CacheRecord`s keyed by the raw cache-key
//! bytes. "Schema migration" (adding `content_type`/`result_data` with
//! null/empty defaults) is carried by `#[serde(default)]` on those fields:
//! an older record missing them simply deserializes with the defaults,
//! exactly as `core::types::CacheRecord` declares.

use crate::core::storage::{MetadataStore, StorageError};
use crate::core::types::{CacheKey, CacheRecord};

const HISTORY_TREE: &str = "__history__";
const MAX_RECORD_BYTES: usize = 8 * 1024 * 1024;

/// A `sled`-backed metadata store.
pub struct SledMetadataStore {
    db: sled::Db,
}

impl SledMetadataStore {
    /// Open (or create) a sled database at `path`.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(|e| StorageError::Metadata(e.to_string()))?;
        Ok(Self { db })
    }

    fn history_tree(&self) -> Result<sled::Tree, StorageError> {
        self.db
            .open_tree(HISTORY_TREE)
            .map_err(|e| StorageError::Metadata(e.to_string()))
    }
}

impl MetadataStore for SledMetadataStore {
    fn init_schema(&self) -> Result<(), StorageError> {
        // sled trees are created lazily and schema-less; nothing to migrate
        // beyond the serde defaults already carried on `CacheRecord`.
        Ok(())
    }

    fn get(&self, key: &CacheKey) -> Result<Option<CacheRecord>, StorageError> {
        let raw = self
            .db
            .get(key.as_bytes())
            .map_err(|e| StorageError::Metadata(e.to_string()))?;
        match raw {
            None => Ok(None),
            Some(bytes) => {
                let record = crate::core::codec::decode_limited(&bytes, MAX_RECORD_BYTES)
                    .map_err(|e| StorageError::Metadata(e.to_string()))?;
                Ok(Some(record))
            }
        }
    }

    fn put(&self, record: &CacheRecord) -> Result<(), StorageError> {
        let bytes =
            crate::core::codec::encode(record).map_err(|e| StorageError::Metadata(e.to_string()))?;
        self.db
            .insert(record.cache_key.as_bytes(), bytes.clone())
            .map_err(|e| StorageError::Metadata(e.to_string()))?;

        // Best-effort recency index; failures here never fail the upsert.
        if let Ok(history) = self.history_tree() {
            let seq = self.db.generate_id().unwrap_or(0);
            let _ = history.insert(seq.to_be_bytes(), bytes);
        }
        Ok(())
    }

    fn delete(&self, key: &CacheKey) -> Result<(), StorageError> {
        self.db
            .remove(key.as_bytes())
            .map_err(|e| StorageError::Metadata(e.to_string()))?;
        Ok(())
    }

    fn history(&self, limit: usize) -> Result<Vec<CacheRecord>, StorageError> {
        let tree = self.history_tree()?;
        let mut out = Vec::with_capacity(limit.min(1024));
        for entry in tree.iter().rev() {
            if out.len() >= limit {
                break;
            }
            let (_, bytes) = entry.map_err(|e| StorageError::Metadata(e.to_string()))?;
            if let Ok(record) = crate::core::codec::decode_limited(&bytes, MAX_RECORD_BYTES) {
                out.push(record);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
impl SledMetadataStore {
    /// Flip a byte of the stored record, used to exercise the resilient
    /// deserialization path end to end (`core::memo`'s corruption-recovery
    /// test).
    pub(crate) fn corrupt_for_test(&self, key: &CacheKey) {
        if let Ok(Some(bytes)) = self.db.get(key.as_bytes()) {
            let mut mutated = bytes.to_vec();
            if let Some(last) = mutated.last_mut() {
                *last ^= 0xFF;
            }
            let _ = self.db.insert(key.as_bytes(), mutated);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ResultType;

    fn sample(key: CacheKey) -> CacheRecord {
        CacheRecord {
            cache_key: key,
            func_name: "f".into(),
            input_id: "deadbeef".into(),
            version: None,
            result_type: ResultType::DirectBlob,
            content_type: None,
            result_value: None,
            result_data: Some(vec![1, 2, 3]),
            updated_at: 0,
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledMetadataStore::open(dir.path().to_str().unwrap()).unwrap();
        let key = CacheKey::derive("f", b"seed", None);
        store.put(&sample(key)).unwrap();
        let got = store.get(&key).unwrap().unwrap();
        assert_eq!(got.result_data, Some(vec![1, 2, 3]));
    }

    #[test]
    fn missing_key_is_none_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledMetadataStore::open(dir.path().to_str().unwrap()).unwrap();
        let key = CacheKey::derive("f", b"nope", None);
        assert!(store.get(&key).unwrap().is_none());
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledMetadataStore::open(dir.path().to_str().unwrap()).unwrap();
        let key = CacheKey::derive("f", b"seed", None);
        store.delete(&key).unwrap();
        store.put(&sample(key)).unwrap();
        store.delete(&key).unwrap();
        store.delete(&key).unwrap();
        assert!(store.get(&key).unwrap().is_none());
    }

    #[test]
    fn corrupted_bytes_do_not_panic_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledMetadataStore::open(dir.path().to_str().unwrap()).unwrap();
        let key = CacheKey::derive("f", b"seed", None);
        store.put(&sample(key)).unwrap();
        store.corrupt_for_test(&key);
        // `get` must never panic on corrupted bytes; `MemoCore` is what turns
        // a decode failure here into a cache miss (see core::memo tests).
        let _ = store.get(&key);
    }
}
