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

//! The storage contracts `MemoCore` consumes, and the facade that implements
//! the claim-check policy over them.
//!
//! Neither interface participates in cross-operation transactions. Deletion
//! is "atomic (best-effort)": delete the record first, then the blob. A
//! crash between the two leaves an orphaned blob, reclaimable by an external
//! garbage-collection pass.

use crate::core::types::{CacheKey, CacheRecord, ResultType};
use thiserror::Error;
use tracing::warn;

/// Storage failure (non-decode I/O).
#[derive(Debug, Error)]
pub enum StorageError {
    /// The metadata store failed to read or write.
    #[error("metadata store: {0}")]
    Metadata(String),
    /// The blob store failed to read, write, or delete.
    #[error("blob store: {0}")]
    Blob(String),
}

/// Abstract metadata record table.
pub trait MetadataStore: Send + Sync {
    /// Idempotently create or migrate the schema.
    fn init_schema(&self) -> Result<(), StorageError>;
    /// Thread-safe read.
    fn get(&self, key: &CacheKey) -> Result<Option<CacheRecord>, StorageError>;
    /// Thread-safe upsert.
    fn put(&self, record: &CacheRecord) -> Result<(), StorageError>;
    /// Thread-safe, idempotent delete (no-op if missing).
    fn delete(&self, key: &CacheKey) -> Result<(), StorageError>;
    /// Best-effort recent-first history, capped at `limit`.
    fn history(&self, limit: usize) -> Result<Vec<CacheRecord>, StorageError>;
}

/// Abstract large-payload byte storage.
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under a location derived from `key`, returning the
    /// claim-check location string.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<String, StorageError>;
    /// Fetch the bytes for a claim-check location.
    fn get(&self, location: &str) -> Result<Vec<u8>, StorageError>;
    /// Idempotent delete; missing blobs are not an error.
    fn delete(&self, location: &str) -> Result<(), StorageError>;
}

/// Mediates between `MemoCore` and the injected `MetadataStore`/`BlobStore`.
pub struct StorageFacade {
    metadata: Box<dyn MetadataStore>,
    blobs: Box<dyn BlobStore>,
}

impl StorageFacade {
    /// Wrap a metadata store and a blob store behind the claim-check facade.
    pub fn new(metadata: Box<dyn MetadataStore>, blobs: Box<dyn BlobStore>) -> Result<Self, StorageError> {
        metadata.init_schema()?;
        Ok(Self { metadata, blobs })
    }

    /// Look up a record by key.
    pub fn get_record(&self, key: &CacheKey) -> Result<Option<CacheRecord>, StorageError> {
        self.metadata.get(key)
    }

    /// Fetch a record's payload bytes, resolving the claim-check if needed.
    pub fn load_payload(&self, record: &CacheRecord) -> Result<Vec<u8>, StorageError> {
        match record.result_type {
            ResultType::DirectBlob => Ok(record
                .result_data
                .clone()
                .ok_or_else(|| StorageError::Metadata("DIRECT_BLOB record missing result_data".into()))?),
            ResultType::File => {
                let location = record
                    .result_value
                    .as_deref()
                    .ok_or_else(|| StorageError::Metadata("FILE record missing result_value".into()))?;
                self.blobs.get(location)
            }
        }
    }

    /// Persist `payload` for `key`, routing inline vs. blob storage per
    /// `save_blob`, and upsert the resulting record.
    #[allow(clippy::too_many_arguments)]
    pub fn store(
        &self,
        key: CacheKey,
        func_name: &str,
        input_id: &str,
        version: Option<String>,
        content_type: Option<String>,
        payload: Vec<u8>,
        save_blob: bool,
        updated_at: u64,
    ) -> Result<CacheRecord, StorageError> {
        let record = if save_blob {
            let location = self.blobs.put(&key.to_hex(), &payload)?;
            CacheRecord {
                cache_key: key,
                func_name: func_name.to_string(),
                input_id: input_id.to_string(),
                version,
                result_type: ResultType::File,
                content_type,
                result_value: Some(location),
                result_data: None,
                updated_at,
            }
        } else {
            CacheRecord {
                cache_key: key,
                func_name: func_name.to_string(),
                input_id: input_id.to_string(),
                version,
                result_type: ResultType::DirectBlob,
                content_type,
                result_value: None,
                result_data: Some(payload),
                updated_at,
            }
        };
        self.metadata.put(&record)?;
        Ok(record)
    }

    /// Delete a record and, best-effort, its blob. Missing blobs are not an
    /// error; blob I/O failures are logged but never block record removal.
    pub fn delete(&self, key: &CacheKey) -> Result<(), StorageError> {
        let record = self.metadata.get(key)?;
        self.metadata.delete(key)?;
        if let Some(record) = record {
            if record.result_type == ResultType::File {
                if let Some(location) = record.result_value {
                    if let Err(e) = self.blobs.delete(&location) {
                        warn!(error = %e, "best-effort blob delete failed; record already removed");
                    }
                }
            }
        }
        Ok(())
    }

    /// Best-effort recent-first history.
    pub fn history(&self, limit: usize) -> Result<Vec<CacheRecord>, StorageError> {
        self.metadata.history(limit)
    }
}
