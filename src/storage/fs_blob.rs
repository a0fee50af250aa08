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

//! Content-addressed local-filesystem `BlobStore` with atomic writes.
//!
//! Writes go to a temp file in the same directory and are renamed into
//! place, matching the keystore's `atomic_write_private` pattern: a reader
//! never observes a partially written blob.

use crate::core::storage::{BlobStore, StorageError};
use std::fs;
use std::path::{Path, PathBuf};

/// A directory-backed blob store.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Use (creating if needed) `root` as the blob directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StorageError::Blob(e.to_string()))?;
        Ok(Self { root })
    }

    fn path_for(&self, location: &str) -> PathBuf {
        self.root.join(location)
    }

    fn atomic_write(&self, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::Blob(e.to_string()))?;
        }
        let mut tmp = path.to_path_buf();
        tmp.set_extension("tmp");
        {
            let mut f = fs::File::create(&tmp).map_err(|e| StorageError::Blob(e.to_string()))?;
            use std::io::Write;
            f.write_all(bytes).map_err(|e| StorageError::Blob(e.to_string()))?;
            let _ = f.sync_all();
        }
        fs::rename(&tmp, path).map_err(|e| StorageError::Blob(e.to_string()))?;
        Ok(())
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<String, StorageError> {
        let location = format!("{key}.bin");
        let path = self.path_for(&location);
        self.atomic_write(&path, bytes)?;
        Ok(location)
    }

    fn get(&self, location: &str) -> Result<Vec<u8>, StorageError> {
        fs::read(self.path_for(location)).map_err(|e| StorageError::Blob(e.to_string()))
    }

    fn delete(&self, location: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(location)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Blob(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        let loc = store.put("abc", b"hello world").unwrap();
        assert_eq!(store.get(&loc).unwrap(), b"hello world");
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        let loc = store.put("abc", b"data").unwrap();
        store.delete(&loc).unwrap();
        store.delete(&loc).unwrap(); // missing blob is not an error
    }

    #[test]
    fn get_of_missing_location_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        assert!(store.get("never-written.bin").is_err());
    }
}
