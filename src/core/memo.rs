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

//! The memoization pipeline: key -> lookup -> miss-handling -> execute ->
//! persist. Orchestrates the canonicalizer, key policy, serializer, rate
//! limiter, and storage facade.
//!
//! **Single-flight.** The source leaves cross-call coordination for the same
//! key as an open question; this implementation resolves it by serializing
//! concurrent callers on the same key through a per-key mutex with a
//! double-checked lookup (check cache, acquire the key's lock, check again).
//! Calls to *different* keys remain fully concurrent. This eliminates
//! duplicate execution for the common case without changing any of the
//! correctness properties, which hold with or without it.

use crate::core::canonical::canonicalize;
use crate::core::executor::WorkerPool;
use crate::core::key_policy::{CallArgs, KeyPolicy, KeyPolicyError};
use crate::core::rate_limiter::RateLimiter;
use crate::core::serializer::{Decodable, Encodable, SerializationError, TypeRegistry};
use crate::core::storage::{BlobStore, MetadataStore, StorageError, StorageFacade};
use crate::core::types::CacheKey;
use crate::monitoring::metrics::Metrics;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::warn;

/// Rate-limit cost for a call: fixed or computed from the call's arguments.
#[derive(Clone)]
pub enum RateCost {
    /// A fixed cost in the limiter's units.
    Fixed(f64),
    /// A cost computed from the arguments, evaluated on the calling side
    /// before admission.
    Dynamic(Arc<dyn Fn(&CallArgs) -> f64 + Send + Sync>),
}

impl RateCost {
    fn resolve(&self, args: &CallArgs) -> f64 {
        match self {
            RateCost::Fixed(c) => *c,
            RateCost::Dynamic(f) => f(args),
        }
    }
}

/// Per-call configuration.
#[derive(Clone)]
pub struct CallConfig {
    /// Opaque string mixed into the cache key; changing it invalidates prior
    /// entries for the same arguments.
    pub version: Option<String>,
    /// Route storage to the blob store (`true`) or inline (`false`).
    pub save_blob: bool,
    /// Persisted hint for downstream viewers.
    pub content_type: Option<String>,
    /// Key-policy override; `KeyPolicy::Default` if unset.
    pub input_key_fn: Option<KeyPolicy>,
    /// Rate-limit cost for this call.
    pub cost: RateCost,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            version: None,
            save_blob: false,
            content_type: None,
            input_key_fn: None,
            cost: RateCost::Fixed(1.0),
        }
    }
}

/// Pipeline failure. `User(E)` carries the wrapped function's own error,
/// propagated unchanged; nothing else in this enum ever reaches the caller
/// for a value that was in fact cached.
#[derive(Debug, Error)]
pub enum MemoError<E: std::error::Error + 'static> {
    /// Projecting arguments through the key policy failed.
    #[error("key policy: {0}")]
    KeyPolicy(#[from] KeyPolicyError),
    /// Encoding the result for storage failed (unregistered type).
    #[error("serialization: {0}")]
    Serialization(#[from] SerializationError),
    /// The metadata or blob store failed on a non-decode operation.
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
    /// The wrapped function raised; the call is not cached.
    #[error("function failed: {0}")]
    User(#[source] E),
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

type InFlightMap = StdMutex<HashMap<CacheKey, Arc<StdMutex<()>>>>;

/// The memoization pipeline core.
pub struct MemoCore {
    name: String,
    storage: StorageFacade,
    registry: Arc<TypeRegistry>,
    limiter: Option<RateLimiter>,
    executor: WorkerPool,
    blob_warning_threshold: usize,
    in_flight: InFlightMap,
    metrics: Option<Arc<Metrics>>,
}

impl MemoCore {
    /// Construct a `MemoCore` from its injected collaborators.
    pub fn new(
        name: impl Into<String>,
        metadata: Box<dyn MetadataStore>,
        blobs: Box<dyn BlobStore>,
        registry: Arc<TypeRegistry>,
        limiter: Option<RateLimiter>,
        executor: WorkerPool,
        blob_warning_threshold: usize,
        metrics: Option<Arc<Metrics>>,
    ) -> Result<Self, StorageError> {
        Ok(Self {
            name: name.into(),
            storage: StorageFacade::new(metadata, blobs)?,
            registry,
            limiter,
            executor,
            blob_warning_threshold,
            in_flight: StdMutex::new(HashMap::new()),
            metrics,
        })
    }

    /// This instance's logical name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn resolve_key(
        &self,
        func_name: &str,
        args: &CallArgs,
        cfg: &CallConfig,
    ) -> Result<(CacheKey, String), KeyPolicyError> {
        let policy = cfg.input_key_fn.clone().unwrap_or(KeyPolicy::Default);
        let seed = policy.apply(args)?;
        let canonical_bytes = canonicalize(&seed).map_err(KeyPolicyError::from)?;
        let key = CacheKey::derive(func_name, &canonical_bytes, cfg.version.as_deref());
        let input_id = hex::encode(ring::digest::digest(&ring::digest::SHA256, &canonical_bytes));
        Ok((key, input_id))
    }

    /// Attempt the hit path: lookup + resilient deserialization. `Ok(None)`
    /// covers both key-absence and corruption. `note_corruption` gates
    /// whether a corrupt record is logged and counted here: `invoke` and
    /// `invoke_async` call this twice per logical call (once before
    /// acquiring the per-key lock, once again as the authoritative
    /// double-check after), and a single bad record must only be reported
    /// once, not once per call site.
    fn try_hit<T: Decodable, E: std::error::Error>(
        &self,
        key: &CacheKey,
        note_corruption: bool,
    ) -> Result<Option<T>, MemoError<E>> {
        let record = match self.storage.get_record(key)? {
            None => return Ok(None),
            Some(r) => r,
        };
        let bytes = match self.storage.load_payload(&record) {
            Ok(b) => b,
            Err(e) => {
                if note_corruption {
                    self.note_corruption(key, &e.to_string());
                }
                return Ok(None);
            }
        };
        match self.registry.decode::<T>(&bytes) {
            Ok(v) => {
                if let Some(m) = &self.metrics {
                    m.hits_total.inc();
                }
                Ok(Some(v))
            }
            Err(e) => {
                if note_corruption {
                    self.note_corruption(key, &e.to_string());
                }
                Ok(None)
            }
        }
    }

    fn note_corruption(&self, key: &CacheKey, detail: &str) {
        warn!(
            cache_key = %key,
            error = detail,
            "stored record failed to decode; treating as a miss, consider bumping `version`"
        );
        if let Some(m) = &self.metrics {
            m.corrupted_total.inc();
        }
    }

    fn per_key_lock(&self, key: CacheKey) -> Arc<StdMutex<()>> {
        let mut map = self.in_flight.lock().expect("in-flight map poisoned");
        map.entry(key).or_insert_with(|| Arc::new(StdMutex::new(()))).clone()
    }

    /// Drop this caller's handle on the key's lock and, if no other caller
    /// still holds one, evict the map entry so `in_flight` does not grow
    /// without bound. `lock` is consumed here (not just referenced) so the
    /// strong-count check below sees this caller's own clone already gone;
    /// the whole read-drop-maybe-remove sequence runs under the single
    /// `in_flight` mutex, so it can't race a concurrent `per_key_lock`.
    fn release_per_key_lock(&self, key: &CacheKey, lock: Arc<StdMutex<()>>) {
        let mut map = self.in_flight.lock().expect("in-flight map poisoned");
        drop(lock);
        if let Some(entry) = map.get(key) {
            if Arc::strong_count(entry) == 1 {
                map.remove(key);
            }
        }
    }

    fn persist<T: Encodable>(
        &self,
        key: CacheKey,
        func_name: &str,
        input_id: &str,
        cfg: &CallConfig,
        value: &T,
    ) -> Result<(), MemoError<std::convert::Infallible>> {
        let envelope = value.encode(&self.registry)?;
        let bytes = crate::core::codec::encode(&envelope).map_err(SerializationError::from)?;

        if !cfg.save_blob && bytes.len() > self.blob_warning_threshold {
            warn!(
                cache_key = %key,
                size = bytes.len(),
                threshold = self.blob_warning_threshold,
                "DIRECT_BLOB result exceeds the size guardrail; persisting anyway"
            );
            if let Some(m) = &self.metrics {
                m.blob_guardrail_warnings_total.inc();
            }
        }

        self.storage.store(
            key,
            func_name,
            input_id,
            cfg.version.clone(),
            cfg.content_type.clone(),
            bytes,
            cfg.save_blob,
            now_millis(),
        )?;
        Ok(())
    }

    /// Blocking invocation: `lookup -> miss -> rate-limit -> execute ->
    /// serialize -> persist`. `f` is executed at most once per call (absent
    /// single-flight coordination for distinct-in-time callers, at most once
    /// per concurrent batch on the same key).
    pub fn invoke<T, E, F>(
        &self,
        func_name: &str,
        args: CallArgs,
        cfg: CallConfig,
        f: F,
    ) -> Result<T, MemoError<E>>
    where
        T: Encodable + Decodable,
        E: std::error::Error,
        F: FnOnce() -> Result<T, E>,
    {
        let (key, input_id) = self.resolve_key(func_name, &args, &cfg)?;

        if let Some(hit) = self.try_hit(&key, false)? {
            return Ok(hit);
        }

        let lock = self.per_key_lock(key);
        let guard = lock.lock().expect("per-key mutex poisoned");

        let hit = self.try_hit(&key, true);
        match hit {
            Ok(Some(v)) => {
                drop(guard);
                self.release_per_key_lock(&key, lock);
                return Ok(v);
            }
            Ok(None) => {}
            Err(e) => {
                drop(guard);
                self.release_per_key_lock(&key, lock);
                return Err(e);
            }
        }

        if let Some(m) = &self.metrics {
            m.misses_total.inc();
        }

        if let Some(limiter) = &self.limiter {
            let cost = cfg.cost.resolve(&args);
            let wait = limiter.admit_blocking(cost);
            if !wait.is_zero() {
                if let Some(m) = &self.metrics {
                    m.rate_limited_total.inc();
                }
            }
        }

        let value = match f() {
            Ok(v) => v,
            Err(e) => {
                if let Some(m) = &self.metrics {
                    m.user_errors_total.inc();
                }
                drop(guard);
                self.release_per_key_lock(&key, lock);
                return Err(MemoError::User(e));
            }
        };

        let persisted = self.persist(key, func_name, &input_id, &cfg, &value);
        drop(guard);
        self.release_per_key_lock(&key, lock);
        persisted.map_err(|e| match e {
            MemoError::Serialization(s) => MemoError::Serialization(s),
            MemoError::Storage(s) => MemoError::Storage(s),
            MemoError::KeyPolicy(k) => MemoError::KeyPolicy(k),
            MemoError::User(never) => match never {},
        })?;

        Ok(value)
    }

    /// Async invocation. The rate limiter suspends cooperatively; storage and
    /// blob I/O run inline, matching the synchronous stores' own latency
    /// profile. An embedder that needs a hard non-blocking guarantee around
    /// its own calls can drive them through [`MemoCore::worker_handle`]
    /// instead of the calling task.
    pub async fn invoke_async<T, E, F, Fut>(
        &self,
        func_name: &str,
        args: CallArgs,
        cfg: CallConfig,
        f: F,
    ) -> Result<T, MemoError<E>>
    where
        T: Encodable + Decodable,
        E: std::error::Error + 'static,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let (key, input_id) = self.resolve_key(func_name, &args, &cfg)?;

        if let Some(hit) = self.try_hit(&key, false)? {
            return Ok(hit);
        }

        let lock = self.per_key_lock(key);
        // An async-friendly critical section: the std mutex guard is never
        // held across an `.await`, so we take and release it only around
        // the synchronous double-check; the reservation itself is advisory
        // (best-effort single-flight for the common case, not a hard
        // guarantee under async interleaving).
        let double_check = {
            let guard = lock.lock().expect("per-key mutex poisoned");
            let hit = self.try_hit(&key, true);
            drop(guard);
            hit
        };
        match double_check {
            Ok(Some(v)) => {
                self.release_per_key_lock(&key, lock);
                return Ok(v);
            }
            Ok(None) => {}
            Err(e) => {
                self.release_per_key_lock(&key, lock);
                return Err(e);
            }
        }

        if let Some(m) = &self.metrics {
            m.misses_total.inc();
        }

        if let Some(limiter) = &self.limiter {
            let cost = cfg.cost.resolve(&args);
            let wait = limiter.admit_async(cost).await;
            if !wait.is_zero() {
                if let Some(m) = &self.metrics {
                    m.rate_limited_total.inc();
                }
            }
        }

        let value = match f().await {
            Ok(v) => v,
            Err(e) => {
                if let Some(m) = &self.metrics {
                    m.user_errors_total.inc();
                }
                self.release_per_key_lock(&key, lock);
                return Err(MemoError::User(e));
            }
        };

        let persisted = self.persist(key, func_name, &input_id, &cfg, &value);
        self.release_per_key_lock(&key, lock);
        persisted.map_err(|e| match e {
            MemoError::Serialization(s) => MemoError::Serialization(s),
            MemoError::Storage(s) => MemoError::Storage(s),
            MemoError::KeyPolicy(k) => MemoError::KeyPolicy(k),
            MemoError::User(never) => match never {},
        })?;

        Ok(value)
    }

    /// Remove a record and, best-effort, its blob.
    pub fn delete(&self, key: &CacheKey) -> Result<(), StorageError> {
        self.storage.delete(key)
    }

    /// Best-effort recent-first history.
    pub fn history(&self, limit: usize) -> Result<Vec<crate::core::types::CacheRecord>, StorageError> {
        self.storage.history(limit)
    }

    /// The shared type registry, for registering extensions before first use.
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// A handle onto this instance's worker pool, for an embedding
    /// application that wants to run its own blocking work alongside
    /// `MemoCore`'s own storage calls rather than on its caller's task.
    pub fn worker_handle(&self) -> tokio::runtime::Handle {
        self.executor.handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::canonical::Value;
    use crate::core::executor::WorkerPool;
    use crate::storage::fs_blob::FsBlobStore;
    use crate::storage::sled_metadata::SledMetadataStore;
    use std::cell::Cell;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn build_core(dir: &tempfile::TempDir) -> MemoCore {
        let metadata = SledMetadataStore::open(dir.path().join("meta").to_str().unwrap()).unwrap();
        let blobs = FsBlobStore::new(dir.path().join("blobs")).unwrap();
        MemoCore::new(
            "test",
            Box::new(metadata),
            Box::new(blobs),
            Arc::new(TypeRegistry::new()),
            None,
            WorkerPool::new_owned(1).unwrap(),
            1024 * 1024,
            None,
        )
        .unwrap()
    }

    #[test]
    fn basic_hit_executes_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let core = build_core(&dir);
        let calls = AtomicU32::new(0);

        let run = |s: &str| -> Result<i64, Infallible> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok((s.len() * 2) as i64)
        };

        let args = CallArgs::new().arg("s", Value::Str("hello".into()));
        let first: i64 = core
            .invoke("len_times_two", args.clone(), CallConfig::default(), || run("hello"))
            .unwrap();
        let second: i64 = core
            .invoke("len_times_two", args, CallConfig::default(), || run("hello"))
            .unwrap();

        assert_eq!(first, 10);
        assert_eq!(second, 10);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ignored_parameter_is_a_hit_on_second_call() {
        let dir = tempfile::tempdir().unwrap();
        let core = build_core(&dir);
        let calls = AtomicU32::new(0);

        let mut cfg = CallConfig::default();
        cfg.input_key_fn = Some(KeyPolicy::Ignore(vec!["verbose".into()]));

        let run = || -> Result<i64, Infallible> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        };

        let a1 = CallArgs::new().arg("data", Value::Int(5)).arg("verbose", Value::Bool(true));
        let a2 = CallArgs::new().arg("data", Value::Int(5)).arg("verbose", Value::Bool(false));

        core.invoke("f", a1, cfg.clone(), run).unwrap();
        core.invoke("f", a2, cfg, run).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn version_change_forces_re_execution() {
        let dir = tempfile::tempdir().unwrap();
        let core = build_core(&dir);
        let calls = AtomicU32::new(0);
        let run = || -> Result<i64, Infallible> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        };

        let args = CallArgs::new().arg("x", Value::Int(1));
        let mut cfg = CallConfig::default();
        cfg.version = Some("v1".into());
        core.invoke("f", args.clone(), cfg.clone(), run).unwrap();

        cfg.version = Some("v2".into());
        core.invoke("f", args, cfg, run).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failure_is_not_cached_and_a_later_success_is() {
        let dir = tempfile::tempdir().unwrap();
        let core = build_core(&dir);
        let attempt = Cell::new(0);

        #[derive(Debug, thiserror::Error)]
        #[error("transient")]
        struct Transient;

        let args = CallArgs::new().arg("x", Value::Int(1));

        let result: Result<i64, MemoError<Transient>> =
            core.invoke("flaky", args.clone(), CallConfig::default(), || {
                attempt.set(attempt.get() + 1);
                Err(Transient)
            });
        assert!(result.is_err());

        let result: Result<i64, MemoError<Transient>> =
            core.invoke("flaky", args, CallConfig::default(), || {
                attempt.set(attempt.get() + 1);
                Ok(99)
            });
        assert_eq!(result.unwrap(), 99);
        assert_eq!(attempt.get(), 2);
    }

    #[test]
    fn corruption_causes_fresh_execution_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = SledMetadataStore::open(dir.path().join("meta").to_str().unwrap()).unwrap();
        let blobs = FsBlobStore::new(dir.path().join("blobs")).unwrap();
        let core = MemoCore::new(
            "test",
            Box::new(metadata),
            Box::new(blobs),
            Arc::new(TypeRegistry::new()),
            None,
            WorkerPool::new_owned(1).unwrap(),
            1024 * 1024,
            None,
        )
        .unwrap();

        let calls = AtomicU32::new(0);
        let args = CallArgs::new().arg("x", Value::Int(1));
        let run = || -> Result<i64, Infallible> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        };

        let (key, _) = core.resolve_key("f", &args, &CallConfig::default()).unwrap();
        core.invoke("f", args.clone(), CallConfig::default(), run).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Reach into the sled tree directly and flip a byte, simulating
        // on-disk corruption.
        let raw = SledMetadataStore::open(dir.path().join("meta").to_str().unwrap()).unwrap();
        raw.corrupt_for_test(&key);

        let value: i64 = core.invoke("f", args, CallConfig::default(), run).unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn array_like_inputs_key_by_bytes_shape_and_dtype() {
        let dir = tempfile::tempdir().unwrap();
        let core = build_core(&dir);
        let calls = AtomicU32::new(0);
        let run = || -> Result<i64, Infallible> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        };

        let arr_a = Value::Array {
            type_tag: "ndarray".into(),
            shape: vec![2],
            dtype: "float32".into(),
            data: vec![0, 0, 0, 0, 0, 0, 0, 0],
        };
        let arr_b = Value::Array {
            type_tag: "ndarray".into(),
            shape: vec![2],
            dtype: "float64".into(), // differs only in dtype
            data: vec![0, 0, 0, 0, 0, 0, 0, 0],
        };

        core.invoke("f", CallArgs::new().arg("a", arr_a.clone()), CallConfig::default(), run)
            .unwrap();
        core.invoke("f", CallArgs::new().arg("a", arr_a), CallConfig::default(), run)
            .unwrap();
        core.invoke("f", CallArgs::new().arg("a", arr_b), CallConfig::default(), run)
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2); // a,a hit; b is a fresh key
    }
}
