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

//! End-to-end scenarios against a real `sled`/filesystem-backed `MemoCore`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use memoria::core::canonical::Value;
use memoria::core::key_policy::{CallArgs, KeyPolicy};
use memoria::core::memo::{CallConfig, MemoCore};
use memoria::core::serializer::{Decodable, Encodable, Envelope, SerializationError, TypeRegistry};
use memoria::core::executor::WorkerPool;
use memoria::storage::fs_blob::FsBlobStore;
use memoria::storage::sled_metadata::SledMetadataStore;

fn new_core(dir: &std::path::Path) -> MemoCore {
    let metadata = SledMetadataStore::open(dir.join("meta").to_str().unwrap()).unwrap();
    let blobs = FsBlobStore::new(dir.join("blobs")).unwrap();
    MemoCore::new(
        "scenario",
        Box::new(metadata),
        Box::new(blobs),
        Arc::new(TypeRegistry::new()),
        None,
        WorkerPool::new_owned(2).unwrap(),
        1024,
        None,
    )
    .unwrap()
}

#[test]
fn basic_hit_skips_re_execution() {
    let dir = tempfile::tempdir().unwrap();
    let core = new_core(dir.path());
    let calls = AtomicU32::new(0);

    let run = || -> Result<String, std::convert::Infallible> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok("expensive result".to_string())
    };

    let args = CallArgs::new().arg("query", Value::Str("top sellers".into()));
    let a = core.invoke("report", args.clone(), CallConfig::default(), run).unwrap();
    let b = core.invoke("report", args, CallConfig::default(), run).unwrap();

    assert_eq!(a, "expensive result");
    assert_eq!(b, "expensive result");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn path_stat_keying_reuses_the_cache_across_equivalent_paths() {
    let dir = tempfile::tempdir().unwrap();
    let core = new_core(dir.path());
    let calls = AtomicU32::new(0);

    let input = dir.path().join("input.csv");
    std::fs::write(&input, b"a,b,c\n1,2,3\n").unwrap();

    let mut cfg = CallConfig::default();
    cfg.input_key_fn = Some(KeyPolicy::PathStat);

    let run = || -> Result<i64, std::convert::Infallible> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(3)
    };

    let args = CallArgs::new().arg("path", Value::Str(input.to_string_lossy().to_string()));
    core.invoke("row_count", args.clone(), cfg.clone(), run).unwrap();
    core.invoke("row_count", args, cfg, run).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[derive(Clone, Debug, PartialEq)]
struct Point {
    x: i64,
    y: i64,
}

impl Encodable for Point {
    fn encode(&self, registry: &TypeRegistry) -> Result<Envelope, SerializationError> {
        registry.encode_extension::<Point, _>(
            20,
            &Envelope::Map(vec![("x".into(), Envelope::Int(self.x)), ("y".into(), Envelope::Int(self.y))]),
        )
    }
}

impl Decodable for Point {
    fn decode(env: Envelope, registry: &TypeRegistry) -> Result<Self, SerializationError> {
        let intermediate: Envelope = registry.decode_extension(20, env)?;
        match intermediate {
            Envelope::Map(fields) => {
                let get = |name: &str| {
                    fields.iter().find(|(k, _)| k == name).and_then(|(_, e)| match e {
                        Envelope::Int(i) => Some(*i),
                        _ => None,
                    })
                };
                Ok(Point {
                    x: get("x").ok_or(SerializationError::UnexpectedShape)?,
                    y: get("y").ok_or(SerializationError::UnexpectedShape)?,
                })
            }
            _ => Err(SerializationError::UnexpectedShape),
        }
    }
}

#[test]
fn custom_registered_type_round_trips_through_a_real_store() {
    let dir = tempfile::tempdir().unwrap();
    let metadata = SledMetadataStore::open(dir.path().join("meta").to_str().unwrap()).unwrap();
    let blobs = FsBlobStore::new(dir.path().join("blobs")).unwrap();
    let registry = Arc::new(TypeRegistry::new());
    registry.register::<Point>(20).unwrap();

    let core = MemoCore::new(
        "scenario",
        Box::new(metadata),
        Box::new(blobs),
        registry,
        None,
        WorkerPool::new_owned(1).unwrap(),
        1024,
        None,
    )
    .unwrap();

    let args = CallArgs::new().arg("seed", Value::Int(1));
    let a: Point = core
        .invoke("centroid", args.clone(), CallConfig::default(), || {
            Ok::<_, std::convert::Infallible>(Point { x: 3, y: 4 })
        })
        .unwrap();
    let b: Point = core
        .invoke("centroid", args, CallConfig::default(), || {
            Ok::<_, std::convert::Infallible>(Point { x: 99, y: 99 })
        })
        .unwrap();

    assert_eq!(a, Point { x: 3, y: 4 });
    assert_eq!(b, a); // second call hit the cache, not the fresh value
}

#[test]
fn a_raised_error_is_never_cached() {
    let dir = tempfile::tempdir().unwrap();
    let core = new_core(dir.path());

    #[derive(Debug, thiserror::Error)]
    #[error("quota exceeded")]
    struct QuotaError;

    let args = CallArgs::new().arg("user", Value::Str("alice".into()));
    let first: Result<i64, _> = core.invoke("balance", args.clone(), CallConfig::default(), || Err(QuotaError));
    assert!(first.is_err());

    let second: i64 = core
        .invoke("balance", args, CallConfig::default(), || Ok::<_, QuotaError>(500))
        .unwrap();
    assert_eq!(second, 500);
}

#[test]
fn deleting_a_record_forces_re_execution() {
    let dir = tempfile::tempdir().unwrap();
    let core = new_core(dir.path());
    let calls = AtomicU32::new(0);
    let args = CallArgs::new().arg("x", Value::Int(1));
    let run = || -> Result<i64, std::convert::Infallible> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(10)
    };

    core.invoke("f", args.clone(), CallConfig::default(), run).unwrap();

    let (key, _) = {
        let policy = KeyPolicy::Default;
        let seed = policy.apply(&args).unwrap();
        let bytes = memoria::core::canonical::canonicalize(&seed).unwrap();
        (memoria::core::types::CacheKey::derive("f", &bytes, None), ())
    };
    core.delete(&key).unwrap();

    core.invoke("f", args, CallConfig::default(), run).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn large_result_is_routed_to_the_blob_store_when_save_blob_is_set() {
    let dir = tempfile::tempdir().unwrap();
    let core = new_core(dir.path());

    let big = vec![7u8; 4096];
    let mut cfg = CallConfig::default();
    cfg.save_blob = true;

    let args = CallArgs::new().arg("size", Value::Int(4096));
    let result: Vec<u8> = core
        .invoke("render", args, cfg, || Ok::<_, std::convert::Infallible>(big.clone()))
        .unwrap();

    assert_eq!(result, big);
    assert_eq!(core.history(10).unwrap().len(), 1);
}

#[tokio::test]
async fn async_invocation_hits_on_the_second_call() {
    let dir = tempfile::tempdir().unwrap();
    let core = new_core(dir.path());
    let calls = AtomicU32::new(0);

    let args = CallArgs::new().arg("x", Value::Int(9));
    let run = || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok::<_, std::convert::Infallible>(81i64)
    };

    let a = core.invoke_async("square", args.clone(), CallConfig::default(), run).await.unwrap();
    let b = core.invoke_async("square", args, CallConfig::default(), run).await.unwrap();

    assert_eq!(a, 81);
    assert_eq!(b, 81);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
