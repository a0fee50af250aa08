#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Exercises `MemoCore` end to end: load configuration, construct the
//! default `sled`/filesystem-backed store, memoize one call twice, and print
//! whether the second call hit the cache. Not a CLI surface — `memoria` is a
//! library; this binary only demonstrates it.

use std::sync::Arc;

use memoria::core::canonical::Value;
use memoria::core::config::MemoCoreConfig;
use memoria::core::executor::WorkerPool;
use memoria::core::key_policy::CallArgs;
use memoria::core::memo::{CallConfig, MemoCore};
use memoria::core::serializer::TypeRegistry;
use memoria::storage::fs_blob::FsBlobStore;
use memoria::storage::sled_metadata::SledMetadataStore;
use tracing::info;

fn env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .compact()
        .try_init();

    let cfg = MemoCoreConfig::named(env("MEMORIA_NAME", "demo"));

    let metadata = SledMetadataStore::open(&cfg.metadata_dir).expect("open metadata store");
    let blobs = FsBlobStore::new(&cfg.blob_dir).expect("open blob store");
    let limiter = cfg.tpm.map(|tpm| memoria::core::rate_limiter::RateLimiter::from_tpm(tpm, cfg.burst));

    let core = MemoCore::new(
        cfg.name.clone(),
        Box::new(metadata),
        Box::new(blobs),
        Arc::new(TypeRegistry::new()),
        limiter,
        WorkerPool::new_owned(cfg.worker_threads).expect("spawn worker pool"),
        cfg.blob_warning_threshold,
        None,
    )
    .expect("construct MemoCore");

    let args = CallArgs::new().arg("n", Value::Int(41));

    let first: i64 = core
        .invoke("increment", args.clone(), CallConfig::default(), || {
            info!("executing increment(41)");
            Ok::<_, std::convert::Infallible>(42)
        })
        .expect("first call");

    let second: i64 = core
        .invoke("increment", args, CallConfig::default(), || {
            info!("executing increment(41) again; this should not print");
            Ok::<_, std::convert::Infallible>(42)
        })
        .expect("second call");

    info!(name = %core.name(), first, second, "done");
}
