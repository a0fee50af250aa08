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

//! Worker pool for offloading blocking metadata/blob I/O from async callers.
//!
//! An injected executor is used but never shut down by [`MemoCore`]
//! (crate::core::memo::MemoCore); an internally created one is owned by
//! [`OwnedExecutor`], whose `Drop` impl is the direct Rust analog of the
//! "weak-reference-style finalizer" called for in the design notes: `Drop`
//! closes over the owned `tokio::runtime::Runtime` alone, never over
//! `MemoCore` itself, so reclaiming the pool can never keep the core alive.

use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::debug;

/// A runtime handle, either borrowed or owned.
pub enum WorkerPool {
    /// Borrowed from the embedding application; never shut down here.
    Injected(Handle),
    /// Created and owned internally; shut down on drop.
    Owned(OwnedExecutor),
}

impl WorkerPool {
    /// Create an internally-owned multi-threaded pool with `worker_threads`
    /// workers.
    pub fn new_owned(worker_threads: usize) -> std::io::Result<Self> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .enable_time()
            .build()?;
        Ok(WorkerPool::Owned(OwnedExecutor { runtime: Some(rt) }))
    }

    /// Wrap a borrowed handle; `MemoCore` will never shut this down.
    pub fn injected(handle: Handle) -> Self {
        WorkerPool::Injected(handle)
    }

    /// A handle usable to spawn blocking work on this pool.
    pub fn handle(&self) -> Handle {
        match self {
            WorkerPool::Injected(h) => h.clone(),
            WorkerPool::Owned(o) => o.runtime.as_ref().expect("runtime present").handle().clone(),
        }
    }

    /// Offload a blocking closure onto this pool.
    pub fn spawn_blocking<F, T>(&self, f: F) -> JoinHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.handle().spawn_blocking(f)
    }
}

/// An internally created runtime, shut down when dropped.
///
/// The finalizer (`Drop::drop`) closes only over `self.runtime` — a plain
/// `Option<Runtime>` field — never over a `MemoCore` reference, satisfying
/// the ownership rule: reclaiming the pool must never keep the owning
/// `MemoCore` alive.
pub struct OwnedExecutor {
    runtime: Option<Runtime>,
}

impl Drop for OwnedExecutor {
    fn drop(&mut self) {
        if let Some(rt) = self.runtime.take() {
            debug!("shutting down internally owned worker pool");
            rt.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_pool_can_run_blocking_work() {
        let pool = WorkerPool::new_owned(2).unwrap();
        let handle = pool.handle();
        let result = handle.block_on(async { pool.spawn_blocking(|| 2 + 2).await.unwrap() });
        assert_eq!(result, 4);
    }

    #[test]
    fn injected_pool_shares_the_caller_handle() {
        let rt = Runtime::new().unwrap();
        let pool = WorkerPool::injected(rt.handle().clone());
        assert!(matches!(pool, WorkerPool::Injected(_)));
    }
}
