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

//! Memoria - a persistent, content-addressed memoization engine.
//!
//! A call's arguments are normalized into a deterministic byte sequence
//! (`core::canonical`), hashed into a cache key alongside the function name
//! and an optional version tag (`core::types::CacheKey::derive`), and used to
//! look up a previously stored result before falling back to actually running
//! the call. Results and large payloads are split across a small metadata
//! store and an optional blob store behind a claim-check (`core::storage`),
//! admission is rate-limited with GCRA (`core::rate_limiter`), and a
//! user-extensible binary envelope (`core::serializer`) carries arbitrary
//! result types across the wire.
//!
//! [`core::memo::MemoCore`] is the pipeline tying these together; most
//! embedders only need that module and [`core::config`] for construction.

/// The memoization engine's own primitives.
pub mod core;
/// Observability (Prometheus metrics).
pub mod monitoring;
/// Default storage backends (`sled` metadata, filesystem blobs).
pub mod storage;
