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

//! The memoization engine's own primitives: canonicalization, keying,
//! serialization, rate limiting, storage contracts, the pipeline itself, and
//! scope-bound call wrappers.

/// Deterministic normalization of argument graphs into stable bytes.
pub mod canonical;
/// Shared bincode framing for the canonicalizer and the serializer.
pub mod codec;
/// `MemoCore` construction configuration.
pub mod config;
/// Worker-pool ownership for offloading blocking work.
pub mod executor;
/// Per-parameter hashing strategies applied before canonicalization.
pub mod key_policy;
/// The memoization pipeline.
pub mod memo;
/// GCRA admission control.
pub mod rate_limiter;
/// Scope-bound call wrappers.
pub mod scoped;
/// Length-prefixed binary envelope codec with a user-extensible type registry.
pub mod serializer;
/// Storage contracts and the claim-check facade over them.
pub mod storage;
/// Shared data model: cache keys and the persisted record shape.
pub mod types;
