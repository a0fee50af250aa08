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

use prometheus::{IntCounter, Registry};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// A prometheus registration call failed.
    #[error("prometheus")]
    Prom,
}

/// Metrics container for a `MemoCore` instance.
#[derive(Clone)]
pub struct Metrics {
    /// Registry, exposed for the embedding application to scrape.
    pub registry: Registry,

    /// Cache hits (resilient deserialization succeeded).
    pub hits_total: IntCounter,
    /// Cache misses, including key absence and corruption recovery.
    pub misses_total: IntCounter,
    /// Stored records that failed to decode and were treated as a miss.
    pub corrupted_total: IntCounter,
    /// User function invocations that raised (never cached).
    pub user_errors_total: IntCounter,
    /// Rate-limiter admissions that required a nonzero wait.
    pub rate_limited_total: IntCounter,
    /// `DIRECT_BLOB` records that exceeded the size guardrail.
    pub blob_guardrail_warnings_total: IntCounter,
}

impl Metrics {
    /// Create and register metrics for a `MemoCore` named `name`.
    pub fn new(name: &str) -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let mk = |metric_name: &str, help: &str| -> Result<IntCounter, MetricsError> {
            let c = IntCounter::new(format!("memoria_{name}_{metric_name}"), help)
                .map_err(|_| MetricsError::Prom)?;
            registry.register(Box::new(c.clone())).map_err(|_| MetricsError::Prom)?;
            Ok(c)
        };

        Ok(Self {
            hits_total: mk("hits_total", "Cache hits")?,
            misses_total: mk("misses_total", "Cache misses")?,
            corrupted_total: mk("corrupted_total", "Stored records that failed to decode")?,
            user_errors_total: mk("user_errors_total", "User function invocations that raised")?,
            rate_limited_total: mk("rate_limited_total", "Admissions that required a wait")?,
            blob_guardrail_warnings_total: mk(
                "blob_guardrail_warnings_total",
                "DIRECT_BLOB records exceeding the size guardrail",
            )?,
            registry,
        })
    }
}
