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

//! GCRA (Generic Cell Rate Algorithm) admission control, shared by blocking
//! and cooperative-async call sites.
//!
//! A single scalar, the theoretical arrival time (TAT), tracks reserved
//! capacity. `tat` mutation is serialized by a `Mutex`; the wait itself is
//! always performed *outside* the lock so one caller's sleep never blocks
//! another's admission decision. A caller that abandons after reserving does
//! not rewind `tat` — the reservation is consumed, an acceptable
//! simplification since the limiter bounds throughput rather than
//! maximizing utilization.

use std::sync::Mutex;
use std::time::{Duration, Instant};

struct GcraState {
    tat: Option<Instant>,
}

/// Admission gate for a declared rate budget.
pub struct RateLimiter {
    rate_per_sec: f64,
    burst: f64,
    state: Mutex<GcraState>,
}

impl RateLimiter {
    /// Construct a limiter from tokens-per-minute and a burst reservoir
    /// (defaults to `tpm` when `burst` is `None`, matching the source).
    pub fn from_tpm(tpm: f64, burst: Option<f64>) -> Self {
        Self {
            rate_per_sec: tpm / 60.0,
            burst: burst.unwrap_or(tpm),
            state: Mutex::new(GcraState { tat: None }),
        }
    }

    /// Reserve `cost` units of capacity at `now`, returning the wait duration
    /// before the reservation is honored (zero if admitted immediately).
    fn reserve(&self, cost: f64, now: Instant) -> Duration {
        let increment = Duration::from_secs_f64(cost / self.rate_per_sec);
        let burst_span = Duration::from_secs_f64(self.burst / self.rate_per_sec);

        let mut guard = self.state.lock().expect("rate limiter mutex poisoned");
        let base = guard.tat.map(|t| t.max(now)).unwrap_or(now);
        let new_tat = base + increment;
        let allow_at = new_tat.checked_sub(burst_span).unwrap_or(now);

        guard.tat = Some(new_tat);
        drop(guard);

        allow_at.saturating_duration_since(now)
    }

    /// Blocking admission: sleeps the caller's thread for the reserved wait
    /// and returns it, so the caller can tell an immediate admission from a
    /// throttled one.
    pub fn admit_blocking(&self, cost: f64) -> Duration {
        let wait = self.reserve(cost, Instant::now());
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
        wait
    }

    /// Cooperative-async admission: suspends the calling task for the
    /// reserved wait and returns it. Cancellation mid-wait is honored by the
    /// caller's executor; the reservation is not refunded.
    pub async fn admit_async(&self, cost: f64) -> Duration {
        let wait = self.reserve(cost, Instant::now());
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        wait
    }
}
