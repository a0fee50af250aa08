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

//! Scope-bound wrappers that fail fast once their scope has exited, instead
//! of silently memoizing calls an embedder no longer expects to be live.
//!
//! [`Scope`] is a handle whose `Drop` flips a shared flag; [`bind`] wraps a
//! closure so that every invocation checks the flag first and returns
//! [`ScopeExpiredError`] once the scope is gone. `cached_run!` builds a tuple
//! of such wrappers and the [`Scope`] guarding them in one call, mirroring the
//! `(fn1, fn2, ..., scope)` ergonomics of the source's scoped binder.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// A scope handle. While at least one clone is alive, `is_expired()` is
/// `false` on all of them; once the last clone drops, every `ScopedFn` bound
/// to it starts rejecting calls.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    expired: AtomicBool,
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        self.expired.store(true, Ordering::SeqCst);
    }
}

impl Scope {
    /// Open a new, live scope.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ScopeInner { expired: AtomicBool::new(false) }),
        }
    }

    /// Whether this scope (or any of its clones) has been dropped.
    pub fn is_expired(&self) -> bool {
        self.inner.expired.load(Ordering::SeqCst)
    }

    /// Wrap `f` so it returns [`ScopeExpiredError`] once this scope expires.
    ///
    /// The wrapper only holds a [`Weak`] reference, so binding calls never
    /// keeps the scope itself alive — dropping every [`Scope`] handle is what
    /// expires it, not dropping every `ScopedFn`.
    pub fn bind<F, T, E>(&self, f: F) -> ScopedFn<F>
    where
        F: Fn() -> Result<T, E>,
    {
        ScopedFn { scope: Arc::downgrade(&self.inner), f }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

/// Raised by a [`ScopedFn`] once its guarding [`Scope`] has expired.
#[derive(Debug)]
pub struct ScopeExpiredError;

impl fmt::Display for ScopeExpiredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope has expired; this cached call is no longer valid")
    }
}

impl std::error::Error for ScopeExpiredError {}

/// A scope-checked wrapper around a memoized call.
pub struct ScopedFn<F> {
    scope: Weak<ScopeInner>,
    f: F,
}

impl<F, T, E> ScopedFn<F>
where
    F: Fn() -> Result<T, E>,
    E: std::error::Error + 'static,
{
    /// Invoke the wrapped call, failing fast if the scope has expired
    /// instead of running (and potentially memoizing) a call nobody holds
    /// a live reference to anymore. A scope with no surviving `Scope` handle
    /// is expired regardless of the flag, since nothing could flip it.
    pub fn call(&self) -> Result<T, ScopedCallError<E>> {
        let expired = match self.scope.upgrade() {
            Some(inner) => inner.expired.load(Ordering::SeqCst),
            None => true,
        };
        if expired {
            return Err(ScopedCallError::Expired(ScopeExpiredError));
        }
        (self.f)().map_err(ScopedCallError::Inner)
    }
}

/// Either the wrapped call's own error, or the scope having expired first.
#[derive(Debug, thiserror::Error)]
pub enum ScopedCallError<E: std::error::Error + 'static> {
    /// The guarding scope expired before this call ran.
    #[error(transparent)]
    Expired(#[from] ScopeExpiredError),
    /// The wrapped call itself failed.
    #[error(transparent)]
    Inner(E),
}

/// Build scope-checked wrappers around one or more calls, plus the [`Scope`]
/// that guards all of them, as a tuple `(wrapped..., scope)`.
///
/// ```ignore
/// let (get_user, get_org, scope) = cached_run!(
///     || core.invoke("get_user", args_a.clone(), cfg_a.clone(), fetch_user),
///     || core.invoke("get_org", args_b.clone(), cfg_b.clone(), fetch_org),
/// );
/// ```
#[macro_export]
macro_rules! cached_run {
    ($($f:expr),+ $(,)?) => {{
        let scope = $crate::core::scoped::Scope::new();
        (
            $(scope.bind($f),)+
            scope,
        )
    }};
}
