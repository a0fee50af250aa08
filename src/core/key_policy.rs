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

//! Per-parameter hashing strategies applied before canonicalization.
//!
//! Rust has no runtime signature introspection, so callers bind parameter
//! values to names explicitly through [`CallArgs`] instead of relying on
//! reflection over positional/keyword arguments. [`KeyPolicy::Map`] then
//! resolves by name against that explicit binding, which is equivalent in
//! effect to the source's signature-introspecting resolution.

use crate::core::canonical::{CanonicalError, Value};
use std::collections::BTreeMap;
use std::fs;
use std::time::UNIX_EPOCH;
use thiserror::Error;

/// A named argument value entering the key-policy pipeline.
#[derive(Clone, Debug)]
pub struct CallArgs {
    entries: Vec<(String, Value)>,
}

impl CallArgs {
    /// An empty argument list.
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Bind a named argument.
    pub fn arg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.entries.push((name.into(), value));
        self
    }

    /// Iterate the bound `(name, value)` pairs in binding order.
    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.entries.iter()
    }

    fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

impl Default for CallArgs {
    fn default() -> Self {
        Self::new()
    }
}

/// Key-policy failure.
#[derive(Debug, Error)]
pub enum KeyPolicyError {
    /// Canonicalization of the projected arguments failed.
    #[error("canonicalization failed: {0}")]
    Canonical(#[from] CanonicalError),
    /// `PATH_STAT`/`FILE_CONTENT` expects a string path value.
    #[error("parameter {0:?} is not a path string")]
    NotAPath(String),
    /// Filesystem stat or read failed while applying the policy.
    #[error("filesystem access failed for {0:?}: {1}")]
    Io(String, std::io::Error),
}

/// A per-parameter hashing strategy.
#[derive(Clone, Debug)]
pub enum KeyPolicy {
    /// Canonicalize all bound arguments as-is.
    Default,
    /// Drop the named parameters before canonicalization.
    Ignore(Vec<String>),
    /// Substitute a path-valued parameter with `(path, size, mtime_ns)`.
    PathStat,
    /// Substitute a path-valued parameter with the SHA-256 of its contents.
    FileContent,
    /// Apply a distinct strategy per named parameter; unlisted parameters
    /// fall back to `Default`.
    Map(BTreeMap<String, KeyPolicy>),
}

impl KeyPolicy {
    /// Project `args` through this policy into the canonical seed value fed
    /// to the canonicalizer.
    pub fn apply(&self, args: &CallArgs) -> Result<Value, KeyPolicyError> {
        match self {
            KeyPolicy::Default => project_all(args, &[]),
            KeyPolicy::Ignore(names) => project_all(args, names),
            KeyPolicy::PathStat => project_each(args, |name, v| path_stat(name, v)),
            KeyPolicy::FileContent => project_each(args, |name, v| file_content(name, v)),
            KeyPolicy::Map(per_param) => {
                let mut pairs = Vec::with_capacity(args.entries.len());
                for (name, value) in args.iter() {
                    let projected = match per_param.get(name) {
                        Some(KeyPolicy::Ignore(_)) => continue,
                        Some(KeyPolicy::PathStat) => path_stat(name, value)?,
                        Some(KeyPolicy::FileContent) => file_content(name, value)?,
                        Some(KeyPolicy::Map(_)) | None | Some(KeyPolicy::Default) => value.clone(),
                    };
                    pairs.push((Value::Str(name.clone()), projected));
                }
                Ok(Value::map(pairs)?)
            }
        }
    }
}

fn project_all(args: &CallArgs, drop: &[String]) -> Result<Value, KeyPolicyError> {
    let mut pairs = Vec::with_capacity(args.entries.len());
    for (name, value) in args.iter() {
        if drop.iter().any(|d| d == name) {
            continue;
        }
        pairs.push((Value::Str(name.clone()), value.clone()));
    }
    Ok(Value::map(pairs)?)
}

fn project_each(
    args: &CallArgs,
    f: impl Fn(&str, &Value) -> Result<Value, KeyPolicyError>,
) -> Result<Value, KeyPolicyError> {
    let mut pairs = Vec::with_capacity(args.entries.len());
    for (name, value) in args.iter() {
        pairs.push((Value::Str(name.clone()), f(name, value)?));
    }
    Ok(Value::map(pairs)?)
}

fn as_path<'a>(name: &str, v: &'a Value) -> Result<&'a str, KeyPolicyError> {
    match v {
        Value::Str(s) => Ok(s.as_str()),
        _ => Err(KeyPolicyError::NotAPath(name.to_string())),
    }
}

fn path_stat(name: &str, v: &Value) -> Result<Value, KeyPolicyError> {
    let path = as_path(name, v)?;
    let meta = fs::metadata(path).map_err(|e| KeyPolicyError::Io(path.to_string(), e))?;
    let mtime_ns = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    Ok(Value::Seq(vec![
        Value::Str(path.to_string()),
        Value::Int(meta.len() as i64),
        Value::Int(mtime_ns as i64),
    ]))
}

fn file_content(name: &str, v: &Value) -> Result<Value, KeyPolicyError> {
    let path = as_path(name, v)?;
    let bytes = fs::read(path).map_err(|e| KeyPolicyError::Io(path.to_string(), e))?;
    let digest = ring::digest::digest(&ring::digest::SHA256, &bytes);
    Ok(Value::Bytes(digest.as_ref().to_vec()))
}
