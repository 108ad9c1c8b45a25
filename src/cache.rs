//! Content-addressed caching of transform results.
//!
//! Every task gets a [`CacheKey`] computed from its input bytes, its caller
//! supplied cache keys and the effective configuration of every stage. The
//! key is computed before any backend runs, so a hit skips the transforms
//! entirely.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::Serialize;

use crate::core::{Artifact, Hash32};
use crate::error::Diagnostic;
use crate::task::{Info, Outcome, Task};

/// Fingerprint of a task and the configuration it runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(pub Hash32);

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// Incremental builder of a [`CacheKey`].
///
/// Every field is length prefixed, so adjacent fields can never be confused
/// with one another.
#[derive(Clone)]
pub struct Fingerprint(blake3::Hasher);

impl Fingerprint {
    pub fn new() -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(concat!("shukusho/", env!("CARGO_PKG_VERSION")).as_bytes());
        Self(hasher)
    }

    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.0.update(&(data.len() as u64).to_le_bytes());
        self.0.update(data);
        self
    }

    pub fn str(&mut self, data: &str) -> &mut Self {
        self.bytes(data.as_bytes())
    }

    /// Hashes the CBOR encoding of `value`.
    pub fn value<T: Serialize + ?Sized>(&mut self, value: &T) -> anyhow::Result<&mut Self> {
        let mut buffer = Vec::new();
        ciborium::into_writer(value, &mut buffer)?;
        Ok(self.bytes(&buffer))
    }

    pub fn finish(&self) -> CacheKey {
        CacheKey(self.0.finalize().into())
    }
}

impl Default for Fingerprint {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything needed to rebuild an outcome without running the transforms.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedOutput {
    pub data: Vec<u8>,
    pub derived: Vec<Artifact>,
    /// Replayed on every hit, so a cached artifact keeps reporting them.
    pub warnings: Vec<Diagnostic>,
    pub errors: Vec<Diagnostic>,
    pub info: Info,
}

impl CachedOutput {
    /// Captures the cacheable part of an outcome. Outcomes without data, such
    /// as the one of an empty input, have nothing worth storing.
    pub fn from_outcome(outcome: &Outcome) -> Option<Self> {
        Some(Self {
            data: outcome.data.clone()?,
            derived: outcome.derived.clone(),
            warnings: outcome.warnings.clone(),
            errors: outcome.errors.clone(),
            info: outcome.info.clone(),
        })
    }
}

/// A store for transform results, provided by the host.
///
/// Both operations are called from worker threads. Errors are logged and
/// otherwise ignored: a failing `get` counts as a miss and a failing `store`
/// leaves the outcome untouched. Only outcomes of clean runs, without errors
/// or severity routed failures, are passed to `store`.
pub trait Cache: Send + Sync {
    fn get(&self, key: &CacheKey, task: &Task) -> anyhow::Result<Option<CachedOutput>>;

    fn store(&self, key: &CacheKey, outcome: &Outcome) -> anyhow::Result<()>;
}

pub(crate) fn lookup(cache: &dyn Cache, key: &CacheKey, task: &Task) -> Option<CachedOutput> {
    match cache.get(key, task) {
        Ok(hit) => hit,
        Err(err) => {
            tracing::warn!(%key, filename = %task.filename, "cache lookup failed: {err:#}");
            None
        }
    }
}

pub(crate) fn store(cache: &dyn Cache, key: &CacheKey, outcome: &Outcome) {
    if let Err(err) = cache.store(key, outcome) {
        tracing::warn!(%key, filename = %outcome.filename, "cache store failed: {err:#}");
    }
}

/// An in-process [`Cache`], good for a single build or for tests.
///
/// Concurrent stores under the same key overwrite each other, the last one
/// wins.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<CacheKey, CachedOutput>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|map| map.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut map) = self.entries.write() {
            map.clear();
        }
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &CacheKey, _: &Task) -> anyhow::Result<Option<CachedOutput>> {
        let map = self
            .entries
            .read()
            .map_err(|_| anyhow::anyhow!("cache lock poisoned"))?;

        Ok(map.get(key).cloned())
    }

    fn store(&self, key: &CacheKey, outcome: &Outcome) -> anyhow::Result<()> {
        let Some(entry) = CachedOutput::from_outcome(outcome) else {
            return Ok(());
        };

        self.entries
            .write()
            .map_err(|_| anyhow::anyhow!("cache lock poisoned"))?
            .insert(*key, entry);

        Ok(())
    }
}
