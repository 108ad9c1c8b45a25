use std::collections::HashMap;

use serde_json::Value;

use super::Backend;

/// Prefix used for conventionally named backends, `shukusho-<name>`.
pub const DEFAULT_PREFIX: &str = "shukusho";

#[derive(Debug, Clone)]
struct Registration {
    backend: Backend,
    version: Option<String>,
}

/// A table of backends available to the pipeline, keyed by their full name.
///
/// Backends are registered explicitly at startup. Declarations in the
/// configuration refer to them either by their short name (`"webp"`), which
/// is looked up as `"<prefix>-webp"` first, or by their full name.
///
/// # Example
///
/// ```rust
/// use shukusho::backend::Registry;
///
/// let mut registry = Registry::new();
/// registry.register("shukusho-identity", |data, _| Ok(data.to_vec()));
///
/// assert!(registry.get("shukusho-identity").is_some());
/// ```
#[derive(Debug, Clone)]
pub struct Registry {
    prefix: String,
    entries: HashMap<String, Registration>,
}

impl Registry {
    pub fn new() -> Self {
        Self::with_prefix(DEFAULT_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            entries: HashMap::new(),
        }
    }

    /// Registers a backend without version metadata.
    pub fn register<F>(&mut self, name: impl Into<String>, func: F) -> &mut Self
    where
        F: Fn(&[u8], &Value) -> anyhow::Result<Vec<u8>> + Send + Sync + 'static,
    {
        self.insert(name.into(), Backend::new(func), None)
    }

    /// Registers a backend along with its version identifier.
    pub fn register_versioned<F>(
        &mut self,
        name: impl Into<String>,
        version: impl Into<String>,
        func: F,
    ) -> &mut Self
    where
        F: Fn(&[u8], &Value) -> anyhow::Result<Vec<u8>> + Send + Sync + 'static,
    {
        self.insert(name.into(), Backend::new(func), Some(version.into()))
    }

    fn insert(&mut self, name: String, backend: Backend, version: Option<String>) -> &mut Self {
        tracing::debug!(%name, "registering backend");
        self.entries.insert(name, Registration { backend, version });
        self
    }

    pub fn get(&self, name: &str) -> Option<&Backend> {
        self.entries.get(name).map(|entry| &entry.backend)
    }

    pub fn version(&self, name: &str) -> Option<&str> {
        self.entries.get(name).and_then(|entry| entry.version.as_deref())
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The conventional full name for a short backend name.
    pub fn prefixed(&self, name: &str) -> String {
        format!("{}-{}", self.prefix, name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
