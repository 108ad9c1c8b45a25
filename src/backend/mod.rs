//! Transform backends: the opaque `bytes + options -> bytes` functions that
//! do the actual compression, and their resolution from configuration.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::error::Diagnostic;

mod normalize;
mod registry;

pub use normalize::{NormalizeMode, Normalized, normalize};
pub use registry::{DEFAULT_PREFIX, Registry};

type BackendFn = dyn Fn(&[u8], &Value) -> anyhow::Result<Vec<u8>> + Send + Sync;

/// A callable transform backend.
///
/// Cheap to clone, two handles are equal when they point at the same function.
#[derive(Clone)]
pub struct Backend(Arc<BackendFn>);

impl Backend {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&[u8], &Value) -> anyhow::Result<Vec<u8>> + Send + Sync + 'static,
    {
        Self(Arc::new(func))
    }

    pub fn call(&self, input: &[u8], options: &Value) -> anyhow::Result<Vec<u8>> {
        (self.0)(input, options)
    }
}

impl PartialEq for Backend {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fn(*)")
    }
}

/// Name, options and version of a resolved backend.
///
/// This is the part of a backend that takes part in the cache fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendMeta {
    pub name: String,
    pub options: Value,
    pub version: String,
}

/// A backend ready to be invoked, along with the options it was declared with.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedBackend {
    pub callable: Backend,
    pub name: String,
    pub options: Value,
    pub version: String,
}

impl ResolvedBackend {
    pub fn meta(&self) -> BackendMeta {
        BackendMeta {
            name: self.name.clone(),
            options: self.options.clone(),
            version: self.version.clone(),
        }
    }

    /// Invokes the backend, turning both errors and panics into a diagnostic.
    pub fn call(&self, input: &[u8]) -> Result<Vec<u8>, Diagnostic> {
        match catch_unwind(AssertUnwindSafe(|| self.callable.call(input, &self.options))) {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(Diagnostic::backend(&self.name, err)),
            Err(payload) => Err(Diagnostic::panicked(&self.name, payload)),
        }
    }
}

/// Runs every backend in order, each one consuming the output of the
/// previous one. The first failure aborts the whole chain.
pub fn run_backends(input: &[u8], backends: &[ResolvedBackend]) -> Result<Vec<u8>, Diagnostic> {
    let mut data = input.to_vec();

    for backend in backends {
        tracing::trace!(backend = %backend.name, len = data.len(), "running backend");
        data = backend.call(&data)?;
    }

    Ok(data)
}
