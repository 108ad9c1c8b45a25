use std::sync::Arc;

use thiserror::Error;

/// A failure of the batch entry point itself.
///
/// Everything that goes wrong with an individual artifact is reported as a
/// [`Diagnostic`] on its outcome instead, this type only covers misuse of the
/// pipeline by the caller.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("`maxConcurrency` must be greater than zero")]
    ZeroConcurrency,

    #[error("At least one transform stage is required")]
    NoStages,

    #[error("Failed to build the worker pool.\n{0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Invalid progress bar template.\n{0}")]
    Progress(#[from] indicatif::style::TemplateError),

    #[cfg(feature = "logging")]
    #[error("Failed to install the tracing subscriber.\n{0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),
}

/// A warning or an error attached to a single artifact.
///
/// Cloneable so that cached outcomes can replay their warnings.
#[derive(Debug, Error, Clone)]
pub enum Diagnostic {
    #[error("Empty input")]
    EmptyInput,

    #[error("No backends configured. Add at least one entry to `plugins`.")]
    NoBackends,

    #[error(
        "Unknown plugin: {name}\n\nDid you forget to register it?\nRegister it with:\n\n    registry.register(\"{name}\", backend)"
    )]
    UnknownBackend { name: String },

    #[error(
        "Invalid plugin configuration {entry}, plugin configuration should be a name or a [name, options] pair"
    )]
    InvalidConfig { entry: String },

    #[error(
        "\"{transform}\" does not support generating \"{output}\" from \"{filename}\". Use the generate transform instead"
    )]
    FormatMismatch {
        transform: String,
        filename: String,
        output: String,
    },

    #[error("Backend '{backend}' failed: {source}")]
    Backend {
        backend: String,
        source: Arc<anyhow::Error>,
    },

    #[error("Transform '{transform}' failed: {source}")]
    Transform {
        transform: String,
        source: Arc<anyhow::Error>,
    },

    #[error("Transform '{transform}' panicked: {message}")]
    Panicked { transform: String, message: String },

    #[error(transparent)]
    Custom(Arc<anyhow::Error>),
}

impl Diagnostic {
    pub fn custom(err: impl Into<anyhow::Error>) -> Self {
        Self::Custom(Arc::new(err.into()))
    }

    pub(crate) fn backend(backend: impl Into<String>, err: anyhow::Error) -> Self {
        Self::Backend {
            backend: backend.into(),
            source: Arc::new(err),
        }
    }

    pub(crate) fn transform(transform: impl Into<String>, err: anyhow::Error) -> Self {
        Self::Transform {
            transform: transform.into(),
            source: Arc::new(err),
        }
    }

    /// Builds a diagnostic from a panic payload caught with `catch_unwind`.
    pub(crate) fn panicked(transform: impl Into<String>, payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            String::from("unknown payload")
        };

        Self::Panicked {
            transform: transform.into(),
            message,
        }
    }
}

/// Diagnostics compare by their rendered message.
impl PartialEq for Diagnostic {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}
