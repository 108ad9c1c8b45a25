#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod backend;
pub mod cache;
#[cfg(feature = "codecs")]
mod codecs;
pub mod config;
mod core;
mod error;
#[cfg(feature = "logging")]
pub mod logging;
mod pipeline;
pub mod severity;
pub mod sniff;
mod task;
pub mod transform;

pub use crate::core::{Artifact, Dynamic, Hash32};
pub use crate::error::{Diagnostic, PipelineError};
pub use crate::pipeline::{Pipeline, PipelineBuilder};
pub use crate::task::{Info, Outcome, Task};

use crate::backend::Registry;
use crate::cache::Cache;
use crate::config::Settings;

/// Minifies a batch of tasks with the built-in minify stage.
///
/// Shorthand for building a [`Pipeline`] from `settings` and running it once.
/// The outcomes come back in the order of `tasks`.
pub fn minify(
    tasks: Vec<Task>,
    settings: Settings,
    registry: Registry,
    cache: Option<&dyn Cache>,
) -> Result<Vec<Outcome>, PipelineError> {
    Pipeline::builder(registry)
        .settings(settings)
        .build()?
        .run(tasks, cache)
}
