//! Transform stages.
//!
//! A stage turns one artifact into a [`Transformed`] value. The built-in
//! stages drive the resolved backends ([`Minify`] and [`Generate`]), while
//! [`Custom`] wraps a caller supplied function behind the same interface.

use crate::backend::Normalized;
use crate::config::StageOptions;
use crate::core::Artifact;
use crate::error::Diagnostic;
use crate::task::Info;

mod generate;
mod minify;

pub use generate::Generate;
pub use minify::Minify;

/// Everything a stage gets to see besides its input.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub options: &'a StageOptions,
    /// Resolved backends, empty for stages which do not use them.
    pub backends: &'a Normalized,
}

/// The output of one stage.
///
/// `failures` hold raw transform failures, which the pipeline classifies with
/// the configured severity. `warnings` and `errors` are placed as they are.
#[derive(Debug, Clone)]
pub struct Transformed {
    pub primary: Artifact,
    pub derived: Vec<Artifact>,
    pub warnings: Vec<Diagnostic>,
    pub errors: Vec<Diagnostic>,
    pub failures: Vec<Diagnostic>,
    pub info: Info,
}

impl Transformed {
    pub fn new(primary: Artifact) -> Self {
        Self {
            primary,
            derived: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
            failures: Vec::new(),
            info: Info::default(),
        }
    }

    /// Passes the input through untouched.
    pub fn unchanged(input: &Artifact) -> Self {
        Self::new(input.clone())
    }

    pub fn with_warning(mut self, warning: Diagnostic) -> Self {
        self.warnings.push(warning);
        self
    }

    pub fn with_error(mut self, error: Diagnostic) -> Self {
        self.errors.push(error);
        self
    }

    pub fn with_failure(mut self, failure: Diagnostic) -> Self {
        self.failures.push(failure);
        self
    }

    /// Adds the resolution diagnostics of a stage.
    pub(crate) fn with_resolution(mut self, backends: &Normalized) -> Self {
        self.warnings.extend(backends.warnings.iter().cloned());
        self.errors.extend(backends.errors.iter().cloned());
        self
    }
}

/// A transform stage.
pub trait Transform: Send + Sync {
    /// Name used in diagnostics and bookkeeping.
    fn name(&self) -> &str;

    /// Identifies the behavior of the stage in the cache fingerprint. A stage
    /// returning `None` disables caching for the runs it takes part in.
    fn cache_identity(&self) -> Option<&str> {
        Some(self.name())
    }

    /// Whether the pipeline should resolve the `plugins` of this stage.
    fn resolves_backends(&self) -> bool {
        false
    }

    /// Transforms one artifact. Backend failures are reported in the result,
    /// never by panicking.
    fn transform(&self, input: &Artifact, ctx: StageContext<'_>) -> Transformed;
}

type CustomFn = dyn Fn(&Artifact, &StageOptions) -> anyhow::Result<Transformed> + Send + Sync;

/// A caller supplied transform.
///
/// An `Err` is a transform failure and goes through the severity policy,
/// errors and warnings returned inside an `Ok` are reported as they are.
///
/// The function is opaque to the cache, so a pipeline with a custom stage
/// does not cache anything unless the stage is given an identity with
/// [`Custom::with_identity`]. The identity has to change whenever the
/// function does.
///
/// # Example
///
/// ```rust
/// use shukusho::transform::{Custom, Transformed};
///
/// let passthrough = Custom::new("passthrough", |input, _| Ok(Transformed::unchanged(input)));
/// ```
pub struct Custom {
    name: String,
    identity: Option<String>,
    func: Box<CustomFn>,
}

impl Custom {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Artifact, &StageOptions) -> anyhow::Result<Transformed> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            identity: None,
            func: Box::new(func),
        }
    }

    /// Makes the stage cacheable under `identity`, e.g. `"resize@2"`.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }
}

impl Transform for Custom {
    fn name(&self) -> &str {
        &self.name
    }

    fn cache_identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    fn transform(&self, input: &Artifact, ctx: StageContext<'_>) -> Transformed {
        match (self.func)(input, ctx.options) {
            Ok(transformed) => transformed,
            Err(err) => {
                Transformed::unchanged(input).with_failure(Diagnostic::transform(&self.name, err))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use serde_json::Value;

    use crate::backend::{NormalizeMode, Normalized, Registry, normalize};
    use crate::config::StageOptions;
    use crate::sniff::fixtures;

    /// A registry of fake backends working on the magic numbers only.
    pub(crate) fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register_versioned("shukusho-shrink", "1.0.0", |data, _| {
                Ok(data[..data.len().saturating_sub(1)].to_vec())
            })
            .register("shukusho-tag", |data, options: &Value| {
                let tag = options.get("tag").and_then(Value::as_str).unwrap_or("#");
                Ok([data, tag.as_bytes()].concat())
            })
            .register("shukusho-webp", |_, _| Ok(fixtures::WEBP.to_vec()))
            .register("shukusho-gif", |_, _| Ok(fixtures::GIF.to_vec()))
            .register("shukusho-fail", |_, _| anyhow::bail!("corrupt image"));
        registry
    }

    pub(crate) fn resolve(options: &StageOptions) -> Normalized {
        normalize(options, &registry(), NormalizeMode::Structured)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_custom_ok_is_kept() {
        let custom = Custom::new("double", |input, _| {
            Ok(Transformed::new(Artifact::new(
                input.filename.clone(),
                input.data.repeat(2),
            ))
            .with_error(Diagnostic::custom(anyhow::anyhow!("explicit"))))
        });

        let input = Artifact::new("a.png", b"ab".to_vec());
        let options = StageOptions::default();
        let backends = Normalized::default();
        let out = custom.transform(&input, StageContext { options: &options, backends: &backends });

        assert_eq!(out.primary.data, b"abab");
        assert_eq!(out.errors.len(), 1);
        assert!(out.failures.is_empty());
    }

    #[test]
    fn test_custom_err_is_a_failure() {
        let custom = Custom::new("broken", |_, _| anyhow::bail!("test error"));

        let input = Artifact::new("a.png", b"ab".to_vec());
        let options = StageOptions::default();
        let backends = Normalized::default();
        let out = custom.transform(&input, StageContext { options: &options, backends: &backends });

        assert_eq!(out.primary, input);
        assert!(out.errors.is_empty());
        assert_eq!(out.failures.len(), 1);
        assert!(out.failures[0].to_string().contains("Transform 'broken' failed: test error"));
    }

    #[test]
    fn test_custom_identity() {
        let custom = Custom::new("resize", |input, _| Ok(Transformed::unchanged(input)));
        assert_eq!(custom.cache_identity(), None);

        let custom = custom.with_identity("resize@2");
        assert_eq!(custom.name(), "resize");
        assert_eq!(custom.cache_identity(), Some("resize@2"));
        assert_eq!(Minify.cache_identity(), Some("minify"));
    }

    #[test]
    fn test_custom_sees_stage_options() {
        let custom = Custom::new("opts", |input, options| {
            anyhow::ensure!(options.extra.contains_key("options2"), "missing options2");
            Ok(Transformed::unchanged(input))
        });

        let input = Artifact::new("a.png", b"ab".to_vec());
        let options = StageOptions::default().option("options2", "passed".into());
        let backends = Normalized::default();
        let out = custom.transform(&input, StageContext { options: &options, backends: &backends });

        assert!(out.failures.is_empty());
    }
}
