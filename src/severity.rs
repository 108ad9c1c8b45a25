//! Routing of transform failures into the warning or error bucket.

use std::sync::Arc;

use serde::{Deserialize, Deserializer};

use crate::error::Diagnostic;

/// Where a captured transform failure ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Dropped entirely, the original bytes are kept silently.
    Suppressed,
    Warning,
    Error,
}

type Predicate = dyn Fn(&Diagnostic, bool) -> Decision + Send + Sync;

/// The configured policy for transform failures.
///
/// Deserializes from `"off"`, `"error"`, `"warning"`, `"auto"`, `true` and
/// `false`. A custom predicate can only be attached from code.
#[derive(Clone, Default)]
pub enum Severity {
    /// `"off"` or `false`.
    Off,
    /// `"error"` or `true`.
    Error,
    Warning,
    /// Error in production-like runs, warning otherwise.
    #[default]
    Auto,
    Custom(Arc<Predicate>),
}

impl Severity {
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&Diagnostic, bool) -> Decision + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(predicate))
    }

    /// Classifies a single failure.
    pub fn decide(&self, failure: &Diagnostic, production: bool) -> Decision {
        match self {
            Severity::Off => Decision::Suppressed,
            Severity::Error => Decision::Error,
            Severity::Warning => Decision::Warning,
            Severity::Auto if production => Decision::Error,
            Severity::Auto => Decision::Warning,
            Severity::Custom(predicate) => predicate(failure, production),
        }
    }

    /// Moves every failure into exactly one of the two buckets, or drops it.
    pub(crate) fn route(
        &self,
        failures: Vec<Diagnostic>,
        production: bool,
        warnings: &mut Vec<Diagnostic>,
        errors: &mut Vec<Diagnostic>,
    ) {
        for failure in failures {
            match self.decide(&failure, production) {
                Decision::Suppressed => {
                    tracing::debug!("suppressed failure: {failure}");
                }
                Decision::Warning => warnings.push(failure),
                Decision::Error => errors.push(failure),
            }
        }
    }
}

impl std::fmt::Debug for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Off => write!(f, "Off"),
            Severity::Error => write!(f, "Error"),
            Severity::Warning => write!(f, "Warning"),
            Severity::Auto => write!(f, "Auto"),
            Severity::Custom(_) => write!(f, "Custom(Fn(*))"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" | "false" => Ok(Severity::Off),
            "error" | "true" => Ok(Severity::Error),
            "warning" => Ok(Severity::Warning),
            "auto" => Ok(Severity::Auto),
            other => Err(format!(
                "unknown severity \"{other}\", expected one of \"off\", \"error\", \"warning\", \"auto\""
            )),
        }
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Name(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Flag(true) => Ok(Severity::Error),
            Raw::Flag(false) => Ok(Severity::Off),
            Raw::Name(name) => name.parse().map_err(serde::de::Error::custom),
        }
    }
}
