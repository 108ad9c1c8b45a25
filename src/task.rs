use serde::{Deserialize, Serialize};

use crate::config::OutputKind;
use crate::core::{Artifact, Dynamic};
use crate::error::Diagnostic;

/// One artifact submitted to the pipeline.
#[derive(Clone)]
pub struct Task {
    /// Identifier used for logging and as the source of the file format.
    pub filename: String,
    pub input: Vec<u8>,
    /// Extra inputs to the cache fingerprint, e.g. a version tag.
    pub cache_keys: Vec<String>,
    /// Host carrier object, handed back untouched on the outcome.
    pub source: Option<Dynamic>,
}

impl Task {
    pub fn new(filename: impl Into<String>, input: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            input: input.into(),
            cache_keys: Vec::new(),
            source: None,
        }
    }

    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_keys.push(key.into());
        self
    }

    pub fn source(mut self, source: Dynamic) -> Self {
        self.source = Some(source);
        self
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("filename", &self.filename)
            .field("len", &self.input.len())
            .field("cache_keys", &self.cache_keys)
            .field("source", &self.source.as_ref().map(|_| "Dynamic"))
            .finish()
    }
}

/// Bookkeeping about which transforms touched an artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Info {
    /// Transforms that minimized the primary artifact, most recent first.
    pub minimized_by: Vec<String>,
    /// Backends that produced a derived artifact, in declaration order.
    pub generated_by: Vec<String>,
}

impl Info {
    pub fn minimized(&self) -> bool {
        !self.minimized_by.is_empty()
    }

    pub(crate) fn record_minimized(&mut self, by: impl Into<String>) {
        self.minimized_by.insert(0, by.into());
    }

    /// Folds the info of a later stage into this one.
    pub(crate) fn merge(&mut self, later: Info) {
        let Info {
            mut minimized_by,
            generated_by,
        } = later;

        minimized_by.append(&mut self.minimized_by);
        self.minimized_by = minimized_by;
        self.generated_by.extend(generated_by);
    }
}

/// The result of one task, in the same position as the task was submitted.
pub struct Outcome {
    pub filename: String,
    /// Final bytes of the primary artifact. Only `None` for an empty input.
    pub data: Option<Vec<u8>>,
    /// Artifacts generated alongside the primary one.
    pub derived: Vec<Artifact>,
    pub warnings: Vec<Diagnostic>,
    pub errors: Vec<Diagnostic>,
    /// Rejected by the filter, `data` holds the untouched input.
    pub filtered: bool,
    /// Served from the cache without running any transform.
    pub cached: bool,
    pub info: Info,
    pub kind: OutputKind,
    pub cache_keys: Vec<String>,
    pub source: Option<Dynamic>,
}

impl Outcome {
    pub(crate) fn pending(task: &Task, kind: OutputKind) -> Self {
        Self {
            filename: task.filename.clone(),
            data: None,
            derived: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
            filtered: false,
            cached: false,
            info: Info::default(),
            kind,
            cache_keys: task.cache_keys.clone(),
            source: task.source.clone(),
        }
    }

    /// Whether the artifact was processed without any hard error.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// The primary artifact followed by every derived one.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &[u8])> {
        let primary = self
            .data
            .as_deref()
            .map(|data| (self.filename.as_str(), data));

        primary.into_iter().chain(
            self.derived
                .iter()
                .map(|entry| (entry.filename.as_str(), entry.data.as_slice())),
        )
    }
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outcome")
            .field("filename", &self.filename)
            .field("len", &self.data.as_ref().map(Vec::len))
            .field("derived", &self.derived)
            .field("warnings", &self.warnings)
            .field("errors", &self.errors)
            .field("filtered", &self.filtered)
            .field("cached", &self.cached)
            .field("info", &self.info)
            .field("kind", &self.kind)
            .finish()
    }
}
