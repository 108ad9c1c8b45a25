use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::channel;

use indicatif::ProgressStyle;
use indicatif::style::TemplateError;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::backend::{NormalizeMode, Normalized, Registry, normalize};
use crate::cache::{self, Cache, CacheKey, CachedOutput, Fingerprint};
use crate::config::{MinimizerOptions, PluginDecl, Settings, StageOptions, default_concurrency};
use crate::core::{Artifact, extension_of, with_extension};
use crate::error::{Diagnostic, PipelineError};
use crate::severity::Severity;
use crate::task::{Outcome, Task};
use crate::transform::{Minify, StageContext, Transform, Transformed};

type Filter = dyn Fn(&[u8], &str) -> bool + Send + Sync;

/// The batch entry point.
///
/// A pipeline is a fixed list of transform stages plus the settings they run
/// under. It can be run any number of times, backends are resolved anew at
/// the start of every run and then shared by all workers of that run.
///
/// # Example
///
/// ```rust
/// use shukusho::backend::Registry;
/// use shukusho::config::StageOptions;
/// use shukusho::{Pipeline, Task};
///
/// let mut registry = Registry::new();
/// registry.register("shukusho-identity", |data, _| Ok(data.to_vec()));
///
/// let pipeline = Pipeline::builder(registry)
///     .minimizer_options(StageOptions::with_plugins(["identity"]))
///     .max_concurrency(2)
///     .build()?;
///
/// let outcomes = pipeline.run(vec![Task::new("logo.svg", "<svg></svg>")], None)?;
/// assert_eq!(outcomes[0].data.as_deref(), Some(&b"<svg></svg>"[..]));
/// # Ok::<(), shukusho::PipelineError>(())
/// ```
pub struct Pipeline {
    registry: Registry,
    stages: Vec<Arc<dyn Transform>>,
    settings: Settings,
    filter: Option<Arc<Filter>>,
    mode: NormalizeMode,
}

/// Configures a [`Pipeline`].
pub struct PipelineBuilder {
    registry: Registry,
    stages: Option<Vec<Arc<dyn Transform>>>,
    settings: Settings,
    filter: Option<Arc<Filter>>,
    mode: NormalizeMode,
}

impl PipelineBuilder {
    /// Replaces every serializable setting at once.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Appends a transform stage. Without any, the pipeline runs [`Minify`].
    pub fn stage(mut self, transform: impl Transform + 'static) -> Self {
        self.stages
            .get_or_insert_with(Vec::new)
            .push(Arc::new(transform));
        self
    }

    /// Sets the full list of stages. An empty list is rejected by `build`.
    pub fn stages<I>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Transform>>,
    {
        self.stages = Some(stages.into_iter().collect());
        self
    }

    /// Tasks for which `filter` returns `false` pass through untouched.
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&[u8], &str) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.settings.max_concurrency = Some(n);
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.settings.severity_error = severity;
        self
    }

    pub fn production(mut self, production: bool) -> Self {
        self.settings.is_production_mode = production;
        self
    }

    pub fn minimizer_options(mut self, options: impl Into<MinimizerOptions>) -> Self {
        self.settings.minimizer_options = options.into();
        self
    }

    pub fn loader(mut self, loader: bool) -> Self {
        self.settings.loader = loader;
        self
    }

    pub fn normalize_mode(mut self, mode: NormalizeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        if self.settings.max_concurrency == Some(0) {
            return Err(PipelineError::ZeroConcurrency);
        }

        let stages = match self.stages {
            None => vec![Arc::new(Minify) as Arc<dyn Transform>],
            Some(stages) if stages.is_empty() => return Err(PipelineError::NoStages),
            Some(stages) => stages,
        };

        Ok(Pipeline {
            registry: self.registry,
            stages,
            settings: self.settings,
            filter: self.filter,
            mode: self.mode,
        })
    }
}

/// A stage ready to run, with its options and backends resolved.
struct Stage<'a> {
    transform: &'a dyn Transform,
    options: StageOptions,
    backends: Normalized,
}

/// Per-run state shared read-only by every worker.
struct Prepared<'a> {
    stages: Vec<Stage<'a>>,
    /// Fingerprint of the stage configuration, `None` disables the cache.
    fingerprint: Option<Fingerprint>,
}

impl Prepared<'_> {
    fn key(&self, task: &Task) -> Option<CacheKey> {
        let mut fp = self.fingerprint.clone()?;
        fp.bytes(&task.input);
        // the extension decides which output format is acceptable
        fp.str(extension_of(&task.filename).as_deref().unwrap_or_default());
        for key in &task.cache_keys {
            fp.str(key);
        }
        Some(fp.finish())
    }
}

impl Pipeline {
    pub fn builder(registry: Registry) -> PipelineBuilder {
        PipelineBuilder {
            registry,
            stages: None,
            settings: Settings::default(),
            filter: None,
            mode: NormalizeMode::default(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of workers used for a batch of `tasks` tasks.
    pub fn concurrency(&self, tasks: usize) -> usize {
        self.settings
            .max_concurrency
            .unwrap_or_else(default_concurrency)
            .min(tasks)
            .max(1)
    }

    /// Runs every task through the stages and returns one outcome per task,
    /// in the order the tasks were given.
    ///
    /// Failures of individual tasks never fail the batch, they are reported
    /// on the outcome of the task instead.
    pub fn run(
        &self,
        tasks: Vec<Task>,
        cache: Option<&dyn Cache>,
    ) -> Result<Vec<Outcome>, PipelineError> {
        let total = tasks.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let threads = self.concurrency(total);
        let prepared = self.prepare(cache.is_some());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("shukusho-{i}"))
            .build()?;

        let root_span = tracing::span!(Level::INFO, "pipeline", tasks = total, threads);
        root_span.pb_set_length(total as u64);
        root_span.pb_set_style(&style_pipeline()?);
        root_span.pb_set_message("Minimizing assets...");
        let _enter = root_span.enter();

        let pb_style = style_task()?;
        let cursor = AtomicUsize::new(0);
        let mut slots: Vec<Option<Outcome>> = (0..total).map(|_| None).collect();

        pool.in_place_scope(|s| {
            let (sender, receiver) = channel::<(usize, Outcome)>();

            for _ in 0..threads {
                let sender = sender.clone();
                let pb_style = pb_style.clone();
                let (cursor, tasks, prepared, root) = (&cursor, &tasks, &prepared, &root_span);

                // workers pull the next task in submission order until none is left
                s.spawn(move |_| {
                    loop {
                        let index = cursor.fetch_add(1, Ordering::Relaxed);
                        let Some(task) = tasks.get(index) else {
                            break;
                        };

                        let span = tracing::span!(
                            parent: root,
                            Level::INFO,
                            "task",
                            filename = %task.filename
                        );
                        span.pb_set_style(&pb_style);
                        span.pb_set_message(&format!("Minimizing {}", task.filename));
                        let outcome = span.in_scope(|| self.process_guarded(task, prepared, cache));

                        if sender.send((index, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }

            // only the workers hold senders now, the loop ends once they are done
            drop(sender);

            for (index, outcome) in receiver {
                slots[index] = Some(outcome);
                root_span.pb_inc(1);
            }
        });

        let outcomes: Vec<Outcome> = slots.into_iter().flatten().collect();
        debug_assert_eq!(outcomes.len(), total);

        tracing::info!(
            tasks = total,
            errors = outcomes.iter().filter(|o| !o.is_ok()).count(),
            "Minimization complete!"
        );

        Ok(outcomes)
    }

    /// Resolves the backends of every stage once for the whole run.
    fn prepare(&self, caching: bool) -> Prepared<'_> {
        let stages: Vec<Stage<'_>> = self
            .stages
            .iter()
            .enumerate()
            .map(|(i, transform)| {
                let options = self.settings.minimizer_options.for_stage(i);
                let backends = if transform.resolves_backends() {
                    normalize(&options, &self.registry, self.mode)
                } else {
                    Normalized::default()
                };

                Stage {
                    transform: transform.as_ref(),
                    options,
                    backends,
                }
            })
            .collect();

        let fingerprint = if caching {
            match fingerprint(&stages) {
                Ok(fp) => Some(fp),
                Err(err) => {
                    tracing::warn!("caching disabled for this run: {err:#}");
                    None
                }
            }
        } else {
            None
        };

        Prepared { stages, fingerprint }
    }

    /// Processes one task, turning a panic anywhere outside of the stages
    /// (in the filter or the cache) into an error on its outcome.
    fn process_guarded(
        &self,
        task: &Task,
        prepared: &Prepared,
        cache: Option<&dyn Cache>,
    ) -> Outcome {
        match catch_unwind(AssertUnwindSafe(|| self.process(task, prepared, cache))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let mut outcome = Outcome::pending(task, self.settings.output_kind());
                outcome.data = Some(task.input.clone());
                outcome.errors.push(Diagnostic::panicked("pipeline", payload));
                outcome
            }
        }
    }

    fn process(&self, task: &Task, prepared: &Prepared, cache: Option<&dyn Cache>) -> Outcome {
        let mut outcome = Outcome::pending(task, self.settings.output_kind());

        if task.input.is_empty() {
            outcome.errors.push(Diagnostic::EmptyInput);
            return outcome;
        }

        outcome.data = Some(task.input.clone());

        if let Some(filter) = &self.filter
            && !filter(&task.input, &task.filename)
        {
            tracing::debug!("filtered out");
            outcome.filtered = true;
            return outcome;
        }

        let keyed = cache.zip(prepared.key(task));

        if let Some((cache, key)) = keyed
            && let Some(hit) = cache::lookup(cache, &key, task)
        {
            tracing::debug!(%key, "cache hit");
            replay(&mut outcome, hit);
            return outcome;
        }

        let clean = self.transform(task, &prepared.stages, &mut outcome);

        // failures are routed per run, only clean runs are stored
        if let Some((cache, key)) = keyed
            && clean
            && outcome.errors.is_empty()
        {
            tracing::debug!(%key, "cache miss, storing");
            cache::store(cache, &key, &outcome);
        }

        outcome
    }

    /// Runs the stages in order, each one on the primary output of the
    /// previous one. Returns `false` if any stage reported a failure.
    fn transform(&self, task: &Task, stages: &[Stage], outcome: &mut Outcome) -> bool {
        let mut current = Artifact::new(task.filename.clone(), task.input.clone());
        let mut failures = Vec::new();

        for stage in stages {
            let ctx = StageContext {
                options: &stage.options,
                backends: &stage.backends,
            };

            let result = catch_unwind(AssertUnwindSafe(|| stage.transform.transform(&current, ctx)));
            let Transformed {
                primary,
                derived,
                warnings,
                errors,
                failures: raw,
                info,
            } = match result {
                Ok(transformed) => transformed,
                Err(payload) => {
                    failures.push(Diagnostic::panicked(stage.transform.name(), payload));
                    continue;
                }
            };

            outcome.warnings.extend(warnings);
            outcome.errors.extend(errors);
            outcome.derived.extend(derived);
            outcome.info.merge(info);
            failures.extend(raw);
            current = primary;
        }

        let clean = failures.is_empty();
        self.settings.severity_error.route(
            failures,
            self.settings.is_production_mode,
            &mut outcome.warnings,
            &mut outcome.errors,
        );

        outcome.data = Some(current.data);
        clean
    }
}

fn fingerprint(stages: &[Stage]) -> anyhow::Result<Fingerprint> {
    let mut fp = Fingerprint::new();

    for stage in stages {
        let Some(identity) = stage.transform.cache_identity() else {
            anyhow::bail!("stage '{}' has no cache identity", stage.transform.name());
        };

        fp.str(identity).value(&stage.options.extra)?;

        match &stage.options.plugins {
            Some(plugins) => {
                fp.bytes(&(plugins.len() as u64).to_le_bytes());
                for plugin in plugins {
                    if matches!(plugin, PluginDecl::Inline(_)) {
                        anyhow::bail!("stage '{identity}' declares an inline backend");
                    }
                    fp.str(&plugin.describe());
                }
            }
            None => {
                fp.bytes(&[]);
            }
        }

        fp.value(&stage.backends.metadata())?;
        for diagnostic in stage.backends.warnings.iter().chain(&stage.backends.errors) {
            fp.str(&diagnostic.to_string());
        }
    }

    Ok(fp)
}

/// Applies a cache hit. Entries are shared between tasks with equal bytes, so
/// derived filenames are rebased onto the filename of this task.
fn replay(outcome: &mut Outcome, hit: CachedOutput) {
    let own = extension_of(&outcome.filename);
    let rebased = hit.derived.into_iter().map(|entry| Artifact {
        filename: match extension_of(&entry.filename) {
            Some(ext) if Some(&ext) != own.as_ref() => with_extension(&outcome.filename, &ext),
            _ => outcome.filename.clone(),
        },
        data: entry.data,
    });

    outcome.derived = rebased.collect();
    outcome.data = Some(hit.data);
    outcome.warnings = hit.warnings;
    outcome.errors = hit.errors;
    outcome.info = hit.info;
    outcome.cached = true;
}

fn style_pipeline() -> Result<ProgressStyle, TemplateError> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
        .progress_chars("=>-"))
}

fn style_task() -> Result<ProgressStyle, TemplateError> {
    ProgressStyle::default_spinner().template("{spinner:.blue} {msg}")
}
