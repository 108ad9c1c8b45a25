use serde_json::{Map, Value};

use super::{BackendMeta, Registry, ResolvedBackend};
use crate::config::{PluginDecl, StageOptions};
use crate::error::Diagnostic;

const UNKNOWN_VERSION: &str = "unknown";

/// How strictly `plugins` entries are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NormalizeMode {
    /// Only names and `[name, options]` pairs are accepted. An inline backend
    /// is reported as an invalid configuration.
    #[default]
    Structured,
    /// Inline backends are accepted as is, under the name `inline`.
    Lenient,
}

/// The result of resolving the `plugins` list of one stage.
///
/// Resolution never fails as a whole: unknown names are reported as warnings
/// and malformed entries as errors, while every other entry still resolves.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub backends: Vec<ResolvedBackend>,
    pub warnings: Vec<Diagnostic>,
    pub errors: Vec<Diagnostic>,
}

impl Normalized {
    /// Name, options and version of every resolved backend, in order.
    pub fn metadata(&self) -> Vec<BackendMeta> {
        self.backends.iter().map(ResolvedBackend::meta).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

/// Turns the `plugins` declarations of a stage into callable backends.
pub fn normalize(options: &StageOptions, registry: &Registry, mode: NormalizeMode) -> Normalized {
    let mut normalized = Normalized::default();

    let plugins = match options.plugins.as_deref() {
        Some(plugins) if !plugins.is_empty() => plugins,
        _ => {
            normalized.warnings.push(Diagnostic::NoBackends);
            return normalized;
        }
    };

    for decl in plugins {
        match decl {
            PluginDecl::Named(name) => {
                resolve(registry, name, Value::Object(Map::new()), &mut normalized);
            }
            PluginDecl::NamedWithOptions(name, options) => {
                resolve(registry, name, options.clone(), &mut normalized);
            }
            PluginDecl::Inline(backend) if mode == NormalizeMode::Lenient => {
                normalized.backends.push(ResolvedBackend {
                    callable: backend.clone(),
                    name: String::from("inline"),
                    options: Value::Object(Map::new()),
                    version: String::from(UNKNOWN_VERSION),
                });
            }
            PluginDecl::Inline(_) | PluginDecl::Malformed(_) => {
                normalized.errors.push(Diagnostic::InvalidConfig {
                    entry: decl.describe(),
                });
            }
        }
    }

    tracing::debug!(
        resolved = normalized.backends.len(),
        warnings = normalized.warnings.len(),
        errors = normalized.errors.len(),
        "normalized backend configuration"
    );

    normalized
}

fn resolve(registry: &Registry, name: &str, options: Value, normalized: &mut Normalized) {
    let prefixed = registry.prefixed(name);

    // conventional name first, then the name verbatim
    let found = [prefixed.as_str(), name]
        .into_iter()
        .find_map(|candidate| registry.get(candidate).map(|backend| (candidate, backend)));

    let Some((resolved, backend)) = found else {
        let name = if name.starts_with(registry.prefix()) {
            name.to_string()
        } else {
            prefixed
        };
        tracing::debug!(%name, "unknown backend");
        normalized.warnings.push(Diagnostic::UnknownBackend { name });
        return;
    };

    normalized.backends.push(ResolvedBackend {
        callable: backend.clone(),
        name: resolved.to_string(),
        options,
        version: registry
            .version(resolved)
            .unwrap_or(UNKNOWN_VERSION)
            .to_string(),
    });
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register_versioned("shukusho-webp", "0.3.0", |data, _| Ok(data.to_vec()))
            .register("shukusho-png", |data, _| Ok(data.to_vec()))
            .register("vendor-gif", |data, _| Ok(data.to_vec()));
        registry
    }

    fn names(normalized: &Normalized) -> Vec<&str> {
        normalized.backends.iter().map(|b| b.name.as_str()).collect()
    }

    #[test]
    fn test_short_and_full_names() {
        let options = StageOptions::with_plugins(["webp", "shukusho-png", "vendor-gif"]);
        let normalized = normalize(&options, &registry(), NormalizeMode::Structured);

        assert_eq!(names(&normalized), ["shukusho-webp", "shukusho-png", "vendor-gif"]);
        assert!(normalized.warnings.is_empty());
        assert!(normalized.errors.is_empty());
    }

    #[test]
    fn test_metadata() {
        let options = StageOptions {
            plugins: Some(vec![
                PluginDecl::with_options("webp", json!({"quality": 50})),
                PluginDecl::named("png"),
            ]),
            ..Default::default()
        };
        let normalized = normalize(&options, &registry(), NormalizeMode::Structured);
        let meta = normalized.metadata();

        assert_eq!(meta[0].version, "0.3.0");
        assert_eq!(meta[0].options, json!({"quality": 50}));
        assert_eq!(meta[1].version, "unknown");
        assert_eq!(meta[1].options, json!({}));
    }

    #[test]
    fn test_unknown_is_reported_with_prefix() {
        let options = StageOptions::with_plugins(["webp", "unknown", "png"]);
        let normalized = normalize(&options, &registry(), NormalizeMode::Structured);

        assert_eq!(names(&normalized), ["shukusho-webp", "shukusho-png"]);
        assert_eq!(normalized.warnings.len(), 1);
        assert!(
            normalized.warnings[0]
                .to_string()
                .starts_with("Unknown plugin: shukusho-unknown")
        );
    }

    #[test]
    fn test_unknown_full_name_is_reported_verbatim() {
        let options = StageOptions::with_plugins(["shukusho-unknown"]);
        let normalized = normalize(&options, &registry(), NormalizeMode::Structured);

        assert!(normalized.is_empty());
        assert_eq!(normalized.warnings.len(), 1);
        assert!(
            normalized.warnings[0]
                .to_string()
                .starts_with("Unknown plugin: shukusho-unknown\n")
        );
    }

    #[test]
    fn test_no_backends() {
        for options in [
            StageOptions::default(),
            StageOptions::with_plugins(Vec::<PluginDecl>::new()),
        ] {
            let normalized = normalize(&options, &registry(), NormalizeMode::Structured);
            assert!(normalized.is_empty());
            assert_eq!(normalized.warnings.len(), 1);
            assert!(matches!(normalized.warnings[0], Diagnostic::NoBackends));
        }
    }

    #[test]
    fn test_inline_is_invalid_when_structured() {
        let options = StageOptions {
            plugins: Some(vec![
                PluginDecl::inline(|data, _| Ok(data.to_vec())),
                PluginDecl::named("webp"),
            ]),
            ..Default::default()
        };
        let normalized = normalize(&options, &registry(), NormalizeMode::Structured);

        assert_eq!(names(&normalized), ["shukusho-webp"]);
        assert!(normalized.warnings.is_empty());
        assert_eq!(normalized.errors.len(), 1);
        assert!(
            normalized.errors[0]
                .to_string()
                .contains("Invalid plugin configuration")
        );
    }

    #[test]
    fn test_inline_is_accepted_when_lenient() {
        let options = StageOptions {
            plugins: Some(vec![PluginDecl::inline(|data, _| Ok(data.to_vec()))]),
            ..Default::default()
        };
        let normalized = normalize(&options, &registry(), NormalizeMode::Lenient);

        assert_eq!(names(&normalized), ["inline"]);
        assert!(normalized.errors.is_empty());
    }

    #[test]
    fn test_malformed_is_invalid_in_both_modes() {
        let options = StageOptions {
            plugins: Some(vec![PluginDecl::Malformed(json!(42))]),
            ..Default::default()
        };

        for mode in [NormalizeMode::Structured, NormalizeMode::Lenient] {
            let normalized = normalize(&options, &registry(), mode);
            assert_eq!(normalized.errors.len(), 1);
            assert!(normalized.errors[0].to_string().contains("42"));
        }
    }

    #[test]
    fn test_idempotent() {
        let registry = registry();
        let options = StageOptions::with_plugins(["webp", "missing", "vendor-gif"]);

        let first = normalize(&options, &registry, NormalizeMode::Structured);
        let second = normalize(&options, &registry, NormalizeMode::Structured);

        assert_eq!(first, second);
    }

    proptest! {
        #[test]
        fn prop_resolution_is_stable(
            declared in proptest::collection::vec(
                prop::sample::select(vec!["webp", "png", "shukusho-png", "vendor-gif", "missing"]),
                0..8,
            ),
        ) {
            let registry = registry();
            let options = StageOptions::with_plugins(declared.clone());
            let normalized = normalize(&options, &registry, NormalizeMode::Structured);

            prop_assert_eq!(&normalized, &normalize(&options, &registry, NormalizeMode::Structured));

            let missing = declared.iter().filter(|name| **name == "missing").count();
            prop_assert_eq!(normalized.backends.len(), declared.len() - missing);
        }
    }
}
