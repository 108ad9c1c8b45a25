//! Configuration surface of the pipeline.
//!
//! Everything here deserializes from JSON with camelCase keys so a host can
//! load it from its own configuration files. The callable parts (the filter,
//! custom transforms and inline backends) are attached from code.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::backend::Backend;
use crate::severity::Severity;

/// One entry of the `plugins` list.
#[derive(Debug, Clone, PartialEq)]
pub enum PluginDecl {
    /// `"webp"` or `"shukusho-webp"`.
    Named(String),
    /// `["webp", { "quality": 80 }]`.
    NamedWithOptions(String, Value),
    /// An already instantiated backend.
    Inline(Backend),
    /// Anything else found in a configuration file.
    Malformed(Value),
}

impl PluginDecl {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn with_options(name: impl Into<String>, options: Value) -> Self {
        Self::NamedWithOptions(name.into(), options)
    }

    pub fn inline<F>(func: F) -> Self
    where
        F: Fn(&[u8], &Value) -> anyhow::Result<Vec<u8>> + Send + Sync + 'static,
    {
        Self::Inline(Backend::new(func))
    }

    /// Renders the declaration the way it appeared in the configuration.
    pub(crate) fn describe(&self) -> String {
        match self {
            PluginDecl::Named(name) => Value::from(name.as_str()).to_string(),
            PluginDecl::NamedWithOptions(name, options) => {
                Value::Array(vec![Value::from(name.as_str()), options.clone()]).to_string()
            }
            PluginDecl::Inline(_) => String::from("[inline backend]"),
            PluginDecl::Malformed(value) => value.to_string(),
        }
    }
}

impl From<&str> for PluginDecl {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

impl From<Value> for PluginDecl {
    fn from(value: Value) -> Self {
        match value {
            Value::String(name) => PluginDecl::Named(name),
            Value::Array(items) => match items.as_slice() {
                [Value::String(name)] | [Value::String(name), Value::Null] => {
                    PluginDecl::NamedWithOptions(name.clone(), empty())
                }
                [Value::String(name), options @ Value::Object(_)] => {
                    PluginDecl::NamedWithOptions(name.clone(), options.clone())
                }
                _ => PluginDecl::Malformed(Value::Array(items.clone())),
            },
            other => PluginDecl::Malformed(other),
        }
    }
}

impl<'de> Deserialize<'de> for PluginDecl {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Value::deserialize(deserializer).map(PluginDecl::from)
    }
}

fn empty() -> Value {
    Value::Object(Map::new())
}

/// Options for one transform stage.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StageOptions {
    /// Backend declarations, `None` when absent or not a list.
    #[serde(default, deserialize_with = "lenient_plugins")]
    pub plugins: Option<Vec<PluginDecl>>,
    /// Free-form options handed to custom transforms.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StageOptions {
    pub fn with_plugins<I, P>(plugins: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PluginDecl>,
    {
        Self {
            plugins: Some(plugins.into_iter().map(Into::into).collect()),
            extra: Map::new(),
        }
    }

    pub fn option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

fn lenient_plugins<'de, D>(deserializer: D) -> Result<Option<Vec<PluginDecl>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => Some(items.into_iter().map(PluginDecl::from).collect()),
        _ => None,
    })
}

/// Either one option set shared by every stage, or one per stage.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MinimizerOptions {
    PerStage(Vec<StageOptions>),
    Shared(StageOptions),
}

impl MinimizerOptions {
    /// The effective options of the stage at `index`.
    ///
    /// A per-stage list shorter than the number of stages yields empty
    /// options for the missing positions.
    pub fn for_stage(&self, index: usize) -> StageOptions {
        match self {
            MinimizerOptions::Shared(options) => options.clone(),
            MinimizerOptions::PerStage(list) => list.get(index).cloned().unwrap_or_default(),
        }
    }
}

impl Default for MinimizerOptions {
    fn default() -> Self {
        Self::Shared(StageOptions::default())
    }
}

impl From<StageOptions> for MinimizerOptions {
    fn from(options: StageOptions) -> Self {
        Self::Shared(options)
    }
}

impl From<Vec<StageOptions>> for MinimizerOptions {
    fn from(list: Vec<StageOptions>) -> Self {
        Self::PerStage(list)
    }
}

/// How the host wants the output carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputKind {
    /// Raw bytes handed back to a loader.
    Loader,
    /// A build asset wrapped by the host.
    #[default]
    Asset,
}

/// The serializable part of the pipeline configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Upper bound on concurrently transformed tasks, see [`default_concurrency`].
    pub max_concurrency: Option<usize>,
    pub severity_error: Severity,
    pub minimizer_options: MinimizerOptions,
    /// Feeds the `auto` severity.
    pub is_production_mode: bool,
    pub loader: bool,
}

impl Settings {
    pub fn output_kind(&self) -> OutputKind {
        if self.loader {
            OutputKind::Loader
        } else {
            OutputKind::Asset
        }
    }
}

/// Available parallelism minus one, never less than one.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_sub(1)
        .max(1)
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_plugin_shapes() {
        let options: StageOptions = serde_json::from_value(json!({
            "plugins": ["webp", ["png", {"compression": "best"}], ["jpeg"], 42, {"name": "x"}]
        }))
        .unwrap();

        assert_eq!(
            options.plugins.unwrap(),
            vec![
                PluginDecl::named("webp"),
                PluginDecl::with_options("png", json!({"compression": "best"})),
                PluginDecl::with_options("jpeg", json!({})),
                PluginDecl::Malformed(json!(42)),
                PluginDecl::Malformed(json!({"name": "x"})),
            ]
        );
    }

    #[test]
    fn test_plugins_not_a_list() {
        let options: StageOptions = serde_json::from_value(json!({ "plugins": false })).unwrap();
        assert_eq!(options.plugins, None);

        let options: StageOptions = serde_json::from_value(json!({})).unwrap();
        assert_eq!(options.plugins, None);
    }

    #[test]
    fn test_extra_options_kept() {
        let options: StageOptions =
            serde_json::from_value(json!({ "options2": "passed" })).unwrap();
        assert_eq!(options.extra.get("options2"), Some(&json!("passed")));
    }

    #[test]
    fn test_minimizer_options_shapes() {
        let shared: MinimizerOptions =
            serde_json::from_value(json!({ "plugins": ["webp"] })).unwrap();
        assert_eq!(shared.for_stage(3).plugins.unwrap().len(), 1);

        let staged: MinimizerOptions =
            serde_json::from_value(json!([{ "plugins": ["webp"] }, { "options2": "passed" }]))
                .unwrap();
        assert!(staged.for_stage(0).plugins.is_some());
        assert!(staged.for_stage(1).extra.contains_key("options2"));
        assert_eq!(staged.for_stage(2), StageOptions::default());
    }

    #[test]
    fn test_settings() {
        let settings: Settings = serde_json::from_value(json!({
            "maxConcurrency": 2,
            "severityError": "warning",
            "isProductionMode": true,
            "loader": true,
            "minimizerOptions": { "plugins": ["webp"] }
        }))
        .unwrap();

        assert_eq!(settings.max_concurrency, Some(2));
        assert!(matches!(settings.severity_error, Severity::Warning));
        assert!(settings.is_production_mode);
        assert_eq!(settings.output_kind(), OutputKind::Loader);
    }

    #[test]
    fn test_default_concurrency() {
        assert!(default_concurrency() >= 1);
    }
}
