use super::{StageContext, Transform, Transformed};
use crate::backend::run_backends;
use crate::core::Artifact;
use crate::error::Diagnostic;
use crate::sniff::sniff;

/// Runs every resolved backend as one chain and keeps the single result.
///
/// The result has to stay in the format of the input. When a backend turns,
/// say, a PNG into a WebP the result is dropped with a warning, converting
/// formats is the job of [`Generate`](super::Generate).
#[derive(Debug, Clone, Copy, Default)]
pub struct Minify;

impl Transform for Minify {
    fn name(&self) -> &str {
        "minify"
    }

    fn resolves_backends(&self) -> bool {
        true
    }

    fn transform(&self, input: &Artifact, ctx: StageContext<'_>) -> Transformed {
        let result = Transformed::unchanged(input).with_resolution(ctx.backends);

        if ctx.backends.is_empty() {
            return result;
        }

        let data = match run_backends(&input.data, &ctx.backends.backends) {
            Ok(data) => data,
            Err(failure) => return result.with_failure(failure),
        };

        if let Some(detected) = sniff(&data) {
            let same = input
                .extension()
                .is_some_and(|ext| detected.matches_extension(&ext));

            if !same {
                return result.with_warning(Diagnostic::FormatMismatch {
                    transform: self.name().to_string(),
                    filename: input.filename.clone(),
                    output: detected.ext.to_string(),
                });
            }
        }

        let mut result = result;
        result.primary.data = data;
        result.info.record_minimized(self.name());
        result
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;
    use crate::backend::run_backends;
    use crate::config::{PluginDecl, StageOptions};
    use crate::sniff::fixtures;
    use crate::transform::testing::resolve;

    fn run(input: &Artifact, options: &StageOptions) -> Transformed {
        let backends = resolve(options);
        Minify.transform(input, StageContext { options, backends: &backends })
    }

    #[test]
    fn test_output_equals_backend_output() {
        let input = Artifact::new("photo.png", fixtures::PNG.to_vec());
        let options = StageOptions::with_plugins(["shrink"]);

        let out = run(&input, &options);
        let direct = run_backends(&input.data, &resolve(&options).backends).unwrap();

        assert!(out.warnings.is_empty());
        assert!(out.errors.is_empty());
        assert_eq!(out.primary.filename, "photo.png");
        assert_eq!(out.primary.data, direct);
        assert_eq!(out.info.minimized_by, ["minify"]);
    }

    #[test]
    fn test_all_backends_compose() {
        let input = Artifact::new("photo.png", fixtures::PNG.to_vec());
        let options = StageOptions {
            plugins: Some(vec![
                PluginDecl::named("shrink"),
                PluginDecl::with_options("tag", json!({"tag": "!"})),
            ]),
            ..Default::default()
        };

        let out = run(&input, &options);
        let mut expected = fixtures::PNG[..fixtures::PNG.len() - 1].to_vec();
        expected.push(b'!');

        assert_eq!(out.primary.data, expected);
    }

    #[test]
    fn test_unknown_backend_does_not_stop_others() {
        let input = Artifact::new("photo.png", fixtures::PNG.to_vec());
        let options = StageOptions::with_plugins(["shrink", "unknown", "tag"]);

        let out = run(&input, &options);

        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].to_string().starts_with("Unknown plugin: shukusho-unknown"));
        assert!(out.errors.is_empty());

        let mut expected = fixtures::PNG[..fixtures::PNG.len() - 1].to_vec();
        expected.push(b'#');
        assert_eq!(out.primary.data, expected);
    }

    #[test]
    fn test_no_backends_keeps_input() {
        let input = Artifact::new("foo.png", b"Foo".to_vec());
        let out = run(&input, &StageOptions::default());

        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].to_string().contains("No backends configured"));
        assert!(out.errors.is_empty());
        assert_eq!(out.primary, input);
        assert!(!out.info.minimized());
    }

    #[test]
    fn test_inline_backend_is_an_error() {
        let input = Artifact::new("photo.png", fixtures::PNG.to_vec());
        let options = StageOptions {
            plugins: Some(vec![PluginDecl::inline(|data, _| Ok(data.to_vec()))]),
            ..Default::default()
        };

        let out = run(&input, &options);

        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].to_string().contains("Invalid plugin configuration"));
        assert!(out.warnings.is_empty());
        assert_eq!(out.primary, input);
    }

    #[test]
    fn test_backend_failure_is_captured() {
        let input = Artifact::new("photo.jpg", b"Foo".to_vec());
        let out = run(&input, &StageOptions::with_plugins(["fail"]));

        assert_eq!(out.failures.len(), 1);
        assert!(out.warnings.is_empty());
        assert!(out.errors.is_empty());
        assert_eq!(out.primary, input);
    }

    #[test]
    fn test_format_change_is_rejected() {
        let input = Artifact::new("photo.png", fixtures::PNG.to_vec());
        let out = run(&input, &StageOptions::with_plugins(["webp"]));

        assert_eq!(out.warnings.len(), 1);
        assert!(
            out.warnings[0]
                .to_string()
                .contains(r#"does not support generating "webp" from "photo.png""#)
        );
        assert!(out.failures.is_empty());
        assert_eq!(out.primary, input);
    }

    #[test]
    fn test_jpeg_extension_alias() {
        let input = Artifact::new("photo.JPEG", fixtures::JPEG.to_vec());
        let out = run(&input, &StageOptions::with_plugins(["tag"]));

        assert!(out.warnings.is_empty());
        assert!(out.info.minimized());
    }
}
