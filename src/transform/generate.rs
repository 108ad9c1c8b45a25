use super::{StageContext, Transform, Transformed};
use crate::core::{Artifact, with_extension};
use crate::sniff::sniff;

/// Applies every resolved backend on its own to the original input.
///
/// The input is kept as the primary artifact and each successful backend adds
/// one derived artifact, in declaration order. When a backend changes the
/// format the derived filename gets the extension of the detected format.
/// A failing backend contributes nothing but its failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct Generate;

impl Transform for Generate {
    fn name(&self) -> &str {
        "generate"
    }

    fn resolves_backends(&self) -> bool {
        true
    }

    fn transform(&self, input: &Artifact, ctx: StageContext<'_>) -> Transformed {
        let mut result = Transformed::unchanged(input).with_resolution(ctx.backends);
        let ext = input.extension();

        for backend in &ctx.backends.backends {
            let data = match backend.call(&input.data) {
                Ok(data) => data,
                Err(failure) => {
                    result.failures.push(failure);
                    continue;
                }
            };

            let filename = match sniff(&data) {
                Some(detected)
                    if !ext
                        .as_deref()
                        .is_some_and(|ext| detected.matches_extension(ext)) =>
                {
                    with_extension(&input.filename, detected.ext)
                }
                _ => input.filename.clone(),
            };

            tracing::debug!(backend = %backend.name, %filename, "generated artifact");
            result.derived.push(Artifact { filename, data });
            result.info.generated_by.push(backend.name.clone());
        }

        result
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::StageOptions;
    use crate::sniff::fixtures;
    use crate::transform::testing::resolve;

    fn run(input: &Artifact, options: &StageOptions) -> Transformed {
        let backends = resolve(options);
        Generate.transform(input, StageContext { options, backends: &backends })
    }

    fn filenames(out: &Transformed) -> Vec<&str> {
        out.derived.iter().map(|a| a.filename.as_str()).collect()
    }

    #[test]
    fn test_format_change_renames() {
        let input = Artifact::new("nested/deep/plugin-test.png", fixtures::PNG.to_vec());
        let out = run(&input, &StageOptions::with_plugins(["webp"]));

        assert!(out.warnings.is_empty());
        assert_eq!(out.primary, input);
        assert_eq!(filenames(&out), ["nested/deep/plugin-test.webp"]);
        assert_eq!(out.derived[0].data, fixtures::WEBP);
        assert_eq!(out.info.generated_by, ["shukusho-webp"]);
    }

    #[test]
    fn test_same_format_keeps_filename() {
        let input = Artifact::new("photo.png", fixtures::PNG.to_vec());
        let out = run(&input, &StageOptions::with_plugins(["shrink"]));

        assert_eq!(filenames(&out), ["photo.png"]);
    }

    #[test]
    fn test_backends_run_independently_in_order() {
        let input = Artifact::new("photo.png", fixtures::PNG.to_vec());
        let out = run(&input, &StageOptions::with_plugins(["webp", "fail", "gif", "tag"]));

        assert_eq!(filenames(&out), ["photo.webp", "photo.gif", "photo.png"]);
        assert_eq!(out.failures.len(), 1);
        assert!(out.failures[0].to_string().contains("corrupt image"));

        // every backend saw the original bytes
        assert_eq!(out.derived[2].data, [fixtures::PNG, &b"#"[..]].concat());
    }

    #[test]
    fn test_no_backends() {
        let input = Artifact::new("photo.png", fixtures::PNG.to_vec());
        let out = run(&input, &StageOptions::default());

        assert!(out.derived.is_empty());
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.primary, input);
    }
}
