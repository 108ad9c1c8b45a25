//! Built-in backends re-encoding images with the `image` crate.

use std::io::Cursor;

use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::{ExtendedColorType, ImageEncoder};
use serde_json::Value;

use crate::backend::Registry;

const VERSION: &str = env!("CARGO_PKG_VERSION");

impl Registry {
    /// A registry with the built-in codecs:
    ///
    /// - `shukusho-webp` re-encodes any decodable image as lossless WebP,
    /// - `shukusho-png` re-encodes as PNG, taking `{"compression": "fast" | "default" | "best"}`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shukusho::backend::Registry;
    ///
    /// let registry = Registry::with_codecs();
    /// assert!(registry.get("shukusho-webp").is_some());
    /// ```
    pub fn with_codecs() -> Self {
        let mut registry = Registry::new();
        registry
            .register_versioned("shukusho-webp", VERSION, webp)
            .register_versioned("shukusho-png", VERSION, png);
        registry
    }
}

fn decode(data: &[u8]) -> anyhow::Result<(Vec<u8>, u32, u32)> {
    let img = image::load_from_memory(data)?;
    let (width, height) = (img.width(), img.height());
    Ok((img.to_rgba8().into_raw(), width, height))
}

fn webp(data: &[u8], _: &Value) -> anyhow::Result<Vec<u8>> {
    let (rgba, width, height) = decode(data)?;
    let mut buffer = Cursor::new(Vec::new());

    WebPEncoder::new_lossless(&mut buffer).encode(&rgba, width, height, ExtendedColorType::Rgba8)?;

    Ok(buffer.into_inner())
}

fn png(data: &[u8], options: &Value) -> anyhow::Result<Vec<u8>> {
    let compression = match options.get("compression").and_then(Value::as_str) {
        None | Some("default") => CompressionType::Default,
        Some("fast") => CompressionType::Fast,
        Some("best") => CompressionType::Best,
        Some(other) => anyhow::bail!("Unknown PNG compression level \"{other}\""),
    };

    let (rgba, width, height) = decode(data)?;
    let mut buffer = Cursor::new(Vec::new());

    PngEncoder::new_with_quality(&mut buffer, compression, FilterType::Adaptive).write_image(
        &rgba,
        width,
        height,
        ExtendedColorType::Rgba8,
    )?;

    Ok(buffer.into_inner())
}
