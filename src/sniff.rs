//! Detection of the file format of transformed bytes.
//!
//! Raster formats are recognized by their magic numbers through
//! [`image::guess_format`], SVG documents by their root element.

use image::ImageFormat;

/// A detected file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileType {
    /// Canonical extension, without the leading dot.
    pub ext: &'static str,
    pub mime: &'static str,
    /// Every extension commonly used for this format, canonical one first.
    pub aliases: &'static [&'static str],
}

const SVG_TYPE: FileType = FileType {
    ext: "svg",
    mime: "image/svg+xml",
    aliases: &["svg"],
};

impl FileType {
    /// Whether `ext` (lowercase, no dot) names this format.
    pub fn matches_extension(&self, ext: &str) -> bool {
        self.aliases.contains(&ext)
    }

    fn from_image(format: ImageFormat) -> Option<Self> {
        let aliases = format.extensions_str();
        let ext = aliases.first()?;

        Some(FileType {
            ext,
            mime: format.to_mime_type(),
            aliases,
        })
    }
}

/// Inspects `data` and reports its format, if it is a known one.
pub fn sniff(data: &[u8]) -> Option<FileType> {
    if let Ok(format) = image::guess_format(data) {
        return FileType::from_image(format);
    }

    if is_svg(data) {
        return Some(SVG_TYPE);
    }

    None
}

fn is_svg(data: &[u8]) -> bool {
    // the root element has to show up early, after an optional prolog
    let head = &data[..data.len().min(1024)];
    let text = match std::str::from_utf8(head) {
        Ok(text) => text,
        Err(e) => std::str::from_utf8(&head[..e.valid_up_to()]).unwrap_or_default(),
    };

    let mut rest = text.trim_start_matches('\u{feff}');
    loop {
        rest = rest.trim_start();

        let end = if rest.starts_with("<?") {
            rest.find("?>").map(|i| i + 2)
        } else if rest.starts_with("<!--") {
            rest.find("-->").map(|i| i + 3)
        } else if rest.starts_with("<!") {
            rest.find('>').map(|i| i + 1)
        } else {
            break;
        };

        match end {
            Some(end) => rest = &rest[end..],
            None => return false,
        }
    }

    // first element, `<svg` followed by a delimiter
    rest.strip_prefix("<svg")
        .and_then(|tail| tail.chars().next())
        .is_some_and(|c| c.is_whitespace() || c == '>' || c == '/')
}
