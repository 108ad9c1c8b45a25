use std::any::Any;
use std::sync::Arc;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

/// A type-erased, thread-safe container.
pub type Dynamic = Arc<dyn Any + Send + Sync>;

/// A 32-byte BLAKE3 hash used for content-addressing.
///
/// In `shukusho` this is the fingerprint of a task: the input bytes, the
/// effective options of every stage and any caller supplied cache keys all
/// flow into it before a single backend is invoked.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in &self.0 {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

impl std::fmt::Display for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A named buffer flowing through the pipeline.
///
/// The filename is an identifier and the source of the logical file format
/// (its extension), it is never opened on disk.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub filename: String,
    pub data: Vec<u8>,
}

impl Artifact {
    pub fn new(filename: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
        }
    }

    /// Lowercased extension of the filename, without the leading dot.
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.filename)
    }
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("filename", &self.filename)
            .field("len", &self.data.len())
            .finish()
    }
}

pub(crate) fn extension_of(filename: &str) -> Option<String> {
    Utf8Path::new(filename)
        .extension()
        .map(|ext| ext.to_ascii_lowercase())
}

/// Replaces the extension of `filename`, or appends one if it has none.
pub(crate) fn with_extension(filename: &str, ext: &str) -> String {
    Utf8Path::new(filename).with_extension(ext).into_string()
}
