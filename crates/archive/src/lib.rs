//! Archive container.
//!
//! An archive is a flat sequence of `(path, payload)` entries. Each entry is
//! laid out as:
//!
//! ```text
//! u32 LE path length | path (UTF-8) | zero padding to 4 bytes
//! u32 LE payload length | payload   | zero padding to 4 bytes
//! ```
//!
//! Parsing never copies payloads: every [`ArchiveEntry`] holds a [`Bytes`]
//! slice of the buffer it was parsed from. Archives may be wrapped in a zstd
//! frame, see [`Archive::decompress`].

mod builder;
pub mod error;
mod parse;

pub use crate::builder::ArchiveBuilder;
use crate::error::{ErrorKind, Result};
use bytes::Bytes;
use exn::{OptionExt, ResultExt};
use std::collections::HashMap;
use trove_compress::Compression;

pub(crate) const ALIGNMENT: usize = 4;

/// A single named payload inside an [`Archive`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: String,
    pub data: Bytes,
}
impl ArchiveEntry {
    pub fn new(path: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self { path: path.into(), data: data.into() }
    }
}

/// Parsed archive: entries in wire order plus a path index.
#[derive(Clone, Debug, Default)]
pub struct Archive {
    entries: Vec<ArchiveEntry>,
    index: HashMap<String, usize>,
}

impl PartialEq for Archive {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}
impl Eq for Archive {}

impl Archive {
    pub(crate) fn from_entries(entries: Vec<ArchiveEntry>) -> Result<Self> {
        let mut index = HashMap::with_capacity(entries.len());
        for (position, entry) in entries.iter().enumerate() {
            if index.insert(entry.path.clone(), position).is_some() {
                exn::bail!(ErrorKind::DuplicatePath(entry.path.clone()));
            }
        }
        Ok(Self { entries, index })
    }

    /// Parse an uncompressed archive.
    pub fn parse(buffer: impl Into<Bytes>) -> Result<Self> {
        let entries = parse::entries(buffer.into())?;
        Self::from_entries(entries)
    }

    /// Parse an archive that may be wrapped in a zstd frame.
    ///
    /// The framing is detected from the magic bytes, so both raw and
    /// compressed buffers are accepted.
    pub fn decompress(buffer: impl Into<Bytes>) -> Result<Self> {
        let buffer = buffer.into();
        match Compression::from_magic_bytes(&buffer) {
            Compression::None => Self::parse(buffer),
            format => {
                let raw = format.decompress(&buffer).map_err(ErrorKind::compression)?;
                tracing::trace!(compressed = buffer.len(), decompressed = raw.len(), "Decompressed archive");
                Self::parse(raw)
            },
        }
    }

    /// Serialize back to the wire format.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut builder = ArchiveBuilder::with_capacity(self.entries.len());
        for entry in &self.entries {
            builder.add_entry(entry.path.clone(), entry.data.clone())?;
        }
        builder.build()
    }

    /// Serialize and wrap in a zstd frame.
    pub fn compress(&self) -> Result<Vec<u8>> {
        let raw = self.encode()?;
        Compression::Zstd.compress(&raw).map_err(ErrorKind::compression)
    }

    pub fn entry(&self, path: &str) -> Option<&ArchiveEntry> {
        self.index.get(path).map(|position| &self.entries[*position])
    }

    /// Payload of `path` viewed as UTF-8 text.
    ///
    /// Returns `Ok(None)` when the entry does not exist.
    pub fn entry_str(&self, path: &str) -> Result<Option<&str>> {
        let Some(entry) = self.entry(path) else {
            return Ok(None);
        };
        let text = std::str::from_utf8(&entry.data).or_raise(|| ErrorKind::NotText(path.to_string()))?;
        Ok(Some(text))
    }

    /// Like [`entry`](Self::entry), but a missing entry is an error.
    pub fn require(&self, path: &str) -> Result<&ArchiveEntry> {
        self.entry(path).ok_or_raise(|| ErrorKind::MissingEntry(path.to_string()))
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.path.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for Archive {
    type Item = ArchiveEntry;
    type IntoIter = std::vec::IntoIter<ArchiveEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
