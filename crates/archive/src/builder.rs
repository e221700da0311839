use crate::ALIGNMENT;
use crate::error::{ErrorKind, Result};
use bytes::Bytes;
use exn::ResultExt;
use std::collections::HashSet;
use trove_compress::Compression;

/// Accumulates entries and writes them out in insertion order.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use trove_archive::{Archive, ArchiveBuilder};
///
/// let mut builder = ArchiveBuilder::new();
/// builder.add_entry("hello.txt", Bytes::from_static(b"Hello")).unwrap();
/// let archive = Archive::parse(builder.build().unwrap()).unwrap();
/// assert_eq!(archive.entry_str("hello.txt").unwrap(), Some("Hello"));
/// ```
#[derive(Debug, Default)]
pub struct ArchiveBuilder {
    entries: Vec<(String, Bytes)>,
    seen: HashSet<String>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { entries: Vec::with_capacity(capacity), seen: HashSet::with_capacity(capacity) }
    }

    /// Queue an entry. Paths must be unique within one archive.
    pub fn add_entry(&mut self, path: impl Into<String>, data: impl Into<Bytes>) -> Result<&mut Self> {
        let path = path.into();
        if !self.seen.insert(path.clone()) {
            exn::bail!(ErrorKind::DuplicatePath(path));
        }
        self.entries.push((path, data.into()));
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write all queued entries to a new buffer.
    pub fn build(&self) -> Result<Vec<u8>> {
        let capacity = self
            .entries
            .iter()
            .map(|(path, data)| 2 * ALIGNMENT + padded(path.len()) + padded(data.len()))
            .sum();
        let mut output = Vec::with_capacity(capacity);
        for (path, data) in &self.entries {
            write_chunk(&mut output, path.as_bytes(), path)?;
            write_chunk(&mut output, data, path)?;
        }
        Ok(output)
    }

    /// Write all queued entries and wrap the result in a zstd frame.
    pub fn build_compressed(&self) -> Result<Vec<u8>> {
        let raw = self.build()?;
        Compression::Zstd.compress(&raw).map_err(ErrorKind::compression)
    }
}

pub(crate) fn padded(len: usize) -> usize {
    len.div_ceil(ALIGNMENT) * ALIGNMENT
}

fn write_chunk(output: &mut Vec<u8>, chunk: &[u8], path: &str) -> Result<()> {
    let len = u32::try_from(chunk.len()).or_raise(|| ErrorKind::TooLarge(path.to_string()))?;
    output.extend_from_slice(&len.to_le_bytes());
    output.extend_from_slice(chunk);
    output.resize(output.len() + padded(chunk.len()) - chunk.len(), 0);
    Ok(())
}
