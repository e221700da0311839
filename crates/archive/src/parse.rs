use crate::builder::padded;
use crate::error::{ErrorKind, Result};
use crate::{ALIGNMENT, ArchiveEntry};
use bytes::Bytes;
use exn::{OptionExt, ResultExt};

/// Walk `buffer` and slice out every entry.
pub(crate) fn entries(buffer: Bytes) -> Result<Vec<ArchiveEntry>> {
    if buffer.len() % ALIGNMENT != 0 {
        exn::bail!(ErrorKind::Misaligned(buffer.len()));
    }
    let mut entries = Vec::new();
    let mut offset = 0;
    while offset < buffer.len() {
        let path_offset = offset;
        let path = read_chunk(&buffer, &mut offset)?;
        let path = String::from_utf8(path.to_vec()).or_raise(|| ErrorKind::InvalidPath(path_offset))?;
        let data = read_chunk(&buffer, &mut offset)?;
        entries.push(ArchiveEntry { path, data });
    }
    Ok(entries)
}

fn read_chunk(buffer: &Bytes, offset: &mut usize) -> Result<Bytes> {
    let start = *offset;
    let header = buffer.get(start..start + ALIGNMENT).ok_or_raise(|| ErrorKind::Truncated(start))?;
    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let body = start + ALIGNMENT;
    let end = body.checked_add(padded(len)).filter(|end| *end <= buffer.len());
    let Some(end) = end else {
        exn::bail!(ErrorKind::Truncated(start));
    };
    *offset = end;
    Ok(buffer.slice(body..body + len))
}
