//! Disk cache record: an archive holding the source URL, the SHA-256 of the
//! downloaded body and the preprocessed payload.

use bytes::Bytes;
use trove_archive::error::Result;
use trove_archive::{Archive, ArchiveBuilder};

const URL: &str = "url";
const SHA256: &str = "sha256";
const DATA: &str = "data";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Record {
    pub url: String,
    pub sha256: String,
    pub data: Bytes,
}

impl Record {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut builder = ArchiveBuilder::with_capacity(3);
        builder
            .add_entry(URL, self.url.as_bytes().to_vec())?
            .add_entry(SHA256, self.sha256.as_bytes().to_vec())?
            .add_entry(DATA, self.data.clone())?;
        builder.build()
    }

    pub fn decode(bytes: Bytes) -> Result<Self> {
        let archive = Archive::parse(bytes)?;
        let url = text(&archive, URL)?;
        let sha256 = text(&archive, SHA256)?;
        let data = archive.require(DATA)?.data.clone();
        Ok(Self { url, sha256, data })
    }

    /// Whether this record can serve a request for `url` expecting `expected_hash`.
    pub fn matches(&self, url: &str, expected_hash: Option<&str>) -> bool {
        self.url == url && expected_hash.is_none_or(|hash| hash.eq_ignore_ascii_case(&self.sha256))
    }
}

fn text(archive: &Archive, path: &str) -> Result<String> {
    archive.require(path)?;
    let value = archive.entry_str(path)?.unwrap_or_default();
    Ok(value.to_string())
}
