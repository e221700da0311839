use crate::Compression;

/// Zstd frame magic number (0xFD2FB528, little-endian).
pub(crate) const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

impl Compression {
    /// Detect framing from magic bytes.
    ///
    /// Returns the `None` variant if no magic bytes match or if the input
    /// is too short to detect anything.
    #[must_use]
    pub fn from_magic_bytes(bytes: &[u8]) -> Self {
        if bytes.starts_with(&ZSTD_MAGIC) {
            return Compression::Zstd;
        }
        Compression::None
    }
}
