//! Compression framing for archive payloads.
//!
//! Archives travel either raw or inside a zstd frame. This crate wraps the
//! `zstd` library behind the [`Compression`] enum, providing:
//!
//! - **Format detection** from magic bytes ([`Compression::from_magic_bytes`])
//! - **In-memory** compression/decompression ([`Compression::compress`],
//!   [`Compression::decompress`])
//!
//! Decompression never trusts the caller: a buffer that claims to be zstd but
//! isn't results in [`InvalidData`](crate::error::ErrorKind::InvalidData).

mod construct;
pub mod error;
mod ops;
mod util;

/// A supported payload framing.
///
/// Defaults to [`None`](Self::None) (raw bytes).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Raw, unframed bytes
    #[default]
    None,
    /// Zstd frame (.zst)
    Zstd,
}
