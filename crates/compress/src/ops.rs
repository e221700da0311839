//! Compression Operations

use crate::Compression;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::io::{Read, Write};
use tracing::instrument;
use zstd::stream::{read::Decoder as ZstdDecoder, write::Encoder as ZstdEncoder};

// Archives are produced once and fetched many times, so spend the CPU on the
// producing side.
const ZSTD_LEVEL: i32 = 19;

impl Compression {
    /// Compress a byte slice in memory.
    ///
    /// # Examples
    ///
    /// ```
    /// use trove_compress::Compression;
    ///
    /// let data = b"Hello, world!";
    /// let framed = Compression::Zstd.compress(data).unwrap();
    /// assert_eq!(Compression::from_magic_bytes(&framed), Compression::Zstd);
    /// ```
    pub fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        self.compress_into(input, &mut output)?;
        Ok(output)
    }

    /// Decompress a byte slice in memory.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trove_compress::Compression;
    ///
    /// let original = b"Hello, world!";
    /// let framed = Compression::Zstd.compress(original).unwrap();
    /// assert_ne!(framed, original);
    /// let decompressed = Compression::Zstd.decompress(&framed).unwrap();
    /// assert_eq!(decompressed, original);
    /// ```
    pub fn decompress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        self.decompress_into(input, &mut output)?;
        Ok(output)
    }

    #[instrument(skip(input, output), fields(
        format = %self,
        input_size = input.len(),
        output_size
    ))]
    pub fn compress_into(&self, input: &[u8], output: &mut Vec<u8>) -> Result<usize> {
        let size = match self {
            Compression::None => {
                output.extend_from_slice(input);
                input.len()
            },
            Compression::Zstd => {
                let mut encoder = ZstdEncoder::new(&mut *output, ZSTD_LEVEL).or_raise(|| ErrorKind::Encoder)?;
                encoder.write_all(input).or_raise(|| ErrorKind::Io)?;
                encoder.finish().or_raise(|| ErrorKind::Io)?;
                output.len()
            },
        };
        tracing::Span::current().record("output_size", size);
        Ok(size)
    }

    #[instrument(skip(input, output), fields(
        format = %self,
        input_size = input.len(),
        output_size
    ))]
    pub fn decompress_into(&self, input: &[u8], output: &mut Vec<u8>) -> Result<usize> {
        let size = match self {
            Compression::None => {
                output.extend_from_slice(input);
                input.len()
            },
            Compression::Zstd => {
                let mut decoder = ZstdDecoder::new(input).or_raise(|| ErrorKind::Encoder)?;
                decoder.read_to_end(output).or_raise(|| ErrorKind::InvalidData)?
            },
        };
        tracing::Span::current().record("output_size", size);
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use crate::Compression;
    use crate::error::ErrorKind;
    use rstest::rstest;

    #[rstest]
    #[case(Compression::None)]
    #[case(Compression::Zstd)]
    fn test_compress_decompress(#[case] format: Compression) {
        let original = b"module payload, module payload, module payload";
        let compressed = format.compress(original).unwrap();
        let decompressed = format.decompress(&compressed).unwrap();
        assert_eq!(decompressed, original);
    }

    #[test]
    fn test_invalid_compressed_data() {
        let err = Compression::Zstd.decompress(b"This is not a zstd frame").unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidData);
    }

    #[test]
    fn test_truncated_frame() {
        let framed = Compression::Zstd.compress(&[7u8; 4096]).unwrap();
        let truncated = &framed[..framed.len() / 2];
        assert!(Compression::Zstd.decompress(truncated).is_err());
    }

    #[test]
    fn test_empty_input() {
        let framed = Compression::Zstd.compress(b"").unwrap();
        assert!(Compression::Zstd.decompress(&framed).unwrap().is_empty());
    }
}
