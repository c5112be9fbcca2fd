// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Compression algorithm used by the ZFile block container.
///
/// `spec.md` §4.4 requires `algo ∈ {LZ4, ZSTD}`; unlike the teacher crate
/// (which treats compression as an optional, feature-gated extra on top of
/// an otherwise-working uncompressed tree), both backends are unconditional
/// dependencies here because block compression is this crate's reason to
/// exist.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[allow(clippy::module_name_repetitions)]
pub enum CompressionType {
    /// No compression; blocks are stored verbatim.
    None,

    /// LZ4 block compression, favoring speed over ratio.
    Lz4,

    /// Zstandard compression at the given level (1-22).
    Zstd(i32),
}

impl Default for CompressionType {
    fn default() -> Self {
        Self::Lz4
    }
}

impl Encode for CompressionType {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        match self {
            Self::None => writer.write_u8(0)?,
            Self::Lz4 => writer.write_u8(1)?,
            Self::Zstd(level) => {
                writer.write_u8(2)?;
                writer.write_i32::<byteorder::LittleEndian>(*level)?;
            }
        }
        Ok(())
    }
}

impl Decode for CompressionType {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let tag = reader.read_u8()?;
        match tag {
            0 => Ok(Self::None),
            1 => Ok(Self::Lz4),
            2 => {
                let level = reader.read_i32::<byteorder::LittleEndian>()?;
                Ok(Self::Zstd(level))
            }
            tag => Err(DecodeError::InvalidTag(("CompressionType", tag))),
        }
    }
}

impl std::fmt::Display for CompressionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "no compression"),
            Self::Lz4 => write!(f, "lz4"),
            Self::Zstd(level) => write!(f, "zstd (level {level})"),
        }
    }
}

/// Compresses a single block. `raw` is at most `block_size` bytes (the
/// final block of a file may be smaller).
pub fn compress_block(algo: CompressionType, raw: &[u8]) -> Vec<u8> {
    match algo {
        CompressionType::None => raw.to_vec(),
        CompressionType::Lz4 => lz4_flex::block::compress(raw),
        CompressionType::Zstd(level) => {
            let level = if level == 0 { DEFAULT_ZSTD_LEVEL } else { level };
            zstd::bulk::compress(raw, level).unwrap_or_else(|_| raw.to_vec())
        }
    }
}

/// Decompresses a single block, given the exact uncompressed length
/// (known from the block's logical position relative to `raw_data_size`).
pub fn decompress_block(
    algo: CompressionType,
    compressed: &[u8],
    uncompressed_len: usize,
) -> crate::Result<Vec<u8>> {
    match algo {
        CompressionType::None => Ok(compressed.to_vec()),
        CompressionType::Lz4 => lz4_flex::block::decompress(compressed, uncompressed_len)
            .map_err(|e| crate::Error::Corrupt(format!("lz4 decompress failed: {e}"))),
        CompressionType::Zstd(_) => zstd::bulk::decompress(compressed, uncompressed_len)
            .map_err(|e| crate::Error::Corrupt(format!("zstd decompress failed: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn compression_serialize_none() {
        let serialized = CompressionType::None.encode_into_vec();
        assert_eq!(1, serialized.len());
    }

    #[test]
    fn compression_serialize_lz4() {
        let serialized = CompressionType::Lz4.encode_into_vec();
        assert_eq!(1, serialized.len());
    }

    #[test]
    fn compression_serialize_zstd() {
        let serialized = CompressionType::Zstd(5).encode_into_vec();
        assert_eq!(5, serialized.len());
    }

    #[test]
    fn roundtrip_lz4() {
        let raw = b"the quick brown fox jumps over the lazy dog".repeat(100);
        let compressed = compress_block(CompressionType::Lz4, &raw);
        let decompressed = decompress_block(CompressionType::Lz4, &compressed, raw.len()).unwrap();
        assert_eq!(raw, decompressed);
    }

    #[test]
    fn roundtrip_zstd() {
        let raw = b"the quick brown fox jumps over the lazy dog".repeat(100);
        let compressed = compress_block(CompressionType::Zstd(3), &raw);
        let decompressed =
            decompress_block(CompressionType::Zstd(3), &compressed, raw.len()).unwrap();
        assert_eq!(raw, decompressed);
    }

    #[test]
    fn roundtrip_none() {
        let raw = b"raw bytes, no compression".to_vec();
        let compressed = compress_block(CompressionType::None, &raw);
        let decompressed = decompress_block(CompressionType::None, &compressed, raw.len()).unwrap();
        assert_eq!(raw, decompressed);
    }
}
