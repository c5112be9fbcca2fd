// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The 512-byte `HeaderTrailer` record for a ZFile compressed blob
//! container (`spec.md` §4.4, §6.2).
//!
//! Grounded in `examples/original_source/src/overlaybd/zfile/zfile.cpp`'s
//! `ZFile::HeaderTrailer`, distinct from [`crate::lsmt::header`]'s record
//! even though both share the same 512-byte-record, magic-then-flags shape.

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use crate::compression::CompressionType;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};
use uuid::Uuid;

/// `"ZFile\0\1\0"` read as a little-endian `u64`.
pub const MAGIC0: u64 = 0x0001_0065_6C69_465A;

/// Fixed UUID constant stamped into every ZFile header/trailer.
pub const MAGIC1: Uuid = Uuid::from_bytes([
    0x69, 0x6a, 0x75, 0x74, 0x79, 0x2e, 0x66, 0x79, 0x41, 0x40, 0x6c, 0x69, 0x62, 0x61, 0x62, 0x00,
]);

/// Size in bytes of the on-disk record (zero-padded).
pub const RECORD_LEN: usize = 512;

const FLAG_IS_HEADER: u8 = 1 << 0;
const FLAG_IS_SEALED: u8 = 1 << 1;
const FLAG_HEADER_OVERWRITE: u8 = 1 << 2;

/// Flags for a ZFile header/trailer record (`spec.md` §4.4).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZHeaderFlags {
    /// This record is the leading header, as opposed to the trailing copy.
    pub is_header: bool,
    /// The file is finalized: data blocks, length array, and trailer are
    /// all written.
    pub is_sealed: bool,
    /// The leading header has been overwritten post-finalization with the
    /// real fields, so a reader need not consult the trailer at all.
    pub header_overwrite: bool,
}

impl ZHeaderFlags {
    fn to_byte(self) -> u8 {
        let mut b = 0;
        if self.is_header {
            b |= FLAG_IS_HEADER;
        }
        if self.is_sealed {
            b |= FLAG_IS_SEALED;
        }
        if self.header_overwrite {
            b |= FLAG_HEADER_OVERWRITE;
        }
        b
    }

    fn from_byte(b: u8) -> Self {
        Self {
            is_header: b & FLAG_IS_HEADER != 0,
            is_sealed: b & FLAG_IS_SEALED != 0,
            header_overwrite: b & FLAG_HEADER_OVERWRITE != 0,
        }
    }
}

/// Compression and verification options, embedded in the ZFile
/// `HeaderTrailer` so a reader never needs out-of-band configuration
/// (`spec.md` §4.4, §6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressOptions {
    /// Compression algorithm applied to every block.
    pub algo: CompressionType,
    /// Logical size, in bytes, of each compressed block (power of two).
    pub block_size: u32,
    /// Whether each compressed block carries a trailing CRC32C.
    pub verify: bool,
    /// Dictionary size hint passed to the compressor, 0 if unused.
    pub dict_size: u32,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            algo: CompressionType::default(),
            block_size: 4096,
            verify: true,
            dict_size: 0,
        }
    }
}

impl Encode for CompressOptions {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        self.algo.encode_into(writer)?;
        writer.write_u32::<LittleEndian>(self.block_size)?;
        writer.write_u8(u8::from(self.verify))?;
        writer.write_u32::<LittleEndian>(self.dict_size)?;
        Ok(())
    }
}

impl Decode for CompressOptions {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let algo = CompressionType::decode_from(reader)?;
        let block_size = reader.read_u32::<LittleEndian>()?;
        let verify = reader.read_u8()? != 0;
        let dict_size = reader.read_u32::<LittleEndian>()?;
        Ok(Self {
            algo,
            block_size,
            verify,
            dict_size,
        })
    }
}

/// The 512-byte ZFile header/trailer record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZHeaderTrailer {
    /// Flags for this record.
    pub flags: ZHeaderFlags,
    /// Byte offset of the trailing `u32` compressed-length array.
    pub index_offset: u64,
    /// Number of blocks (entries in the length array).
    pub index_size: u64,
    /// Total uncompressed size of the original input, in bytes.
    pub raw_data_size: u64,
    /// Compression and verification options used to produce this file.
    pub opt: CompressOptions,
}

impl ZHeaderTrailer {
    /// Creates a fresh, unsealed record (used for the zero-filled
    /// placeholder header written before the builder's forward pass).
    #[must_use]
    pub fn new(opt: CompressOptions) -> Self {
        Self {
            flags: ZHeaderFlags::default(),
            index_offset: 0,
            index_size: 0,
            raw_data_size: 0,
            opt,
        }
    }
}

impl Encode for ZHeaderTrailer {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        let mut buf = [0u8; RECORD_LEN];
        {
            let mut cursor = Cursor::new(&mut buf[..]);
            cursor.write_u64::<LittleEndian>(MAGIC0)?;
            cursor.write_all(MAGIC1.as_bytes())?;
            cursor.write_u8(self.flags.to_byte())?;
            cursor.write_u64::<LittleEndian>(self.index_offset)?;
            cursor.write_u64::<LittleEndian>(self.index_size)?;
            cursor.write_u64::<LittleEndian>(self.raw_data_size)?;
            self.opt.encode_into(&mut cursor)?;
        }
        writer.write_all(&buf)?;
        Ok(())
    }
}

impl Decode for ZHeaderTrailer {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let mut buf = [0u8; RECORD_LEN];
        reader.read_exact(&mut buf)?;
        let mut cursor = Cursor::new(&buf[..]);

        let magic0 = cursor.read_u64::<LittleEndian>()?;
        if magic0 != MAGIC0 {
            return Err(DecodeError::InvalidMagic("zfile header magic0"));
        }

        let mut magic1_bytes = [0u8; 16];
        cursor.read_exact(&mut magic1_bytes)?;
        if Uuid::from_bytes(magic1_bytes) != MAGIC1 {
            return Err(DecodeError::InvalidMagic("zfile header magic1"));
        }

        let flags = ZHeaderFlags::from_byte(cursor.read_u8()?);
        let index_offset = cursor.read_u64::<LittleEndian>()?;
        let index_size = cursor.read_u64::<LittleEndian>()?;
        let raw_data_size = cursor.read_u64::<LittleEndian>()?;
        let opt = CompressOptions::decode_from(&mut cursor)?;

        Ok(Self {
            flags,
            index_offset,
            index_size,
            raw_data_size,
            opt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn roundtrip() {
        let header = ZHeaderTrailer {
            flags: ZHeaderFlags {
                is_header: true,
                is_sealed: true,
                header_overwrite: true,
            },
            index_offset: 1_048_576,
            index_size: 256,
            raw_data_size: 1_000_000,
            opt: CompressOptions {
                algo: CompressionType::Lz4,
                block_size: 4096,
                verify: true,
                dict_size: 0,
            },
        };

        let bytes = header.encode_into_vec();
        assert_eq!(RECORD_LEN, bytes.len());

        let decoded = ZHeaderTrailer::decode_from(&mut &bytes[..]).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = [0u8; RECORD_LEN];
        assert!(ZHeaderTrailer::decode_from(&mut &bytes[..]).is_err());
    }
}
