// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The 512-byte `HeaderTrailer` record written at the start (and, for
//! sealed RO layers, also at the end) of every LSMT file.
//!
//! Grounded in `examples/original_source/src/overlaybd/lsmt/file.cpp`'s
//! `LSMTFile::HeaderTrailer` (`spec.md` §3, §6.1).

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};
use uuid::Uuid;

/// `"LSMT\0\1\2\0"` read as a little-endian `u64`.
pub const MAGIC0: u64 = 0x0002_0100_544D_534C;

/// Fixed UUID constant stamped into every LSMT header/trailer, distinct
/// from the layer's own identity (`uuid` field).
pub const MAGIC1: Uuid = Uuid::from_bytes([
    0xd2, 0x63, 0x7e, 0x65, 0x44, 0x94, 0x4c, 0x08, 0xd2, 0xa2, 0xc8, 0xec, 0x4f, 0xcf, 0xae, 0x8a,
]);

/// `LSMT_V1`.
pub const VERSION: u16 = 1;
/// `LSMT_V1`.
pub const SUB_VERSION: u16 = 1;

/// Size in bytes of the on-disk record (zero-padded).
pub const RECORD_LEN: usize = 512;

const USER_TAG_LEN: usize = 256;

const FLAG_IS_HEADER: u8 = 1 << 0;
const FLAG_IS_DATA_FILE: u8 = 1 << 1;
const FLAG_IS_SEALED: u8 = 1 << 2;
const FLAG_IS_SPARSE_RW: u8 = 1 << 3;

/// Header/trailer flags (`spec.md` §3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderFlags {
    /// This record is the leading header (as opposed to the trailing copy).
    pub is_header: bool,
    /// The file holds raw data blocks (as opposed to an index-only journal).
    pub is_data_file: bool,
    /// The file is sealed: content and index are final and immutable.
    pub is_sealed: bool,
    /// The file is a sparse RW layer with no separate index journal.
    pub is_sparse_rw: bool,
}

impl HeaderFlags {
    fn to_byte(self) -> u8 {
        let mut b = 0;
        if self.is_header {
            b |= FLAG_IS_HEADER;
        }
        if self.is_data_file {
            b |= FLAG_IS_DATA_FILE;
        }
        if self.is_sealed {
            b |= FLAG_IS_SEALED;
        }
        if self.is_sparse_rw {
            b |= FLAG_IS_SPARSE_RW;
        }
        b
    }

    fn from_byte(b: u8) -> Self {
        Self {
            is_header: b & FLAG_IS_HEADER != 0,
            is_data_file: b & FLAG_IS_DATA_FILE != 0,
            is_sealed: b & FLAG_IS_SEALED != 0,
            is_sparse_rw: b & FLAG_IS_SPARSE_RW != 0,
        }
    }
}

/// The 512-byte LSMT header/trailer record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderTrailer {
    /// Flags for this record.
    pub flags: HeaderFlags,
    /// Byte offset of the on-disk index array (RO/sealed files only).
    pub index_offset: u64,
    /// Number of `SegmentMapping` entries in the index array.
    pub index_size: u64,
    /// Logical size of the layer, in bytes.
    pub virtual_size: u64,
    /// This layer's own identity.
    pub uuid: Uuid,
    /// The UUID of the layer directly beneath this one in a stack, or the
    /// nil UUID if this is the bottommost layer.
    pub parent_uuid: Uuid,
    /// Freeform user tag, zero-padded to 256 bytes.
    pub user_tag: [u8; USER_TAG_LEN],
}

impl HeaderTrailer {
    /// Creates a fresh record with an empty user tag.
    #[must_use]
    pub fn new(
        flags: HeaderFlags,
        uuid: Uuid,
        parent_uuid: Uuid,
        virtual_size: u64,
    ) -> Self {
        Self {
            flags,
            index_offset: 0,
            index_size: 0,
            virtual_size,
            uuid,
            parent_uuid,
            user_tag: [0; USER_TAG_LEN],
        }
    }
}

impl Encode for HeaderTrailer {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        let mut buf = [0u8; RECORD_LEN];
        {
            let mut cursor = Cursor::new(&mut buf[..]);
            cursor.write_u64::<LittleEndian>(MAGIC0)?;
            cursor.write_all(MAGIC1.as_bytes())?;
            cursor.write_u16::<LittleEndian>(VERSION)?;
            cursor.write_u16::<LittleEndian>(SUB_VERSION)?;
            cursor.write_u8(self.flags.to_byte())?;
            cursor.write_u64::<LittleEndian>(self.index_offset)?;
            cursor.write_u64::<LittleEndian>(self.index_size)?;
            cursor.write_u64::<LittleEndian>(self.virtual_size)?;
            cursor.write_all(self.uuid.as_bytes())?;
            cursor.write_all(self.parent_uuid.as_bytes())?;
            cursor.write_all(&self.user_tag)?;
        }
        writer.write_all(&buf)?;
        Ok(())
    }
}

impl Decode for HeaderTrailer {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let mut buf = [0u8; RECORD_LEN];
        reader.read_exact(&mut buf)?;
        let mut cursor = Cursor::new(&buf[..]);

        let magic0 = cursor.read_u64::<LittleEndian>()?;
        if magic0 != MAGIC0 {
            return Err(DecodeError::InvalidMagic("lsmt header magic0"));
        }

        let mut magic1_bytes = [0u8; 16];
        cursor.read_exact(&mut magic1_bytes)?;
        if Uuid::from_bytes(magic1_bytes) != MAGIC1 {
            return Err(DecodeError::InvalidMagic("lsmt header magic1"));
        }

        let version = cursor.read_u16::<LittleEndian>()?;
        let _sub_version = cursor.read_u16::<LittleEndian>()?;
        if version != VERSION {
            return Err(DecodeError::InvalidMagic("lsmt header version"));
        }

        let flags = HeaderFlags::from_byte(cursor.read_u8()?);
        let index_offset = cursor.read_u64::<LittleEndian>()?;
        let index_size = cursor.read_u64::<LittleEndian>()?;
        let virtual_size = cursor.read_u64::<LittleEndian>()?;

        let mut uuid_bytes = [0u8; 16];
        cursor.read_exact(&mut uuid_bytes)?;
        let uuid = Uuid::from_bytes(uuid_bytes);

        let mut parent_bytes = [0u8; 16];
        cursor.read_exact(&mut parent_bytes)?;
        let parent_uuid = Uuid::from_bytes(parent_bytes);

        let mut user_tag = [0u8; USER_TAG_LEN];
        cursor.read_exact(&mut user_tag)?;

        Ok(Self {
            flags,
            index_offset,
            index_size,
            virtual_size,
            uuid,
            parent_uuid,
            user_tag,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn roundtrip() {
        let header = HeaderTrailer::new(
            HeaderFlags {
                is_header: true,
                is_data_file: true,
                is_sealed: true,
                is_sparse_rw: false,
            },
            Uuid::new_v4(),
            Uuid::nil(),
            65536,
        );

        let bytes = header.encode_into_vec();
        assert_eq!(RECORD_LEN, bytes.len());

        let decoded = HeaderTrailer::decode_from(&mut &bytes[..]).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = [0u8; RECORD_LEN];
        assert!(HeaderTrailer::decode_from(&mut &bytes[..]).is_err());
    }
}
