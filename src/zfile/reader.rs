// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Random-access ZFile reader (`spec.md` §4.4).
//!
//! Grounded in `examples/original_source/src/overlaybd/zfile/zfile.cpp`'s
//! `ZFile::pread`.

use super::header::{CompressOptions, ZHeaderTrailer, RECORD_LEN};
use super::jump_table::JumpTable;
use crate::checksum::verify_block;
use crate::coding::Decode;
use crate::compression::decompress_block;
use crate::fs::FileSystem;
use crate::lsmt::{BlockIo, BlockIoKind};
use byteorder::{LittleEndian, ReadBytesExt};
use std::path::Path;
use std::sync::Arc;

/// A sweep reads at most this many bytes from the backing file in one
/// `pread` call (`spec.md` §4.4 step 3).
const MAX_READ_SIZE: u64 = 64 * 1024;

/// A read-only handle onto a sealed ZFile compressed blob container.
pub struct ZFileReader {
    file: Arc<dyn BlockIo>,
    jump_table: JumpTable,
    opt: CompressOptions,
    raw_data_size: u64,
}

impl ZFileReader {
    /// Opens and validates a sealed ZFile, loading its length array and
    /// building the in-memory jump table.
    pub fn open<F: FileSystem>(path: &Path, _max_io_size: usize) -> crate::Result<Self> {
        let file = F::open(path)?;
        let file_len = file.metadata()?.len();

        let header = {
            let bytes = crate::file::read_exact_at(&file, 0, RECORD_LEN)?;
            ZHeaderTrailer::decode_from(&mut &bytes[..])?
        };

        let record = if header.flags.header_overwrite {
            header
        } else {
            let trailer_offset = file_len.checked_sub(RECORD_LEN as u64).ok_or_else(|| {
                crate::Error::Corrupt("zfile too small to hold a trailer".into())
            })?;
            let bytes = crate::file::read_exact_at(&file, trailer_offset, RECORD_LEN)?;
            ZHeaderTrailer::decode_from(&mut &bytes[..])?
        };

        if !record.flags.is_sealed {
            return Err(crate::Error::Corrupt("zfile is not sealed".into()));
        }

        let index_bytes_len = record.index_size * 4;
        if record.index_offset + index_bytes_len + RECORD_LEN as u64 > file_len {
            return Err(crate::Error::Corrupt("zfile length array extends past end of file".into()));
        }

        let raw_bytes = crate::file::read_exact_at(&file, record.index_offset, index_bytes_len as usize)?;
        let mut lengths = Vec::with_capacity(record.index_size as usize);
        let mut cursor = &raw_bytes[..];
        for _ in 0..record.index_size {
            lengths.push(cursor.read_u32::<LittleEndian>()?);
        }

        let jump_table = JumpTable::build(&lengths, RECORD_LEN as u64);

        Ok(Self {
            file: Arc::new(file),
            jump_table,
            opt: record.opt,
            raw_data_size: record.raw_data_size,
        })
    }

    /// Total uncompressed size of the original input.
    #[must_use]
    pub fn raw_data_size(&self) -> u64 {
        self.raw_data_size
    }

    /// Reads `buf.len()` bytes starting at byte `offset`, decompressing
    /// and verifying whichever blocks the range touches (`spec.md` §4.4
    /// `pread`). Arbitrary byte alignment is supported.
    pub fn pread(&self, buf: &mut [u8], offset: u64) -> crate::Result<usize> {
        let end = (offset + buf.len() as u64).min(self.raw_data_size);
        if offset >= end {
            return Ok(0);
        }
        let count = (end - offset) as usize;

        let block_size = u64::from(self.opt.block_size);
        let first_block = offset / block_size;
        let last_block = (end - 1) / block_size;

        for block in first_block..=last_block {
            let block_data = self.read_block(block)?;

            let block_start = block * block_size;
            let want_start = offset.max(block_start);
            let want_end = end.min(block_start + block_data.len() as u64);

            let src_off = (want_start - block_start) as usize;
            let src_len = (want_end - want_start) as usize;
            let dst_off = (want_start - offset) as usize;

            buf.get_mut(dst_off..dst_off + src_len)
                .ok_or_else(|| crate::Error::Corrupt("zfile read range outside output buffer".into()))?
                .copy_from_slice(&block_data[src_off..src_off + src_len]);
        }

        Ok(count)
    }

    /// Reads, verifies, and decompresses a single block, retrying once on
    /// checksum mismatch after hinting the backing cache to discard the
    /// slot (`spec.md` §4.4 step 3, §9).
    fn read_block(&self, block: u64) -> crate::Result<Vec<u8>> {
        match self.read_block_once(block) {
            Err(crate::Error::ChecksumMismatch { .. }) => {
                self.file.fallocate(0, 0, -1)?;
                self.read_block_once(block)
            }
            other => other,
        }
    }

    fn read_block_once(&self, block: u64) -> crate::Result<Vec<u8>> {
        let on_disk_offset = self.jump_table.offset(block);
        let on_disk_len = self.jump_table.block_len(block) as usize;

        let mut on_disk = vec![0u8; on_disk_len];
        self.sweep_read(&mut on_disk, on_disk_offset)?;

        let compressed = if self.opt.verify {
            let (body, crc_bytes) = on_disk.split_at(on_disk_len - 4);
            let expected = u32::from_le_bytes(crc_bytes.try_into().expect("4 bytes"));
            verify_block(block, body, expected)?;
            body
        } else {
            &on_disk[..]
        };

        let block_size = u64::from(self.opt.block_size);
        let block_start = block * block_size;
        let uncompressed_len = (self.raw_data_size - block_start).min(block_size) as usize;

        decompress_block(self.opt.algo, compressed, uncompressed_len)
    }

    /// Reads `buf.len()` bytes from the backing file at `offset`, in
    /// sweeps of at most [`MAX_READ_SIZE`] (`spec.md` §4.4 step 3).
    fn sweep_read(&self, buf: &mut [u8], offset: u64) -> crate::Result<()> {
        let mut done = 0usize;
        while done < buf.len() {
            let chunk = (buf.len() - done).min(MAX_READ_SIZE as usize);
            let got = self.file.pread(&mut buf[done..done + chunk], offset + done as u64)?;
            if got == 0 {
                return Err(crate::Error::ShortIo {
                    requested: buf.len(),
                    got: done,
                });
            }
            done += got;
        }
        Ok(())
    }
}

impl BlockIo for ZFileReader {
    fn pread(&self, buf: &mut [u8], offset: u64) -> crate::Result<usize> {
        ZFileReader::pread(self, buf, offset)
    }

    fn pwrite(&self, _buf: &[u8], _offset: u64) -> crate::Result<usize> {
        Err(crate::Error::Unsupported("zfile blobs are read-only"))
    }

    fn fsync(&self) -> crate::Result<()> {
        Ok(())
    }

    fn kind(&self) -> BlockIoKind {
        BlockIoKind::ZFile
    }
}
