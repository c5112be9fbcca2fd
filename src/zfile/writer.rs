// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Single-forward-pass ZFile builder (`spec.md` §4.4).
//!
//! Grounded in `examples/original_source/src/overlaybd/zfile/zfile.cpp`'s
//! `ZFileBuilder`.

use super::header::{CompressOptions, ZHeaderFlags, ZHeaderTrailer, RECORD_LEN};
use super::reader::ZFileReader;
use crate::checksum::crc32c;
use crate::coding::Encode;
use crate::compression::compress_block;
use crate::fs::FileSystem;
use byteorder::{LittleEndian, WriteBytesExt};
use std::path::Path;

/// Builds a ZFile in a single forward pass over the input.
pub struct ZFileWriter {
    file: std::fs::File,
    opt: CompressOptions,
    lengths: Vec<u32>,
    raw_data_size: u64,
    cursor: u64,
    pending: Vec<u8>,
}

impl ZFileWriter {
    /// Opens `path` for writing and reserves the zero-filled header
    /// placeholder (`spec.md` §4.4 step 1).
    pub fn create<F: FileSystem>(path: &Path, opt: CompressOptions) -> crate::Result<Self> {
        if !opt.block_size.is_power_of_two() {
            return Err(crate::Error::InvalidArgument("zfile block_size must be a power of two"));
        }

        let file = F::create_new(path)?;
        let placeholder = ZHeaderTrailer::new(opt);
        crate::file::pwrite_all_at(&file, &placeholder.encode_into_vec(), 0)?;

        Ok(Self {
            file,
            opt,
            lengths: Vec::new(),
            raw_data_size: 0,
            cursor: RECORD_LEN as u64,
            pending: Vec::new(),
        })
    }

    /// Compresses and appends `data`. May be called repeatedly; each call's
    /// input need not itself be block-aligned as long as the total input is
    /// fed in order — a partial tail is buffered across calls so every
    /// emitted block except the very last (flushed by [`Self::finish`]) is
    /// exactly `block_size` bytes.
    pub fn write_all(&mut self, data: &[u8]) -> crate::Result<()> {
        let block_size = self.opt.block_size as usize;
        let mut data = data;

        if !self.pending.is_empty() {
            let need = block_size - self.pending.len();
            let take = need.min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.pending.len() < block_size {
                return Ok(());
            }
            let block = std::mem::take(&mut self.pending);
            self.write_block(&block)?;
        }

        let full_len = (data.len() / block_size) * block_size;
        for chunk in data[..full_len].chunks(block_size) {
            self.write_block(chunk)?;
        }
        self.pending.extend_from_slice(&data[full_len..]);

        Ok(())
    }

    fn write_block(&mut self, raw: &[u8]) -> crate::Result<()> {
        let compressed = compress_block(self.opt.algo, raw);

        let mut on_disk = compressed;
        if self.opt.verify {
            let crc = crc32c(&on_disk);
            on_disk.write_u32::<LittleEndian>(crc)?;
        }

        crate::file::pwrite_all_at(&self.file, &on_disk, self.cursor)?;
        self.cursor += on_disk.len() as u64;
        self.lengths.push(on_disk.len() as u32);
        self.raw_data_size += raw.len() as u64;

        Ok(())
    }

    /// Writes the length array, trailer, and finalized header, then
    /// reopens the file as a [`ZFileReader`] (`spec.md` §4.4 steps 2-5).
    pub fn finish<F: FileSystem>(mut self, path: &Path, max_io_size: usize) -> crate::Result<ZFileReader> {
        if !self.pending.is_empty() {
            let block = std::mem::take(&mut self.pending);
            self.write_block(&block)?;
        }

        let index_offset = self.cursor;
        let mut index_bytes = Vec::with_capacity(self.lengths.len() * 4);
        for len in &self.lengths {
            index_bytes.write_u32::<LittleEndian>(*len)?;
        }
        crate::file::pwrite_all_at(&self.file, &index_bytes, index_offset)?;

        let trailer = ZHeaderTrailer {
            flags: ZHeaderFlags {
                is_header: false,
                is_sealed: true,
                header_overwrite: false,
            },
            index_offset,
            index_size: self.lengths.len() as u64,
            raw_data_size: self.raw_data_size,
            opt: self.opt,
        };
        let trailer_offset = index_offset + index_bytes.len() as u64;
        crate::file::pwrite_all_at(&self.file, &trailer.encode_into_vec(), trailer_offset)?;

        let sealed_header = ZHeaderTrailer {
            flags: ZHeaderFlags {
                is_header: true,
                is_sealed: true,
                header_overwrite: true,
            },
            ..trailer
        };
        crate::file::pwrite_all_at(&self.file, &sealed_header.encode_into_vec(), 0)?;
        self.file.sync_all()?;

        ZFileReader::open::<F>(path, max_io_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionType;
    use crate::fs::StdFileSystem;
    use test_log::test;

    #[test]
    fn unaligned_multi_call_write_matches_single_call() {
        let raw: Vec<u8> = (0..10_000u32).map(|i| (i % 199) as u8).collect();
        let opt = CompressOptions {
            algo: CompressionType::Lz4,
            block_size: 4096,
            verify: true,
            dict_size: 0,
        };

        let dir = tempfile::tempdir().unwrap();
        let one_shot_path = dir.path().join("one_shot.zfile");
        let mut one_shot = ZFileWriter::create::<StdFileSystem>(&one_shot_path, opt).unwrap();
        one_shot.write_all(&raw).unwrap();
        let one_shot_reader = one_shot.finish::<StdFileSystem>(&one_shot_path, 4096).unwrap();

        let chunked_path = dir.path().join("chunked.zfile");
        let mut chunked = ZFileWriter::create::<StdFileSystem>(&chunked_path, opt).unwrap();
        for chunk in raw.chunks(777) {
            chunked.write_all(chunk).unwrap();
        }
        let chunked_reader = chunked.finish::<StdFileSystem>(&chunked_path, 4096).unwrap();

        let mut one_shot_out = vec![0u8; raw.len()];
        one_shot_reader.pread(&mut one_shot_out, 0).unwrap();

        let mut chunked_out = vec![0u8; raw.len()];
        chunked_reader.pread(&mut chunked_out, 0).unwrap();

        assert_eq!(raw, one_shot_out);
        assert_eq!(raw, chunked_out);
    }
}
