// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Flattens a stacked logical view into a single new sealed LSMT layer
//! (`spec.md` §4.6).
//!
//! Grounded in `examples/original_source/src/overlaybd/lsmt/file.cpp`'s
//! `LSMTFile::compact`. Per the redesign note in `spec.md` §9, zero-block
//! detection is actually performed here rather than unconditionally
//! suppressed as the source's guarded-off `is_zero_block` does.

use crate::coding::Encode;
use crate::fs::FileSystem;
use crate::lsmt::header::{HeaderFlags, HeaderTrailer, RECORD_LEN};
use crate::lsmt::{BlockIo, BlockIoHandle, RoLayer, SECTOR_SIZE};
use crate::segment::{Segment, SegmentMapping, ENCODED_LEN};
use crate::Error;
use std::path::Path;
use uuid::Uuid;

/// Maximum chunk size used when copying a data mapping's bytes from source
/// to destination (`spec.md` §4.6).
const COPY_BUFFER_SIZE: usize = 32 * 1024;

const ENTRIES_PER_SECTOR: usize = (SECTOR_SIZE as usize) / ENCODED_LEN;

/// Flattens a stacked view into a single sealed RO LSMT layer.
#[derive(Debug, Clone, Copy)]
pub struct Compactor {
    detect_zero_blocks: bool,
}

impl Default for Compactor {
    /// Zero-block detection on: the source's `is_zero_block` unconditionally
    /// returned `true` (detection off), which `spec.md` §9 calls out as a
    /// guarded-off bug, not an intended design.
    fn default() -> Self {
        Self {
            detect_zero_blocks: true,
        }
    }
}

impl Compactor {
    /// Creates a compactor with explicit control over zero-block detection
    /// (splitting a data mapping wherever a 512-byte sector is entirely
    /// zero, emitting a zeroed sub-mapping instead of writing the zero
    /// bytes). See [`Compactor::default`] for the recommended setting.
    #[must_use]
    pub fn new(detect_zero_blocks: bool) -> Self {
        Self { detect_zero_blocks }
    }

    /// Reads `index`'s view of `sources` and writes a single new sealed
    /// LSMT layer at `dest`, then reopens and returns it.
    pub fn compact<F: FileSystem>(
        &self,
        sources: &[BlockIoHandle],
        index: &crate::layer_index::Index,
        dest: &Path,
        uuid: Uuid,
        parent_uuid: Uuid,
        virtual_size: u64,
        max_io_size: usize,
    ) -> crate::Result<RoLayer> {
        let dst = F::create_new(dest)?;

        let header = HeaderTrailer::new(
            HeaderFlags {
                is_header: true,
                is_data_file: true,
                is_sealed: false,
                is_sparse_rw: false,
            },
            uuid,
            parent_uuid,
            virtual_size,
        );
        dst.pwrite(&header.encode_into_vec(), 0)?;

        let mut moffset = RECORD_LEN as u64 / SECTOR_SIZE;
        let mut out: Vec<SegmentMapping> = Vec::new();

        let q_len_sectors = u32::try_from(virtual_size.div_ceil(SECTOR_SIZE)).unwrap_or(u32::MAX);
        let all_mappings = index.lookup(Segment::new(0, q_len_sectors));

        for m in &all_mappings {
            if m.zeroed {
                out.push(SegmentMapping::new_zeroed(m.offset(), m.length(), moffset, 0));
                continue;
            }

            let src = sources
                .get(m.tag as usize)
                .ok_or_else(|| Error::Corrupt("compaction mapping tag has no source".into()))?;

            moffset = self.copy_mapping(src.as_ref(), &dst, m, moffset, &mut out)?;
        }

        let merged = coalesce(out);
        let index_offset = moffset * SECTOR_SIZE;

        let mut padded = merged;
        let remainder = padded.len() % ENTRIES_PER_SECTOR;
        if remainder != 0 {
            padded.resize(padded.len() + (ENTRIES_PER_SECTOR - remainder), SegmentMapping::invalid_mapping());
        }

        let mut index_bytes = Vec::with_capacity(padded.len() * ENCODED_LEN);
        for m in &padded {
            m.encode_into(&mut index_bytes)
                .map_err(|_| Error::Corrupt("failed to encode compacted index".into()))?;
        }
        dst.pwrite(&index_bytes, index_offset)?;

        let trailer = HeaderTrailer {
            flags: HeaderFlags {
                is_header: false,
                is_data_file: true,
                is_sealed: true,
                is_sparse_rw: false,
            },
            index_offset,
            index_size: padded.len() as u64,
            virtual_size,
            uuid,
            parent_uuid,
            user_tag: [0; 256],
        };
        let trailer_offset = index_offset + index_bytes.len() as u64;
        dst.pwrite(&trailer.encode_into_vec(), trailer_offset)?;

        let sealed_header = HeaderTrailer {
            flags: HeaderFlags {
                is_header: true,
                is_data_file: true,
                is_sealed: true,
                is_sparse_rw: false,
            },
            ..trailer
        };
        dst.pwrite(&sealed_header.encode_into_vec(), 0)?;
        dst.fsync()?;

        RoLayer::open::<F>(dest, max_io_size)
    }

    fn copy_mapping(
        &self,
        src: &dyn BlockIo,
        dst: &std::fs::File,
        m: &SegmentMapping,
        mut moffset: u64,
        out: &mut Vec<SegmentMapping>,
    ) -> crate::Result<u64> {
        let total_bytes = u64::from(m.length()) * SECTOR_SIZE;
        let mut done = 0u64;
        let mut logical_offset = m.offset();

        while done < total_bytes {
            let chunk_len = (total_bytes - done).min(COPY_BUFFER_SIZE as u64) as usize;
            let mut buf = vec![0u8; chunk_len];
            src.pread(&mut buf, m.moffset * SECTOR_SIZE + done)?;

            moffset = self.emit_chunk(&buf, dst, logical_offset, moffset, out)?;

            let sectors = chunk_len as u64 / SECTOR_SIZE;
            logical_offset += sectors;
            done += chunk_len as u64;
        }

        Ok(moffset)
    }

    /// Splits `buf` (a whole number of sectors) into runs of all-zero and
    /// non-zero sectors, writing only the non-zero runs to `dst` and
    /// recording a zeroed mapping for the rest.
    fn emit_chunk(
        &self,
        buf: &[u8],
        dst: &std::fs::File,
        logical_offset: u64,
        mut moffset: u64,
        out: &mut Vec<SegmentMapping>,
    ) -> crate::Result<u64> {
        let sector = SECTOR_SIZE as usize;
        let sectors = buf.len() / sector;

        if !self.detect_zero_blocks {
            dst.pwrite(buf, moffset * SECTOR_SIZE)?;
            out.push(SegmentMapping::new(logical_offset, sectors as u32, moffset, 0));
            return Ok(moffset + sectors as u64);
        }

        let mut i = 0;
        while i < sectors {
            let is_zero = is_zero_block(&buf[i * sector..(i + 1) * sector]);
            let run_start = i;
            while i < sectors && is_zero_block(&buf[i * sector..(i + 1) * sector]) == is_zero {
                i += 1;
            }
            let run_len = (i - run_start) as u32;

            if is_zero {
                out.push(SegmentMapping::new_zeroed(logical_offset + run_start as u64, run_len, moffset, 0));
            } else {
                let start = run_start * sector;
                let end = i * sector;
                dst.pwrite(&buf[start..end], moffset * SECTOR_SIZE)?;
                out.push(SegmentMapping::new(logical_offset + run_start as u64, run_len, moffset, 0));
                moffset += u64::from(run_len);
            }
        }

        Ok(moffset)
    }
}

fn is_zero_block(sector: &[u8]) -> bool {
    sector.iter().all(|&b| b == 0)
}

/// Merges adjacent mappings that are contiguous in both logical and
/// physical space (data mappings) or just logical space (zeroed mappings),
/// per `spec.md` §4.6 step 4.
fn coalesce(mappings: Vec<SegmentMapping>) -> Vec<SegmentMapping> {
    let mut out: Vec<SegmentMapping> = Vec::with_capacity(mappings.len());

    for m in mappings {
        if let Some(last) = out.last_mut() {
            let contiguous_logical = last.end() == m.offset();
            let same_kind = last.zeroed == m.zeroed;
            let contiguous_physical = m.zeroed || last.mend() == m.moffset;

            if contiguous_logical && same_kind && contiguous_physical {
                let new_length = last.length() + m.length();
                if new_length <= crate::segment::MAX_LENGTH {
                    last.segment.length = new_length;
                    continue;
                }
            }
        }
        out.push(m);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::StdFileSystem;
    use crate::lsmt::RwLayer;
    use std::sync::Arc;
    use test_log::test;

    #[test]
    fn compact_single_layer_preserves_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let rw = RwLayer::create::<StdFileSystem>(
            &dir.path().join("source.data"),
            None,
            8192,
            Uuid::new_v4(),
            Uuid::nil(),
            4096,
            0,
        )
        .unwrap();
        rw.pwrite(&[b'A'; 1024], 0).unwrap();
        rw.pwrite(&[0u8; 1024], 1024).unwrap();
        rw.pwrite(&[b'B'; 2048], 4096).unwrap();

        let dump: Vec<SegmentMapping> = rw
            .combo_index()
            .dump(0)
            .into_iter()
            .filter(|m| !m.is_invalid())
            .collect();
        let source_index = crate::layer_index::Index::from_sorted_trusted(dump.into_boxed_slice());
        let handle: BlockIoHandle = rw.data_file();

        let compactor = Compactor::new(true);
        let compacted = compactor
            .compact::<StdFileSystem>(
                &[handle],
                &source_index,
                &dir.path().join("compacted.data"),
                Uuid::new_v4(),
                Uuid::nil(),
                8192,
                4096,
            )
            .unwrap();

        let mut buf = [0u8; 1024];
        compacted.pread(&mut buf, 0).unwrap();
        assert_eq!([b'A'; 1024], buf);

        let mut buf = [0u8; 2048];
        compacted.pread(&mut buf, 4096).unwrap();
        assert_eq!([b'B'; 2048], buf);

        let mut buf = [0u8; 1024];
        compacted.pread(&mut buf, 1024).unwrap();
        assert_eq!([0u8; 1024], buf);
    }

    #[test]
    fn zero_block_detection_splits_mixed_mapping() {
        let mut buf = vec![0xAAu8; 4096];
        buf[512..1024].fill(0);
        let runs = {
            let mut out = Vec::new();
            let mut i = 0;
            let sectors = buf.len() / 512;
            while i < sectors {
                let start = i;
                let zero = is_zero_block(&buf[i * 512..(i + 1) * 512]);
                while i < sectors && is_zero_block(&buf[i * 512..(i + 1) * 512]) == zero {
                    i += 1;
                }
                out.push((start, i - start, zero));
            }
            out
        };
        assert_eq!(vec![(0, 1, false), (1, 1, true), (2, 6, false)], runs);
    }
}
