// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::header::{HeaderTrailer, RECORD_LEN};
use super::{check_alignment, BlockIoHandle, BlockIoKind, DEFAULT_MAX_IO_SIZE, SECTOR_SIZE};
use crate::coding::Decode;
use crate::fs::FileSystem;
use crate::layer_index::{foreach_segments, Index, LayerIndex};
use crate::segment::{Segment, SegmentMapping, ENCODED_LEN};
use crate::Error;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// A sealed, immutable LSMT layer: `[header][data blocks][index][trailer]`
/// (`spec.md` §4.2, §6.1).
pub struct RoLayer {
    index: Index,
    files: Vec<BlockIoHandle>,
    virtual_size: u64,
    uuid: Uuid,
    parent_uuid: Uuid,
    max_io_size: usize,
}

impl RoLayer {
    /// Opens a sealed single-file RO layer, validating its header/trailer
    /// and loading its index into memory.
    pub fn open<F: FileSystem>(path: &Path, max_io_size: usize) -> crate::Result<Self> {
        if max_io_size % 4096 != 0 {
            return Err(Error::InvalidArgument("max_io_size must be a multiple of 4096"));
        }

        let file = F::open(path)?;
        let file_len = file.metadata()?.len();

        let header = {
            let bytes = crate::file::read_exact_at(&file, 0, RECORD_LEN)?;
            HeaderTrailer::decode_from(&mut &bytes[..])?
        };

        if !header.flags.is_sealed || !header.flags.is_data_file {
            return Err(Error::Corrupt("layer is not a sealed data file".into()));
        }

        let trailer_offset = file_len.checked_sub(RECORD_LEN as u64).ok_or_else(|| {
            Error::Corrupt("file too small to hold a trailer".into())
        })?;
        let trailer = {
            let bytes = crate::file::read_exact_at(&file, trailer_offset, RECORD_LEN)?;
            HeaderTrailer::decode_from(&mut &bytes[..])?
        };

        if trailer.uuid != header.uuid {
            return Err(Error::Corrupt("header/trailer uuid mismatch".into()));
        }

        let index_bytes_len = (trailer.index_size as usize) * ENCODED_LEN;
        if trailer.index_offset + index_bytes_len as u64 + RECORD_LEN as u64 > file_len {
            return Err(Error::Corrupt("index extends past end of file".into()));
        }

        let raw_bytes = crate::file::read_exact_at(&file, trailer.index_offset, index_bytes_len)?;
        let mut raw = Vec::with_capacity(trailer.index_size as usize);
        let mut cursor = &raw_bytes[..];
        for _ in 0..trailer.index_size {
            raw.push(SegmentMapping::decode_from(&mut cursor)?);
        }

        let moffset_low = RECORD_LEN as u64 / SECTOR_SIZE;
        let moffset_high = trailer.index_offset / SECTOR_SIZE;
        let vsize_sectors = trailer.virtual_size.div_ceil(SECTOR_SIZE);

        let index = Index::new(&raw, moffset_low, moffset_high, vsize_sectors)?;

        Ok(Self {
            index,
            files: vec![Arc::new(file)],
            virtual_size: trailer.virtual_size,
            uuid: trailer.uuid,
            parent_uuid: trailer.parent_uuid,
            max_io_size,
        })
    }

    /// Constructs a sealed-in-memory RO view directly from an index and a
    /// single backing file, skipping a re-read of the file we just wrote
    /// (the `reopen` path of `RwLayer::close_seal`).
    #[must_use]
    pub fn from_parts(
        index: Index,
        file: BlockIoHandle,
        virtual_size: u64,
        uuid: Uuid,
        parent_uuid: Uuid,
        max_io_size: usize,
    ) -> Self {
        Self {
            index,
            files: vec![file],
            virtual_size,
            uuid,
            parent_uuid,
            max_io_size,
        }
    }

    /// This layer's own identity.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The UUID of the layer this one was built atop, or nil if none.
    #[must_use]
    pub fn parent_uuid(&self) -> Uuid {
        self.parent_uuid
    }

    /// Logical size in bytes.
    #[must_use]
    pub fn virtual_size(&self) -> u64 {
        self.virtual_size
    }

    #[must_use]
    pub(crate) fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub(crate) fn files(&self) -> &[BlockIoHandle] {
        &self.files
    }

    /// This layer's mappings, in ascending logical order, covering the
    /// whole of `virtual_size` (`spec.md` §8 invariant 2: disjoint, no
    /// zero-length entries).
    #[must_use]
    pub fn mappings(&self) -> Vec<SegmentMapping> {
        let q_len = u32::try_from(self.virtual_size.div_ceil(SECTOR_SIZE)).unwrap_or(u32::MAX);
        self.index.lookup(Segment::new(0, q_len))
    }

    /// `fstat.st_blocks`: number of 512-byte sectors covered by non-zeroed
    /// mappings.
    #[must_use]
    pub fn block_count(&self) -> u64 {
        let mut total = 0u64;
        foreach_segments(
            &self.index,
            Segment::new(0, u32::try_from(self.virtual_size / SECTOR_SIZE).unwrap_or(u32::MAX)),
            |_| {},
            |m| total += u64::from(m.length()),
        );
        total
    }

    /// Reads `buf.len()` bytes starting at byte `offset`, per `spec.md`
    /// §4.2: sector-aligned, chunked on `max_io_size`, zero-filling holes,
    /// dispatching data mappings to `files[m.tag]` with one short-read
    /// retry.
    pub fn pread(&self, buf: &mut [u8], offset: u64) -> crate::Result<usize> {
        check_alignment(offset, buf.len() as u64)?;

        if buf.len() > self.max_io_size {
            let mut done = 0;
            while done < buf.len() {
                let chunk = (buf.len() - done).min(self.max_io_size);
                self.pread(&mut buf[done..done + chunk], offset + done as u64)?;
                done += chunk;
            }
            return Ok(buf.len());
        }

        let q_off = offset / SECTOR_SIZE;
        let q_len = u32::try_from(buf.len() as u64 / SECTOR_SIZE)
            .map_err(|_| Error::InvalidArgument("read too large"))?;

        let mut result = Ok(());
        foreach_segments(
            &self.index,
            Segment::new(q_off, q_len),
            |hole| {
                let start = ((hole.offset - q_off) * SECTOR_SIZE) as usize;
                let len = (u64::from(hole.length) * SECTOR_SIZE) as usize;
                if let Some(slice) = buf.get_mut(start..start + len) {
                    slice.fill(0);
                }
            },
            |m| {
                if result.is_err() {
                    return;
                }
                result = self.read_mapping(buf, q_off, m);
            },
        );
        result?;

        Ok(buf.len())
    }

    fn read_mapping(&self, buf: &mut [u8], q_off: u64, m: &SegmentMapping) -> crate::Result<()> {
        let start = ((m.offset() - q_off) * SECTOR_SIZE) as usize;
        let len = (u64::from(m.length()) * SECTOR_SIZE) as usize;
        let phys_offset = m.moffset * SECTOR_SIZE;

        let file = self
            .files
            .get(m.tag as usize)
            .ok_or_else(|| Error::Corrupt("mapping tag has no backing file".into()))?;

        let dst = buf
            .get_mut(start..start + len)
            .ok_or_else(|| Error::Corrupt("mapping range outside query buffer".into()))?;

        let got = file.pread(dst, phys_offset)?;
        if got < len {
            log::warn!("short read at sector {}, retrying tail", m.offset());
            let got2 = file.pread(&mut dst[got..], phys_offset + got as u64)?;
            if got + got2 < len {
                log::warn!("short read persisted after retry, zero-filling tail");
                dst[got + got2..].fill(0);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::StdFileSystem;
    use crate::lsmt::rw::RwLayer;
    use test_log::test;

    #[test]
    fn seal_then_reopen_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("layer.data");

        let mut rw = RwLayer::create::<StdFileSystem>(
            &data_path,
            None,
            65536,
            Uuid::new_v4(),
            Uuid::nil(),
            4096,
            0,
        )
        .unwrap();

        rw.pwrite(&[b'A'; 512], 0).unwrap();
        rw.pwrite(&[b'B'; 1024], 4096).unwrap();

        let uuid = rw.uuid();
        rw.close_seal::<StdFileSystem>(false).unwrap();

        let ro = RoLayer::open::<StdFileSystem>(&data_path, DEFAULT_MAX_IO_SIZE).unwrap();
        assert_eq!(uuid, ro.uuid());
        assert_eq!(65536, ro.virtual_size());

        let mut buf = [0u8; 512];
        ro.pread(&mut buf, 0).unwrap();
        assert_eq!([b'A'; 512], buf);

        let mut buf = [0u8; 1024];
        ro.pread(&mut buf, 4096).unwrap();
        assert_eq!([b'B'; 1024], buf);

        let mut buf = [0u8; 512];
        ro.pread(&mut buf, 1024).unwrap();
        assert_eq!([0u8; 512], buf);
    }
}
