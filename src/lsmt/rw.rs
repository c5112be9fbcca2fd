// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::header::{HeaderFlags, HeaderTrailer, RECORD_LEN};
use super::ro::RoLayer;
use super::{check_alignment, BlockIo, SECTOR_SIZE};
use crate::coding::Encode;
use crate::fs::FileSystem;
use crate::layer_index::{Index, Index0, LayerIndex};
use crate::segment::{Segment, SegmentMapping, ENCODED_LEN};
use crate::Error;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const ENTRIES_PER_SECTOR: usize = (SECTOR_SIZE as usize) / ENCODED_LEN;

struct Inner {
    index: Index0,
    buffer: Vec<SegmentMapping>,
    virtual_size: u64,
    data_eof_sectors: u64,
    journal_eof_bytes: u64,
}

/// A writable, append-only LSMT layer: `[header][data blocks...]`, plus an
/// optional separate index journal (`spec.md` §4.3, §6.1). A layer with no
/// journal is the "sparse" variant, which relies on the caller to persist
/// and recover its index by other means (e.g. `SEEK_HOLE`/`SEEK_DATA`) —
/// not modeled here since the core only needs to keep `Index0` consistent
/// in memory either way.
pub struct RwLayer {
    fdata: Arc<File>,
    findex: Option<File>,
    uuid: Uuid,
    parent_uuid: Uuid,
    max_io_size: usize,
    group_commit_capacity: usize,
    dest_path: PathBuf,
    inner: Mutex<Inner>,
}

impl RwLayer {
    /// Creates a brand-new RW layer at `data_path`, with an optional index
    /// journal at `index_path`. `group_commit_capacity == 0` disables
    /// buffering: every accepted write is appended to the journal
    /// immediately.
    pub fn create<F: FileSystem>(
        data_path: &Path,
        index_path: Option<&Path>,
        virtual_size: u64,
        uuid: Uuid,
        parent_uuid: Uuid,
        max_io_size: usize,
        group_commit_capacity: usize,
    ) -> crate::Result<Self> {
        if max_io_size % 4096 != 0 {
            return Err(Error::InvalidArgument("max_io_size must be a multiple of 4096"));
        }

        let fdata = F::create_new(data_path)?;
        let header = HeaderTrailer::new(
            HeaderFlags {
                is_header: true,
                is_data_file: true,
                is_sealed: false,
                is_sparse_rw: index_path.is_none(),
            },
            uuid,
            parent_uuid,
            virtual_size,
        );
        let header_bytes = header.encode_into_vec();
        crate::file::pwrite_all_at(&fdata, &header_bytes, 0)?;

        let findex = index_path.map(F::create_new).transpose()?;

        Ok(Self {
            fdata: Arc::new(fdata),
            findex,
            uuid,
            parent_uuid,
            max_io_size,
            group_commit_capacity,
            dest_path: data_path.to_path_buf(),
            inner: Mutex::new(Inner {
                index: Index0::new(),
                buffer: Vec::new(),
                virtual_size,
                data_eof_sectors: RECORD_LEN as u64 / SECTOR_SIZE,
                journal_eof_bytes: 0,
            }),
        })
    }

    /// This layer's own identity.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The UUID of the layer this one is stacked atop, if any.
    #[must_use]
    pub fn parent_uuid(&self) -> Uuid {
        self.parent_uuid
    }

    /// Current logical size in bytes.
    #[must_use]
    pub fn virtual_size(&self) -> u64 {
        self.inner.lock().expect("lock poisoned").virtual_size
    }

    pub(crate) fn combo_index(&self) -> Index0 {
        self.inner.lock().expect("lock poisoned").index.clone()
    }

    pub(crate) fn data_file(&self) -> Arc<File> {
        self.fdata.clone()
    }

    /// Writes `buf` at logical byte `offset`, per `spec.md` §4.3.
    pub fn pwrite(&self, buf: &[u8], offset: u64) -> crate::Result<usize> {
        check_alignment(offset, buf.len() as u64)?;

        if buf.len() > self.max_io_size {
            let mut done = 0;
            while done < buf.len() {
                let chunk = (buf.len() - done).min(self.max_io_size);
                self.pwrite(&buf[done..done + chunk], offset + done as u64)?;
                done += chunk;
            }
            return Ok(buf.len());
        }

        let mut inner = self.inner.lock().expect("lock poisoned");

        let moffset_sectors = inner.data_eof_sectors;
        self.fdata.pwrite(buf, moffset_sectors * SECTOR_SIZE)?;

        let length = u32::try_from(buf.len() as u64 / SECTOR_SIZE)
            .map_err(|_| Error::InvalidArgument("write too large for one segment"))?;
        let m = SegmentMapping::new(offset / SECTOR_SIZE, length, moffset_sectors, 0);

        inner.index.insert(m);
        inner.virtual_size = inner.virtual_size.max(offset + buf.len() as u64);
        inner.data_eof_sectors += buf.len() as u64 / SECTOR_SIZE;

        self.append_index(&mut inner, m)?;

        Ok(buf.len())
    }

    /// `fallocate(PUNCH_HOLE, offset, len)` / `discard(offset, len)`: marks
    /// `[offset, offset+len)` as an implicit-zero hole. `virtual_size` is
    /// unchanged (`spec.md` §8 invariant 8).
    pub fn discard(&self, offset: u64, len: u64) -> crate::Result<()> {
        check_alignment(offset, len)?;

        let mut inner = self.inner.lock().expect("lock poisoned");
        let length = u32::try_from(len / SECTOR_SIZE)
            .map_err(|_| Error::InvalidArgument("discard range too large for one segment"))?;
        let m = SegmentMapping::new_zeroed(offset / SECTOR_SIZE, length, inner.data_eof_sectors, 0);

        inner.index.insert(m);
        self.append_index(&mut inner, m)?;

        Ok(())
    }

    /// `fallocate(KEEP_SIZE, ...)` without `PUNCH_HOLE`: preallocation hint
    /// only, a no-op against the index since the append-only backing has
    /// no use for preallocated-but-unwritten space (`SPEC_FULL.md` §4.3).
    pub fn fallocate_keep_size(&self, _offset: u64, _len: u64) -> crate::Result<()> {
        Ok(())
    }

    fn append_index(&self, inner: &mut Inner, m: SegmentMapping) -> crate::Result<()> {
        let Some(findex) = self.findex.as_ref() else {
            return Ok(());
        };

        if self.group_commit_capacity == 0 {
            let bytes = m.encode_into_vec();
            findex.pwrite(&bytes, inner.journal_eof_bytes)?;
            inner.journal_eof_bytes += bytes.len() as u64;
            return Ok(());
        }

        inner.buffer.push(m);
        if inner.buffer.len() >= self.group_commit_capacity {
            self.flush_buffer(inner, findex)?;
        }

        Ok(())
    }

    fn flush_buffer(&self, inner: &mut Inner, findex: &File) -> crate::Result<()> {
        if inner.buffer.is_empty() {
            return Ok(());
        }

        let remainder = inner.buffer.len() % ENTRIES_PER_SECTOR;
        if remainder != 0 {
            inner
                .buffer
                .resize(inner.buffer.len() + (ENTRIES_PER_SECTOR - remainder), SegmentMapping::invalid_mapping());
        }

        let mut bytes = Vec::with_capacity(inner.buffer.len() * ENCODED_LEN);
        for m in inner.buffer.drain(..) {
            m.encode_into(&mut bytes).map_err(|_| {
                Error::Corrupt("failed to encode group-commit buffer entry".into())
            })?;
        }

        findex.pwrite(&bytes, inner.journal_eof_bytes)?;
        inner.journal_eof_bytes += bytes.len() as u64;

        Ok(())
    }

    /// Flushes the staging buffer, then fsyncs the data file and (if
    /// present) the index journal.
    pub fn fsync(&self) -> crate::Result<()> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        if let Some(findex) = self.findex.as_ref() {
            self.flush_buffer(&mut inner, findex)?;
            findex.fsync()?;
        }
        self.fdata.fsync()?;
        Ok(())
    }

    /// Appends the index and a sealed trailer to `fdata` in place, and
    /// rewrites the header with `is_sealed=true`. If `reopen`, returns a
    /// [`RoLayer`] built from the in-memory dump without re-reading the
    /// file.
    pub fn close_seal<F: FileSystem>(&mut self, reopen: bool) -> crate::Result<Option<RoLayer>> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        if let Some(findex) = self.findex.as_ref() {
            self.flush_buffer(&mut inner, findex)?;
        }

        let dump = inner.index.dump(ENTRIES_PER_SECTOR);

        let index_offset = inner.data_eof_sectors * SECTOR_SIZE;
        let mut index_bytes = Vec::with_capacity(dump.len() * ENCODED_LEN);
        for m in &dump {
            m.encode_into(&mut index_bytes)
                .map_err(|_| Error::Corrupt("failed to encode sealed index".into()))?;
        }
        self.fdata.pwrite(&index_bytes, index_offset)?;

        let trailer = HeaderTrailer {
            flags: HeaderFlags {
                is_header: false,
                is_data_file: true,
                is_sealed: true,
                is_sparse_rw: false,
            },
            index_offset,
            index_size: dump.len() as u64,
            virtual_size: inner.virtual_size,
            uuid: self.uuid,
            parent_uuid: self.parent_uuid,
            user_tag: [0; 256],
        };
        let trailer_offset = index_offset + index_bytes.len() as u64;
        self.fdata.pwrite(&trailer.encode_into_vec(), trailer_offset)?;

        let header = HeaderTrailer {
            flags: HeaderFlags {
                is_header: true,
                is_data_file: true,
                is_sealed: true,
                is_sparse_rw: false,
            },
            ..trailer.clone()
        };
        self.fdata.pwrite(&header.encode_into_vec(), 0)?;
        self.fdata.fsync()?;

        if !reopen {
            return Ok(None);
        }

        let filtered: Vec<SegmentMapping> = dump.into_iter().filter(|m| !m.is_invalid()).collect();
        let ro_index = Index::from_sorted_trusted(filtered.into_boxed_slice());
        let handle: Arc<dyn BlockIo> = self.fdata.clone();

        Ok(Some(RoLayer::from_parts(
            ro_index,
            handle,
            inner.virtual_size,
            self.uuid,
            self.parent_uuid,
            self.max_io_size,
        )))
    }

    /// Writes a fresh sealed layer at `dest`, containing only the data
    /// currently referenced by this layer's index (unreferenced bytes from
    /// overwritten/discarded writes are dropped), via the [`crate::Compactor`].
    pub fn commit<F: FileSystem>(&self, dest: &Path) -> crate::Result<RoLayer> {
        let inner = self.inner.lock().expect("lock poisoned");
        let dump: Vec<SegmentMapping> = inner
            .index
            .dump(0)
            .into_iter()
            .filter(|m| !m.is_invalid())
            .collect();
        let virtual_size = inner.virtual_size;
        drop(inner);

        let source_index = Index::from_sorted_trusted(dump.into_boxed_slice());
        let handle: Arc<dyn BlockIo> = self.fdata.clone();

        crate::compactor::Compactor::new(true).compact::<F>(
            &[handle],
            &source_index,
            dest,
            Uuid::new_v4(),
            self.parent_uuid,
            virtual_size,
            self.max_io_size,
        )
    }

    /// Path this layer's data file lives at.
    #[must_use]
    pub fn data_path(&self) -> &Path {
        &self.dest_path
    }

    /// Reads `buf.len()` bytes starting at byte `offset` against this
    /// layer's own (not-yet-sealed) index.
    pub fn pread(&self, buf: &mut [u8], offset: u64) -> crate::Result<usize> {
        check_alignment(offset, buf.len() as u64)?;

        let inner = self.inner.lock().expect("lock poisoned");
        let q_off = offset / SECTOR_SIZE;
        let q_len = u32::try_from(buf.len() as u64 / SECTOR_SIZE)
            .map_err(|_| Error::InvalidArgument("read too large"))?;

        let mut result = Ok(());
        crate::layer_index::foreach_segments(
            &inner.index,
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
                let start = ((m.offset() - q_off) * SECTOR_SIZE) as usize;
                let len = (u64::from(m.length()) * SECTOR_SIZE) as usize;
                let phys_offset = m.moffset * SECTOR_SIZE;
                result = buf
                    .get_mut(start..start + len)
                    .ok_or_else(|| Error::Corrupt("mapping range outside query buffer".into()))
                    .and_then(|dst| self.fdata.pread(dst, phys_offset).map(|_| ()));
            },
        );
        result?;

        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::StdFileSystem;
    use test_log::test;

    #[test]
    fn scenario_a_lsmt_single_layer_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let rw = RwLayer::create::<StdFileSystem>(
            &dir.path().join("layer.data"),
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
        rw.discard(1024, 512).unwrap();

        let mut buf = [0u8; 512];
        rw.pread(&mut buf, 0).unwrap();
        assert_eq!([b'A'; 512], buf);

        let mut buf = [0u8; 512];
        rw.pread(&mut buf, 1024).unwrap();
        assert_eq!([0u8; 512], buf);

        let mut buf = [0u8; 1024];
        rw.pread(&mut buf, 4096).unwrap();
        assert_eq!([b'B'; 1024], buf);

        let mut buf = [0u8; 1024];
        rw.pread(&mut buf, 63 * 1024).unwrap();
        assert_eq!([0u8; 1024], buf);

        assert_eq!(65536, rw.virtual_size());
    }

    #[test]
    fn group_commit_flushes_at_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let rw = RwLayer::create::<StdFileSystem>(
            &dir.path().join("layer.data"),
            Some(&dir.path().join("layer.index")),
            65536,
            Uuid::new_v4(),
            Uuid::nil(),
            4096,
            4,
        )
        .unwrap();

        for i in 0..4 {
            rw.pwrite(&[b'X'; 512], i * 512).unwrap();
        }

        let journal_len = std::fs::metadata(dir.path().join("layer.index")).unwrap().len();
        assert!(journal_len > 0, "buffer should have flushed at capacity");
    }
}
