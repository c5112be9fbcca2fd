// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::ro::RoLayer;
use super::rw::RwLayer;
use super::{check_alignment, BlockIoHandle, SECTOR_SIZE};
use crate::compactor::Compactor;
use crate::layer_index::{foreach_segments, ComboIndex, Index, LayerIndex};
use crate::segment::Segment;
use crate::Error;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// A stacked logical device composed of zero or more sealed RO layers
/// (bottom to top) with an optional writable RW layer on top
/// (`spec.md` §4.2 `stack`, §2).
///
/// Per `DESIGN.md`, the composite `files` array is ordered
/// `[rw.files..., ro_files...]` (RW first, unshifted) with
/// `tag_delta = rw_files.len()` added to every RO-side tag on lookup —
/// the reverse order from the literal `lower.files ++ upper.files`
/// phrasing in `spec.md` §4.2, which is inconsistent with §3's own
/// `ComboIndex` contract (`tag_delta` added to *bottom* results). Both
/// orderings are "a" valid ordering; this one is the one actually
/// consistent with the `ComboIndex::lookup` implementation.
pub struct Stacked {
    rw: Option<Arc<RwLayer>>,
    ro_layers: Vec<Arc<RoLayer>>,
    bottom_merged: Option<Index>,
    files: Vec<BlockIoHandle>,
    tag_delta: u8,
    virtual_size: u64,
    max_io_size: usize,
}

impl Stacked {
    /// Builds a stacked view from `ro_layers` (bottom to top) and an
    /// optional RW top layer. Validates the UUID parent chain across all
    /// layers when `check_order` is set (`spec.md` §3, §4.2).
    pub fn new(
        ro_layers: Vec<Arc<RoLayer>>,
        rw: Option<Arc<RwLayer>>,
        max_io_size: usize,
        check_order: bool,
    ) -> crate::Result<Self> {
        if check_order {
            Self::check_uuid_chain(&ro_layers, rw.as_deref())?;
        }

        let bottom_indexes: Vec<&Index> = ro_layers.iter().map(|l| l.index()).collect();
        let bottom_merged = if bottom_indexes.is_empty() {
            None
        } else {
            Some(Index::merge(&bottom_indexes))
        };

        let tag_delta: u8 = if rw.is_some() { 1 } else { 0 };

        let mut files: Vec<BlockIoHandle> = Vec::new();
        if let Some(rw) = &rw {
            files.push(rw.data_file());
        }
        for ro in &ro_layers {
            files.extend(ro.files().iter().cloned());
        }

        let virtual_size = rw
            .as_ref()
            .map(|r| r.virtual_size())
            .or_else(|| ro_layers.last().map(|l| l.virtual_size()))
            .unwrap_or(0);

        Ok(Self {
            rw,
            ro_layers,
            bottom_merged,
            files,
            tag_delta,
            virtual_size,
            max_io_size,
        })
    }

    fn check_uuid_chain(ro_layers: &[Arc<RoLayer>], rw: Option<&RwLayer>) -> crate::Result<()> {
        for pair in ro_layers.windows(2) {
            if pair[1].parent_uuid() != pair[0].uuid() {
                return Err(Error::Corrupt(
                    "layer stack uuid chain broken between RO layers".into(),
                ));
            }
        }

        if let (Some(rw), Some(top_ro)) = (rw, ro_layers.last()) {
            if rw.parent_uuid() != top_ro.uuid() {
                return Err(Error::Corrupt(
                    "RW layer's parent_uuid does not match top RO layer's uuid".into(),
                ));
            }
        }

        Ok(())
    }

    fn combo_view(&self) -> ComboIndex {
        match (&self.rw, &self.bottom_merged) {
            (Some(rw), Some(bottom)) => ComboIndex::Both {
                top: rw.combo_index(),
                bottom: bottom.clone(),
                tag_delta: self.tag_delta,
            },
            (Some(rw), None) => ComboIndex::Top(rw.combo_index()),
            (None, Some(bottom)) => ComboIndex::Bottom(bottom.clone()),
            (None, None) => ComboIndex::Top(crate::layer_index::Index0::new()),
        }
    }

    /// Logical size in bytes of the composed view.
    #[must_use]
    pub fn virtual_size(&self) -> u64 {
        self.virtual_size
    }

    /// Files backing this view, in tag order; `files()[tag]` is the
    /// correct backing for any mapping returned by a lookup against this
    /// view's combo index.
    #[must_use]
    pub(crate) fn files(&self) -> &[BlockIoHandle] {
        &self.files
    }

    /// Writes `buf` at `offset`, delegating to the RW top layer.
    /// `Error::Unsupported` if this view has no writable top.
    pub fn pwrite(&self, buf: &[u8], offset: u64) -> crate::Result<usize> {
        self.rw
            .as_ref()
            .ok_or(Error::Unsupported("stacked view has no writable top layer"))?
            .pwrite(buf, offset)
    }

    /// Reads `buf.len()` bytes starting at `offset` against the composed
    /// view: RW top takes precedence, gaps fall through to the merged RO
    /// bottom, remaining gaps are zero-filled (`spec.md` §8 invariants 6-7).
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

        let combo = self.combo_view();
        let q_off = offset / SECTOR_SIZE;
        let q_len = u32::try_from(buf.len() as u64 / SECTOR_SIZE)
            .map_err(|_| Error::InvalidArgument("read too large"))?;

        let mut result = Ok(());
        foreach_segments(
            &combo,
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

                result = (|| {
                    let file = self
                        .files
                        .get(m.tag as usize)
                        .ok_or_else(|| Error::Corrupt("mapping tag has no backing file".into()))?;
                    let dst = buf
                        .get_mut(start..start + len)
                        .ok_or_else(|| Error::Corrupt("mapping range outside query buffer".into()))?;
                    file.pread(dst, phys_offset)?;
                    Ok(())
                })();
            },
        );
        result?;

        Ok(buf.len())
    }

    /// Every layer's UUID in the stack, bottom to top (RW top last, if
    /// present).
    #[must_use]
    pub fn uuids(&self) -> Vec<Uuid> {
        let mut out: Vec<Uuid> = self.ro_layers.iter().map(|l| l.uuid()).collect();
        if let Some(rw) = &self.rw {
            out.push(rw.uuid());
        }
        out
    }

    /// Flattens this entire stacked view into a single new sealed layer at
    /// `dest`, via [`Compactor`] (`spec.md` §4.6, §8 scenario F). Unlike
    /// [`RwLayer::commit`], this compacts across every RO layer in the
    /// stack as well as the RW top, not just the top layer's own index.
    pub fn compact_to<F: crate::fs::FileSystem>(
        &self,
        dest: &Path,
        uuid: Uuid,
        parent_uuid: Uuid,
    ) -> crate::Result<RoLayer> {
        let combo = self.combo_view();
        let q_len = u32::try_from(self.virtual_size.div_ceil(SECTOR_SIZE)).unwrap_or(u32::MAX);
        let mappings = combo.lookup(Segment::new(0, q_len));
        let index = Index::from_sorted_trusted(mappings.into_boxed_slice());

        Compactor::default().compact::<F>(&self.files, &index, dest, uuid, parent_uuid, self.virtual_size, self.max_io_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::StdFileSystem;
    use test_log::test;

    #[test]
    fn scenario_c_stack_overlay() {
        let dir = tempfile::tempdir().unwrap();

        let lower_uuid = Uuid::new_v4();
        let rw_lower = RwLayer::create::<StdFileSystem>(
            &dir.path().join("lower.data"),
            None,
            4096,
            lower_uuid,
            Uuid::nil(),
            4096,
            0,
        )
        .unwrap();
        rw_lower.pwrite(&[b'X'; 4096], 0).unwrap();
        let mut rw_lower = rw_lower;
        let lower = rw_lower.close_seal::<StdFileSystem>(true).unwrap().unwrap();

        let upper = RwLayer::create::<StdFileSystem>(
            &dir.path().join("upper.data"),
            None,
            4096,
            Uuid::new_v4(),
            lower_uuid,
            4096,
            0,
        )
        .unwrap();
        upper.pwrite(&[b'Y'; 512], 1024).unwrap();

        let stacked = Stacked::new(vec![Arc::new(lower)], Some(Arc::new(upper)), 4096, true).unwrap();

        let mut buf = [0u8; 4096];
        stacked.pread(&mut buf, 0).unwrap();

        let mut expected = vec![b'X'; 4096];
        expected[1024..1536].fill(b'Y');
        assert_eq!(expected, buf);
    }

    #[test]
    fn idempotence_stack_over_empty_rw() {
        let dir = tempfile::tempdir().unwrap();

        let lower_uuid = Uuid::new_v4();
        let mut rw_lower = RwLayer::create::<StdFileSystem>(
            &dir.path().join("lower.data"),
            None,
            4096,
            lower_uuid,
            Uuid::nil(),
            4096,
            0,
        )
        .unwrap();
        rw_lower.pwrite(&[b'Z'; 4096], 0).unwrap();
        let lower = rw_lower.close_seal::<StdFileSystem>(true).unwrap().unwrap();
        let lower = Arc::new(lower);

        let empty_rw = Arc::new(
            RwLayer::create::<StdFileSystem>(
                &dir.path().join("empty.data"),
                None,
                4096,
                Uuid::new_v4(),
                lower_uuid,
                4096,
                0,
            )
            .unwrap(),
        );

        let stacked = Stacked::new(vec![lower.clone()], Some(empty_rw), 4096, true).unwrap();

        let mut buf_stacked = [0u8; 4096];
        stacked.pread(&mut buf_stacked, 0).unwrap();

        let mut buf_lower = [0u8; 4096];
        lower.pread(&mut buf_lower, 0).unwrap();

        assert_eq!(buf_lower, buf_stacked);
    }
}
