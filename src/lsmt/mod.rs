// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The LSMT layer format: sealed RO layers, append-only RW layers, and the
//! stacking of several layers into one logical device (`spec.md` §4.2-4.3,
//! §6.1).

pub mod header;
mod ro;
mod rw;
mod stack;

pub use ro::RoLayer;
pub use rw::RwLayer;
pub use stack::Stacked;

use crate::error::Error;
use std::sync::Arc;

/// Logical sector size for all LSMT/ZFile addressing (`spec.md` §3).
pub const SECTOR_SIZE: u64 = 512;

/// Default `max_io_size` for a read path (`spec.md` §4.2): 4 MiB.
pub const DEFAULT_MAX_IO_SIZE: usize = 4 * 1024 * 1024;

/// Alignment granularity (bytes) for I/O against backing storage
/// (`spec.md` §3).
pub const IO_ALIGNMENT: u64 = 4096;

/// Discriminant returned by [`BlockIo::kind`], mirroring the source's
/// `ioctl(GetType)` (`spec.md` §6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockIoKind {
    /// Plain, uncompressed file.
    Raw,
    /// ZFile-compressed container.
    ZFile,
    /// Cached, registry-backed blob.
    Cached,
    /// Sealed RO LSMT layer.
    LsmtRo,
    /// Append-only RW LSMT layer.
    LsmtRw,
    /// Sparse RW LSMT layer.
    LsmtSparse,
}

/// The polymorphic file surface every data source backing a tagged
/// [`crate::segment::SegmentMapping`] must provide (`spec.md` §6.3 `IFile`).
///
/// A tagged-variant dispatch is preferred in closed contexts (see
/// `DESIGN.md`), but the set of files backing a stacked view's `tag`
/// indices is genuinely open (any mixture of raw/ZFile/cached files), so
/// this one seam stays `dyn Trait` per the DESIGN NOTE in `spec.md` §9.
pub trait BlockIo: Send + Sync {
    /// Reads up to `buf.len()` bytes starting at `offset`, returning the
    /// number of bytes actually read (may be less than `buf.len()` on a
    /// short read).
    fn pread(&self, buf: &mut [u8], offset: u64) -> crate::Result<usize>;

    /// Writes `buf` at `offset`. Read-only backings return
    /// `Error::Unsupported`.
    fn pwrite(&self, buf: &[u8], offset: u64) -> crate::Result<usize>;

    /// Flushes any buffered state and fsyncs backing storage.
    fn fsync(&self) -> crate::Result<()>;

    /// This file's kind discriminant.
    fn kind(&self) -> BlockIoKind;

    /// Out-of-band control call, mirroring the source's `fallocate` ioctl.
    /// The one call this crate actually issues is `fallocate(mode=0,
    /// offset=0, len=-1)`, which a [`crate::block_cache::BlockCache`]-backed
    /// file MUST interpret as "invalidate all cached data for this logical
    /// view" (`spec.md` §9 DESIGN NOTE). Backings with no cache to
    /// invalidate (plain files, ZFile blobs) no-op.
    fn fallocate(&self, _mode: u32, _offset: u64, _len: i64) -> crate::Result<()> {
        Ok(())
    }
}

impl BlockIo for std::fs::File {
    fn pread(&self, buf: &mut [u8], offset: u64) -> crate::Result<usize> {
        Ok(crate::file::pread_at(self, buf, offset)?)
    }

    fn pwrite(&self, buf: &[u8], offset: u64) -> crate::Result<usize> {
        crate::file::pwrite_all_at(self, buf, offset)?;
        Ok(buf.len())
    }

    fn fsync(&self) -> crate::Result<()> {
        Ok(self.sync_all()?)
    }

    fn kind(&self) -> BlockIoKind {
        BlockIoKind::Raw
    }
}

pub(crate) fn check_alignment(offset: u64, count: u64) -> Result<(), Error> {
    if offset % SECTOR_SIZE != 0 {
        return Err(Error::InvalidArgument("offset is not sector-aligned"));
    }
    if count % SECTOR_SIZE != 0 {
        return Err(Error::InvalidArgument("count is not sector-aligned"));
    }
    Ok(())
}

pub(crate) type BlockIoHandle = Arc<dyn BlockIo>;
