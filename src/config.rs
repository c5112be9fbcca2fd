// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Configuration for an [`crate::Engine`], covering everything `spec.md`
//! §6.4 calls out as shim-provided: ZFile compression/verification, LSMT
//! I/O sizing, group-commit buffering, and cache sizing.

use crate::block_cache::EvictionPolicy;
use crate::compression::CompressionType;
use std::path::{Path, PathBuf};

/// ZFile builder/reader knobs (`spec.md` §6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZFileSettings {
    /// Compression algorithm applied to every block.
    pub algo: CompressionType,
    /// Logical size, in bytes, of each compressed block.
    pub block_size: u32,
    /// Whether each compressed block carries a trailing CRC32C.
    pub verify: bool,
}

impl Default for ZFileSettings {
    fn default() -> Self {
        Self {
            algo: CompressionType::default(),
            block_size: 4096,
            verify: true,
        }
    }
}

/// [`crate::block_cache::BlockCache`] sizing knobs (`spec.md` §6.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Refill unit size in bytes.
    pub refill_unit: u64,
    /// Resident byte budget before eviction kicks in.
    pub capacity_bytes: u64,
    /// Where cached refill units are persisted.
    pub media_path: PathBuf,
    /// Eviction policy.
    pub eviction_policy: EvictionPolicy,
}

/// Top-level configuration for an [`crate::Engine`]: one record replacing
/// the source's scattered process-wide globals (`spec.md` §9 DESIGN NOTE
/// "Global state").
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory layer data/index files are created under.
    pub root: PathBuf,
    /// ZFile builder/reader settings.
    pub zfile: ZFileSettings,
    /// Maximum size of a single `pread`/`pwrite` before chunking
    /// (`spec.md` §4.2).
    pub max_io_size: usize,
    /// Group-commit buffer size, in journal entries; 0 disables batching
    /// (`spec.md` §3, §4.3).
    pub group_commit_capacity: usize,
    /// Descriptor table capacity (open-file-handle budget).
    pub descriptor_table_capacity: usize,
    /// Cache settings, if a [`crate::block_cache::BlockCache`] is wanted.
    pub cache: Option<CacheSettings>,
}

impl EngineConfig {
    /// Creates a config with `spec.md`-typical defaults: 4 MiB max I/O
    /// size, no group commit batching, LZ4 + CRC32C ZFile blocks.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            zfile: ZFileSettings::default(),
            max_io_size: crate::lsmt::DEFAULT_MAX_IO_SIZE,
            group_commit_capacity: 0,
            descriptor_table_capacity: 960,
            cache: None,
        }
    }

    /// Sets the ZFile compression algorithm.
    #[must_use]
    pub fn with_compression(mut self, algo: CompressionType) -> Self {
        self.zfile.algo = algo;
        self
    }

    /// Sets the ZFile block size.
    #[must_use]
    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.zfile.block_size = block_size;
        self
    }

    /// Sets whether ZFile blocks carry a CRC32C.
    #[must_use]
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.zfile.verify = verify;
        self
    }

    /// Sets the max I/O chunk size for LSMT reads/writes.
    #[must_use]
    pub fn with_max_io_size(mut self, max_io_size: usize) -> Self {
        self.max_io_size = max_io_size;
        self
    }

    /// Sets the group-commit buffer size, in journal entries.
    #[must_use]
    pub fn with_group_commit_capacity(mut self, capacity: usize) -> Self {
        self.group_commit_capacity = capacity;
        self
    }

    /// Enables a [`crate::block_cache::BlockCache`] with the given sizing.
    #[must_use]
    pub fn with_cache(
        mut self,
        refill_unit: u64,
        capacity_bytes: u64,
        media_path: impl Into<PathBuf>,
        eviction_policy: EvictionPolicy,
    ) -> Self {
        self.cache = Some(CacheSettings {
            refill_unit,
            capacity_bytes,
            media_path: media_path.into(),
            eviction_policy,
        });
        self
    }

    /// The directory layer files are created under.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn builder_overrides_defaults() {
        let config = EngineConfig::new("/tmp/layers")
            .with_compression(CompressionType::Zstd(5))
            .with_block_size(8192)
            .with_verify(false)
            .with_max_io_size(1 << 16)
            .with_group_commit_capacity(32);

        assert_eq!(CompressionType::Zstd(5), config.zfile.algo);
        assert_eq!(8192, config.zfile.block_size);
        assert!(!config.zfile.verify);
        assert_eq!(1 << 16, config.max_io_size);
        assert_eq!(32, config.group_commit_capacity);
    }
}
