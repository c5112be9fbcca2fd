// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Caches open file descriptors for layer data/index files and ZFile/cache
//! media files, so that stacking many layers does not require one live
//! `File` per layer for the whole process lifetime.

use quick_cache::{sync::Cache as QuickCache, UnitWeighter};
use std::{fs::File, sync::Arc};
use uuid::Uuid;

/// Which file of a layer a descriptor refers to.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub enum FileKind {
    /// The layer's data file (sealed RO data, or RW append-only data).
    Data,
    /// The layer's index journal (RW layers only).
    Index,
}

#[derive(Eq, std::hash::Hash, PartialEq)]
struct CacheKey(FileKind, u128);

/// Caches open `File` handles keyed by layer UUID and file kind.
pub struct DescriptorTable {
    inner: QuickCache<CacheKey, Arc<File>, UnitWeighter, rustc_hash::FxBuildHasher>,
}

impl DescriptorTable {
    /// Creates a table that holds at most `capacity` open descriptors.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        use quick_cache::sync::DefaultLifecycle;

        #[allow(clippy::default_trait_access)]
        let quick_cache = QuickCache::with(
            1_000,
            capacity as u64,
            UnitWeighter,
            Default::default(),
            DefaultLifecycle::default(),
        );

        Self { inner: quick_cache }
    }

    #[doc(hidden)]
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Looks up a cached descriptor for `uuid`'s `kind` file.
    #[must_use]
    pub fn access(&self, uuid: Uuid, kind: FileKind) -> Option<Arc<File>> {
        self.inner.get(&CacheKey(kind, uuid.as_u128()))
    }

    /// Inserts (or replaces) the cached descriptor for `uuid`'s `kind` file.
    pub fn insert(&self, uuid: Uuid, kind: FileKind, file: Arc<File>) {
        self.inner.insert(CacheKey(kind, uuid.as_u128()), file);
    }
}

impl Default for DescriptorTable {
    fn default() -> Self {
        Self::new(960)
    }
}
