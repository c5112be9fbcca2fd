// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Wraps a [`BlobSource`] with a local persistent cache of fixed-size
//! refill units (`spec.md` §4.5).
//!
//! Grounded in `examples/original_source/src/overlaybd/cache/cached_file.cpp`'s
//! refill/eviction loop, adapted to a synchronous, single-process core per
//! the redesign flag in `spec.md` §9 (no coroutine scheduler).

use crate::blob_source::{BlobSource, Deadline};
use crate::fs::FileSystem;
use crate::lsmt::{BlockIo, BlockIoKind};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

/// Eviction policy for resident refill units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Evict least-recently-used slots once resident bytes exceed capacity.
    Lru,
    /// Never evict; the cache grows unbounded.
    None,
}

/// Single-flight state for one in-progress refill-unit fetch: the mutex is
/// held by the fetching thread for the duration of the fetch, so any other
/// thread that observes this entry and calls `.lock()` blocks until the
/// fetch completes and the result is published — this is the cache's
/// *at-most-one-concurrent-fetch-per-fingerprint* guarantee (`spec.md`
/// §4.5 point 4), without a coroutine scheduler.
struct InFlight {
    lock: Mutex<()>,
    result: OnceLock<crate::Result<Vec<u8>>>,
}

struct Lru {
    order: VecDeque<u64>,
    set: HashSet<u64>,
    resident_bytes: u64,
}

impl Lru {
    fn new() -> Self {
        Self {
            order: VecDeque::new(),
            set: HashSet::new(),
            resident_bytes: 0,
        }
    }

    fn touch(&mut self, slot: u64, slot_bytes: u64) {
        if self.set.insert(slot) {
            self.order.push_back(slot);
            self.resident_bytes += slot_bytes;
        }
    }

    fn evict_one(&mut self) -> Option<u64> {
        let slot = self.order.pop_front()?;
        self.set.remove(&slot);
        Some(slot)
    }

    fn clear(&mut self) {
        self.order.clear();
        self.set.clear();
        self.resident_bytes = 0;
    }
}

/// Caches a `BlobSource`'s content locally, keyed by a content name (e.g.
/// a registry blob digest), in fixed-size refill units (`spec.md` §4.5).
pub struct BlockCache<S> {
    source: S,
    name: String,
    media_dir: PathBuf,
    refill_unit: u64,
    capacity_bytes: u64,
    eviction_policy: EvictionPolicy,
    lru: Mutex<Lru>,
    in_flight: Mutex<HashMap<u64, Arc<InFlight>>>,
}

impl<S: BlobSource> BlockCache<S> {
    /// Creates a cache over `source`, persisting refill units under
    /// `media_dir`. `refill_unit` must be a multiple of `block_size`
    /// (`spec.md` §4.5 parameters).
    pub fn new<F: FileSystem>(
        name: impl Into<String>,
        source: S,
        media_dir: impl Into<PathBuf>,
        refill_unit: u64,
        block_size: u64,
        capacity_bytes: u64,
        eviction_policy: EvictionPolicy,
    ) -> crate::Result<Self> {
        if refill_unit == 0 || refill_unit % block_size != 0 {
            return Err(crate::Error::InvalidArgument("refill_unit must be a nonzero multiple of block_size"));
        }

        let media_dir = media_dir.into();
        F::create_dir_all(&media_dir)?;

        Ok(Self {
            source,
            name: name.into(),
            media_dir,
            refill_unit,
            capacity_bytes,
            eviction_policy,
            lru: Mutex::new(Lru::new()),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    fn slot_path(&self, slot: u64) -> PathBuf {
        self.media_dir.join(format!("{}.slot{slot:020}", self.name))
    }

    /// Reads `buf.len()` bytes starting at `offset`, refilling whichever
    /// slots are missing from media and copying out the requested
    /// sub-range (`spec.md` §4.5 `pread` steps 1-3).
    pub fn pread<F: FileSystem>(&self, buf: &mut [u8], offset: u64, deadline: Option<Deadline>) -> crate::Result<usize> {
        let end = offset + buf.len() as u64;
        let first_slot = offset / self.refill_unit;
        let last_slot = (end.saturating_sub(1)) / self.refill_unit;

        for slot in first_slot..=last_slot {
            let slot_data = self.ensure_resident::<F>(slot, deadline)?;

            let slot_start = slot * self.refill_unit;
            let want_start = offset.max(slot_start);
            let want_end = end.min(slot_start + slot_data.len() as u64);
            if want_start >= want_end {
                continue;
            }

            let src_off = (want_start - slot_start) as usize;
            let src_len = (want_end - want_start) as usize;
            let dst_off = (want_start - offset) as usize;

            buf.get_mut(dst_off..dst_off + src_len)
                .ok_or_else(|| crate::Error::Corrupt("cache read range outside output buffer".into()))?
                .copy_from_slice(&slot_data[src_off..src_off + src_len]);
        }

        Ok(buf.len())
    }

    /// Returns `slot`'s bytes, reading from media on a hit, or fetching
    /// from `source` (with single-flight coalescing) and writing to media
    /// on a miss.
    fn ensure_resident<F: FileSystem>(&self, slot: u64, deadline: Option<Deadline>) -> crate::Result<Vec<u8>> {
        let path = self.slot_path(slot);

        if let Ok(bytes) = F::read(&path) {
            self.lru.lock().expect("lock poisoned").touch(slot, bytes.len() as u64);
            return Ok(bytes);
        }

        let cell = {
            let mut map = self.in_flight.lock().expect("lock poisoned");
            map.entry(slot)
                .or_insert_with(|| {
                    Arc::new(InFlight {
                        lock: Mutex::new(()),
                        result: OnceLock::new(),
                    })
                })
                .clone()
        };

        let guard = cell.lock.lock().expect("lock poisoned");
        if cell.result.get().is_none() {
            let fetched = self
                .source
                .pread(slot * self.refill_unit, self.refill_unit as usize, deadline);
            if let Ok(bytes) = &fetched {
                let _ = write_slot::<F>(&path, bytes);
            }
            let _ = cell.result.set(fetched);
        }
        drop(guard);

        self.in_flight.lock().expect("lock poisoned").remove(&slot);

        #[allow(clippy::unwrap_used)]
        let result = clone_result(cell.result.get().unwrap());

        if let Ok(bytes) = &result {
            self.lru.lock().expect("lock poisoned").touch(slot, bytes.len() as u64);
            self.evict_if_needed::<F>();
        }

        result
    }

    fn evict_if_needed<F: FileSystem>(&self) {
        if self.eviction_policy == EvictionPolicy::None {
            return;
        }

        let mut lru = self.lru.lock().expect("lock poisoned");
        while lru.resident_bytes > self.capacity_bytes {
            let Some(slot) = lru.evict_one() else { break };
            lru.resident_bytes = lru.resident_bytes.saturating_sub(self.refill_unit);
            let _ = F::remove_file(&self.slot_path(slot));
        }
    }

    /// Invalidates every cached slot for this view (`fallocate(mode=0,
    /// offset=0, len=-1)`, `spec.md` §9 DESIGN NOTE).
    pub fn invalidate_all<F: FileSystem>(&self) -> crate::Result<()> {
        let mut lru = self.lru.lock().expect("lock poisoned");
        for slot in lru.set.iter().copied().collect::<Vec<_>>() {
            let _ = F::remove_file(&self.slot_path(slot));
        }
        lru.clear();
        Ok(())
    }
}

/// `OnceLock<crate::Result<Vec<u8>>>` only hands out shared references;
/// every waiter on a single-flight fetch needs its own owned copy, and
/// `Error` doesn't derive `Clone` (its `Io` variant wraps `std::io::Error`,
/// which doesn't either), so this reconstructs an equivalent `Error` by
/// hand.
fn clone_result(r: &crate::Result<Vec<u8>>) -> crate::Result<Vec<u8>> {
    match r {
        Ok(bytes) => Ok(bytes.clone()),
        Err(e) => Err(clone_error(e)),
    }
}

fn write_slot<F: FileSystem>(path: &std::path::Path, bytes: &[u8]) -> crate::Result<()> {
    let file = F::create(path)?;
    crate::file::pwrite_all_at(&file, bytes, 0)?;
    Ok(())
}

fn clone_error(e: &crate::Error) -> crate::Error {
    match e {
        crate::Error::Timeout => crate::Error::Timeout,
        crate::Error::NotFound => crate::Error::NotFound,
        crate::Error::Auth => crate::Error::Auth,
        crate::Error::InvalidArgument(m) => crate::Error::InvalidArgument(*m),
        crate::Error::Corrupt(m) => crate::Error::Corrupt(m.clone()),
        crate::Error::Unsupported(m) => crate::Error::Unsupported(*m),
        crate::Error::ShortIo { requested, got } => crate::Error::ShortIo {
            requested: *requested,
            got: *got,
        },
        crate::Error::ChecksumMismatch { block, expected, got } => crate::Error::ChecksumMismatch {
            block: *block,
            expected: *expected,
            got: *got,
        },
        crate::Error::Io(e) => crate::Error::Io(std::io::Error::new(e.kind(), e.to_string())),
        crate::Error::Encode(_) | crate::Error::Decode(_) => {
            crate::Error::Corrupt("coding error during cache refill".into())
        }
    }
}

impl<S> BlockIo for BlockCache<S>
where
    S: BlobSource + Send + Sync,
{
    fn pread(&self, buf: &mut [u8], offset: u64) -> crate::Result<usize> {
        BlockCache::pread::<crate::fs::StdFileSystem>(self, buf, offset, None)
    }

    fn pwrite(&self, _buf: &[u8], _offset: u64) -> crate::Result<usize> {
        Err(crate::Error::Unsupported("block cache is a read-only view over a blob source"))
    }

    fn fsync(&self) -> crate::Result<()> {
        Ok(())
    }

    fn kind(&self) -> BlockIoKind {
        BlockIoKind::Cached
    }

    fn fallocate(&self, mode: u32, offset: u64, len: i64) -> crate::Result<()> {
        if mode == 0 && offset == 0 && len == -1 {
            self.invalidate_all::<crate::fs::StdFileSystem>()
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_source::LocalBlobSource;
    use crate::fs::StdFileSystem;
    use test_log::test;

    fn make_cache(raw: &[u8]) -> (tempfile::TempDir, BlockCache<LocalBlobSource>) {
        let dir = tempfile::tempdir().unwrap();
        let blob_path = dir.path().join("blob");
        std::fs::write(&blob_path, raw).unwrap();

        let cache = BlockCache::new::<StdFileSystem>(
            "sha256:testdigest",
            LocalBlobSource::new(&blob_path),
            dir.path().join("media"),
            4096,
            512,
            1 << 20,
            EvictionPolicy::Lru,
        )
        .unwrap();

        (dir, cache)
    }

    #[test]
    fn reads_through_on_miss_then_hits_media() {
        let raw: Vec<u8> = (0..16384u32).map(|i| (i % 256) as u8).collect();
        let (_dir, cache) = make_cache(&raw);

        let mut buf = vec![0u8; 100];
        cache.pread::<StdFileSystem>(&mut buf, 5000, None).unwrap();
        assert_eq!(&raw[5000..5100], &buf[..]);

        // Second read of the same slot should hit media, not re-fetch.
        let mut buf2 = vec![0u8; 50];
        cache.pread::<StdFileSystem>(&mut buf2, 5010, None).unwrap();
        assert_eq!(&raw[5010..5060], &buf2[..]);
    }

    #[test]
    fn read_spanning_multiple_slots() {
        let raw: Vec<u8> = (0..16384u32).map(|i| (i % 256) as u8).collect();
        let (_dir, cache) = make_cache(&raw);

        let mut buf = vec![0u8; 8192];
        cache.pread::<StdFileSystem>(&mut buf, 2048, None).unwrap();
        assert_eq!(&raw[2048..2048 + 8192], &buf[..]);
    }

    #[test]
    fn eviction_reclaims_capacity() {
        let raw = vec![7u8; 1 << 16];
        let dir = tempfile::tempdir().unwrap();
        let blob_path = dir.path().join("blob");
        std::fs::write(&blob_path, &raw).unwrap();

        let cache = BlockCache::new::<StdFileSystem>(
            "digest",
            LocalBlobSource::new(&blob_path),
            dir.path().join("media"),
            4096,
            512,
            4096 * 2,
            EvictionPolicy::Lru,
        )
        .unwrap();

        for slot in 0..10u64 {
            let mut buf = vec![0u8; 4096];
            cache.pread::<StdFileSystem>(&mut buf, slot * 4096, None).unwrap();
        }

        let lru = cache.lru.lock().unwrap();
        assert!(lru.resident_bytes <= 4096 * 2);
    }

    #[test]
    fn invalidate_all_clears_media() {
        let raw = vec![9u8; 8192];
        let (dir, cache) = make_cache(&raw);

        let mut buf = vec![0u8; 4096];
        cache.pread::<StdFileSystem>(&mut buf, 0, None).unwrap();
        assert!(dir.path().join("media").read_dir().unwrap().count() > 0);

        cache.invalidate_all::<StdFileSystem>().unwrap();
        assert_eq!(0, dir.path().join("media").read_dir().unwrap().count());
    }
}
