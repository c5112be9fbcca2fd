// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::LayerIndex;
use crate::segment::{Segment, SegmentMapping};
use std::collections::BTreeMap;

/// The mutable, level-0 memory index backing a writable LSMT layer.
///
/// Keeps a sorted, disjoint set of [`SegmentMapping`]s keyed by logical
/// offset. A single RW layer is pinned to one worker (`spec.md` §5), so
/// this is a plain `BTreeMap`, not the teacher's lock-free
/// `crossbeam_skiplist::SkipMap` — there is no concurrent-writer case to
/// justify a lock-free structure here (see `DESIGN.md`).
#[derive(Debug, Default, Clone)]
pub struct Index0 {
    map: BTreeMap<u64, SegmentMapping>,
}

impl Index0 {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    /// Number of mappings currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// `true` if the index holds no mappings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Inserts `m`, clipping or removing every existing mapping that
    /// overlaps it in logical space so the index stays disjoint.
    ///
    /// `m.length()` must be `> 0` and within the 14-bit segment limit —
    /// callers split oversized writes before calling this (`spec.md`
    /// §4.1).
    pub fn insert(&mut self, m: SegmentMapping) {
        debug_assert!(m.length() > 0, "zero-length mapping must not enter the index");

        // Entries are sorted and disjoint, so the overlapping set is a
        // contiguous run of keys less than `m.end()`. We scan that prefix
        // and keep only the ones whose own end reaches past `m.offset()`.
        let overlapping: Vec<u64> = self
            .map
            .range(..m.end())
            .filter(|(_, e)| e.end() > m.offset())
            .map(|(k, _)| *k)
            .collect();

        for key in overlapping {
            let e = self.map.remove(&key).expect("key came from this map");

            if e.offset() < m.offset() {
                let mut left = e;
                left.backward_end_to(m.offset());
                self.map.insert(left.offset(), left);
            }

            if e.end() > m.end() {
                let mut right = e;
                right.forward_offset_to(m.end());
                self.map.insert(right.offset(), right);
            }
        }

        self.map.insert(m.offset(), m);
    }

    /// Snapshot of the current mappings in offset order, padded with
    /// [`SegmentMapping::invalid_mapping`] entries so the result's length
    /// is a multiple of `alignment` (entries, not bytes). `alignment <= 1`
    /// disables padding.
    #[must_use]
    pub fn dump(&self, alignment: usize) -> Vec<SegmentMapping> {
        let mut out: Vec<SegmentMapping> = self.map.values().copied().collect();

        if alignment > 1 {
            let remainder = out.len() % alignment;
            if remainder != 0 {
                out.resize(out.len() + (alignment - remainder), SegmentMapping::invalid_mapping());
            }
        }

        out
    }

    /// First mapping in offset order, or an invalid mapping if empty.
    #[must_use]
    pub fn first(&self) -> SegmentMapping {
        self.map
            .values()
            .next()
            .copied()
            .unwrap_or_else(SegmentMapping::invalid_mapping)
    }

    /// Last mapping in offset order, or an invalid mapping if empty.
    #[must_use]
    pub fn last(&self) -> SegmentMapping {
        self.map
            .values()
            .next_back()
            .copied()
            .unwrap_or_else(SegmentMapping::invalid_mapping)
    }

    /// Number of 512-byte sectors covered by non-zeroed mappings.
    #[must_use]
    pub fn block_count(&self) -> u64 {
        self.map
            .values()
            .filter(|m| !m.zeroed)
            .map(|m| u64::from(m.length()))
            .sum()
    }
}

impl LayerIndex for Index0 {
    fn lookup(&self, query: Segment) -> Vec<SegmentMapping> {
        if query.is_empty() {
            return Vec::new();
        }

        let mut out = Vec::new();

        for (_, m) in self.map.range(..query.end()) {
            if m.end() <= query.offset {
                continue;
            }

            let mut clipped = *m;
            if clipped.offset() < query.offset {
                clipped.forward_offset_to(query.offset);
            }
            if clipped.end() > query.end() {
                clipped.backward_end_to(query.end());
            }
            out.push(clipped);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn insert_clips_straddling_overlap() {
        // Scenario B from spec.md §8.
        let mut idx = Index0::new();
        idx.insert(SegmentMapping::new(10, 20, 100, 0));
        idx.insert(SegmentMapping::new(15, 5, 200, 0));

        let dump = idx.dump(0);
        assert_eq!(
            vec![
                SegmentMapping::new(10, 5, 100, 0),
                SegmentMapping::new(15, 5, 200, 0),
                SegmentMapping::new(20, 10, 110, 0),
            ],
            dump
        );
    }

    #[test]
    fn insert_deletes_fully_covered_mapping() {
        let mut idx = Index0::new();
        idx.insert(SegmentMapping::new(10, 5, 100, 0));
        idx.insert(SegmentMapping::new(0, 30, 999, 0));

        let dump = idx.dump(0);
        assert_eq!(vec![SegmentMapping::new(0, 30, 999, 0)], dump);
    }

    #[test]
    fn insert_does_not_merge_abutting_neighbors() {
        let mut idx = Index0::new();
        idx.insert(SegmentMapping::new(0, 10, 0, 0));
        idx.insert(SegmentMapping::new(10, 10, 100, 0));
        assert_eq!(2, idx.dump(0).len());
    }

    #[test]
    fn dump_pads_to_alignment() {
        let mut idx = Index0::new();
        idx.insert(SegmentMapping::new(0, 10, 0, 0));
        let dump = idx.dump(8);
        assert_eq!(8, dump.len());
        assert!(dump[1].is_invalid());
    }

    #[test]
    fn lookup_clips_edges() {
        let mut idx = Index0::new();
        idx.insert(SegmentMapping::new(0, 100, 0, 0));

        let found = idx.lookup(Segment::new(10, 20));
        assert_eq!(1, found.len());
        assert_eq!(10, found[0].offset());
        assert_eq!(30, found[0].end());
        assert_eq!(10, found[0].moffset);
    }

    #[test]
    fn disjointness_invariant_holds_after_random_inserts() {
        let mut idx = Index0::new();
        let mut rng_state = 0x1234_5678_u64;
        let mut next = || {
            rng_state = rng_state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            rng_state
        };

        for _ in 0..200 {
            let offset = next() % 1000;
            let length = (next() % 50 + 1) as u32;
            let moffset = next() % 10_000;
            idx.insert(SegmentMapping::new(offset, length, moffset, 0));
        }

        let dump = idx.dump(0);
        for w in dump.windows(2) {
            assert!(w[0].end() <= w[1].offset(), "disjointness violated: {w:?}");
        }
    }
}
