// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::LayerIndex;
use crate::binary_search::partition_point;
use crate::segment::{Segment, SegmentMapping};
use crate::Error;
use std::collections::BTreeMap;

/// The immutable index backing a sealed RO LSMT layer: a sorted, disjoint
/// array of [`SegmentMapping`]s loaded once from the layer's trailing index
/// block and looked up by binary search (`spec.md` §4.2).
#[derive(Debug, Clone)]
pub struct Index {
    mappings: Box<[SegmentMapping]>,
}

impl Index {
    /// Validates `raw` (sorted, disjoint, and every non-zeroed mapping's
    /// physical range falling within `[moffset_low, moffset_high)`) and
    /// builds an `Index` from it. `vsize` is the layer's logical size in
    /// sectors; no mapping may extend past it.
    ///
    /// Invalid-mapping padding entries (`spec.md` §4.1) are dropped.
    pub fn new(
        raw: &[SegmentMapping],
        moffset_low: u64,
        moffset_high: u64,
        vsize: u64,
    ) -> crate::Result<Self> {
        let mut mappings: Vec<SegmentMapping> =
            raw.iter().filter(|m| !m.is_invalid()).copied().collect();
        mappings.sort_by_key(SegmentMapping::offset);

        let mut prev_end: Option<u64> = None;
        for m in &mappings {
            if let Some(prev_end) = prev_end {
                if m.offset() < prev_end {
                    return Err(Error::Corrupt(format!(
                        "index not disjoint: mapping at {} overlaps previous end {prev_end}",
                        m.offset()
                    )));
                }
            }
            if m.end() > vsize {
                return Err(Error::Corrupt(format!(
                    "mapping end {} exceeds layer virtual size {vsize}",
                    m.end()
                )));
            }
            if !m.zeroed && (m.moffset < moffset_low || m.mend() > moffset_high) {
                return Err(Error::Corrupt(format!(
                    "mapping physical range [{}, {}) outside data file bounds [{moffset_low}, {moffset_high})",
                    m.moffset,
                    m.mend()
                )));
            }
            prev_end = Some(m.end());
        }

        Ok(Self {
            mappings: mappings.into_boxed_slice(),
        })
    }

    /// Builds an `Index` directly from an already-sorted, already-disjoint,
    /// already-validated array (e.g. from [`super::Index0::dump`] or
    /// [`Self::merge`]), skipping re-validation.
    #[must_use]
    pub fn from_sorted_trusted(mappings: Box<[SegmentMapping]>) -> Self {
        Self { mappings }
    }

    /// Number of mappings held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// `true` if the index holds no mappings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Merges several sealed indexes into one, applying the same
    /// overlap-clipping rule as [`super::Index0::insert`] (a later index in
    /// `indexes` wins over an earlier one for any overlapping range).
    /// Callers pass indexes bottom-to-top, so the last entry is the
    /// topmost, most-recent layer and its mappings shadow everything below
    /// (`spec.md` §4.1, §2 overlay semantics). Each source index's mappings
    /// are tagged with their position in `indexes` so the merged result
    /// still identifies which input layer contributed a range (`spec.md`
    /// §4.6 compaction).
    #[must_use]
    pub fn merge(indexes: &[&Index]) -> Index {
        let mut working: BTreeMap<u64, SegmentMapping> = BTreeMap::new();

        // Apply in the given (bottom-to-top) order so a later index clips
        // and supersedes an earlier one, matching Index0::insert.
        for (tag, idx) in indexes.iter().enumerate() {
            for m in idx.mappings.iter() {
                let mut tagged = *m;
                tagged.tag = u8::try_from(tag).unwrap_or(u8::MAX);
                insert_clipping(&mut working, tagged);
            }
        }

        let mappings: Vec<SegmentMapping> = working.into_values().collect();
        Index::from_sorted_trusted(mappings.into_boxed_slice())
    }
}

/// Shared overlap-clipping insert, used by both `Index0::insert` and
/// `Index::merge`.
fn insert_clipping(map: &mut BTreeMap<u64, SegmentMapping>, m: SegmentMapping) {
    let overlapping: Vec<u64> = map
        .range(..m.end())
        .filter(|(_, e)| e.end() > m.offset())
        .map(|(k, _)| *k)
        .collect();

    for key in overlapping {
        let e = map.remove(&key).expect("key came from this map");

        if e.offset() < m.offset() {
            let mut left = e;
            left.backward_end_to(m.offset());
            map.insert(left.offset(), left);
        }

        if e.end() > m.end() {
            let mut right = e;
            right.forward_offset_to(m.end());
            map.insert(right.offset(), right);
        }
    }

    map.insert(m.offset(), m);
}

impl LayerIndex for Index {
    fn lookup(&self, query: Segment) -> Vec<SegmentMapping> {
        if query.is_empty() || self.mappings.is_empty() {
            return Vec::new();
        }

        let start = partition_point(&self.mappings, |m| m.end() <= query.offset);

        let mut out = Vec::new();
        for m in &self.mappings[start..] {
            if m.offset() >= query.end() {
                break;
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

    fn mappings(pairs: &[(u64, u32, u64)]) -> Vec<SegmentMapping> {
        pairs
            .iter()
            .map(|&(o, l, m)| SegmentMapping::new(o, l, m, 0))
            .collect()
    }

    #[test]
    fn new_accepts_sorted_disjoint_mappings() {
        let raw = mappings(&[(0, 10, 0), (10, 10, 100)]);
        let idx = Index::new(&raw, 0, 200, 20).unwrap();
        assert_eq!(2, idx.len());
    }

    #[test]
    fn new_rejects_overlapping_mappings() {
        let raw = mappings(&[(0, 10, 0), (5, 10, 100)]);
        assert!(Index::new(&raw, 0, 200, 20).is_err());
    }

    #[test]
    fn new_rejects_mapping_past_vsize() {
        let raw = mappings(&[(0, 10, 0)]);
        assert!(Index::new(&raw, 0, 200, 5).is_err());
    }

    #[test]
    fn new_rejects_physical_range_outside_bounds() {
        let raw = mappings(&[(0, 10, 500)]);
        assert!(Index::new(&raw, 0, 200, 20).is_err());
    }

    #[test]
    fn new_drops_invalid_padding_entries() {
        let mut raw = mappings(&[(0, 10, 0)]);
        raw.push(SegmentMapping::invalid_mapping());
        let idx = Index::new(&raw, 0, 200, 20).unwrap();
        assert_eq!(1, idx.len());
    }

    #[test]
    fn lookup_binary_search_clips() {
        let raw = mappings(&[(0, 10, 0), (10, 10, 100), (20, 10, 200)]);
        let idx = Index::new(&raw, 0, 300, 30).unwrap();

        let found = idx.lookup(Segment::new(5, 20));
        assert_eq!(3, found.len());
        assert_eq!(5, found[0].offset());
        assert_eq!(10, found[0].end());
        assert_eq!(20, found[2].offset());
        assert_eq!(25, found[2].end());
    }

    #[test]
    fn merge_prefers_later_index() {
        // Bottom-to-top order, as `Stacked::new` passes `ro_layers`: the
        // last entry (`upper`) must shadow the overlapping middle of
        // `lower`.
        let lower = Index::new(&mappings(&[(0, 30, 0)]), 0, 2000, 100).unwrap();
        let upper = Index::new(&mappings(&[(10, 10, 1000)]), 0, 2000, 100).unwrap();

        let merged = Index::merge(&[&lower, &upper]);
        let dump = merged.lookup(Segment::new(0, 30));

        assert_eq!(3, dump.len());
        assert_eq!((0, 10, 0), (dump[0].offset(), dump[0].length(), dump[0].moffset));
        assert_eq!((10, 10, 1000), (dump[1].offset(), dump[1].length(), dump[1].moffset));
        assert_eq!((20, 10, 20), (dump[2].offset(), dump[2].length(), dump[2].moffset));
        assert_eq!(0, dump[0].tag, "lower index tagged 0");
        assert_eq!(1, dump[1].tag, "upper index tagged 1");
        assert_eq!(0, dump[2].tag, "untouched tail still from lower, tagged 0");
    }
}
