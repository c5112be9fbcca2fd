// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{Index, Index0, LayerIndex};
use crate::segment::{Segment, SegmentMapping};

/// An overlaid view of a mutable top index over an immutable bottom index,
/// or either alone.
///
/// Grounded in `examples/original_source/src/overlaybd/lsmt/index.h`'s
/// `IComboIndex`, which wraps a top/bottom pointer pair that may each be
/// null. Per the redesign note in `spec.md` §9, the three reachable shapes
/// (top-only RW layer, bottom-only sealed stack, or both during a RW
/// layer's life atop a sealed stack) are made an explicit closed enum
/// instead of a struct with optional fields, since a `Bottom`-only combo
/// never receives writes and shouldn't expose `insert`.
#[derive(Debug)]
pub enum ComboIndex {
    /// Just a writable top layer; no lower layers stacked beneath it.
    Top(Index0),
    /// Just sealed layers; no writable layer on top.
    Bottom(Index),
    /// A writable top layer stacked atop sealed layers. `tag_delta` is
    /// added to every tag reported from `bottom`, so tags stay unique
    /// across the whole logical stack (`spec.md` §4.5 `stack`).
    Both {
        top: Index0,
        bottom: Index,
        tag_delta: u8,
    },
}

impl ComboIndex {
    /// Inserts into the top index. Panics if there is no top index —
    /// writing to a `Bottom`-only combo is a programming error, not a
    /// recoverable data error (callers never hold a write handle to a
    /// read-only stack).
    pub fn insert(&mut self, m: SegmentMapping) {
        match self {
            Self::Top(top) | Self::Both { top, .. } => top.insert(m),
            Self::Bottom(_) => unreachable!("cannot write through a read-only combo index"),
        }
    }

    /// Mutable access to the top index, if present.
    pub fn top_mut(&mut self) -> Option<&mut Index0> {
        match self {
            Self::Top(top) | Self::Both { top, .. } => Some(top),
            Self::Bottom(_) => None,
        }
    }
}

impl LayerIndex for ComboIndex {
    fn lookup(&self, query: Segment) -> Vec<SegmentMapping> {
        match self {
            Self::Top(top) => top.lookup(query),
            Self::Bottom(bottom) => bottom.lookup(query),
            Self::Both { top, bottom, tag_delta } => {
                let mut out = Vec::new();
                let mut cursor = query;

                for m in top.lookup(query) {
                    if cursor.offset < m.offset() {
                        fill_from_bottom(
                            bottom,
                            Segment::new(cursor.offset, u32::try_from(m.offset() - cursor.offset).expect("gap fits in u32")),
                            *tag_delta,
                            &mut out,
                        );
                    }
                    cursor.forward_offset_to(m.end());
                    out.push(m);
                }

                if cursor.length > 0 {
                    fill_from_bottom(bottom, cursor, *tag_delta, &mut out);
                }

                out
            }
        }
    }
}

fn fill_from_bottom(bottom: &Index, gap: Segment, tag_delta: u8, out: &mut Vec<SegmentMapping>) {
    for mut m in bottom.lookup(gap) {
        m.tag = m.tag.wrapping_add(tag_delta);
        out.push(m);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn bottom_with(pairs: &[(u64, u32, u64)]) -> Index {
        let raw: Vec<SegmentMapping> = pairs
            .iter()
            .map(|&(o, l, m)| SegmentMapping::new(o, l, m, 0))
            .collect();
        Index::new(&raw, 0, 10_000, 1000).unwrap()
    }

    #[test]
    fn top_only_delegates() {
        let mut idx0 = Index0::new();
        idx0.insert(SegmentMapping::new(0, 10, 0, 0));
        let combo = ComboIndex::Top(idx0);
        assert_eq!(1, combo.lookup(Segment::new(0, 10)).len());
    }

    #[test]
    fn bottom_only_delegates() {
        let bottom = bottom_with(&[(0, 10, 0)]);
        let combo = ComboIndex::Bottom(bottom);
        assert_eq!(1, combo.lookup(Segment::new(0, 10)).len());
    }

    #[test]
    #[should_panic(expected = "cannot write through a read-only combo index")]
    fn bottom_only_insert_panics() {
        let bottom = bottom_with(&[(0, 10, 0)]);
        let mut combo = ComboIndex::Bottom(bottom);
        combo.insert(SegmentMapping::new(0, 10, 0, 0));
    }

    #[test]
    fn both_overlays_top_over_bottom_gaps() {
        let bottom = bottom_with(&[(0, 30, 0)]);
        let mut top = Index0::new();
        top.insert(SegmentMapping::new(10, 10, 5000, 0));

        let combo = ComboIndex::Both {
            top,
            bottom,
            tag_delta: 1,
        };

        let found = combo.lookup(Segment::new(0, 30));
        assert_eq!(3, found.len());

        assert_eq!((0, 10, 0), (found[0].offset(), found[0].length(), found[0].moffset));
        assert_eq!(1, found[0].tag, "bottom mapping tag shifted by tag_delta");

        assert_eq!((10, 10, 5000), (found[1].offset(), found[1].length(), found[1].moffset));
        assert_eq!(0, found[1].tag, "top mapping keeps tag 0");

        assert_eq!((20, 10, 20), (found[2].offset(), found[2].length(), found[2].moffset));
        assert_eq!(1, found[2].tag);
    }
}
