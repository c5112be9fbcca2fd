// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! `Segment` and `SegmentMapping`: the 16-byte logical-to-physical mapping
//! unit that every index (`crate::layer_index`) is built from.
//!
//! Grounded in `examples/original_source/src/overlaybd/lsmt/index.h`'s
//! bit-packed `Segment`/`SegmentMapping` structs; the bit widths
//! (50/14/55/1/8) are carried over verbatim since they're part of the
//! on-disk contract (`spec.md` §3, §6.1).

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Largest representable logical sector offset (50 bits).
pub const MAX_OFFSET: u64 = (1 << 50) - 1;

/// Largest representable segment length, in sectors (14 bits, ~8 MiB).
pub const MAX_LENGTH: u32 = (1 << 14) - 1;

/// Largest representable physical sector offset (55 bits).
pub const MAX_MOFFSET: u64 = (1 << 55) - 1;

/// Sentinel logical offset marking padding/tombstone entries in an on-disk
/// index dump.
pub const INVALID_OFFSET: u64 = MAX_OFFSET;

/// A half-open logical sector range `[offset, offset + length)`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Segment {
    /// Logical start sector.
    pub offset: u64,
    /// Length in sectors.
    pub length: u32,
}

impl Segment {
    /// Creates a new segment, asserting the range fits the on-disk bit
    /// widths.
    #[must_use]
    pub fn new(offset: u64, length: u32) -> Self {
        debug_assert!(offset <= MAX_OFFSET);
        debug_assert!(length <= MAX_LENGTH);
        Self { offset, length }
    }

    /// Exclusive end sector.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + u64::from(self.length)
    }

    /// `true` if this segment is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Advances `offset` forward to `x`, shrinking `length` by the same
    /// delta. Returns the delta. `x` must be `>= offset`.
    pub fn forward_offset_to(&mut self, x: u64) -> u64 {
        debug_assert!(x >= self.offset);
        let delta = x - self.offset;
        self.length = self
            .length
            .saturating_sub(u32::try_from(delta).unwrap_or(u32::MAX));
        self.offset = x;
        delta
    }

    /// Shrinks `length` so that `end() == x`. `x` must be `> offset`.
    pub fn backward_end_to(&mut self, x: u64) {
        debug_assert!(x > self.offset);
        self.length = u32::try_from(x - self.offset).expect("segment length fits in u32");
    }
}

/// A `Segment` plus the physical location it maps to.
///
/// `zeroed` marks a logical hole (the range is implicitly all-zero and
/// `moffset` is not meaningful for reads, though it still points somewhere
/// valid so sealing/padding logic never has to special-case it). `tag`
/// identifies the owning layer once mappings from several layers are
/// merged into one view (`tag == 0` in a single-layer index).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SegmentMapping {
    /// Logical half-open sector range.
    pub segment: Segment,
    /// Physical sector offset into the owning data file.
    pub moffset: u64,
    /// `true` if this range is a hole (implicitly all-zero).
    pub zeroed: bool,
    /// Index of the owning layer in a stacked view.
    pub tag: u8,
}

impl SegmentMapping {
    /// Creates a new, non-zeroed mapping.
    #[must_use]
    pub fn new(offset: u64, length: u32, moffset: u64, tag: u8) -> Self {
        debug_assert!(length <= MAX_LENGTH);
        debug_assert!(moffset <= MAX_MOFFSET);
        Self {
            segment: Segment::new(offset, length),
            moffset,
            zeroed: false,
            tag,
        }
    }

    /// Creates a zeroed (hole) mapping over `offset..offset+length`. Per
    /// `spec.md` §4.3, `moffset` is set to the layer's current EOF so the
    /// entry still points at something valid even though it's never read.
    #[must_use]
    pub fn new_zeroed(offset: u64, length: u32, moffset: u64, tag: u8) -> Self {
        let mut m = Self::new(offset, length, moffset, tag);
        m.zeroed = true;
        m
    }

    /// The padding/tombstone entry used to pad an index dump to an
    /// alignment boundary.
    #[must_use]
    pub fn invalid_mapping() -> Self {
        Self {
            segment: Segment::new(INVALID_OFFSET, 0),
            moffset: 0,
            zeroed: false,
            tag: 0,
        }
    }

    /// `true` if this is an [`Self::invalid_mapping`] padding entry.
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.segment.offset == INVALID_OFFSET
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.segment.offset
    }

    #[must_use]
    pub fn length(&self) -> u32 {
        self.segment.length
    }

    #[must_use]
    pub fn end(&self) -> u64 {
        self.segment.end()
    }

    /// Physical end: `moffset` for holes (no physical extent), else
    /// `moffset + length`.
    #[must_use]
    pub fn mend(&self) -> u64 {
        if self.zeroed {
            self.moffset
        } else {
            self.moffset + u64::from(self.segment.length)
        }
    }

    /// Advances the logical start to `x`, advancing `moffset` by the same
    /// delta unless this is a zeroed mapping (holes have no physical
    /// extent to slide).
    pub fn forward_offset_to(&mut self, x: u64) -> u64 {
        let delta = self.segment.forward_offset_to(x);
        if !self.zeroed {
            self.moffset += delta;
        }
        delta
    }

    /// Shrinks the logical end to `x`. Physical offset is untouched; only
    /// length (hence physical extent) shrinks.
    pub fn backward_end_to(&mut self, x: u64) {
        self.segment.backward_end_to(x);
    }

    /// Returns `true` if `self` and `other` overlap in logical space.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.offset() < other.end() && other.offset() < self.end()
    }
}

impl Encode for SegmentMapping {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        let word0 = (self.segment.offset & MAX_OFFSET) | (u64::from(self.segment.length) << 50);
        let word1 = (self.moffset & MAX_MOFFSET)
            | (u64::from(self.zeroed) << 55)
            | (u64::from(self.tag) << 56);
        writer.write_u64::<LittleEndian>(word0)?;
        writer.write_u64::<LittleEndian>(word1)?;
        Ok(())
    }
}

impl Decode for SegmentMapping {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let word0 = reader.read_u64::<LittleEndian>()?;
        let word1 = reader.read_u64::<LittleEndian>()?;

        let offset = word0 & MAX_OFFSET;
        let length = u32::try_from((word0 >> 50) & u64::from(MAX_LENGTH))
            .expect("14-bit field fits in u32");
        let moffset = word1 & MAX_MOFFSET;
        let zeroed = (word1 >> 55) & 1 != 0;
        let tag = u8::try_from((word1 >> 56) & 0xFF).expect("8-bit field fits in u8");

        Ok(Self {
            segment: Segment { offset, length },
            moffset,
            zeroed,
            tag,
        })
    }
}

/// Encoded size of a `SegmentMapping` on disk.
pub const ENCODED_LEN: usize = 16;
