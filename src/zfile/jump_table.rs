// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! In-memory reconstruction of a ZFile's block index from the trailing
//! `u32` compressed-length array (`spec.md` §3, §4.4).

/// Maps block index to absolute file offset, bounding memory with a
/// two-level `partial_offset[k·G]` + `delta[i]` scheme (`spec.md` §3):
/// `offset(i) = partial_offset[i/group_size] + delta[i]`.
///
/// `group_size` is chosen so every `delta` fits a `u16`: a group spans at
/// most `65535 / max_block_len` blocks, so the running offset within a
/// group never exceeds `u16::MAX`.
#[derive(Debug, Clone)]
pub struct JumpTable {
    group_size: u64,
    partial_offsets: Vec<u64>,
    deltas: Vec<u16>,
}

impl JumpTable {
    /// Builds a jump table from `lengths[i]` = on-disk byte length of block
    /// `i` (compressed bytes, plus the trailing CRC32C if `verify` is on).
    /// `data_start` is the absolute offset of block 0 (just past the
    /// header record).
    #[must_use]
    pub fn build(lengths: &[u32], data_start: u64) -> Self {
        let max_len = lengths.iter().copied().max().unwrap_or(1).max(1) as u64;
        let group_size = (u64::from(u16::MAX) / max_len).max(1);

        let n = lengths.len();
        let num_groups = (n as u64 / group_size) + 1;
        let mut partial_offsets = Vec::with_capacity(num_groups as usize);
        let mut deltas = Vec::with_capacity(n + 1);

        let mut offset = data_start;
        for i in 0..=n {
            let group = i as u64 / group_size;
            if group as usize == partial_offsets.len() {
                partial_offsets.push(offset);
            }
            let delta = offset - partial_offsets[group as usize];
            deltas.push(u16::try_from(delta).expect("group_size bounds every delta to u16"));
            if i < n {
                offset += u64::from(lengths[i]);
            }
        }

        Self {
            group_size,
            partial_offsets,
            deltas,
        }
    }

    /// Number of blocks covered (deltas includes one sentinel past the
    /// last block, so this is one less than `deltas.len()`).
    #[must_use]
    pub fn block_count(&self) -> u64 {
        self.deltas.len() as u64 - 1
    }

    /// Absolute file offset of `block_index`. Valid for
    /// `0..=block_count()`; the sentinel at `block_count()` gives the
    /// offset just past the last block's data (i.e. the length array's
    /// own offset).
    #[must_use]
    pub fn offset(&self, block_index: u64) -> u64 {
        let group = (block_index / self.group_size) as usize;
        self.partial_offsets[group] + u64::from(self.deltas[block_index as usize])
    }

    /// On-disk byte length of `block_index` (compressed bytes, plus CRC if
    /// verification is enabled).
    #[must_use]
    pub fn block_len(&self, block_index: u64) -> u64 {
        self.offset(block_index + 1) - self.offset(block_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn single_block() {
        let jt = JumpTable::build(&[100], 512);
        assert_eq!(512, jt.offset(0));
        assert_eq!(612, jt.offset(1));
        assert_eq!(100, jt.block_len(0));
        assert_eq!(1, jt.block_count());
    }

    #[test]
    fn many_blocks_cumulative_offsets() {
        let lengths = vec![4096u32; 1000];
        let jt = JumpTable::build(&lengths, 512);
        assert_eq!(1000, jt.block_count());
        for i in 0..1000u64 {
            assert_eq!(512 + i * 4096, jt.offset(i));
            assert_eq!(4096, jt.block_len(i));
        }
    }

    #[test]
    fn variable_lengths() {
        let lengths = vec![10u32, 2000, 50, 4096, 1];
        let jt = JumpTable::build(&lengths, 0);
        let mut expected = 0u64;
        for (i, &len) in lengths.iter().enumerate() {
            assert_eq!(expected, jt.offset(i as u64));
            expected += u64::from(len);
        }
        assert_eq!(expected, jt.offset(lengths.len() as u64));
    }

    #[test]
    fn group_boundary_deltas_fit_u16() {
        // Large blocks force a small group_size; verify it still builds
        // and every offset round-trips correctly across group boundaries.
        let lengths = vec![60_000u32; 50];
        let jt = JumpTable::build(&lengths, 0);
        assert!(jt.group_size <= 1);
        for i in 0..50u64 {
            assert_eq!(i * 60_000, jt.offset(i));
        }
    }
}
