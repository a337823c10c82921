// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use std::ops::Range;

/// Number of lanes executing in lockstep in one warp.
pub const WARP_SIZE: usize = 32;

/// Number of warps needed to cover `num_elements` logical indices.
#[inline]
pub fn num_warps(num_elements: usize) -> usize {
    num_elements.div_ceil(WARP_SIZE)
}

/// A group of [`WARP_SIZE`] lanes covering a contiguous run of logical indices.
///
/// Lane `i` of warp `w` handles logical index `w * WARP_SIZE + i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Warp {
    index: usize,
}

impl Warp {
    pub fn new(index: usize) -> Self {
        Self { index }
    }

    /// Position of this warp in the launch's index space
    pub fn index(&self) -> usize {
        self.index
    }

    /// Logical index handled by lane 0
    pub fn first_index(&self) -> usize {
        self.index * WARP_SIZE
    }

    /// Logical indices handled by this warp, clipped to `bound`
    pub fn indices(&self, bound: usize) -> Range<usize> {
        let start = self.first_index().min(bound);
        let end = (self.first_index() + WARP_SIZE).min(bound);
        start..end
    }

    /// Collect one predicate per lane into a word where bit `i` is lane `i`'s vote.
    ///
    /// Every lane evaluates `predicate(lane)`; the votes are OR-reduced as
    /// `vote_i << i` across the warp.  The result is identical for all lanes,
    /// so exactly one lane (lane 0) needs to store it.
    #[inline]
    pub fn ballot(&self, predicate: impl Fn(usize) -> bool) -> u32 {
        (0..WARP_SIZE).fold(0u32, |word, lane| word | ((predicate(lane) as u32) << lane))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ballot() {
        let warp = Warp::new(0);
        assert_eq!(warp.ballot(|_| true), u32::MAX);
        assert_eq!(warp.ballot(|_| false), 0);
        assert_eq!(warp.ballot(|lane| lane % 2 == 0), 0x5555_5555);
        assert_eq!(warp.ballot(|lane| lane == 31), 1 << 31);
    }

    #[test]
    fn test_indices() {
        let warp = Warp::new(2);
        assert_eq!(warp.first_index(), 64);
        assert_eq!(warp.indices(1000), 64..96);
        assert_eq!(warp.indices(70), 64..70);
        assert_eq!(warp.indices(10), 10..10);
        assert_eq!(num_warps(0), 0);
        assert_eq!(num_warps(1), 1);
        assert_eq!(num_warps(64), 2);
        assert_eq!(num_warps(65), 3);
    }
}
