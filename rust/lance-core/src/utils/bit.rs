// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

pub fn is_pwr_two(n: u64) -> bool {
    n != 0 && n & (n - 1) == 0
}

/// Round `n` up to the next multiple of `align`, which must be a power of two.
#[inline]
pub fn pad_to_multiple(n: usize, align: usize) -> usize {
    debug_assert!(is_pwr_two(align as u64));
    (n + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_to_multiple() {
        assert_eq!(pad_to_multiple(0, 64), 0);
        assert_eq!(pad_to_multiple(1, 64), 64);
        assert_eq!(pad_to_multiple(64, 64), 64);
        assert_eq!(pad_to_multiple(65, 64), 128);
        assert_eq!(pad_to_multiple(32, 8), 32);
    }

    #[test]
    fn test_is_pwr_two() {
        assert!(is_pwr_two(64));
        assert!(is_pwr_two(1));
        assert!(!is_pwr_two(0));
        assert!(!is_pwr_two(96));
    }

    proptest::proptest! {
        #[test]
        fn test_pad_is_aligned_and_minimal(n in 0usize..1_000_000) {
            let padded = pad_to_multiple(n, 64);
            proptest::prop_assert_eq!(padded % 64, 0);
            proptest::prop_assert!(padded >= n);
            proptest::prop_assert!(padded - n < 64);
        }
    }
}
