// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use crate::config::is_valid_block_size;
use crate::warp::WARP_SIZE;

/// Grid and block dimensions of a kernel launch.
///
/// The grid is bounded: a launch over more warps than `grid_dim *
/// warps_per_block` has every warp slot stride across the index space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    pub grid_dim: u32,
    pub block_dim: u32,
}

impl LaunchConfig {
    pub fn new(grid_dim: u32, block_dim: u32) -> Self {
        Self {
            grid_dim,
            block_dim,
        }
    }

    /// Pick a grid covering `num_elements` indices with blocks of `block_dim`
    /// threads, capped at `max_grid_size` blocks.
    pub fn for_num_elements(num_elements: usize, block_dim: u32, max_grid_size: u32) -> Self {
        let blocks = num_elements.div_ceil(block_dim.max(1) as usize);
        let grid_dim = blocks.clamp(1, max_grid_size.max(1) as usize) as u32;
        Self {
            grid_dim,
            block_dim,
        }
    }

    pub fn warps_per_block(&self) -> usize {
        self.block_dim as usize / WARP_SIZE
    }

    /// Number of warps scheduled at once; each one strides by this amount.
    pub fn concurrent_warps(&self) -> usize {
        self.grid_dim as usize * self.warps_per_block()
    }

    pub(crate) fn check(&self) -> std::result::Result<(), String> {
        if self.grid_dim == 0 {
            return Err("grid dimension must be positive".to_string());
        }
        if !is_valid_block_size(self.block_dim) {
            return Err(format!(
                "invalid block dimension {}: must be a positive multiple of {} no larger than {}",
                self.block_dim,
                WARP_SIZE,
                crate::config::MAX_THREADS_PER_BLOCK
            ));
        }
        Ok(())
    }
}
