// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use std::str::FromStr;

use lance_core::{Error, Result};
use snafu::location;

use crate::warp::WARP_SIZE;

/// Threads per block used by the copy kernels unless configured otherwise.
pub const DEFAULT_BLOCK_SIZE: u32 = 256;
/// Largest block a launch may request.
pub const MAX_THREADS_PER_BLOCK: u32 = 1024;
/// Resident blocks per worker thread used to derive the default grid bound.
const BLOCKS_PER_WORKER: u32 = 32;

/// Configuration of the execution device.
///
/// The defaults can be overridden with environment variables:
///
/// * `LANCE_DEVICE_THREADS` - worker threads standing in for multiprocessors
/// * `LANCE_DEVICE_BLOCK_SIZE` - threads per block for the copy kernels
/// * `LANCE_DEVICE_MAX_GRID` - upper bound on the number of blocks in a launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Number of worker threads executing warps concurrently
    pub num_threads: usize,
    /// Threads per block, a positive multiple of the warp size
    pub block_size: u32,
    /// Maximum number of blocks in a grid.  Larger index spaces are covered
    /// by striding the grid across them.
    pub max_grid_size: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let num_threads = env_or("LANCE_DEVICE_THREADS", num_cpus::get(), |v: &usize| *v > 0);
        let block_size = env_or("LANCE_DEVICE_BLOCK_SIZE", DEFAULT_BLOCK_SIZE, |v: &u32| {
            is_valid_block_size(*v)
        });
        let default_grid = (num_threads as u32).saturating_mul(BLOCKS_PER_WORKER);
        let max_grid_size = env_or("LANCE_DEVICE_MAX_GRID", default_grid, |v: &u32| *v > 0);
        Self {
            num_threads,
            block_size,
            max_grid_size,
        }
    }
}

impl DeviceConfig {
    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_max_grid_size(mut self, max_grid_size: u32) -> Self {
        self.max_grid_size = max_grid_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_threads == 0 {
            return Err(Error::invalid_input(
                "device must have at least one worker thread",
                location!(),
            ));
        }
        if !is_valid_block_size(self.block_size) {
            return Err(Error::invalid_input(
                format!(
                    "block size {} must be a positive multiple of {} no larger than {}",
                    self.block_size, WARP_SIZE, MAX_THREADS_PER_BLOCK
                ),
                location!(),
            ));
        }
        if self.max_grid_size == 0 {
            return Err(Error::invalid_input(
                "max grid size must be positive",
                location!(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn is_valid_block_size(block_size: u32) -> bool {
    block_size > 0 && block_size % WARP_SIZE as u32 == 0 && block_size <= MAX_THREADS_PER_BLOCK
}

fn env_or<T: FromStr + std::fmt::Display>(name: &str, default: T, valid: impl Fn(&T) -> bool) -> T {
    match std::env::var(name) {
        Ok(raw) => parse_setting(name, &raw, default, valid),
        Err(_) => default,
    }
}

fn parse_setting<T: FromStr + std::fmt::Display>(
    name: &str,
    raw: &str,
    default: T,
    valid: impl Fn(&T) -> bool,
) -> T {
    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => value,
        _ => {
            log::warn!("Ignoring invalid value {:?} for {}, using {}", raw, name, default);
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_setting() {
        assert_eq!(parse_setting("X", "512", 256u32, |v| is_valid_block_size(*v)), 512);
        assert_eq!(parse_setting("X", " 64 ", 256u32, |v| is_valid_block_size(*v)), 64);
        // Not a multiple of the warp size
        assert_eq!(parse_setting("X", "100", 256u32, |v| is_valid_block_size(*v)), 256);
        assert_eq!(parse_setting("X", "2048", 256u32, |v| is_valid_block_size(*v)), 256);
        assert_eq!(parse_setting("X", "abc", 4usize, |v| *v > 0), 4);
    }

    #[test]
    fn test_validate() {
        let config = DeviceConfig::default()
            .with_num_threads(2)
            .with_block_size(128)
            .with_max_grid_size(8);
        assert!(config.validate().is_ok());
        assert!(config.clone().with_block_size(48).validate().is_err());
        assert!(config.clone().with_num_threads(0).validate().is_err());
        assert!(config.with_max_grid_size(0).validate().is_err());
    }
}
