// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! A single-instruction-multiple-thread execution model for Lance kernels.
//!
//! Work is expressed the way it would be on an accelerator: kernels are
//! launched onto an ordered [`Stream`] with a [`LaunchConfig`] describing a
//! grid of blocks, each block made of 32-lane [`Warp`]s.  A bounded grid
//! strides over an arbitrarily large index space.  Device memory comes from a
//! [`DeviceAllocator`] and every allocation is 64-byte aligned.
//!
//! This backend executes warps on a dedicated worker pool of the host.  A
//! launch is issued in stream order and completes before the next operation on
//! the same stream starts, so issue order is also completion order.

pub mod config;
pub mod device;
pub mod launch;
pub mod memory;
pub mod stream;
pub mod warp;

pub use config::DeviceConfig;
pub use device::{Device, DeviceProperties};
pub use launch::LaunchConfig;
pub use memory::{DeviceAllocator, DeviceBuffer, DeviceVec, PoolAllocator, Reservation, SystemAllocator};
pub use stream::{Stream, StreamPolicy, StreamPolicyFn};
pub use warp::{num_warps, Warp, WARP_SIZE};
