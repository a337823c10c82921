// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

pub mod error;
pub mod utils;

pub use error::{Error, Result};

/// Every region carved out of a contiguous split buffer starts at a multiple
/// of this many bytes.
pub const SPLIT_ALIGN: usize = 64;
