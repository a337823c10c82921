// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Contiguous split of tables into self-owned buffers.
//!
//! A [`Table`] is a set of equal-length [`Column`] views over Arrow buffers.
//! [`contiguous_split`] cuts a table at a list of row indices and deep-copies
//! every resulting row range into a single 64-byte aligned buffer, using
//! kernels launched on a [`lance_device::Stream`].  Each [`SplitResult`] owns
//! its buffer and references nothing of the source table, so it can be moved,
//! [packed](SplitResult::pack) or dropped independently.
//!
//! ```
//! use std::sync::Arc;
//!
//! use arrow_array::{Int32Array, RecordBatch};
//! use arrow_schema::{DataType, Field, Schema};
//! use lance_device::{Device, PoolAllocator};
//! use lance_split::{contiguous_split, Table};
//!
//! let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Int32, false)]));
//! let batch = RecordBatch::try_new(
//!     schema.clone(),
//!     vec![Arc::new(Int32Array::from((0..8).collect::<Vec<_>>()))],
//! )
//! .unwrap();
//! let table = Table::try_from_batch(&batch).unwrap();
//! let stream = Device::default_device().unwrap().create_stream();
//! let allocator = PoolAllocator::unbounded();
//!
//! let results = contiguous_split(&table, &[4], &allocator, &stream).unwrap();
//! assert_eq!(results.len(), 2);
//! assert_eq!(results[1].to_batch(schema).unwrap(), batch.slice(4, 4));
//! ```

pub mod column;
pub mod contiguous;
pub mod deepcopy;
pub mod memory;
pub mod pack;
pub mod table;

pub use column::{Bitmap, Column, ColumnKind, OffsetsView};
pub use contiguous::{contiguous_split, ContiguousBuffer, SplitResult, SplitScratch};
pub use deepcopy::{deep_copy_batch, deep_copy_table};
pub use memory::BufferAccumulator;
pub use pack::{unpack, PackedTable};
pub use table::{split_table, Table};
