// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Contiguous split: deep-copying row ranges of a table into one buffer each
//!
//! For every sub-table the engine
//!
//! 1. computes the chars of all string columns in one batched device pass
//!    ([`preprocess`]) and waits for the result,
//! 2. sizes every column's data, validity and offsets regions, each padded to
//!    64 bytes ([`size`]),
//! 3. allocates one buffer for the whole sub-table,
//! 4. copies values, rebuilds validity and rebases offsets ([`kernels`]),
//! 5. builds column views over the new buffer ([`assemble`]).
//!
//! Sub-tables are processed in order with a single scratch array of
//! [`ColumnSplitInfo`] that is rewritten for each of them, so sub-tables of one
//! call never overlap.

use arrow_array::RecordBatch;
use arrow_buffer::Buffer;
use arrow_schema::SchemaRef;
use lance_core::Result;
use lance_device::{DeviceAllocator, Stream};
use tracing::instrument;

use crate::column::{empty_buffer, Column, ColumnKind};
use crate::table::{split_table, Table};

pub mod assemble;
pub mod kernels;
pub mod preprocess;
pub mod size;

use assemble::{assemble_table, ColumnShape};
use kernels::copy_table;
use preprocess::preprocess_strings;
pub use size::{compute_column_size, layout_columns, ColumnLayout, ColumnSplitInfo};

/// The single owned memory region behind a [`SplitResult`].
#[derive(Debug)]
pub struct ContiguousBuffer {
    buffer: Buffer,
}

impl ContiguousBuffer {
    pub(crate) fn new(buffer: Buffer) -> Self {
        Self { buffer }
    }

    /// A buffer that holds nothing and was never allocated
    pub(crate) fn empty() -> Self {
        Self::new(empty_buffer())
    }

    /// Place received bytes (e.g. the data of a [`PackedTable`](crate::pack::PackedTable))
    /// in freshly allocated, aligned device memory.
    pub fn try_from_slice(
        data: &[u8],
        allocator: &dyn DeviceAllocator,
        stream: &Stream,
    ) -> Result<Self> {
        if data.is_empty() {
            return Ok(Self::empty());
        }
        let mut buffer = allocator.allocate(data.len(), stream)?;
        buffer.as_mut_slice().copy_from_slice(data);
        Ok(Self::new(buffer.freeze()))
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }
}

/// One sub-table together with the buffer its columns point into.
#[derive(Debug)]
pub struct SplitResult {
    table: Table,
    buffer: ContiguousBuffer,
    infos: Vec<ColumnSplitInfo>,
}

impl SplitResult {
    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn buffer(&self) -> &ContiguousBuffer {
        &self.buffer
    }

    pub fn num_rows(&self) -> usize {
        self.table.num_rows()
    }

    /// The sizes of every column's regions in [`Self::buffer`]
    pub fn column_infos(&self) -> &[ColumnSplitInfo] {
        &self.infos
    }

    /// Where every column's regions sit in [`Self::buffer`]
    pub fn layouts(&self) -> Vec<ColumnLayout> {
        layout_columns(&self.infos).0
    }

    pub fn into_parts(self) -> (Table, ContiguousBuffer) {
        (self.table, self.buffer)
    }

    /// Export the sub-table; the batch keeps the buffer alive.
    pub fn to_batch(&self, schema: SchemaRef) -> Result<RecordBatch> {
        self.table.to_batch(schema)
    }
}

/// Per-column scratch space reused across the sub-tables of one split.
#[derive(Debug)]
pub struct SplitScratch {
    infos: Vec<ColumnSplitInfo>,
}

impl SplitScratch {
    pub fn new(num_columns: usize) -> Self {
        Self {
            infos: vec![ColumnSplitInfo::default(); num_columns],
        }
    }

    pub fn infos(&self) -> &[ColumnSplitInfo] {
        &self.infos
    }
}

/// Resolve the copy behavior of every column, failing on the first unsupported one.
pub fn column_kinds(table: &Table) -> Result<Vec<ColumnKind>> {
    table.columns().iter().map(Column::kind).collect()
}

/// Split `table` at `splits` and deep-copy every row range into its own buffer.
///
/// `N` split points give `N + 1` results in split order.  The splits must be
/// non-decreasing and within `0..=table.num_rows()`.  Inputs are validated
/// before anything is allocated or launched; if any sub-table fails, every
/// result is dropped and the error returned.
///
/// Kernels are issued on `stream`.  The results are complete once everything
/// issued on `stream` so far has completed.
#[instrument(level = "debug", skip_all, fields(num_rows = table.num_rows(), num_columns = table.num_columns(), num_splits = splits.len()))]
pub fn contiguous_split(
    table: &Table,
    splits: &[usize],
    allocator: &dyn DeviceAllocator,
    stream: &Stream,
) -> Result<Vec<SplitResult>> {
    let kinds = column_kinds(table)?;
    table.validate()?;
    let sub_tables = split_table(table, splits)?;

    let mut scratch = SplitScratch::new(table.num_columns());
    sub_tables
        .iter()
        .map(|sub_table| split_sub_table(sub_table, &kinds, &mut scratch, allocator, stream))
        .collect()
}

#[instrument(level = "debug", skip_all, fields(num_rows = table.num_rows()))]
fn split_sub_table(
    table: &Table,
    kinds: &[ColumnKind],
    scratch: &mut SplitScratch,
    allocator: &dyn DeviceAllocator,
    stream: &Stream,
) -> Result<SplitResult> {
    preprocess_strings(table, kinds, &mut scratch.infos, stream)?;

    let mut total_size = 0;
    for ((column, kind), info) in table.columns().iter().zip(kinds).zip(&mut scratch.infos) {
        total_size += compute_column_size(column, *kind, info);
    }
    let (layouts, laid_out) = layout_columns(&scratch.infos);
    debug_assert_eq!(laid_out, total_size);

    let buffer = if total_size == 0 {
        ContiguousBuffer::empty()
    } else {
        let mut device_buffer = allocator.allocate(total_size, stream)?;
        copy_table(stream, table, kinds, &scratch.infos, device_buffer.as_mut_slice())?;
        ContiguousBuffer::new(device_buffer.freeze())
    };
    log::debug!(
        "Split {} rows into a buffer of {} bytes",
        table.num_rows(),
        total_size
    );

    let shapes = table
        .columns()
        .iter()
        .map(ColumnShape::from)
        .collect::<Vec<_>>();
    let result_table = assemble_table(
        table.num_rows(),
        &shapes,
        &scratch.infos,
        &layouts,
        buffer.buffer(),
    )?;
    Ok(SplitResult {
        table: result_table,
        buffer,
        infos: scratch.infos.clone(),
    })
}
