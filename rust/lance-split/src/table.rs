// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use arrow_array::{RecordBatch, RecordBatchOptions};
use arrow_schema::SchemaRef;
use lance_core::{Error, Result};
use snafu::location;

use crate::column::Column;

/// An ordered set of equal-length columns.
#[derive(Debug, Clone)]
pub struct Table {
    num_rows: usize,
    columns: Vec<Column>,
}

impl Table {
    /// Create a table, checking that all columns share a row count.
    ///
    /// A table without columns has zero rows, see [`Table::with_num_rows`].
    pub fn try_new(columns: Vec<Column>) -> Result<Self> {
        let num_rows = columns.first().map_or(0, Column::len);
        Self::try_new_with_num_rows(num_rows, columns)
    }

    pub fn try_new_with_num_rows(num_rows: usize, columns: Vec<Column>) -> Result<Self> {
        if let Some((idx, column)) = columns
            .iter()
            .enumerate()
            .find(|(_, column)| column.len() != num_rows)
        {
            return Err(Error::invalid_input(
                format!(
                    "column {} has {} rows but the table has {}",
                    idx,
                    column.len(),
                    num_rows
                ),
                location!(),
            ));
        }
        Ok(Self { num_rows, columns })
    }

    /// A table with no columns
    pub fn with_num_rows(num_rows: usize) -> Self {
        Self {
            num_rows,
            columns: vec![],
        }
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, idx: usize) -> &Column {
        &self.columns[idx]
    }

    /// Check the structure of every column
    pub fn validate(&self) -> Result<()> {
        self.columns.iter().try_for_each(Column::validate)
    }

    /// Rows `offset..offset + len` as a zero-copy view.
    ///
    /// Panics if the range is out of bounds.
    pub fn slice(&self, offset: usize, len: usize) -> Self {
        assert!(
            offset + len <= self.num_rows,
            "slice {}..{} out of bounds for table of {} rows",
            offset,
            offset + len,
            self.num_rows
        );
        Self {
            num_rows: len,
            columns: self
                .columns
                .iter()
                .map(|column| column.slice(offset, len))
                .collect(),
        }
    }

    /// Import a record batch without copying its buffers.
    pub fn try_from_batch(batch: &RecordBatch) -> Result<Self> {
        let columns = batch
            .columns()
            .iter()
            .map(|array| Column::try_from_arrow(array.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Self::try_new_with_num_rows(batch.num_rows(), columns)
    }

    /// Export as a record batch with the given schema.
    pub fn to_batch(&self, schema: SchemaRef) -> Result<RecordBatch> {
        let arrays = self
            .columns
            .iter()
            .map(Column::to_arrow)
            .collect::<Result<Vec<_>>>()?;
        let options = RecordBatchOptions::new().with_row_count(Some(self.num_rows));
        Ok(RecordBatch::try_new_with_options(schema, arrays, &options)?)
    }
}

/// Check that `splits` is a non-decreasing list of row indices within `0..=num_rows`.
pub fn validate_splits(splits: &[usize], num_rows: usize) -> Result<()> {
    let mut previous = 0;
    for (idx, &split) in splits.iter().enumerate() {
        if split > num_rows {
            return Err(Error::invalid_input(
                format!(
                    "split index {} at position {} is past the end of a table of {} rows",
                    split, idx, num_rows
                ),
                location!(),
            ));
        }
        if split < previous {
            return Err(Error::invalid_input(
                format!(
                    "split indices must be non-decreasing but {} follows {} at position {}",
                    split, previous, idx
                ),
                location!(),
            ));
        }
        previous = split;
    }
    Ok(())
}

/// The row ranges implied by `splits`: `splits.len() + 1` adjacent ranges
/// covering `0..num_rows` in order.
pub fn split_ranges(splits: &[usize], num_rows: usize) -> Vec<std::ops::Range<usize>> {
    let mut start = 0;
    splits
        .iter()
        .copied()
        .chain(std::iter::once(num_rows))
        .map(|end| {
            let range = start..end;
            start = end;
            range
        })
        .collect()
}

/// Cut `table` at every index in `splits` into zero-copy views.
///
/// `N` split points yield `N + 1` views, some of which may be empty.
pub fn split_table(table: &Table, splits: &[usize]) -> Result<Vec<Table>> {
    validate_splits(splits, table.num_rows())?;
    Ok(split_ranges(splits, table.num_rows())
        .into_iter()
        .map(|range| table.slice(range.start, range.len()))
        .collect())
}
