// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use std::{collections::HashSet, ptr::NonNull};

use arrow_array::{Array, RecordBatch};
use arrow_buffer::Buffer;
use arrow_data::ArrayData;

use crate::column::Column;
use crate::table::Table;

/// Counts the distinct allocations referenced by tables, columns and Arrow arrays.
///
/// Two buffers sliced from the same allocation count once, and each
/// allocation counts with its **total** capacity, even if only a slice of it
/// is referenced.  This makes it possible to check that a split result
/// references exactly one allocation and nothing of its source.
#[derive(Default)]
pub struct BufferAccumulator {
    seen: HashSet<NonNull<u8>>,
    total: usize,
}

impl BufferAccumulator {
    fn record_buffer(&mut self, buffer: &Buffer) {
        // An empty buffer owns nothing worth counting
        if buffer.capacity() == 0 {
            return;
        }
        if self.seen.insert(buffer.data_ptr()) {
            self.total += buffer.capacity();
        }
    }

    pub fn record_column(&mut self, column: &Column) {
        if let Some(data) = column.data() {
            self.record_buffer(data);
        }
        if let Some(validity) = column.validity() {
            self.record_buffer(validity.buffer());
        }
        for child in column.children() {
            self.record_column(child);
        }
    }

    pub fn record_table(&mut self, table: &Table) {
        for column in table.columns() {
            self.record_column(column);
        }
    }

    pub fn record_array(&mut self, array: &dyn Array) {
        let data = array.to_data();
        self.record_array_data(&data);
    }

    fn record_array_data(&mut self, data: &ArrayData) {
        for buffer in data.buffers() {
            self.record_buffer(buffer);
        }
        if let Some(nulls) = data.nulls() {
            self.record_buffer(nulls.inner().inner());
        }
        for child in data.child_data() {
            self.record_array_data(child);
        }
    }

    pub fn record_batch(&mut self, batch: &RecordBatch) {
        for array in batch.columns() {
            self.record_array(array);
        }
    }

    /// Number of distinct allocations seen
    pub fn num_allocations(&self) -> usize {
        self.seen.len()
    }

    /// Total capacity of all distinct allocations seen
    pub fn total(&self) -> usize {
        self.total
    }

    /// Whether no allocation was seen by both accumulators
    pub fn is_disjoint(&self, other: &Self) -> bool {
        self.seen.is_disjoint(&other.seen)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_array::{Int32Array, StringArray};
    use arrow_schema::{DataType, Field, Schema};

    use super::*;

    #[test]
    fn test_buffer_accumulator() {
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, false)])),
            vec![Arc::new(Int32Array::from(vec![1, 2, 3]))],
        )
        .unwrap();
        let slice = batch.slice(1, 2);

        let mut acc = BufferAccumulator::default();

        // Should record whole buffer, not just slice
        acc.record_batch(&slice);
        assert_eq!(acc.total(), 3 * std::mem::size_of::<i32>());

        // Should not double count
        acc.record_batch(&slice);
        assert_eq!(acc.total(), 3 * std::mem::size_of::<i32>());
        assert_eq!(acc.num_allocations(), 1);
    }

    #[test]
    fn test_table_shares_batch_allocations() {
        let strings = StringArray::from(vec![Some("a"), None, Some("ccc")]);
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("s", DataType::Utf8, true)])),
            vec![Arc::new(strings)],
        )
        .unwrap();
        let table = Table::try_from_batch(&batch).unwrap().slice(1, 2);

        let mut from_batch = BufferAccumulator::default();
        from_batch.record_batch(&batch);
        let mut from_table = BufferAccumulator::default();
        from_table.record_table(&table);
        // Offsets, chars and validity
        assert_eq!(from_table.num_allocations(), 3);
        assert_eq!(from_table.total(), from_batch.total());
        assert!(!from_table.is_disjoint(&from_batch));
    }
}
