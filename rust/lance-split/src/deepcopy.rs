// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use arrow_array::RecordBatch;
use lance_core::{Error, Result};
use lance_device::{DeviceAllocator, Stream};
use snafu::location;

use crate::contiguous::{contiguous_split, SplitResult};
use crate::table::Table;

/// Copy all of `table` into a single buffer.
///
/// The copy holds only the rows of the view, not the rest of the storage the
/// view was sliced from.
pub fn deep_copy_table(
    table: &Table,
    allocator: &dyn DeviceAllocator,
    stream: &Stream,
) -> Result<SplitResult> {
    contiguous_split(table, &[], allocator, stream)?
        .pop()
        .ok_or_else(|| Error::internal("split without split points gave no result", location!()))
}

/// Copy the rows of `batch` into a single buffer owned by the returned batch.
pub fn deep_copy_batch(
    batch: &RecordBatch,
    allocator: &dyn DeviceAllocator,
    stream: &Stream,
) -> Result<RecordBatch> {
    let table = Table::try_from_batch(batch)?;
    deep_copy_table(&table, allocator, stream)?.to_batch(batch.schema())
}

#[cfg(test)]
pub mod tests {
    use std::sync::Arc;

    use arrow_array::{Array, Int32Array, RecordBatch, StringArray};
    use arrow_schema::{DataType, Field, Schema};
    use lance_device::{Device, DeviceConfig, PoolAllocator};

    use super::*;
    use crate::memory::BufferAccumulator;

    fn test_stream() -> Stream {
        Device::try_new(DeviceConfig::default().with_num_threads(2))
            .unwrap()
            .create_stream()
    }

    #[test]
    fn test_deep_copy_sliced_array_with_nulls() {
        let array = Arc::new(Int32Array::from(vec![
            Some(1),
            None,
            Some(3),
            None,
            Some(5),
        ]));
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, true)]));
        let batch = RecordBatch::try_new(schema, vec![array]).unwrap().slice(1, 3);
        let allocator = PoolAllocator::unbounded();
        let copied = deep_copy_batch(&batch, &allocator, &test_stream()).unwrap();

        assert_eq!(copied, batch);
        let copied_int = copied
            .column(0)
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap();
        assert!(!copied_int.is_valid(0));
        assert!(copied_int.is_valid(1));
        assert!(!copied_int.is_valid(2));
        assert_eq!(copied_int.value(1), 3);
        assert_eq!(copied_int.offset(), 0);
    }

    #[test]
    fn test_deep_copy_batch_sliced() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("name", DataType::Utf8, false),
        ]));

        let id_array = Arc::new(Int32Array::from((0..100).collect::<Vec<i32>>()));
        let name_array = Arc::new(StringArray::from(
            (0..100)
                .map(|i| format!("name_{}", i))
                .collect::<Vec<String>>(),
        ));

        let batch = RecordBatch::try_new(
            schema,
            vec![id_array as Arc<dyn Array>, name_array as Arc<dyn Array>],
        )
        .unwrap();

        let sliced = batch.slice(10, 5);
        let allocator = PoolAllocator::unbounded();
        let stream = test_stream();
        let copied = deep_copy_table(&Table::try_from_batch(&sliced).unwrap(), &allocator, &stream)
            .unwrap();

        let mut source = BufferAccumulator::default();
        source.record_batch(&batch);
        let mut copy = BufferAccumulator::default();
        copy.record_table(copied.table());
        assert_eq!(copy.num_allocations(), 1);
        assert!(copy.is_disjoint(&source));
        // Only the five rows were copied
        assert_eq!(copied.buffer().len(), allocator.used());
        assert!(copied.buffer().len() < 1024);

        let copied = copied.to_batch(sliced.schema()).unwrap();
        assert_eq!(copied.num_rows(), 5);
        let name_col = copied
            .column(1)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        for i in 0..5 {
            assert_eq!(name_col.value(i), format!("name_{}", 10 + i));
        }
        assert_eq!(name_col.value_offsets()[0], 0);
    }
}
