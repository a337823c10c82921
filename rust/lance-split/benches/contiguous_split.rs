// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use std::sync::Arc;

use arrow_array::{Float64Array, Int32Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use lance_device::{Device, PoolAllocator};
use lance_split::{contiguous_split, Table};
use rand::Rng;

const NUM_ROWS: usize = 1024 * 1024;
const NUM_SPLITS: &[usize] = &[1, 16, 1024];

fn random_batch(num_rows: usize) -> RecordBatch {
    let mut rng = rand::thread_rng();
    let schema = Arc::new(Schema::new(vec![
        Field::new("i", DataType::Int32, true),
        Field::new("f", DataType::Float64, false),
        Field::new("s", DataType::Utf8, true),
    ]));
    let ints = Int32Array::from_iter((0..num_rows).map(|_| {
        let value = rng.gen::<i32>();
        (value % 10 != 0).then_some(value)
    }));
    let floats = Float64Array::from_iter_values((0..num_rows).map(|_| rng.gen::<f64>()));
    let strings = StringArray::from_iter((0..num_rows).map(|_| {
        let len = rng.gen_range(0..16);
        (len != 0).then(|| "x".repeat(len))
    }));
    RecordBatch::try_new(
        schema,
        vec![Arc::new(ints), Arc::new(floats), Arc::new(strings)],
    )
    .unwrap()
}

fn bench_contiguous_split(c: &mut Criterion) {
    let batch = random_batch(NUM_ROWS);
    let table = Table::try_from_batch(&batch).unwrap();
    let stream = Device::default_device().unwrap().create_stream();
    let allocator = PoolAllocator::unbounded();

    let mut group = c.benchmark_group("contiguous_split");
    group.throughput(Throughput::Bytes(batch.get_array_memory_size() as u64));
    for num_splits in NUM_SPLITS {
        let step = NUM_ROWS / (num_splits + 1);
        let splits = (1..=*num_splits).map(|i| i * step).collect::<Vec<_>>();
        group.bench_function(format!("{}_splits", num_splits), |b| {
            b.iter(|| {
                black_box(contiguous_split(&table, &splits, &allocator, &stream).unwrap());
            })
        });
    }
    group.finish();
}

criterion_group!(
    name=benches;
    config = Criterion::default().significance_level(0.1).sample_size(10);
    targets = bench_contiguous_split);

criterion_main!(benches);
