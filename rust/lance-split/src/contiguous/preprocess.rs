// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! One batched pass computing the sizes of every string column of a sub-table

use lance_core::utils::bit::pad_to_multiple;
use lance_core::{Result, SPLIT_ALIGN};
use lance_device::{DeviceVec, Stream, WARP_SIZE};
use tracing::instrument;

use crate::column::{ColumnKind, OffsetsView};
use crate::contiguous::size::{padded_validity_size, ColumnSplitInfo};
use crate::table::Table;

const OFFSET_WIDTH: usize = std::mem::size_of::<i32>();

/// What the preprocessing kernel needs to know about one string column.
///
/// Holds only a view of the offsets, never the column itself.
#[derive(Debug, Clone, Copy)]
pub struct StringDescriptor<'a> {
    pub column_index: usize,
    pub row_offset: usize,
    pub row_count: usize,
    pub nullable: bool,
    pub offsets: OffsetsView<'a>,
}

impl StringDescriptor<'_> {
    /// The sizes of this column's regions, as computed on the device
    fn split_info(&self) -> ColumnSplitInfo {
        let first = self.offsets.get(self.row_offset);
        let last = self.offsets.get(self.row_offset + self.row_count);
        let num_chars = (last - first) as usize;
        ColumnSplitInfo {
            data_size: pad_to_multiple(num_chars, SPLIT_ALIGN),
            validity_size: if self.nullable {
                padded_validity_size(self.row_count)
            } else {
                0
            },
            offsets_size: pad_to_multiple((self.row_count + 1) * OFFSET_WIDTH, SPLIT_ALIGN),
            num_chars,
            chars_offset: first as usize,
        }
    }
}

/// Describe every non-empty string column of `table`, in column order.
///
/// Zero-row columns are left out; their regions are empty.
pub fn collect_string_descriptors<'a>(
    table: &'a Table,
    kinds: &[ColumnKind],
) -> Result<Vec<StringDescriptor<'a>>> {
    let mut descriptors = Vec::new();
    for (column_index, (column, kind)) in table.columns().iter().zip(kinds).enumerate() {
        if *kind != ColumnKind::String || column.is_empty() {
            continue;
        }
        let offsets = match column.offsets() {
            Some(offsets) => OffsetsView::try_from_column(offsets)?,
            None => continue,
        };
        descriptors.push(StringDescriptor {
            column_index,
            row_offset: column.offset(),
            row_count: column.len(),
            nullable: column.nullable(),
            offsets,
        });
    }
    Ok(descriptors)
}

/// Reset `scratch` and fill in the slots of all string columns of `table`.
///
/// The descriptors go to the device in a single transfer and one kernel
/// computes every column's sizes.  Copying the slots back to `scratch` is the
/// synchronization point; afterwards the sizes may be used on the host.
/// Nothing is transferred or launched when the table has no non-empty string
/// column.
#[instrument(level = "debug", skip_all, fields(num_columns = table.num_columns()))]
pub fn preprocess_strings(
    table: &Table,
    kinds: &[ColumnKind],
    scratch: &mut [ColumnSplitInfo],
    stream: &Stream,
) -> Result<()> {
    let descriptors = collect_string_descriptors(table, kinds)?;
    if descriptors.is_empty() {
        scratch.fill(ColumnSplitInfo::default());
        return Ok(());
    }
    log::debug!("Preprocessing {} string columns", descriptors.len());

    let device_descriptors = stream.copy_to_device(&descriptors)?;
    let mut device_scratch = DeviceVec::<ColumnSplitInfo>::zeroed(scratch.len());

    // Pair every descriptor with the slot of its column
    let mut pending = device_descriptors.as_slice().iter().peekable();
    let mut assignments = device_scratch
        .as_mut_slice()
        .iter_mut()
        .enumerate()
        .filter_map(|(idx, slot)| {
            pending
                .next_if(|descriptor| descriptor.column_index == idx)
                .map(|descriptor| (descriptor, slot))
        })
        .collect::<Vec<_>>()
        .into_iter();
    let mut work = Vec::with_capacity(lance_device::num_warps(descriptors.len()));
    loop {
        let lanes = assignments.by_ref().take(WARP_SIZE).collect::<Vec<_>>();
        if lanes.is_empty() {
            break;
        }
        work.push(lanes);
    }

    let config = stream.launch_config(descriptors.len());
    stream.launch("preprocess_strings", config, work, |_warp, lanes| {
        for (descriptor, slot) in lanes {
            *slot = descriptor.split_info();
        }
    })?;

    stream.copy_to_host(&device_scratch, scratch)
}

#[cfg(test)]
mod tests {
    use arrow_array::{Int32Array, StringArray};
    use lance_device::{Device, DeviceConfig};

    use super::*;
    use crate::column::Column;

    fn test_stream() -> Stream {
        Device::try_new(DeviceConfig::default().with_num_threads(2))
            .unwrap()
            .create_stream()
    }

    fn kinds(table: &Table) -> Vec<ColumnKind> {
        table.columns().iter().map(|c| c.kind().unwrap()).collect()
    }

    #[test]
    fn test_batched_sizes() {
        let strings = StringArray::from(vec![Some("a"), None, Some("ccc"), Some("dddd")]);
        let table = Table::try_new(vec![
            Column::try_from_arrow(&Int32Array::from(vec![1, 2, 3, 4])).unwrap(),
            Column::try_from_arrow(&strings).unwrap(),
            Column::try_from_arrow(&StringArray::from(vec!["x", "yy", "zzz", ""])).unwrap(),
        ])
        .unwrap()
        .slice(1, 2);
        let stream = test_stream();
        let mut scratch = vec![
            ColumnSplitInfo {
                data_size: 999,
                ..Default::default()
            };
            3
        ];
        preprocess_strings(&table, &kinds(&table), &mut scratch, &stream).unwrap();

        assert_eq!(scratch[0], ColumnSplitInfo::default());
        assert_eq!(
            scratch[1],
            ColumnSplitInfo {
                data_size: 64,
                validity_size: 64,
                offsets_size: 64,
                num_chars: 3,
                chars_offset: 1,
            }
        );
        assert_eq!(scratch[2].num_chars, 5);
        assert_eq!(scratch[2].chars_offset, 1);
        assert_eq!(scratch[2].validity_size, 0);
        // One transfer each way and a single launch
        assert_eq!(stream.num_transfers(), 2);
        assert_eq!(stream.num_launches(), 1);
    }

    #[test]
    fn test_no_strings_no_work() {
        let table = Table::try_new(vec![
            Column::try_from_arrow(&Int32Array::from(vec![1, 2])).unwrap(),
            Column::try_from_arrow(&StringArray::from(vec!["a", "b"])).unwrap(),
        ])
        .unwrap()
        .slice(2, 0);
        let stream = test_stream();
        let mut scratch = vec![ColumnSplitInfo::default(); 2];
        preprocess_strings(&table, &kinds(&table), &mut scratch, &stream).unwrap();
        assert_eq!(stream.num_transfers(), 0);
        assert_eq!(stream.num_launches(), 0);
    }
}
