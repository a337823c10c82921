// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Sizing of the per-column regions of a split buffer

use std::ops::Range;

use arrow_buffer::bit_util;
use lance_core::utils::bit::pad_to_multiple;
use lance_core::SPLIT_ALIGN;

use crate::column::{Column, ColumnKind};

/// Padded region sizes of one column within one sub-table.
///
/// For string columns every field is filled in by the string preprocessing
/// pass; `data_size` is then the padded size of the chars.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnSplitInfo {
    pub data_size: usize,
    pub validity_size: usize,
    pub offsets_size: usize,
    pub num_chars: usize,
    /// Position of the window's first char within the source chars
    pub chars_offset: usize,
}

impl ColumnSplitInfo {
    pub fn total_size(&self) -> usize {
        self.data_size + self.validity_size + self.offsets_size
    }
}

/// Padded size of a validity bitmask covering `num_rows` rows
pub(crate) fn padded_validity_size(num_rows: usize) -> usize {
    pad_to_multiple(bit_util::ceil(num_rows, 8), SPLIT_ALIGN)
}

/// Fill in (fixed-width) or sum up (string) the padded size of `column`.
pub fn compute_column_size(
    column: &Column,
    kind: ColumnKind,
    info: &mut ColumnSplitInfo,
) -> usize {
    if let ColumnKind::FixedWidth { byte_width } = kind {
        let num_rows = column.len();
        *info = ColumnSplitInfo {
            data_size: pad_to_multiple(num_rows * byte_width, SPLIT_ALIGN),
            validity_size: if column.nullable() {
                padded_validity_size(num_rows)
            } else {
                0
            },
            ..Default::default()
        };
    }
    log::trace!("Column of {} rows needs {:?}", column.len(), info);
    info.total_size()
}

/// Where one column's regions sit in the split buffer.
///
/// Regions are laid out column by column, and within a column as data,
/// validity, offsets.  Every region starts at a multiple of [`SPLIT_ALIGN`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLayout {
    pub data: Range<usize>,
    pub validity: Range<usize>,
    pub offsets: Range<usize>,
}

/// Place every column's regions and return the layouts with the total size.
pub fn layout_columns(infos: &[ColumnSplitInfo]) -> (Vec<ColumnLayout>, usize) {
    let mut cursor = 0;
    let mut region = |size: usize| {
        let range = cursor..cursor + size;
        cursor += size;
        range
    };
    let layouts = infos
        .iter()
        .map(|info| ColumnLayout {
            data: region(info.data_size),
            validity: region(info.validity_size),
            offsets: region(info.offsets_size),
        })
        .collect();
    (layouts, cursor)
}

#[cfg(test)]
mod tests {
    use arrow_array::{Int16Array, Int64Array};

    use super::*;

    #[test]
    fn test_fixed_width_sizes() {
        let column = Column::try_from_arrow(&Int64Array::from(vec![1; 9])).unwrap();
        let mut info = ColumnSplitInfo::default();
        let kind = column.kind().unwrap();
        assert_eq!(compute_column_size(&column, kind, &mut info), 128);
        assert_eq!(info.data_size, 128);
        assert_eq!(info.validity_size, 0);

        let column =
            Column::try_from_arrow(&Int16Array::from(vec![Some(1), None, Some(3)])).unwrap();
        let kind = column.kind().unwrap();
        assert_eq!(compute_column_size(&column, kind, &mut info), 128);
        assert_eq!(info.data_size, 64);
        assert_eq!(info.validity_size, 64);
    }

    #[test]
    fn test_padded_validity_size() {
        assert_eq!(padded_validity_size(0), 0);
        assert_eq!(padded_validity_size(1), 64);
        assert_eq!(padded_validity_size(512), 64);
        assert_eq!(padded_validity_size(513), 128);
    }

    #[test]
    fn test_zero_rows() {
        let column = Column::try_from_arrow(&Int16Array::from(vec![Some(1), None])).unwrap();
        let empty = column.slice(1, 0);
        let mut info = ColumnSplitInfo {
            data_size: 64,
            ..Default::default()
        };
        let kind = empty.kind().unwrap();
        assert_eq!(compute_column_size(&empty, kind, &mut info), 0);
        assert_eq!(info, ColumnSplitInfo::default());
    }

    #[test]
    fn test_layout_alignment() {
        let infos = [
            ColumnSplitInfo {
                data_size: 128,
                validity_size: 64,
                ..Default::default()
            },
            ColumnSplitInfo::default(),
            ColumnSplitInfo {
                data_size: 64,
                validity_size: 0,
                offsets_size: 64,
                num_chars: 10,
                chars_offset: 3,
            },
        ];
        let (layouts, total) = layout_columns(&infos);
        assert_eq!(total, 320);
        assert_eq!(layouts[0].data, 0..128);
        assert_eq!(layouts[0].validity, 128..192);
        assert_eq!(layouts[1].data, 192..192);
        assert_eq!(layouts[2].data, 192..256);
        assert_eq!(layouts[2].offsets, 256..320);
        for layout in &layouts {
            for region in [&layout.data, &layout.validity, &layout.offsets] {
                assert_eq!(region.start % SPLIT_ALIGN, 0);
            }
        }
    }
}
