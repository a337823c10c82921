// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Building column views over a filled split buffer

use arrow_buffer::{bit_util, Buffer};
use arrow_schema::DataType;
use lance_core::{Error, Result};
use snafu::location;

use crate::column::{Bitmap, Column, ColumnKind};
use crate::contiguous::size::{ColumnLayout, ColumnSplitInfo};
use crate::table::Table;

const OFFSET_WIDTH: usize = std::mem::size_of::<i32>();

/// What an output column looks like, independent of any source buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnShape {
    pub data_type: DataType,
    pub num_rows: usize,
    pub nullable: bool,
}

impl From<&Column> for ColumnShape {
    fn from(column: &Column) -> Self {
        Self {
            data_type: column.data_type().clone(),
            num_rows: column.len(),
            nullable: column.nullable(),
        }
    }
}

fn region(buffer: &Buffer, start: usize, len: usize) -> Result<Buffer> {
    if start + len > buffer.len() {
        return Err(Error::internal(
            format!(
                "region {}..{} is outside a split buffer of {} bytes",
                start,
                start + len,
                buffer.len()
            ),
            location!(),
        ));
    }
    Ok(buffer.slice_with_length(start, len))
}

/// Build the column described by `shape` over its regions of `buffer`.
///
/// Zero-row columns get no data (and, for strings, empty children).  The
/// null count is left unknown.
pub fn assemble_column(
    shape: &ColumnShape,
    info: &ColumnSplitInfo,
    layout: &ColumnLayout,
    buffer: &Buffer,
) -> Result<Column> {
    let num_rows = shape.num_rows;
    let validity = if shape.nullable && num_rows > 0 {
        let bytes = region(buffer, layout.validity.start, bit_util::ceil(num_rows, 8))?;
        Some(Bitmap::new(bytes, 0))
    } else {
        None
    };
    match ColumnKind::try_from_data_type(&shape.data_type)? {
        ColumnKind::FixedWidth { byte_width } => {
            let data = if num_rows > 0 {
                Some(region(buffer, layout.data.start, num_rows * byte_width)?)
            } else {
                None
            };
            Ok(Column::new(
                shape.data_type.clone(),
                num_rows,
                0,
                data,
                validity,
                vec![],
            ))
        }
        ColumnKind::String => {
            let (offsets, chars) = if num_rows > 0 {
                (
                    Column::new(
                        DataType::Int32,
                        num_rows + 1,
                        0,
                        Some(region(
                            buffer,
                            layout.offsets.start,
                            (num_rows + 1) * OFFSET_WIDTH,
                        )?),
                        None,
                        vec![],
                    ),
                    Column::new(
                        DataType::UInt8,
                        info.num_chars,
                        0,
                        Some(region(buffer, layout.data.start, info.num_chars)?),
                        None,
                        vec![],
                    ),
                )
            } else {
                (
                    Column::new(DataType::Int32, 0, 0, None, None, vec![]),
                    Column::new(DataType::UInt8, 0, 0, None, None, vec![]),
                )
            };
            Ok(Column::new(
                DataType::Utf8,
                num_rows,
                0,
                None,
                validity,
                vec![offsets, chars],
            ))
        }
    }
}

/// Build a table whose columns reference only `buffer`.
pub fn assemble_table(
    num_rows: usize,
    shapes: &[ColumnShape],
    infos: &[ColumnSplitInfo],
    layouts: &[ColumnLayout],
    buffer: &Buffer,
) -> Result<Table> {
    let columns = shapes
        .iter()
        .zip(infos)
        .zip(layouts)
        .map(|((shape, info), layout)| assemble_column(shape, info, layout, buffer))
        .collect::<Result<Vec<_>>>()?;
    Table::try_new_with_num_rows(num_rows, columns)
}
