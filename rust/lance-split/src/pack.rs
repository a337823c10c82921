// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Packing split results for transfer
//!
//! A [`PackedTable`] is a split buffer plus a small metadata blob describing
//! its columns.  The metadata is little-endian:
//!
//! ```text
//! magic       u32   "LSPT"
//! version     u16
//! num_rows    u64
//! num_columns u32
//! per column:
//!   type      u8    followed by the type's parameters, if any
//!   nullable  u8
//!   data      u64   padded size of values (or chars)
//!   validity  u64   padded size of the validity bitmask
//!   offsets   u64   padded size of string offsets
//!   num_chars u64
//! ```
//!
//! Time units are one byte, a timestamp's time zone is a presence byte and a
//! `u32` length-prefixed string, and decimals store precision (`u8`) and scale
//! (`i8`).  Types without a code of their own are stored by name.
//!
//! Region positions are not stored; they follow from the sizes the same way
//! they do for a fresh split.

use arrow_buffer::bit_util;
use arrow_schema::{DataType, IntervalUnit, TimeUnit};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use lance_core::{Error, Result, SPLIT_ALIGN};
use snafu::location;

use crate::column::ColumnKind;
use crate::contiguous::assemble::{assemble_table, ColumnShape};
use crate::contiguous::{layout_columns, ColumnSplitInfo, ContiguousBuffer, SplitResult};
use crate::table::Table;

const MAGIC: u32 = u32::from_le_bytes(*b"LSPT");
const VERSION: u16 = 1;
const HEADER_SIZE: usize = 4 + 2 + 8 + 4;
/// Everything of a column entry after its type
const REGIONS_SIZE: usize = 1 + 8 * 4;

const TIME32: u8 = 15;
const TIME64: u8 = 16;
const DURATION: u8 = 17;
const TIMESTAMP: u8 = 18;
const INTERVAL: u8 = 19;
const DECIMAL128: u8 = 20;
const DECIMAL256: u8 = 21;
const BY_NAME: u8 = 0xFF;

/// A split result in a form that can be moved without the source table.
#[derive(Debug)]
pub struct PackedTable {
    pub metadata: Bytes,
    pub data: ContiguousBuffer,
}

fn plain_type_code(data_type: &DataType) -> Option<u8> {
    let code = match data_type {
        DataType::Int8 => 1,
        DataType::Int16 => 2,
        DataType::Int32 => 3,
        DataType::Int64 => 4,
        DataType::UInt8 => 5,
        DataType::UInt16 => 6,
        DataType::UInt32 => 7,
        DataType::UInt64 => 8,
        DataType::Float16 => 9,
        DataType::Float32 => 10,
        DataType::Float64 => 11,
        DataType::Date32 => 12,
        DataType::Date64 => 13,
        DataType::Utf8 => 14,
        _ => return None,
    };
    Some(code)
}

fn plain_type(code: u8) -> Option<DataType> {
    let data_type = match code {
        1 => DataType::Int8,
        2 => DataType::Int16,
        3 => DataType::Int32,
        4 => DataType::Int64,
        5 => DataType::UInt8,
        6 => DataType::UInt16,
        7 => DataType::UInt32,
        8 => DataType::UInt64,
        9 => DataType::Float16,
        10 => DataType::Float32,
        11 => DataType::Float64,
        12 => DataType::Date32,
        13 => DataType::Date64,
        14 => DataType::Utf8,
        _ => return None,
    };
    Some(data_type)
}

fn time_unit_code(unit: &TimeUnit) -> u8 {
    match unit {
        TimeUnit::Second => 0,
        TimeUnit::Millisecond => 1,
        TimeUnit::Microsecond => 2,
        TimeUnit::Nanosecond => 3,
    }
}

fn interval_unit_code(unit: &IntervalUnit) -> u8 {
    match unit {
        IntervalUnit::YearMonth => 0,
        IntervalUnit::DayTime => 1,
        IntervalUnit::MonthDayNano => 2,
    }
}

fn put_str(buf: &mut BytesMut, value: &str) {
    buf.put_u32_le(value.len() as u32);
    buf.put_slice(value.as_bytes());
}

fn put_data_type(buf: &mut BytesMut, data_type: &DataType) {
    match data_type {
        DataType::Time32(unit) | DataType::Time64(unit) | DataType::Duration(unit) => {
            buf.put_u8(match data_type {
                DataType::Time32(_) => TIME32,
                DataType::Time64(_) => TIME64,
                _ => DURATION,
            });
            buf.put_u8(time_unit_code(unit));
        }
        DataType::Timestamp(unit, tz) => {
            buf.put_u8(TIMESTAMP);
            buf.put_u8(time_unit_code(unit));
            buf.put_u8(u8::from(tz.is_some()));
            if let Some(tz) = tz {
                put_str(buf, tz);
            }
        }
        DataType::Interval(unit) => {
            buf.put_u8(INTERVAL);
            buf.put_u8(interval_unit_code(unit));
        }
        DataType::Decimal128(precision, scale) | DataType::Decimal256(precision, scale) => {
            buf.put_u8(if matches!(data_type, DataType::Decimal128(..)) {
                DECIMAL128
            } else {
                DECIMAL256
            });
            buf.put_u8(*precision);
            buf.put_i8(*scale);
        }
        other => match plain_type_code(other) {
            Some(code) => buf.put_u8(code),
            None => {
                buf.put_u8(BY_NAME);
                put_str(buf, &other.to_string());
            }
        },
    }
}

fn corrupt(message: impl Into<String>) -> Error {
    Error::invalid_input(
        format!("corrupt packed table: {}", message.into()),
        location!(),
    )
}

fn ensure_remaining(buf: &[u8], needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(corrupt("metadata is too short"));
    }
    Ok(())
}

fn read_u8(buf: &mut &[u8]) -> Result<u8> {
    ensure_remaining(buf, 1)?;
    Ok(buf.get_u8())
}

fn read_str(buf: &mut &[u8]) -> Result<String> {
    ensure_remaining(buf, 4)?;
    let len = buf.get_u32_le() as usize;
    ensure_remaining(buf, len)?;
    let mut value = vec![0; len];
    buf.copy_to_slice(&mut value);
    String::from_utf8(value).map_err(|_| corrupt("type name is not valid UTF-8"))
}

fn read_time_unit(buf: &mut &[u8]) -> Result<TimeUnit> {
    match read_u8(buf)? {
        0 => Ok(TimeUnit::Second),
        1 => Ok(TimeUnit::Millisecond),
        2 => Ok(TimeUnit::Microsecond),
        3 => Ok(TimeUnit::Nanosecond),
        other => Err(corrupt(format!("unknown time unit {}", other))),
    }
}

fn read_data_type(buf: &mut &[u8]) -> Result<DataType> {
    let code = read_u8(buf)?;
    let data_type = match code {
        TIME32 => DataType::Time32(read_time_unit(buf)?),
        TIME64 => DataType::Time64(read_time_unit(buf)?),
        DURATION => DataType::Duration(read_time_unit(buf)?),
        TIMESTAMP => {
            let unit = read_time_unit(buf)?;
            let tz = match read_u8(buf)? {
                0 => None,
                _ => Some(read_str(buf)?.into()),
            };
            DataType::Timestamp(unit, tz)
        }
        INTERVAL => DataType::Interval(match read_u8(buf)? {
            0 => IntervalUnit::YearMonth,
            1 => IntervalUnit::DayTime,
            2 => IntervalUnit::MonthDayNano,
            other => return Err(corrupt(format!("unknown interval unit {}", other))),
        }),
        DECIMAL128 | DECIMAL256 => {
            ensure_remaining(buf, 2)?;
            let precision = buf.get_u8();
            let scale = buf.get_i8();
            if code == DECIMAL128 {
                DataType::Decimal128(precision, scale)
            } else {
                DataType::Decimal256(precision, scale)
            }
        }
        BY_NAME => {
            let name = read_str(buf)?;
            name.parse::<DataType>()
                .map_err(|e| corrupt(format!("unknown column type {}: {}", name, e)))?
        }
        other => plain_type(other)
            .ok_or_else(|| corrupt(format!("unknown packed column type {}", other)))?,
    };
    Ok(data_type)
}

fn read_size(buf: &mut &[u8]) -> Result<usize> {
    let value = buf.get_u64_le();
    usize::try_from(value).map_err(|_| corrupt(format!("size {} does not fit in memory", value)))
}

/// Check that the regions described by `info` can hold `num_rows` rows
fn check_regions(
    data_type: &DataType,
    num_rows: usize,
    nullable: bool,
    info: &ColumnSplitInfo,
) -> Result<()> {
    let fits = |count: Option<usize>, region: usize| count.is_some_and(|count| count <= region);
    if num_rows == 0 {
        return Ok(());
    }
    if nullable && !fits(Some(bit_util::ceil(num_rows, 8)), info.validity_size) {
        return Err(corrupt("validity overflows its region"));
    }
    let data_fits = match ColumnKind::try_from_data_type(data_type)? {
        ColumnKind::FixedWidth { byte_width } => {
            fits(num_rows.checked_mul(byte_width), info.data_size)
        }
        ColumnKind::String => {
            fits(Some(info.num_chars), info.data_size)
                && fits(
                    num_rows.checked_add(1).and_then(|n| n.checked_mul(4)),
                    info.offsets_size,
                )
        }
    };
    if !data_fits {
        return Err(corrupt(format!("{} rows overflow their regions", num_rows)));
    }
    Ok(())
}

impl SplitResult {
    /// Describe this result's columns and hand over its buffer.
    pub fn pack(self) -> PackedTable {
        let infos = self.column_infos().to_vec();
        let (table, data) = self.into_parts();
        let mut metadata = BytesMut::with_capacity(HEADER_SIZE + (1 + REGIONS_SIZE) * infos.len());
        metadata.put_u32_le(MAGIC);
        metadata.put_u16_le(VERSION);
        metadata.put_u64_le(table.num_rows() as u64);
        metadata.put_u32_le(table.num_columns() as u32);
        for (column, info) in table.columns().iter().zip(&infos) {
            put_data_type(&mut metadata, column.data_type());
            metadata.put_u8(u8::from(column.nullable()));
            metadata.put_u64_le(info.data_size as u64);
            metadata.put_u64_le(info.validity_size as u64);
            metadata.put_u64_le(info.offsets_size as u64);
            metadata.put_u64_le(info.num_chars as u64);
        }
        PackedTable {
            metadata: metadata.freeze(),
            data,
        }
    }
}

/// Rebuild the table described by `packed`.
///
/// The columns reference only `packed.data`.  Null counts are left unknown.
pub fn unpack(packed: &PackedTable) -> Result<Table> {
    let mut buf = packed.metadata.as_ref();
    if buf.remaining() < HEADER_SIZE {
        return Err(corrupt("metadata is too short"));
    }
    if buf.get_u32_le() != MAGIC {
        return Err(corrupt("bad magic"));
    }
    let version = buf.get_u16_le();
    if version != VERSION {
        return Err(Error::not_supported(
            format!("packed table version {}", version),
            location!(),
        ));
    }
    let num_rows = read_size(&mut buf)?;
    let num_columns = buf.get_u32_le() as usize;

    let mut shapes = Vec::new();
    let mut infos = Vec::new();
    for _ in 0..num_columns {
        let data_type = read_data_type(&mut buf)?;
        ensure_remaining(buf, REGIONS_SIZE)?;
        let nullable = buf.get_u8() != 0;
        let info = ColumnSplitInfo {
            data_size: read_size(&mut buf)?,
            validity_size: read_size(&mut buf)?,
            offsets_size: read_size(&mut buf)?,
            num_chars: read_size(&mut buf)?,
            chars_offset: 0,
        };
        let regions = [info.data_size, info.validity_size, info.offsets_size];
        if regions.iter().any(|size| size % SPLIT_ALIGN != 0) {
            return Err(corrupt("region sizes are not aligned"));
        }
        if regions.iter().any(|size| *size > packed.data.len()) {
            return Err(corrupt("a region is larger than the buffer"));
        }
        check_regions(&data_type, num_rows, nullable, &info)?;
        shapes.push(ColumnShape {
            data_type,
            num_rows,
            nullable,
        });
        infos.push(info);
    }
    if buf.has_remaining() {
        return Err(corrupt(format!(
            "{} unexpected bytes after the column metadata",
            buf.remaining()
        )));
    }

    let (layouts, total_size) = layout_columns(&infos);
    if total_size != packed.data.len() {
        return Err(corrupt(format!(
            "columns need {} bytes but the buffer holds {}",
            total_size,
            packed.data.len()
        )));
    }
    let table = assemble_table(num_rows, &shapes, &infos, &layouts, packed.data.buffer())?;
    // The buffer may come from anywhere
    table.validate()?;
    Ok(table)
}
