// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Kernels copying a sub-table into its split buffer
//!
//! Each warp owns disjoint slices of the output (its rows' values, its
//! validity word, its offsets and chars), so every output byte has exactly one
//! writer.  Validity words are built with a warp ballot and stored by the warp
//! as a whole; the stored word is bit-identical to the source bits of the
//! warp's rows regardless of the source's bit alignment.

use arrow_buffer::bit_util;
use lance_core::{Error, Result};
use lance_device::{num_warps, Stream, Warp, WARP_SIZE};
use snafu::location;
use tracing::instrument;

use crate::column::{Column, ColumnKind, OffsetsView};
use crate::contiguous::size::ColumnSplitInfo;
use crate::table::Table;

const OFFSET_WIDTH: usize = std::mem::size_of::<i32>();
const VALIDITY_WORD_WIDTH: usize = std::mem::size_of::<u32>();

/// The output a single warp of the fixed-width kernel writes
struct FixedWidthWarp<'a> {
    values: &'a mut [u8],
    validity: Option<&'a mut [u8]>,
}

/// The output a single warp of the string kernel writes
struct StringWarp<'a> {
    chars: &'a mut [u8],
    offsets: &'a mut [u8],
    validity: Option<&'a mut [u8]>,
}

/// The bytes of `column`'s data from its first row on
fn source_data(column: &Column, byte_width: usize) -> Result<&[u8]> {
    column
        .data()
        .and_then(|data| data.as_slice().get(column.offset() * byte_width..))
        .ok_or_else(|| Error::internal("column has no data to copy", location!()))
}

#[inline]
fn store_validity_word(warp: &Warp, column: &Column, num_rows: usize, out: &mut [u8]) {
    let rows = warp.indices(num_rows);
    let word = warp.ballot(|lane| lane < rows.len() && column.is_valid(rows.start + lane));
    out.copy_from_slice(&word.to_le_bytes());
}

/// Split a validity region into one word per warp covering `num_rows`
fn validity_words(region: &mut [u8], num_rows: usize) -> impl Iterator<Item = &mut [u8]> {
    region
        .chunks_exact_mut(VALIDITY_WORD_WIDTH)
        .take(num_warps(num_rows))
}

/// Copy the values of a fixed-width column and rebuild its validity.
///
/// Lane `i` of warp `w` handles row `w * 32 + i`.  With `HAS_VALIDITY` unset
/// the kernel never looks at validity.
pub fn copy_fixed_width<const HAS_VALIDITY: bool>(
    stream: &Stream,
    column: &Column,
    byte_width: usize,
    values: &mut [u8],
    validity: &mut [u8],
) -> Result<()> {
    let num_rows = column.len();
    if num_rows == 0 {
        return Ok(());
    }
    let source = source_data(column, byte_width)?;
    let mut words = validity_words(validity, num_rows);
    let work = values[..num_rows * byte_width]
        .chunks_mut(WARP_SIZE * byte_width)
        .map(|values| FixedWidthWarp {
            values,
            validity: if HAS_VALIDITY { words.next() } else { None },
        })
        .collect::<Vec<_>>();

    let config = stream.launch_config(num_rows);
    stream.launch("copy_fixed_width", config, work, |warp, out| {
        let start = warp.first_index() * byte_width;
        out.values
            .copy_from_slice(&source[start..start + out.values.len()]);
        if HAS_VALIDITY {
            if let Some(word) = out.validity {
                store_validity_word(&warp, column, num_rows, word);
            }
        }
    })
}

/// Copy the chars, rebased offsets and validity of a string column in one launch.
///
/// The index space covers `max(num_chars, num_rows + 1)`.  Index `i` copies
/// char `i` if `i < num_chars` and offset `i` if `i <= num_rows`.  Validity
/// words are only built by the warps within the (shorter) validity bound.
pub fn copy_string<const HAS_VALIDITY: bool>(
    stream: &Stream,
    column: &Column,
    info: &ColumnSplitInfo,
    chars: &mut [u8],
    validity: &mut [u8],
    offsets: &mut [u8],
) -> Result<()> {
    let num_rows = column.len();
    if num_rows == 0 {
        return Ok(());
    }
    let (source_offsets, source_chars) = match (column.offsets(), column.chars()) {
        (Some(offsets), Some(chars)) => (
            OffsetsView::try_from_column(offsets)?,
            source_data(chars, 1)?,
        ),
        _ => {
            return Err(Error::internal(
                "string column is missing its children",
                location!(),
            ))
        }
    };
    let num_chars = info.num_chars;
    let num_offsets = num_rows + 1;
    let row_offset = column.offset();
    let chars_offset = info.chars_offset;
    let base = chars_offset as i32;

    let num_indices = num_chars.max(num_offsets);
    let mut char_chunks = chars[..num_chars].chunks_mut(WARP_SIZE);
    let mut offset_chunks =
        offsets[..num_offsets * OFFSET_WIDTH].chunks_mut(WARP_SIZE * OFFSET_WIDTH);
    let mut words = validity_words(validity, num_rows);
    let work = (0..num_warps(num_indices))
        .map(|_| StringWarp {
            chars: char_chunks.next().unwrap_or_default(),
            offsets: offset_chunks.next().unwrap_or_default(),
            validity: if HAS_VALIDITY { words.next() } else { None },
        })
        .collect::<Vec<_>>();

    let config = stream.launch_config(num_indices);
    stream.launch("copy_string", config, work, |warp, out| {
        let first = warp.first_index();
        if !out.chars.is_empty() {
            let start = chars_offset + first;
            out.chars
                .copy_from_slice(&source_chars[start..start + out.chars.len()]);
        }
        for (lane, offset) in out.offsets.chunks_exact_mut(OFFSET_WIDTH).enumerate() {
            let rebased = source_offsets.get(row_offset + first + lane) - base;
            offset.copy_from_slice(&rebased.to_ne_bytes());
        }
        if HAS_VALIDITY {
            if let Some(word) = out.validity {
                store_validity_word(&warp, column, num_rows, word);
            }
        }
    })
}

/// Carve `out` into every column's regions and run the matching kernel.
///
/// `out` must be laid out as computed by
/// [`layout_columns`](crate::contiguous::size::layout_columns) from `infos`.
#[instrument(level = "debug", skip_all, fields(num_rows = table.num_rows(), len = out.len()))]
pub fn copy_table(
    stream: &Stream,
    table: &Table,
    kinds: &[ColumnKind],
    infos: &[ColumnSplitInfo],
    out: &mut [u8],
) -> Result<()> {
    let mut rest = out;
    for ((column, kind), info) in table.columns().iter().zip(kinds).zip(infos) {
        let (data, tail) = std::mem::take(&mut rest).split_at_mut(info.data_size);
        let (validity, tail) = tail.split_at_mut(info.validity_size);
        let (offsets, tail) = tail.split_at_mut(info.offsets_size);
        rest = tail;
        debug_assert!(validity.len() >= bit_util::ceil(column.len(), 8) || !column.nullable());

        match (*kind, column.nullable()) {
            (ColumnKind::FixedWidth { byte_width }, true) => {
                copy_fixed_width::<true>(stream, column, byte_width, data, validity)?
            }
            (ColumnKind::FixedWidth { byte_width }, false) => {
                copy_fixed_width::<false>(stream, column, byte_width, data, validity)?
            }
            (ColumnKind::String, true) => {
                copy_string::<true>(stream, column, info, data, validity, offsets)?
            }
            (ColumnKind::String, false) => {
                copy_string::<false>(stream, column, info, data, validity, offsets)?
            }
        }
    }
    Ok(())
}
