// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Column views over (possibly shared) Arrow buffers

use std::sync::OnceLock;

use arrow_array::{make_array, Array, ArrayRef};
use arrow_buffer::{bit_util, BooleanBuffer, Buffer, MutableBuffer, NullBuffer};
use arrow_data::{ArrayData, ArrayDataBuilder};
use arrow_schema::DataType;
use lance_core::{Error, Result};
use snafu::location;

const OFFSET_WIDTH: usize = std::mem::size_of::<i32>();

/// The copy behavior registered for an element type.
///
/// This is the only place element types are examined; everything downstream
/// matches on the (closed) set of kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Every element occupies `byte_width` bytes of the data buffer
    FixedWidth { byte_width: usize },
    /// Variable-length UTF-8 values described by an offsets child and a chars child
    String,
}

impl ColumnKind {
    pub fn try_from_data_type(data_type: &DataType) -> Result<Self> {
        match data_type {
            DataType::Utf8 => Ok(Self::String),
            // Bit-packed booleans have no byte width to copy by
            DataType::Boolean => Err(Error::not_supported(
                "bit-packed boolean columns cannot be split contiguously",
                location!(),
            )),
            other => match other.primitive_width() {
                Some(byte_width) => Ok(Self::FixedWidth { byte_width }),
                None => Err(Error::not_supported(
                    format!("no contiguous split support for element type {}", other),
                    location!(),
                )),
            },
        }
    }
}

/// A validity bitmask.  Bit `i` (LSB-first, relative to `bit_offset`) is set
/// when row `i` is valid.
#[derive(Debug, Clone)]
pub struct Bitmap {
    buffer: Buffer,
    bit_offset: usize,
}

impl Bitmap {
    pub fn new(buffer: Buffer, bit_offset: usize) -> Self {
        Self { buffer, bit_offset }
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn bit_offset(&self) -> usize {
        self.bit_offset
    }

    /// Number of bits addressable from `bit_offset`
    pub fn len(&self) -> usize {
        (self.buffer.len() * 8).saturating_sub(self.bit_offset)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_set(&self, i: usize) -> bool {
        bit_util::get_bit(self.buffer.as_slice(), self.bit_offset + i)
    }

    fn count_set_bits(&self, offset: usize, len: usize) -> usize {
        BooleanBuffer::new(self.buffer.clone(), self.bit_offset + offset, len).count_set_bits()
    }
}

/// A view of `len` rows starting at row `offset` of some storage.
///
/// Fixed-width columns keep their values in `data`.  String columns keep no
/// data of their own: child 0 holds `Int32` offsets (one more than the rows
/// of the parent storage) and child 1 holds the `UInt8` chars.  Slicing a
/// string column only moves the parent's window; the children stay whole.
///
/// The null count is not computed up front.  It is "unknown" until the first
/// call to [`Column::null_count`], which computes and caches it.
#[derive(Debug, Clone)]
pub struct Column {
    data_type: DataType,
    len: usize,
    offset: usize,
    data: Option<Buffer>,
    validity: Option<Bitmap>,
    children: Vec<Column>,
    null_count: OnceLock<usize>,
}

impl Column {
    /// Create a column without checking its structure, see [`Column::validate`].
    pub fn new(
        data_type: DataType,
        len: usize,
        offset: usize,
        data: Option<Buffer>,
        validity: Option<Bitmap>,
        children: Vec<Self>,
    ) -> Self {
        Self {
            data_type,
            len,
            offset,
            data,
            validity,
            children,
            null_count: OnceLock::new(),
        }
    }

    pub fn try_new(
        data_type: DataType,
        len: usize,
        offset: usize,
        data: Option<Buffer>,
        validity: Option<Bitmap>,
        children: Vec<Self>,
    ) -> Result<Self> {
        let column = Self::new(data_type, len, offset, data, validity, children);
        column.validate()?;
        Ok(column)
    }

    /// A fixed-width column starting at row 0 of `data`
    pub fn fixed_width(
        data_type: DataType,
        len: usize,
        data: Buffer,
        validity: Option<Bitmap>,
    ) -> Result<Self> {
        Self::try_new(data_type, len, 0, Some(data), validity, vec![])
    }

    /// A string column from its offsets and chars buffers
    pub fn string(
        len: usize,
        offsets: Buffer,
        chars: Buffer,
        validity: Option<Bitmap>,
    ) -> Result<Self> {
        let num_offsets = offsets.len() / OFFSET_WIDTH;
        let offsets = Self::new(DataType::Int32, num_offsets, 0, Some(offsets), None, vec![]);
        let chars = Self::new(DataType::UInt8, chars.len(), 0, Some(chars), None, vec![]);
        Self::try_new(DataType::Utf8, len, 0, None, validity, vec![offsets, chars])
    }

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    pub fn kind(&self) -> Result<ColumnKind> {
        ColumnKind::try_from_data_type(&self.data_type)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First row of this view within its storage
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn data(&self) -> Option<&Buffer> {
        self.data.as_ref()
    }

    pub fn validity(&self) -> Option<&Bitmap> {
        self.validity.as_ref()
    }

    pub fn nullable(&self) -> bool {
        self.validity.is_some()
    }

    pub fn children(&self) -> &[Self] {
        &self.children
    }

    /// The offsets child of a string column
    pub fn offsets(&self) -> Option<&Self> {
        match self.data_type {
            DataType::Utf8 => self.children.first(),
            _ => None,
        }
    }

    /// The chars child of a string column
    pub fn chars(&self) -> Option<&Self> {
        match self.data_type {
            DataType::Utf8 => self.children.get(1),
            _ => None,
        }
    }

    pub fn is_valid(&self, row: usize) -> bool {
        self.validity
            .as_ref()
            .is_none_or(|validity| validity.is_set(self.offset + row))
    }

    /// The number of null rows, computed on first use.
    pub fn null_count(&self) -> usize {
        *self.null_count.get_or_init(|| match &self.validity {
            Some(validity) => self.len - validity.count_set_bits(self.offset, self.len),
            None => 0,
        })
    }

    /// The null count if it has already been computed
    pub fn known_null_count(&self) -> Option<usize> {
        self.null_count.get().copied()
    }

    pub fn with_null_count(self, null_count: usize) -> Self {
        let known = OnceLock::new();
        let _ = known.set(null_count);
        Self {
            null_count: known,
            ..self
        }
    }

    /// A view of rows `offset..offset + len` of this column.
    ///
    /// Panics if the range is out of bounds.
    pub fn slice(&self, offset: usize, len: usize) -> Self {
        assert!(
            offset + len <= self.len,
            "slice {}..{} out of bounds for column of {} rows",
            offset,
            offset + len,
            self.len
        );
        Self {
            data_type: self.data_type.clone(),
            len,
            offset: self.offset + offset,
            data: self.data.clone(),
            validity: self.validity.clone(),
            children: self.children.clone(),
            null_count: OnceLock::new(),
        }
    }

    /// Check that the buffers can hold the rows this view describes.
    pub fn validate(&self) -> Result<()> {
        let kind = self.kind()?;
        if let Some(validity) = &self.validity {
            if validity.len() < self.offset + self.len {
                return Err(Error::invalid_input(
                    format!(
                        "validity bitmask holds {} bits but the column needs {}",
                        validity.len(),
                        self.offset + self.len
                    ),
                    location!(),
                ));
            }
        }
        match kind {
            ColumnKind::FixedWidth { byte_width } => self.validate_fixed_width(byte_width),
            ColumnKind::String => self.validate_string(),
        }
    }

    fn validate_fixed_width(&self, byte_width: usize) -> Result<()> {
        if !self.children.is_empty() {
            return Err(Error::invalid_input(
                format!("{} column cannot have children", self.data_type),
                location!(),
            ));
        }
        if self.len == 0 {
            return Ok(());
        }
        let needed = (self.offset + self.len) * byte_width;
        let available = self.data.as_ref().map_or(0, |data| data.len());
        if available < needed {
            return Err(Error::invalid_input(
                format!(
                    "{} column needs {} data bytes but only {} are present",
                    self.data_type, needed, available
                ),
                location!(),
            ));
        }
        Ok(())
    }

    fn validate_string(&self) -> Result<()> {
        let (offsets, chars) = match self.children.as_slice() {
            [offsets, chars]
                if offsets.data_type == DataType::Int32 && chars.data_type == DataType::UInt8 =>
            {
                (offsets, chars)
            }
            _ => {
                return Err(Error::invalid_input(
                    "string column must have an Int32 offsets child and a UInt8 chars child",
                    location!(),
                ))
            }
        };
        if self.len == 0 {
            return Ok(());
        }
        let num_offsets = self.offset + self.len + 1;
        if offsets.len < num_offsets {
            return Err(Error::invalid_input(
                format!(
                    "malformed string column: {} rows at offset {} need {} offsets but only {} are present",
                    self.len, self.offset, num_offsets, offsets.len
                ),
                location!(),
            ));
        }
        offsets.validate_fixed_width(OFFSET_WIDTH)?;
        chars.validate_fixed_width(1)?;
        let view = OffsetsView::try_from_column(offsets)?;
        let first = view.get(self.offset);
        let last = view.get(self.offset + self.len);
        if first < 0 || last < first || last as usize > chars.len {
            return Err(Error::invalid_input(
                format!(
                    "malformed string column: offsets {}..{} do not fit {} chars",
                    first, last, chars.len
                ),
                location!(),
            ));
        }
        // Any row window may be split off, so every step must be non-negative
        if let Some(row) = (self.offset..self.offset + self.len)
            .find(|&row| view.get(row + 1) < view.get(row))
        {
            return Err(Error::invalid_input(
                format!(
                    "malformed string column: offsets decrease at row {}",
                    row - self.offset
                ),
                location!(),
            ));
        }
        Ok(())
    }

    /// Import an Arrow array without copying its buffers.
    pub fn try_from_arrow(array: &dyn Array) -> Result<Self> {
        Self::try_from_array_data(&array.to_data())
    }

    pub fn try_from_array_data(data: &ArrayData) -> Result<Self> {
        let kind = ColumnKind::try_from_data_type(data.data_type())?;
        let validity = data
            .nulls()
            .map(|nulls| Bitmap::new(nulls.buffer().clone(), nulls.offset()));
        let column = match kind {
            ColumnKind::FixedWidth { byte_width } => {
                let values = first_buffer(data, 0)?;
                let data_buffer = slice_buffer(
                    values,
                    data.offset() * byte_width,
                    data.len() * byte_width,
                )?;
                Self::try_new(
                    data.data_type().clone(),
                    data.len(),
                    0,
                    Some(data_buffer),
                    validity,
                    vec![],
                )?
            }
            ColumnKind::String => {
                let offsets = first_buffer(data, 0)?;
                let chars = first_buffer(data, 1)?.clone();
                let num_offsets = if data.is_empty() && offsets.is_empty() {
                    0
                } else {
                    data.len() + 1
                };
                let offsets = slice_buffer(
                    offsets,
                    data.offset() * OFFSET_WIDTH,
                    num_offsets * OFFSET_WIDTH,
                )?;
                Self::string(data.len(), offsets, chars, validity)?
            }
        };
        Ok(column.with_null_count(data.null_count()))
    }

    /// Export this view as an Arrow array sharing the same buffers.
    pub fn to_arrow(&self) -> Result<ArrayRef> {
        let nulls = self.validity.as_ref().map(|validity| {
            NullBuffer::new(BooleanBuffer::new(
                validity.buffer.clone(),
                validity.bit_offset + self.offset,
                self.len,
            ))
        });
        let builder = match self.kind()? {
            ColumnKind::FixedWidth { byte_width } => {
                let values = match (&self.data, self.len) {
                    (_, 0) => empty_buffer(),
                    (Some(data), len) => {
                        slice_buffer(data, self.offset * byte_width, len * byte_width)?
                    }
                    (None, _) => {
                        return Err(Error::internal(
                            "non-empty fixed-width column has no data",
                            location!(),
                        ))
                    }
                };
                ArrayDataBuilder::new(self.data_type.clone())
                    .len(self.len)
                    .add_buffer(values)
            }
            ColumnKind::String => {
                let (offsets, chars) = match self.children.as_slice() {
                    [offsets, chars] => (offsets, chars),
                    _ => {
                        return Err(Error::internal(
                            "string column is missing its children",
                            location!(),
                        ))
                    }
                };
                let offsets_buffer = match (&offsets.data, self.len) {
                    (_, 0) => Buffer::from_slice_ref([0i32]),
                    (Some(data), len) => slice_buffer(
                        data,
                        (offsets.offset + self.offset) * OFFSET_WIDTH,
                        (len + 1) * OFFSET_WIDTH,
                    )?,
                    (None, _) => {
                        return Err(Error::internal(
                            "non-empty string column has no offsets",
                            location!(),
                        ))
                    }
                };
                let chars_buffer = match &chars.data {
                    Some(data) if chars.len > 0 => slice_buffer(data, chars.offset, chars.len)?,
                    _ => empty_buffer(),
                };
                ArrayDataBuilder::new(DataType::Utf8)
                    .len(self.len)
                    .add_buffer(offsets_buffer)
                    .add_buffer(chars_buffer)
            }
        };
        let data = builder.nulls(nulls).build()?;
        Ok(make_array(data))
    }
}

/// A lightweight view of an offsets array: just the bytes, no owning column.
#[derive(Debug, Clone, Copy)]
pub struct OffsetsView<'a> {
    bytes: &'a [u8],
}

impl<'a> OffsetsView<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// View the entries of an `Int32` offsets column, starting at its row offset
    pub fn try_from_column(column: &'a Column) -> Result<Self> {
        let data = column.data.as_ref().map_or(&[][..], |data| data.as_slice());
        let start = column.offset * OFFSET_WIDTH;
        let end = start + column.len * OFFSET_WIDTH;
        data.get(start..end).map(Self::new).ok_or_else(|| {
            Error::invalid_input(
                format!(
                    "offsets buffer of {} bytes cannot hold {} offsets at {}",
                    data.len(),
                    column.len,
                    column.offset
                ),
                location!(),
            )
        })
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / OFFSET_WIDTH
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn get(&self, i: usize) -> i32 {
        let start = i * OFFSET_WIDTH;
        let mut raw = [0u8; OFFSET_WIDTH];
        raw.copy_from_slice(&self.bytes[start..start + OFFSET_WIDTH]);
        i32::from_ne_bytes(raw)
    }
}

fn first_buffer(data: &ArrayData, index: usize) -> Result<&Buffer> {
    data.buffers().get(index).ok_or_else(|| {
        Error::invalid_input(
            format!("{} array is missing buffer {}", data.data_type(), index),
            location!(),
        )
    })
}

fn slice_buffer(buffer: &Buffer, offset: usize, len: usize) -> Result<Buffer> {
    if offset + len > buffer.len() {
        return Err(Error::invalid_input(
            format!(
                "range {}..{} is out of bounds for a buffer of {} bytes",
                offset,
                offset + len,
                buffer.len()
            ),
            location!(),
        ));
    }
    Ok(buffer.slice_with_length(offset, len))
}

/// An empty buffer whose pointer satisfies the alignment of any Arrow type
pub(crate) fn empty_buffer() -> Buffer {
    MutableBuffer::new(0).into()
}

#[cfg(test)]
mod tests {
    use arrow_array::{Float64Array, Int32Array, StringArray};

    use super::*;

    #[test]
    fn test_dispatch() {
        assert_eq!(
            ColumnKind::try_from_data_type(&DataType::Int32).unwrap(),
            ColumnKind::FixedWidth { byte_width: 4 }
        );
        assert_eq!(
            ColumnKind::try_from_data_type(&DataType::Float64).unwrap(),
            ColumnKind::FixedWidth { byte_width: 8 }
        );
        assert_eq!(
            ColumnKind::try_from_data_type(&DataType::Utf8).unwrap(),
            ColumnKind::String
        );
        for unsupported in [DataType::Boolean, DataType::LargeUtf8, DataType::Binary] {
            let err = ColumnKind::try_from_data_type(&unsupported).unwrap_err();
            assert!(matches!(err, Error::NotSupported { .. }), "{}", unsupported);
        }
    }

    #[test]
    fn test_sliced_arrow_round_trip() {
        let array = Int32Array::from(vec![Some(1), None, Some(3), None, Some(5)]);
        let sliced = array.slice(1, 3);
        let column = Column::try_from_arrow(&sliced).unwrap();
        assert_eq!(column.len(), 3);
        assert_eq!(column.known_null_count(), Some(2));
        assert!(!column.is_valid(0));
        assert!(column.is_valid(1));
        let back = column.to_arrow().unwrap();
        assert_eq!(back.as_ref(), &sliced as &dyn Array);
    }

    #[test]
    fn test_zero_row_export_is_aligned() {
        let ints = Int32Array::from(vec![Some(1), None, Some(3)]);
        let floats = Float64Array::from(vec![1.0, 2.0]);
        let strings = StringArray::from(vec![Some("a"), None]);
        let arrays: [&dyn Array; 3] = [&ints, &floats, &strings];
        for array in arrays {
            let column = Column::try_from_arrow(array).unwrap();
            let empty = column.slice(column.len(), 0).to_arrow().unwrap();
            assert_eq!(empty.len(), 0);
            assert_eq!(empty.data_type(), array.data_type());
            empty.to_data().validate_full().unwrap();
        }
        let decimals = arrow_array::Decimal128Array::from(Vec::<i128>::new())
            .with_precision_and_scale(20, 2)
            .unwrap();
        let column = Column::try_from_arrow(&decimals).unwrap();
        let back = column.to_arrow().unwrap();
        assert_eq!(back.as_ref(), &decimals as &dyn Array);
    }

    #[test]
    fn test_slice_defers_null_count() {
        let array = Float64Array::from(vec![Some(1.0), None, None, Some(4.0)]);
        let column = Column::try_from_arrow(&array).unwrap();
        let sliced = column.slice(1, 3);
        assert_eq!(sliced.offset(), 1);
        assert_eq!(sliced.known_null_count(), None);
        assert_eq!(sliced.null_count(), 2);
        assert_eq!(sliced.known_null_count(), Some(2));
    }

    #[test]
    fn test_string_import_keeps_original_offsets() {
        let array = StringArray::from(vec!["a", "bb", "ccc"]);
        let column = Column::try_from_arrow(&array).unwrap().slice(1, 2);
        let offsets = OffsetsView::try_from_column(column.offsets().unwrap()).unwrap();
        assert_eq!(offsets.len(), 4);
        assert_eq!(offsets.get(column.offset()), 1);
        assert_eq!(offsets.get(column.offset() + column.len()), 6);
        let back = column.to_arrow().unwrap();
        assert_eq!(back.as_ref(), &array.slice(1, 2) as &dyn Array);
    }

    #[test]
    fn test_malformed_string_offsets() {
        let offsets = Buffer::from_slice_ref([0i32, 1, 3]);
        let chars = Buffer::from_slice_ref(b"abbccc");
        let err = Column::string(3, offsets, chars, None).unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
        assert!(err.to_string().contains("malformed"));

        // Offsets pointing past the chars
        let offsets = Buffer::from_slice_ref([0i32, 1, 9]);
        let chars = Buffer::from_slice_ref(b"abb");
        assert!(Column::string(2, offsets, chars, None).is_err());
    }

    #[test]
    fn test_short_data_buffer() {
        let data = Buffer::from_slice_ref([1i32, 2]);
        assert!(Column::fixed_width(DataType::Int32, 3, data.clone(), None).is_err());
        assert!(Column::fixed_width(DataType::Int32, 2, data, None).is_ok());
    }

    #[test]
    fn test_short_validity() {
        let data = Buffer::from_slice_ref([0i64; 16]);
        let validity = Bitmap::new(Buffer::from_slice_ref([0xFFu8]), 0);
        assert!(Column::fixed_width(DataType::Int64, 16, data, Some(validity)).is_err());
    }
}
