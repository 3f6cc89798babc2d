//! Physical row format.
//!
//! # Layout
//! ```text
//! nil row:   [0]
//! row:       [1][expanded:1] column*
//! column:    [tag:1] [type name]? [value]?
//! ```
//!
//! | tag | meaning                       | followed by                     |
//! |-----|-------------------------------|---------------------------------|
//! | 0   | native nil                    | nothing                         |
//! | 1   | non-native nil                | nothing                         |
//! | 2   | native standard value         | `[len:i32][bytes]`              |
//! | 3   | non-native standard value     | value (see below)               |
//! | 4   | native specialized value      | `[len:i32][name]` then value    |
//! | 5   | non-native specialized value  | `[len:i32][name]` then value    |
//!
//! Non-native values are `[len:i32][bytes]` when the row carries expanded
//! streams, and a raw 8-byte stream id otherwise.

use std::sync::Arc;

use crate::codec::bytes::{ByteReader, ByteWriter};
use crate::common::{Error, Result};
use crate::types::{Cell, DataType, Row, RowType, Value};

const TAG_NATIVE_NIL: u8 = 0;
const TAG_NON_NATIVE_NIL: u8 = 1;
const TAG_NATIVE: u8 = 2;
const TAG_NON_NATIVE: u8 = 3;
const TAG_NATIVE_SPECIALIZED: u8 = 4;
const TAG_NON_NATIVE_SPECIALIZED: u8 = 5;

/// Append one tagged cell of declared type `declared`.
pub(crate) fn write_cell(
    w: &mut ByteWriter,
    declared: &DataType,
    cell: Option<&Cell>,
    expanded: bool,
) -> Result<()> {
    let native = declared.is_native();
    let Some(cell) = cell else {
        w.put_u8(if native { TAG_NATIVE_NIL } else { TAG_NON_NATIVE_NIL });
        return Ok(());
    };

    let specialized = cell
        .specialized
        .as_ref()
        .filter(|t| *t != declared);
    if let Some(kind) = cell.value.kind() {
        if kind != declared.kind() {
            return Err(Error::TypeMismatch(format!(
                "{} value in {} column",
                cell.value, declared
            )));
        }
    }

    match (native, specialized) {
        (true, None) => w.put_u8(TAG_NATIVE),
        (false, None) => w.put_u8(TAG_NON_NATIVE),
        (true, Some(t)) => {
            w.put_u8(TAG_NATIVE_SPECIALIZED);
            w.put_prefixed(t.name().as_bytes())?;
        }
        (false, Some(t)) => {
            w.put_u8(TAG_NON_NATIVE_SPECIALIZED);
            w.put_prefixed(t.name().as_bytes())?;
        }
    }

    if !native && !expanded {
        match cell.value {
            Value::Stream(id) => w.put_stream_id(id),
            _ => {
                return Err(Error::InvalidPhysicalFormat(format!(
                    "non-expanded {declared} column holds an inline value"
                )))
            }
        }
        return Ok(());
    }
    w.put_prefixed(&cell.value.to_native_bytes()?)
}

/// Read one tagged cell of declared type `declared`.
pub(crate) fn read_cell(
    r: &mut ByteReader<'_>,
    declared: &DataType,
    expanded: bool,
) -> Result<Option<Cell>> {
    let tag = r.get_u8()?;
    let specialized = match tag {
        TAG_NATIVE_NIL | TAG_NON_NATIVE_NIL => return Ok(None),
        TAG_NATIVE | TAG_NON_NATIVE => None,
        TAG_NATIVE_SPECIALIZED | TAG_NON_NATIVE_SPECIALIZED => {
            let name = std::str::from_utf8(r.get_prefixed()?)
                .map_err(|e| Error::InvalidPhysicalFormat(e.to_string()))?;
            Some(declared.specialize(name))
        }
        other => {
            return Err(Error::InvalidPhysicalFormat(format!(
                "unknown value tag {other}"
            )))
        }
    };

    let non_native = matches!(tag, TAG_NON_NATIVE | TAG_NON_NATIVE_SPECIALIZED);
    let value = if non_native && !expanded {
        Value::Stream(r.get_stream_id()?)
    } else {
        Value::from_native_bytes(declared.kind(), r.get_prefixed()?)?
    };
    Ok(Some(Cell { value, specialized }))
}

/// Size-then-write serializer for one row.
///
/// `physical_size` must be called before `write_to_physical`.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use relcore::codec::RowWriter;
/// use relcore::types::{DataType, Row, RowType, Value};
///
/// let row_type = Arc::new(RowType::of([("id", DataType::integer())]));
/// let row = Row::from_values(row_type, vec![Some(Value::Integer(7))]).unwrap();
///
/// let mut writer = RowWriter::new(Some(&row));
/// let mut buf = vec![0u8; writer.physical_size().unwrap()];
/// writer.write_to_physical(&mut buf).unwrap();
/// assert_eq!(buf[0], 1);
/// ```
pub struct RowWriter<'a> {
    row: Option<&'a Row>,
    encoded: Option<Vec<u8>>,
}

impl<'a> RowWriter<'a> {
    pub fn new(row: Option<&'a Row>) -> Self {
        Self { row, encoded: None }
    }

    /// Compute (and cache) the encoded size.
    pub fn physical_size(&mut self) -> Result<usize> {
        if self.encoded.is_none() {
            self.encoded = Some(encode(self.row)?);
        }
        Ok(self.encoded.as_ref().map_or(0, Vec::len))
    }

    /// Write the row into the front of `buf`, returning the bytes written.
    ///
    /// # Errors
    /// Returns `Error::UnpreparedWriteToPhysicalCall` when `physical_size`
    /// has not been called.
    pub fn write_to_physical(&self, buf: &mut [u8]) -> Result<usize> {
        let encoded = self
            .encoded
            .as_ref()
            .ok_or(Error::UnpreparedWriteToPhysicalCall)?;
        if buf.len() < encoded.len() {
            return Err(Error::InvalidPhysicalFormat(format!(
                "buffer of {} bytes cannot hold {} byte row",
                buf.len(),
                encoded.len()
            )));
        }
        buf[..encoded.len()].copy_from_slice(encoded);
        Ok(encoded.len())
    }
}

fn encode(row: Option<&Row>) -> Result<Vec<u8>> {
    let mut w = ByteWriter::new();
    write_row(&mut w, row)?;
    Ok(w.into_inner())
}

pub(crate) fn write_row(w: &mut ByteWriter, row: Option<&Row>) -> Result<()> {
    let Some(row) = row else {
        w.put_u8(0);
        return Ok(());
    };
    w.put_u8(1);
    w.put_u8(u8::from(row.expanded_streams()));
    for (i, column) in row.row_type().columns().iter().enumerate() {
        write_cell(w, &column.data_type, row.cell(i), row.expanded_streams())?;
    }
    Ok(())
}

pub(crate) fn read_row(r: &mut ByteReader<'_>, row_type: &Arc<RowType>) -> Result<Option<Row>> {
    if r.get_u8()? == 0 {
        return Ok(None);
    }
    let expanded = r.get_u8()? != 0;
    let mut row = Row::new(Arc::clone(row_type));
    row.set_expanded_streams(expanded);
    for (i, column) in row_type.columns().iter().enumerate() {
        row.set_cell(i, read_cell(r, &column.data_type, expanded)?);
    }
    Ok(Some(row))
}

/// Encode a row (or the nil row).
pub fn encode_row(row: Option<&Row>) -> Result<Vec<u8>> {
    encode(row)
}

/// Decode a row of `row_type`, returning it with the bytes consumed.
pub fn decode_row(row_type: &Arc<RowType>, bytes: &[u8]) -> Result<(Option<Row>, usize)> {
    let mut r = ByteReader::new(bytes);
    let row = read_row(&mut r, row_type)?;
    Ok((row, r.position()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::StreamId;

    fn row_type() -> Arc<RowType> {
        Arc::new(RowType::of([
            ("id", DataType::integer()),
            ("flag", DataType::boolean()),
            ("blob", DataType::binary()),
        ]))
    }

    #[test]
    fn test_nil_row_is_one_byte() {
        assert_eq!(encode_row(None).unwrap(), vec![0]);
        let (row, used) = decode_row(&row_type(), &[0, 0xAA]).unwrap();
        assert!(row.is_none());
        assert_eq!(used, 1);
    }

    #[test]
    fn test_tag_layout() {
        let mut row = Row::new(row_type());
        row.set(0, Some(Value::Integer(5)));

        let bytes = encode_row(Some(&row)).unwrap();
        // flags, tag 2 + i32 len + 8 bytes, tag 0, tag 1
        assert_eq!(bytes.len(), 2 + 1 + 4 + 8 + 1 + 1);
        assert_eq!(&bytes[..3], &[1, 1, TAG_NATIVE]);
        assert_eq!(bytes[bytes.len() - 2], TAG_NATIVE_NIL);
        assert_eq!(bytes[bytes.len() - 1], TAG_NON_NATIVE_NIL);
    }

    #[test]
    fn test_non_expanded_stream_is_raw_id() {
        let mut row = Row::new(row_type());
        row.set_expanded_streams(false);
        row.set(2, Some(Value::Stream(StreamId::new(77))));

        let bytes = encode_row(Some(&row)).unwrap();
        assert_eq!(&bytes[bytes.len() - 9..], &[TAG_NON_NATIVE, 77, 0, 0, 0, 0, 0, 0, 0]);

        let (decoded, used) = decode_row(&row_type(), &bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(decoded.unwrap(), row);
    }

    #[test]
    fn test_specialized_value() {
        let mut row = Row::new(row_type());
        let shop_id = DataType::integer().specialize("Shop.ID");
        row.set_cell(0, Some(Cell::specialized(Value::Integer(9), shop_id.clone())));

        let bytes = encode_row(Some(&row)).unwrap();
        assert_eq!(bytes[2], TAG_NATIVE_SPECIALIZED);

        let (decoded, _) = decode_row(&row_type(), &bytes).unwrap();
        let decoded = decoded.unwrap();
        assert_eq!(decoded.cell(0).unwrap().specialized.as_ref(), Some(&shop_id));
    }

    #[test]
    fn test_write_requires_size_first() {
        let row = Row::new(row_type());
        let writer = RowWriter::new(Some(&row));
        let mut buf = [0u8; 64];
        assert!(matches!(
            writer.write_to_physical(&mut buf),
            Err(Error::UnpreparedWriteToPhysicalCall)
        ));
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let mut row = Row::new(row_type());
        row.set(1, Some(Value::Integer(1)));
        assert!(matches!(encode_row(Some(&row)), Err(Error::TypeMismatch(_))));
    }
}
