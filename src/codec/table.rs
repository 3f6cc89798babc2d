//! In-memory table transfer format.
//!
//! ```text
//! nil table: [0]
//! table:     [1][rowCount:i32] ([physicalSize:i32][row bytes])*
//! ```
//!
//! This format moves a materialized result between components; it is not a
//! durable storage format.

use std::sync::Arc;

use crate::codec::bytes::{length_i32, ByteReader, ByteWriter};
use crate::codec::row::{decode_row, RowWriter};
use crate::common::{Error, Result};
use crate::types::{Row, RowType};

/// Incremental table encoder.
///
/// Rows are appended one at a time; the row count is patched in by
/// [`TableWriter::finish`].
pub struct TableWriter {
    w: ByteWriter,
    rows: usize,
}

impl TableWriter {
    pub fn new() -> Self {
        let mut w = ByteWriter::new();
        w.put_u8(1);
        w.put_i32(0);
        Self { w, rows: 0 }
    }

    pub fn push(&mut self, row: &Row) -> Result<()> {
        let mut writer = RowWriter::new(Some(row));
        let size = writer.physical_size()?;
        let mut buf = vec![0u8; size];
        writer.write_to_physical(&mut buf)?;
        self.w.put_i32(length_i32(size)?);
        self.w.put_bytes(&buf);
        self.rows += 1;
        Ok(())
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        let count = length_i32(self.rows)?;
        let mut bytes = self.w.into_inner();
        bytes[1..5].copy_from_slice(&count.to_le_bytes());
        Ok(bytes)
    }
}

impl Default for TableWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a set of rows (or the nil table).
pub fn encode_table(rows: Option<&[Row]>) -> Result<Vec<u8>> {
    let Some(rows) = rows else {
        return Ok(vec![0]);
    };
    let mut writer = TableWriter::new();
    for row in rows {
        writer.push(row)?;
    }
    writer.finish()
}

/// Decode a table of `row_type`.
///
/// # Errors
/// Returns `Error::InvalidPhysicalFormat` when a row's declared size does not
/// match the bytes its decoder consumed.
pub fn decode_table(row_type: &Arc<RowType>, bytes: &[u8]) -> Result<Option<Vec<Row>>> {
    let mut r = ByteReader::new(bytes);
    if r.get_u8()? == 0 {
        return Ok(None);
    }
    let count = r.get_len()?;
    let mut rows = Vec::with_capacity(count);
    for _ in 0..count {
        let row_bytes = r.get_prefixed()?;
        let (row, used) = decode_row(row_type, row_bytes)?;
        if used != row_bytes.len() {
            return Err(Error::InvalidPhysicalFormat(format!(
                "row declared {} bytes but used {used}",
                row_bytes.len()
            )));
        }
        let row = row.ok_or_else(|| Error::InvalidPhysicalFormat("nil row in table".into()))?;
        rows.push(row);
    }
    Ok(Some(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataType, Value};

    #[test]
    fn test_table_header() {
        let row_type = Arc::new(RowType::of([("n", DataType::integer())]));
        let rows: Vec<Row> = (0..3)
            .map(|n| Row::from_values(row_type.clone(), vec![Some(Value::Integer(n))]).unwrap())
            .collect();

        let bytes = encode_table(Some(rows.as_slice())).unwrap();
        assert_eq!(&bytes[..5], &[1, 3, 0, 0, 0]);

        let decoded = decode_table(&row_type, &bytes).unwrap().unwrap();
        assert_eq!(decoded, rows);
    }

    #[test]
    fn test_nil_and_empty_table() {
        let row_type = Arc::new(RowType::of([("n", DataType::integer())]));
        assert_eq!(encode_table(None).unwrap(), vec![0]);
        assert!(decode_table(&row_type, &[0]).unwrap().is_none());

        let empty = encode_table(Some(&[][..])).unwrap();
        assert_eq!(decode_table(&row_type, &empty).unwrap().unwrap().len(), 0);
    }
}
