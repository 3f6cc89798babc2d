//! Physical list format.
//!
//! ```text
//! nil list:  [0]
//! list:      [1][expanded:1][count:i32] element*
//! ```
//!
//! Elements use the same six-tag scheme as row columns.

use crate::codec::bytes::{length_i32, ByteReader, ByteWriter};
use crate::codec::row::{read_cell, write_cell};
use crate::common::Result;
use crate::types::{DataType, List};

/// Encode a list (or the nil list).
pub fn encode_list(list: Option<&List>) -> Result<Vec<u8>> {
    let mut w = ByteWriter::new();
    let Some(list) = list else {
        w.put_u8(0);
        return Ok(w.into_inner());
    };
    w.put_u8(1);
    w.put_u8(u8::from(list.expanded_streams()));
    w.put_i32(length_i32(list.len())?);
    for cell in list.cells() {
        write_cell(&mut w, list.element_type(), cell.as_ref(), list.expanded_streams())?;
    }
    Ok(w.into_inner())
}

/// Decode a list of `element_type`, returning it with the bytes consumed.
pub fn decode_list(element_type: &DataType, bytes: &[u8]) -> Result<(Option<List>, usize)> {
    let mut r = ByteReader::new(bytes);
    if r.get_u8()? == 0 {
        return Ok((None, r.position()));
    }
    let expanded = r.get_u8()? != 0;
    let count = r.get_len()?;

    let mut list = List::new(element_type.clone());
    list.set_expanded_streams(expanded);
    for _ in 0..count {
        list.push_cell(read_cell(&mut r, element_type, expanded)?);
    }
    Ok((Some(list), r.position()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[test]
    fn test_list_header() {
        let mut list = List::new(DataType::text());
        list.push(Some(Value::from("a")));
        list.push(None);

        let bytes = encode_list(Some(&list)).unwrap();
        assert_eq!(&bytes[..6], &[1, 1, 2, 0, 0, 0]);

        let (decoded, used) = decode_list(&DataType::text(), &bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(decoded.unwrap(), list);
    }

    #[test]
    fn test_nil_list() {
        assert_eq!(encode_list(None).unwrap(), vec![0]);
        let (decoded, used) = decode_list(&DataType::integer(), &[0]).unwrap();
        assert!(decoded.is_none());
        assert_eq!(used, 1);
    }
}
