//! Physical formats for rows, lists and tables.
//!
//! All integers are little-endian, lengths and counts are `i32`, and stream
//! ids are 8 bytes. A nil row, list or table encodes as the single byte `0`.

mod bytes;
mod list;
mod row;
mod table;

pub use bytes::{ByteReader, ByteWriter};
pub use list::{decode_list, encode_list};
pub use row::{decode_row, encode_row, RowWriter};
pub use table::{decode_table, encode_table, TableWriter};
