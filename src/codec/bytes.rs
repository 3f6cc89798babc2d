//! Fixed-width little-endian encode/decode helpers.

use crate::common::{Error, Result, StreamId};

/// Appends little-endian primitives to a growable buffer.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    #[inline]
    pub fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    #[inline]
    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    #[inline]
    pub fn put_stream_id(&mut self, id: StreamId) {
        self.buf.extend_from_slice(&id.to_bytes());
    }

    #[inline]
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// `[length:i32][bytes]`.
    pub fn put_prefixed(&mut self, bytes: &[u8]) -> Result<()> {
        self.put_i32(length_i32(bytes.len())?);
        self.put_bytes(bytes);
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads little-endian primitives from a byte slice.
///
/// Every read checks bounds and fails with `InvalidPhysicalFormat` rather
/// than panicking on truncated input.
#[derive(Debug)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Bytes consumed so far.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn get_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(Error::InvalidPhysicalFormat(format!(
                "need {len} bytes at offset {}, {} remain",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.get_bytes(1)?[0])
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        let raw = self.get_bytes(4)?;
        Ok(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        let raw = self.get_bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        Ok(u64::from_le_bytes(buf))
    }

    pub fn get_stream_id(&mut self) -> Result<StreamId> {
        Ok(StreamId::from_bytes(self.get_bytes(8)?))
    }

    /// Read a non-negative `i32` length.
    pub fn get_len(&mut self) -> Result<usize> {
        let len = self.get_i32()?;
        usize::try_from(len)
            .map_err(|_| Error::InvalidPhysicalFormat(format!("negative length {len}")))
    }

    /// `[length:i32][bytes]`.
    pub fn get_prefixed(&mut self) -> Result<&'a [u8]> {
        let len = self.get_len()?;
        self.get_bytes(len)
    }
}

/// Convert a length to the on-disk `i32`.
pub(crate) fn length_i32(len: usize) -> Result<i32> {
    i32::try_from(len)
        .map_err(|_| Error::InvalidPhysicalFormat(format!("length {len} exceeds i32")))
}
