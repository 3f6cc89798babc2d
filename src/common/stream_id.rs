//! Stream identifier type.

use std::fmt;

use crate::common::config::STREAM_ID_SIZE;

/// Identifies an allocated byte range owned by a stream manager.
///
/// Every index node, index header and stored key/data record lives in its
/// own stream. The id is written raw (8 bytes, little-endian) into node
/// headers and routing entries, so `StreamId::NIL` (all zero bytes) doubles
/// as the "no node" marker for leaf links and routing sentinels.
///
/// # Example
/// ```
/// use relcore::StreamId;
///
/// let id = StreamId::new(42);
/// assert!(!id.is_nil());
/// assert_eq!(StreamId::from_bytes(&id.to_bytes()), id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl StreamId {
    /// The "no stream" sentinel.
    pub const NIL: StreamId = StreamId(0);

    /// Create a new StreamId.
    #[inline]
    pub fn new(id: u64) -> Self {
        StreamId(id)
    }

    /// Check if this is the nil sentinel.
    #[inline]
    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }

    /// Encode as 8 little-endian bytes.
    #[inline]
    pub fn to_bytes(self) -> [u8; STREAM_ID_SIZE] {
        self.0.to_le_bytes()
    }

    /// Decode from the first 8 bytes of `bytes`.
    ///
    /// # Panics
    /// Panics if `bytes.len() < 8`.
    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut raw = [0u8; STREAM_ID_SIZE];
        raw.copy_from_slice(&bytes[..STREAM_ID_SIZE]);
        StreamId(u64::from_le_bytes(raw))
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            write!(f, "Stream(NIL)")
        } else {
            write!(f, "Stream({})", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_id_nil() {
        assert!(StreamId::NIL.is_nil());
        assert!(!StreamId::new(1).is_nil());
        assert_eq!(StreamId::NIL.to_bytes(), [0u8; 8]);
    }

    #[test]
    fn test_stream_id_byte_layout() {
        let id = StreamId::new(0x0807060504030201);
        assert_eq!(id.to_bytes(), [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(StreamId::from_bytes(&[1, 2, 3, 4, 5, 6, 7, 8, 9]), id);
    }

    #[test]
    fn test_stream_id_display() {
        assert_eq!(format!("{}", StreamId::new(42)), "Stream(42)");
        assert_eq!(format!("{}", StreamId::NIL), "Stream(NIL)");
    }
}
