//! Fixed-width index slots.
//!
//! Index entries are fixed length, so every column occupies one 9-byte slot:
//!
//! ```text
//! [present:1][payload:8]
//! ```
//!
//! Booleans and integers are stored inline. Text and binary values live in a
//! stream of their own and the payload is its [`StreamId`]; copying a slot
//! copies that stream, disposing it releases the stream.

use std::sync::Arc;

use crate::common::{Error, Result, StreamId};
use crate::storage::StreamManager;
use crate::types::{ScalarKind, Value};

/// Bytes per column slot.
pub const SLOT_SIZE: usize = 9;

/// Whether values of `kind` live outside the slot.
pub(crate) fn is_stream_backed(kind: ScalarKind) -> bool {
    matches!(kind, ScalarKind::Text | ScalarKind::Binary)
}

/// Stream referenced by a present, stream-backed slot.
pub(crate) fn slot_stream(kind: ScalarKind, slot: &[u8]) -> Option<StreamId> {
    if slot[0] == 0 || !is_stream_backed(kind) {
        return None;
    }
    Some(StreamId::from_bytes(&slot[1..SLOT_SIZE]))
}

/// Decode the value held in `slot`.
pub(crate) fn decode_slot(
    streams: &dyn StreamManager,
    kind: ScalarKind,
    slot: &[u8],
) -> Result<Option<Value>> {
    if slot.len() < SLOT_SIZE {
        return Err(Error::InvalidPhysicalFormat(format!(
            "slot of {} bytes",
            slot.len()
        )));
    }
    if slot[0] == 0 {
        return Ok(None);
    }
    let payload = &slot[1..SLOT_SIZE];
    let value = match kind {
        ScalarKind::Boolean => Value::Boolean(payload[0] != 0),
        ScalarKind::Integer => Value::from_native_bytes(kind, payload)?,
        ScalarKind::Text | ScalarKind::Binary => {
            let bytes = streams.read(StreamId::from_bytes(payload))?;
            Value::from_native_bytes(kind, &bytes)?
        }
    };
    Ok(Some(value))
}

/// Copy a slot, duplicating the stream it references.
pub(crate) fn copy_slot(
    streams: &dyn StreamManager,
    kind: ScalarKind,
    source: &[u8],
    target: &mut [u8],
) -> Result<()> {
    target[..SLOT_SIZE].copy_from_slice(&source[..SLOT_SIZE]);
    if let Some(id) = slot_stream(kind, source) {
        let copy = streams.allocate_with(&streams.read(id)?)?;
        target[1..SLOT_SIZE].copy_from_slice(&copy.to_bytes());
    }
    Ok(())
}

/// An encoded run of slots.
///
/// Streams allocated while encoding are released on drop unless the record
/// was handed to an index, which takes its own copies through the hooks.
pub struct Record {
    bytes: Vec<u8>,
    streams: Arc<dyn StreamManager>,
    owned: Vec<StreamId>,
}

impl Record {
    /// Encode `values` against `kinds`, one slot each.
    ///
    /// # Errors
    /// Returns `Error::TypeMismatch` if a value does not match its slot kind.
    pub fn encode(
        streams: &Arc<dyn StreamManager>,
        kinds: &[ScalarKind],
        values: &[Option<&Value>],
    ) -> Result<Self> {
        let mut record = Self {
            bytes: Vec::with_capacity(values.len() * SLOT_SIZE),
            streams: Arc::clone(streams),
            owned: Vec::new(),
        };
        for (kind, value) in kinds.iter().zip(values) {
            record.push(*kind, *value)?;
        }
        Ok(record)
    }

    fn push(&mut self, kind: ScalarKind, value: Option<&Value>) -> Result<()> {
        let mut slot = [0u8; SLOT_SIZE];
        if let Some(value) = value {
            if value.kind() != Some(kind) {
                return Err(Error::TypeMismatch(format!(
                    "{value} stored in a {kind:?} slot"
                )));
            }
            slot[0] = 1;
            match value {
                Value::Boolean(b) => slot[1] = u8::from(*b),
                Value::Integer(i) => slot[1..].copy_from_slice(&i.to_le_bytes()),
                _ => {
                    let id = self.streams.allocate_with(&value.to_native_bytes()?)?;
                    self.owned.push(id);
                    slot[1..].copy_from_slice(&id.to_bytes());
                }
            }
        }
        self.bytes.extend_from_slice(&slot);
        Ok(())
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len() / SLOT_SIZE
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Drop for Record {
    fn drop(&mut self) {
        for id in self.owned.drain(..) {
            if let Err(err) = self.streams.deallocate(id) {
                tracing::warn!(error = %err, stream = %id, "failed to release record stream");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStreamManager;

    fn streams() -> Arc<dyn StreamManager> {
        Arc::new(MemoryStreamManager::new())
    }

    #[test]
    fn test_inline_slots() {
        let streams = streams();
        let seven = Value::Integer(7);
        let yes = Value::Boolean(true);
        let record = Record::encode(
            &streams,
            &[ScalarKind::Integer, ScalarKind::Boolean, ScalarKind::Integer],
            &[Some(&seven), Some(&yes), None],
        )
        .unwrap();
        assert_eq!(record.len(), 3);
        let bytes = record.as_bytes();
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[1..9], &7i64.to_le_bytes());
        assert_eq!(&bytes[9..11], &[1, 1]);
        assert_eq!(bytes[18], 0);
        assert_eq!(
            decode_slot(&*streams, ScalarKind::Integer, &bytes[..9]).unwrap(),
            Some(seven)
        );
        assert_eq!(decode_slot(&*streams, ScalarKind::Integer, &bytes[18..]).unwrap(), None);
    }

    #[test]
    fn test_text_slot_is_released_on_drop() {
        let memory = Arc::new(MemoryStreamManager::new());
        let streams: Arc<dyn StreamManager> = memory.clone();
        let text = Value::Text("hello".into());
        let record = Record::encode(&streams, &[ScalarKind::Text], &[Some(&text)]).unwrap();
        assert_eq!(memory.len(), 1);
        assert_eq!(
            decode_slot(&*streams, ScalarKind::Text, record.as_bytes()).unwrap(),
            Some(text)
        );
        drop(record);
        assert!(memory.is_empty());
    }

    #[test]
    fn test_copy_slot_duplicates_stream() {
        let memory = Arc::new(MemoryStreamManager::new());
        let streams: Arc<dyn StreamManager> = memory.clone();
        let text = Value::Text("x".into());
        let record = Record::encode(&streams, &[ScalarKind::Text], &[Some(&text)]).unwrap();
        let mut copy = [0u8; SLOT_SIZE];
        copy_slot(&*streams, ScalarKind::Text, record.as_bytes(), &mut copy).unwrap();
        assert_ne!(slot_stream(ScalarKind::Text, &copy), slot_stream(ScalarKind::Text, record.as_bytes()));
        drop(record);
        assert_eq!(decode_slot(&*streams, ScalarKind::Text, &copy).unwrap(), Some(text));
    }

    #[test]
    fn test_kind_mismatch() {
        let streams = streams();
        let text = Value::Text("x".into());
        assert!(matches!(
            Record::encode(&streams, &[ScalarKind::Integer], &[Some(&text)]),
            Err(Error::TypeMismatch(_))
        ));
    }
}
