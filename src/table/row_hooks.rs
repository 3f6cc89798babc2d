//! Index hooks over slot-encoded rows.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::common::{Error, Result};
use crate::index::btree::IndexHooks;
use crate::storage::StreamManager;
use crate::table::record::{copy_slot, decode_slot, slot_stream, SLOT_SIZE};
use crate::types::{OrderColumn, ScalarKind};

/// One key slot and the ordering it sorts by.
#[derive(Debug, Clone)]
pub struct KeySlot {
    pub kind: ScalarKind,
    pub order: OrderColumn,
}

/// Compares keys slot by slot and manages the streams slots refer to.
///
/// A probe may carry fewer slots than a stored key; only the slots it
/// carries take part in the comparison.
pub struct RowIndexHooks {
    streams: Arc<dyn StreamManager>,
    key: Vec<KeySlot>,
    data: Vec<ScalarKind>,
}

impl RowIndexHooks {
    pub fn new(streams: Arc<dyn StreamManager>, key: Vec<KeySlot>, data: Vec<ScalarKind>) -> Self {
        Self { streams, key, data }
    }

    pub fn key_slots(&self) -> &[KeySlot] {
        &self.key
    }

    pub fn data_kinds(&self) -> &[ScalarKind] {
        &self.data
    }

    pub fn key_length(&self) -> usize {
        self.key.len() * SLOT_SIZE
    }

    pub fn data_length(&self) -> usize {
        self.data.len() * SLOT_SIZE
    }

    fn copy_slots(&self, kinds: impl Iterator<Item = ScalarKind>, source: &[u8], target: &mut [u8]) -> Result<()> {
        for (i, kind) in kinds.enumerate() {
            let at = i * SLOT_SIZE;
            copy_slot(
                &*self.streams,
                kind,
                &source[at..at + SLOT_SIZE],
                &mut target[at..at + SLOT_SIZE],
            )?;
        }
        Ok(())
    }

    fn dispose_slots(&self, kinds: impl Iterator<Item = ScalarKind>, bytes: &[u8]) -> Result<()> {
        for (i, kind) in kinds.enumerate() {
            let at = i * SLOT_SIZE;
            if let Some(id) = slot_stream(kind, &bytes[at..at + SLOT_SIZE]) {
                self.streams.deallocate(id)?;
            }
        }
        Ok(())
    }
}

impl IndexHooks for RowIndexHooks {
    fn compare(&self, index_key: &[u8], probe: &[u8]) -> Result<Ordering> {
        if probe.len() % SLOT_SIZE != 0 || probe.len() > index_key.len() {
            return Err(Error::InvalidPhysicalFormat(format!(
                "probe of {} bytes against a {} byte key",
                probe.len(),
                index_key.len()
            )));
        }
        for (i, slot) in self.key.iter().take(probe.len() / SLOT_SIZE).enumerate() {
            let at = i * SLOT_SIZE;
            let stored = decode_slot(&*self.streams, slot.kind, &index_key[at..at + SLOT_SIZE])?;
            let wanted = decode_slot(&*self.streams, slot.kind, &probe[at..at + SLOT_SIZE])?;
            let ord = slot.order.compare(stored.as_ref(), wanted.as_ref())?;
            if ord != Ordering::Equal {
                return Ok(ord);
            }
        }
        Ok(Ordering::Equal)
    }

    fn copy_key(&self, source: &[u8], target: &mut [u8]) -> Result<()> {
        self.copy_slots(self.key.iter().map(|s| s.kind), source, target)
    }

    fn copy_data(&self, source: &[u8], target: &mut [u8]) -> Result<()> {
        self.copy_slots(self.data.iter().copied(), source, target)
    }

    fn dispose_key(&self, key: &[u8]) -> Result<()> {
        self.dispose_slots(self.key.iter().map(|s| s.kind), key)
    }

    fn dispose_data(&self, data: &[u8]) -> Result<()> {
        self.dispose_slots(self.data.iter().copied(), data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStreamManager;
    use crate::table::record::Record;
    use crate::types::Value;

    fn hooks(streams: &Arc<dyn StreamManager>) -> RowIndexHooks {
        RowIndexHooks::new(
            streams.clone(),
            vec![
                KeySlot { kind: ScalarKind::Text, order: OrderColumn::asc("dept") },
                KeySlot { kind: ScalarKind::Integer, order: OrderColumn::desc("id") },
            ],
            vec![],
        )
    }

    #[test]
    fn test_compare_full_and_partial() {
        let streams: Arc<dyn StreamManager> = Arc::new(MemoryStreamManager::new());
        let hooks = hooks(&streams);
        let kinds = [ScalarKind::Text, ScalarKind::Integer];
        let a = Value::Text("A".into());
        let b = Value::Text("B".into());
        let (one, two) = (Value::Integer(1), Value::Integer(2));

        let a1 = Record::encode(&streams, &kinds, &[Some(&a), Some(&one)]).unwrap();
        let a2 = Record::encode(&streams, &kinds, &[Some(&a), Some(&two)]).unwrap();
        let b1 = Record::encode(&streams, &kinds, &[Some(&b), Some(&one)]).unwrap();
        let prefix_a = Record::encode(&streams, &kinds[..1], &[Some(&a)]).unwrap();

        assert_eq!(hooks.compare(a1.as_bytes(), b1.as_bytes()).unwrap(), Ordering::Less);
        // id is descending
        assert_eq!(hooks.compare(a1.as_bytes(), a2.as_bytes()).unwrap(), Ordering::Greater);
        assert_eq!(hooks.compare(a2.as_bytes(), prefix_a.as_bytes()).unwrap(), Ordering::Equal);
        assert_eq!(hooks.compare(b1.as_bytes(), prefix_a.as_bytes()).unwrap(), Ordering::Greater);
    }

    #[test]
    fn test_copy_and_dispose_key() {
        let memory = Arc::new(MemoryStreamManager::new());
        let streams: Arc<dyn StreamManager> = memory.clone();
        let hooks = hooks(&streams);
        let text = Value::Text("A".into());
        let one = Value::Integer(1);
        let record = Record::encode(&streams, &[ScalarKind::Text, ScalarKind::Integer], &[Some(&text), Some(&one)]).unwrap();

        let mut copy = vec![0u8; hooks.key_length()];
        hooks.copy_key(record.as_bytes(), &mut copy).unwrap();
        assert_eq!(memory.len(), 2);
        drop(record);
        assert_eq!(memory.len(), 1);
        hooks.dispose_key(&copy).unwrap();
        assert!(memory.is_empty());
    }

    #[test]
    fn test_misaligned_probe() {
        let streams: Arc<dyn StreamManager> = Arc::new(MemoryStreamManager::new());
        let hooks = hooks(&streams);
        assert!(matches!(
            hooks.compare(&[0u8; 18], &[0u8; 4]),
            Err(Error::InvalidPhysicalFormat(_))
        ));
    }
}
