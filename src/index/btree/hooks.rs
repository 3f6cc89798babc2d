//! Key/data lifecycle hooks.
//!
//! The tree never interprets key or data bytes. Ordering and the lifetime of
//! whatever the bytes refer to belong to the caller.

use std::cmp::Ordering;

use crate::common::{Error, Result};

/// Comparator and lifecycle callbacks for one index.
///
/// `copy_key`/`copy_data` are called whenever the tree takes ownership of an
/// entry (insert, and separator keys posted to routing nodes). The matching
/// `dispose_*` hook is called exactly once for every copy when the tree
/// drops it.
pub trait IndexHooks: Send + Sync {
    /// Compare a stored key with a probe key.
    ///
    /// The probe may be a partial key; implementations that support partial
    /// keys compare only the components the probe carries.
    fn compare(&self, index_key: &[u8], probe: &[u8]) -> Result<Ordering>;

    fn copy_key(&self, source: &[u8], target: &mut [u8]) -> Result<()> {
        target.copy_from_slice(source);
        Ok(())
    }

    fn copy_data(&self, source: &[u8], target: &mut [u8]) -> Result<()> {
        target.copy_from_slice(source);
        Ok(())
    }

    fn dispose_key(&self, _key: &[u8]) -> Result<()> {
        Ok(())
    }

    fn dispose_data(&self, _data: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Lexicographic byte comparison.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytewiseHooks;

impl IndexHooks for BytewiseHooks {
    fn compare(&self, index_key: &[u8], probe: &[u8]) -> Result<Ordering> {
        Ok(index_key.cmp(probe))
    }
}

/// Keys are `i64` stored as 8 little-endian bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct IntegerKeyHooks;

impl IntegerKeyHooks {
    /// Encode a key.
    pub fn key(value: i64) -> [u8; 8] {
        value.to_le_bytes()
    }

    /// Decode a key.
    pub fn decode(bytes: &[u8]) -> Result<i64> {
        let raw: [u8; 8] = bytes
            .try_into()
            .map_err(|_| Error::InvalidPhysicalFormat("integer key must be 8 bytes".into()))?;
        Ok(i64::from_le_bytes(raw))
    }
}

impl IndexHooks for IntegerKeyHooks {
    fn compare(&self, index_key: &[u8], probe: &[u8]) -> Result<Ordering> {
        Ok(Self::decode(index_key)?.cmp(&Self::decode(probe)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_keys_order_numerically() {
        let hooks = IntegerKeyHooks;
        let a = IntegerKeyHooks::key(-5);
        let b = IntegerKeyHooks::key(3);
        assert_eq!(hooks.compare(&a, &b).unwrap(), Ordering::Less);
        // little-endian bytes would order the other way
        assert_eq!(BytewiseHooks.compare(&a, &b).unwrap(), Ordering::Greater);
    }

    #[test]
    fn test_default_copy() {
        let mut target = [0u8; 3];
        BytewiseHooks.copy_key(&[1, 2, 3], &mut target).unwrap();
        assert_eq!(target, [1, 2, 3]);
    }
}
