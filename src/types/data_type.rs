//! Scalar data types.

use std::fmt;

/// Physical representation family of a scalar type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Boolean,
    Integer,
    Text,
    Binary,
}

/// A named scalar type.
///
/// Native types are stored inline in rows. Non-native types (`System.Binary`)
/// are stored as a stream reference unless the row carries expanded streams.
/// A specialized type shares its parent's kind and nativeness under a new
/// name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataType {
    name: String,
    kind: ScalarKind,
    native: bool,
}

impl DataType {
    fn builtin(name: &str, kind: ScalarKind, native: bool) -> Self {
        Self {
            name: name.to_string(),
            kind,
            native,
        }
    }

    /// `System.Boolean`.
    pub fn boolean() -> Self {
        Self::builtin("System.Boolean", ScalarKind::Boolean, true)
    }

    /// `System.Integer` (64-bit signed).
    pub fn integer() -> Self {
        Self::builtin("System.Integer", ScalarKind::Integer, true)
    }

    /// `System.String` (UTF-8).
    pub fn text() -> Self {
        Self::builtin("System.String", ScalarKind::Text, true)
    }

    /// `System.Binary`, stored out of line.
    pub fn binary() -> Self {
        Self::builtin("System.Binary", ScalarKind::Binary, false)
    }

    /// Derive a subtype with the same physical representation.
    pub fn specialize(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: self.kind,
            native: self.native,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn kind(&self) -> ScalarKind {
        self.kind
    }

    #[inline]
    pub fn is_native(&self) -> bool {
        self.native
    }

    /// Whether `other` shares this type's physical representation.
    pub fn is_compatible(&self, other: &DataType) -> bool {
        self.kind == other.kind && self.native == other.native
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_types() {
        assert!(DataType::integer().is_native());
        assert!(!DataType::binary().is_native());
        assert_eq!(DataType::text().name(), "System.String");
    }

    #[test]
    fn test_specialize_keeps_representation() {
        let id = DataType::integer().specialize("Shop.ID");
        assert_eq!(id.name(), "Shop.ID");
        assert_eq!(id.kind(), ScalarKind::Integer);
        assert!(id.is_compatible(&DataType::integer()));
        assert_ne!(id, DataType::integer());
    }
}
