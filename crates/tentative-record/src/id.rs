//! Record identities
//!
//! A record is known by a [`RecordKey`]. Records that already exist in the
//! backing store carry a durable [`RecordId`]; a record that is still being
//! created carries a provisional key until its first commit.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Durable record identity, assigned by the backing store and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl RecordId {
    /// Wrap a raw identity
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw identity value
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for RecordId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity used for equality, store lookups and registry slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKey {
    /// Record known to the backing store
    Durable(RecordId),
    /// Record being created; replaced by a durable key once committed
    Provisional(Uuid),
}

impl RecordKey {
    /// Fresh provisional key
    #[inline]
    #[must_use]
    pub fn provisional() -> Self {
        Self::Provisional(Uuid::new_v4())
    }

    /// Durable identity, if any
    #[inline]
    #[must_use]
    pub const fn durable(self) -> Option<RecordId> {
        match self {
            Self::Durable(id) => Some(id),
            Self::Provisional(_) => None,
        }
    }

    /// Whether this key still awaits a durable identity
    #[inline]
    #[must_use]
    pub const fn is_provisional(self) -> bool {
        matches!(self, Self::Provisional(_))
    }
}

impl From<RecordId> for RecordKey {
    fn from(id: RecordId) -> Self {
        Self::Durable(id)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Durable(id) => write!(f, "{id}"),
            Self::Provisional(uuid) => write!(f, "new:{}", uuid.simple()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_display() {
        assert_eq!(RecordId::new(42).to_string(), "#42");
    }

    #[test]
    fn provisional_keys_are_unique() {
        let a = RecordKey::provisional();
        let b = RecordKey::provisional();
        assert_ne!(a, b);
        assert!(a.is_provisional());
        assert_eq!(a.durable(), None);
    }

    #[test]
    fn durable_key_roundtrip() {
        let key = RecordKey::from(RecordId::new(7));
        assert!(!key.is_provisional());
        assert_eq!(key.durable(), Some(RecordId::new(7)));
        assert_eq!(key.to_string(), "#7");
    }

    #[test]
    fn provisional_display_prefix() {
        let key = RecordKey::provisional();
        assert!(key.to_string().starts_with("new:"));
    }
}
