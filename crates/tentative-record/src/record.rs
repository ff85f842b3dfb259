//! Records and their user-facing projection

use crate::fields::Fields;
use crate::id::{RecordId, RecordKey};
use serde::{Deserialize, Serialize};

/// A domain record: immutable identity plus mutable fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Identity
    pub key: RecordKey,
    /// Field values
    pub fields: Fields,
}

impl Record {
    /// Create new record
    #[inline]
    #[must_use]
    pub fn new(key: RecordKey, fields: Fields) -> Self {
        Self { key, fields }
    }

    /// Durable identity, if committed at least once
    #[inline]
    #[must_use]
    pub fn id(&self) -> Option<RecordId> {
        self.key.durable()
    }
}

/// Where a visible record stands relative to its committed value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibleState {
    /// Agrees with the committed view
    #[default]
    Settled,
    /// Carries an optimistic change that is not committed yet
    Pending,
    /// Marked for removal; still shown until the removal commits
    Tombstoned,
}

/// Record as observed by readers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibleRecord {
    /// Record value as currently shown
    pub record: Record,
    /// Pending / tombstone marker
    pub state: VisibleState,
}

impl VisibleRecord {
    /// Visible projection of a committed record
    #[inline]
    #[must_use]
    pub fn settled(record: Record) -> Self {
        Self {
            record,
            state: VisibleState::Settled,
        }
    }

    /// Identity
    #[inline]
    #[must_use]
    pub fn key(&self) -> RecordKey {
        self.record.key
    }

    /// Shown field values
    #[inline]
    #[must_use]
    pub fn fields(&self) -> &Fields {
        &self.record.fields
    }

    /// Whether the record carries an uncommitted change
    #[inline]
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state == VisibleState::Pending
    }

    /// Whether the record is marked for removal
    #[inline]
    #[must_use]
    pub fn is_tombstoned(&self) -> bool {
        self.state == VisibleState::Tombstoned
    }
}
