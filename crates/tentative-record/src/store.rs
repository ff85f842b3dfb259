//! Record store with committed and visible views
//!
//! Every record has a *committed* value (last value agreed with the backing
//! store) and a *visible* value (what readers observe). The two diverge while
//! a change command holds the record and must agree again once it finishes.
//!
//! The store does not arbitrate writers. Exclusive access to one identity is
//! granted by the pending-change registry; the store only guarantees that each
//! individual operation is atomic per view.

use crate::fields::Fields;
use crate::id::RecordKey;
use crate::record::{Record, VisibleRecord, VisibleState};
use dashmap::DashMap;

/// Record store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Record has no committed value
    #[error("record {0} not found")]
    NotFound(RecordKey),

    /// Record has no visible value to mark
    #[error("record {0} is not visible")]
    NotVisible(RecordKey),
}

/// Committed and visible views of all records
#[derive(Debug, Default)]
pub struct RecordStore {
    /// Last values agreed with the backing store
    committed: DashMap<RecordKey, Record>,

    /// Values shown to readers
    visible: DashMap<RecordKey, VisibleRecord>,
}

impl RecordStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            committed: DashMap::new(),
            visible: DashMap::new(),
        }
    }

    /// Create store seeded with committed records
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = Record>) -> Self {
        let store = Self::new();
        for record in records {
            store.load(record);
        }
        store
    }

    /// Load a committed record, replacing both views
    pub fn load(&self, record: Record) {
        self.visible
            .insert(record.key, VisibleRecord::settled(record.clone()));
        self.committed.insert(record.key, record);
    }

    /// Committed value of a record
    #[must_use]
    pub fn committed(&self, key: &RecordKey) -> Option<Record> {
        self.committed.get(key).map(|r| r.value().clone())
    }

    /// Visible value of a record
    #[must_use]
    pub fn visible(&self, key: &RecordKey) -> Option<VisibleRecord> {
        self.visible.get(key).map(|r| r.value().clone())
    }

    /// All visible records, ordered by key
    #[must_use]
    pub fn visible_records(&self) -> Vec<VisibleRecord> {
        let mut records: Vec<_> = self.visible.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(VisibleRecord::key);
        records
    }

    /// All committed records, ordered by key
    #[must_use]
    pub fn committed_records(&self) -> Vec<Record> {
        let mut records: Vec<_> = self.committed.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.key);
        records
    }

    /// Number of visible records
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.visible.len()
    }

    /// Whether no record is visible
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    /// Show `fields` as a pending change of `key`
    ///
    /// Creates the visible record when it does not exist yet.
    pub fn stage(&self, key: RecordKey, fields: Fields) {
        self.visible.insert(
            key,
            VisibleRecord {
                record: Record::new(key, fields),
                state: VisibleState::Pending,
            },
        );
    }

    /// Mark a visible record for removal
    ///
    /// # Errors
    /// Returns `StoreError::NotVisible` if nothing is shown under `key`
    pub fn tombstone(&self, key: &RecordKey) -> Result<(), StoreError> {
        let mut entry = self
            .visible
            .get_mut(key)
            .ok_or(StoreError::NotVisible(*key))?;
        entry.state = VisibleState::Tombstoned;
        Ok(())
    }

    /// Restore the visible value of `key` to its committed value
    ///
    /// A record with no committed value disappears from the visible view.
    pub fn rollback(&self, key: &RecordKey) {
        match self.committed(key) {
            Some(record) => {
                self.visible.insert(*key, VisibleRecord::settled(record));
            }
            None => {
                self.visible.remove(key);
            }
        }
    }

    /// Record a successful upsert commit
    ///
    /// `staged` is the key the change was shown under. When the backing store
    /// assigned a new identity, the staged entry is replaced by the committed
    /// one; the new entry becomes visible before the staged one is dropped.
    pub fn commit_upsert(&self, staged: &RecordKey, record: Record) {
        let key = record.key;
        self.committed.insert(key, record.clone());
        self.visible.insert(key, VisibleRecord::settled(record));
        if *staged != key {
            self.visible.remove(staged);
        }
    }

    /// Record a successful removal commit
    pub fn commit_delete(&self, key: &RecordKey) {
        self.committed.remove(key);
        self.visible.remove(key);
    }

    /// Whether the visible value of `key` agrees with its committed value
    #[must_use]
    pub fn is_consistent(&self, key: &RecordKey) -> bool {
        match (self.visible(key), self.committed(key)) {
            (None, None) => true,
            (Some(visible), Some(committed)) => {
                visible.state == VisibleState::Settled && visible.record == committed
            }
            _ => false,
        }
    }

    /// Keys whose visible value disagrees with the committed value
    #[must_use]
    pub fn diverged_keys(&self) -> Vec<RecordKey> {
        let mut keys: Vec<RecordKey> = self
            .visible
            .iter()
            .map(|r| *r.key())
            .chain(self.committed.iter().map(|r| *r.key()))
            .collect();
        keys.sort();
        keys.dedup();
        keys.retain(|key| !self.is_consistent(key));
        keys
    }
}
