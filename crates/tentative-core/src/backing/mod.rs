//! Backing-store contract
//!
//! The backing store is the slow, authoritative side of the system. A change
//! command calls it exactly once, from its `Committing` phase, and waits for
//! the outcome on its own task.

mod memory;

pub use memory::MemoryBackingStore;

use crate::error::Rejection;
use crate::types::CommandKind;
use tentative_record::{Fields, Record, RecordId};

/// Operation sent to the backing store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitRequest {
    /// Insert a new record; the store assigns its identity
    Create(Fields),
    /// Replace the fields of an existing record
    Update(RecordId, Fields),
    /// Delete an existing record
    Delete(RecordId),
}

impl CommitRequest {
    /// Command kind this request commits
    #[inline]
    #[must_use]
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Create(_) => CommandKind::Create,
            Self::Update(..) => CommandKind::Modify,
            Self::Delete(_) => CommandKind::Remove,
        }
    }

    /// Target identity, if the record already exists
    #[inline]
    #[must_use]
    pub fn target(&self) -> Option<RecordId> {
        match self {
            Self::Create(_) => None,
            Self::Update(id, _) | Self::Delete(id) => Some(*id),
        }
    }
}

/// Authoritative store behind the local cache
///
/// Implementations return the record as stored: with its durable identity for
/// creations, the final field values for updates, and the removed value for
/// deletions.
#[async_trait::async_trait]
pub trait BackingStore: Send + Sync {
    /// Apply one committed operation
    async fn commit(&self, request: CommitRequest) -> Result<Record, Rejection>;
}
