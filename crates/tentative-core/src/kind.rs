//! Kind-specific behaviour of change commands
//!
//! The command state machine is shared; what differs between creations,
//! modifications and removals is captured by three pure functions on
//! [`CommandKind`]: how the optimistic effect is applied, how a grace-period
//! outcome is resolved, and which request is sent to the backing store.

use crate::backing::CommitRequest;
use crate::error::Rejection;
use crate::grace::GraceOutcome;
use crate::types::{Captured, CommandKind, Signal};
use tentative_record::{Fields, Record, RecordKey, RecordStore, StoreError};

/// Command to issue once the current one has released its slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUp {
    /// Remove the same record
    Remove,
    /// Modify the same record with these fields
    Modify(Fields),
}

impl FollowUp {
    /// Kind of the follow-up command
    #[inline]
    #[must_use]
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Remove => CommandKind::Remove,
            Self::Modify(_) => CommandKind::Modify,
        }
    }
}

/// What to do once the grace period is over
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// Commit, optionally with replacement fields
    Commit(Option<Fields>),
    /// Roll back
    Cancel,
    /// Roll back, then hand the record to a new command
    Handoff(FollowUp),
}

impl CommandKind {
    /// Apply the optimistic effect to the visible view
    pub(crate) fn simulate(
        self,
        store: &RecordStore,
        key: RecordKey,
        fields: &Fields,
    ) -> Result<(), StoreError> {
        match self {
            Self::Create => {
                store.stage(key, fields.clone());
                Ok(())
            }
            Self::Modify => {
                if store.committed(&key).is_none() {
                    return Err(StoreError::NotFound(key));
                }
                store.stage(key, fields.clone());
                Ok(())
            }
            Self::Remove => {
                if store.committed(&key).is_none() {
                    return Err(StoreError::NotFound(key));
                }
                store.tombstone(&key)
            }
        }
    }

    /// Decide how a grace period outcome ends the command
    pub(crate) fn resolve(self, outcome: GraceOutcome) -> Resolution {
        let signal = match outcome {
            GraceOutcome::Expired => return Resolution::Commit(None),
            GraceOutcome::Interrupted(signal) => signal,
        };
        match (self, signal) {
            (_, Signal::Cancel | Signal::Edit(Captured::Abandoned)) => Resolution::Cancel,
            (Self::Create | Self::Modify, Signal::Edit(Captured::Fields(fields))) => {
                Resolution::Commit(Some(fields))
            }
            (Self::Create, Signal::Remove) => Resolution::Cancel,
            (Self::Modify, Signal::Remove) => Resolution::Handoff(FollowUp::Remove),
            (Self::Remove, Signal::Edit(Captured::Fields(fields))) => {
                Resolution::Handoff(FollowUp::Modify(fields))
            }
            (Self::Remove, Signal::Remove) => Resolution::Commit(None),
        }
    }

    /// Backing-store request committing `fields` for `key`
    pub(crate) fn commit_request(
        self,
        key: RecordKey,
        fields: &Fields,
    ) -> Result<CommitRequest, Rejection> {
        match (self, key.durable()) {
            (Self::Create, _) => Ok(CommitRequest::Create(fields.clone())),
            (Self::Modify, Some(id)) => Ok(CommitRequest::Update(id, fields.clone())),
            (Self::Remove, Some(id)) => Ok(CommitRequest::Delete(id)),
            (_, None) => Err(Rejection::Validation(format!(
                "{self} needs a committed record, got {key}"
            ))),
        }
    }

    /// Bring both views in line with a successful commit
    pub(crate) fn settle(self, store: &RecordStore, key: RecordKey, committed: Record) {
        match self {
            Self::Create | Self::Modify => store.commit_upsert(&key, committed),
            Self::Remove => store.commit_delete(&key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tentative_record::{RecordId, VisibleState};

    fn key() -> RecordKey {
        RecordId::new(1).into()
    }

    fn store() -> RecordStore {
        RecordStore::with_records([Record::new(key(), Fields::new().with("city", "Oslo"))])
    }

    fn edit(city: &str) -> GraceOutcome {
        GraceOutcome::Interrupted(Signal::Edit(Captured::Fields(
            Fields::new().with("city", city),
        )))
    }

    #[test]
    fn simulate_per_kind() {
        let store = store();
        CommandKind::Modify
            .simulate(&store, key(), &Fields::new().with("city", "X"))
            .unwrap();
        assert_eq!(store.visible(&key()).unwrap().state, VisibleState::Pending);

        store.rollback(&key());
        CommandKind::Remove
            .simulate(&store, key(), &Fields::new())
            .unwrap();
        assert_eq!(
            store.visible(&key()).unwrap().state,
            VisibleState::Tombstoned
        );

        let provisional = RecordKey::provisional();
        CommandKind::Create
            .simulate(&store, provisional, &Fields::new().with("city", "Y"))
            .unwrap();
        assert!(store.visible(&provisional).unwrap().is_pending());
    }

    #[test]
    fn simulate_missing_target_fails() {
        let store = store();
        let missing = RecordId::new(9).into();
        assert_eq!(
            CommandKind::Modify.simulate(&store, missing, &Fields::new()),
            Err(StoreError::NotFound(missing))
        );
        assert!(store.visible(&missing).is_none());
    }

    #[test]
    fn resolution_table() {
        use CommandKind::*;

        assert_eq!(Create.resolve(GraceOutcome::Expired), Resolution::Commit(None));
        assert_eq!(
            Modify.resolve(GraceOutcome::Interrupted(Signal::Cancel)),
            Resolution::Cancel
        );
        assert_eq!(
            Create.resolve(GraceOutcome::Interrupted(Signal::Remove)),
            Resolution::Cancel
        );
        assert_eq!(
            Modify.resolve(GraceOutcome::Interrupted(Signal::Remove)),
            Resolution::Handoff(FollowUp::Remove)
        );
        assert_eq!(
            Modify.resolve(edit("Z")),
            Resolution::Commit(Some(Fields::new().with("city", "Z")))
        );
        assert_eq!(
            Remove.resolve(edit("Z")),
            Resolution::Handoff(FollowUp::Modify(Fields::new().with("city", "Z")))
        );
        assert_eq!(
            Remove.resolve(GraceOutcome::Interrupted(Signal::Remove)),
            Resolution::Commit(None)
        );
        assert_eq!(
            Create.resolve(GraceOutcome::Interrupted(Signal::Edit(Captured::Abandoned))),
            Resolution::Cancel
        );
    }

    #[test]
    fn commit_requests() {
        let fields = Fields::new().with("city", "X");
        assert_eq!(
            CommandKind::Modify.commit_request(key(), &fields),
            Ok(CommitRequest::Update(RecordId::new(1), fields.clone()))
        );
        assert_eq!(
            CommandKind::Create.commit_request(RecordKey::provisional(), &fields),
            Ok(CommitRequest::Create(fields.clone()))
        );
        assert!(CommandKind::Remove
            .commit_request(RecordKey::provisional(), &fields)
            .is_err());
    }
}
