//! Command phases and the allowed transitions between them
//!
//! ```text
//! AwaitingInput ─► AcquiringSlot ─► Simulated ─► GracePeriod ─┬─► Committing ─┬─► Releasing ─► Finished
//!       │                 │                                   └─► Cancelling ─┘
//!       └─► Finished      └─► Releasing (target vanished)
//! ```
//!
//! Every phase is visited at most once.

use crate::error::PhaseError;
use serde::{Deserialize, Serialize};

/// Terminal outcome of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    /// Committed to the backing store
    Successful,
    /// Abandoned or cancelled; nothing committed
    Cancelled,
    /// Rejected by the backing store or target missing; visible state rolled back
    Failed,
}

impl std::fmt::Display for TerminalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Successful => "successful",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        })
    }
}

/// Position of a command in its life cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Running the input-capture callback
    AwaitingInput,
    /// Waiting for exclusive rights on the target
    AcquiringSlot,
    /// Optimistic change applied to the visible record
    Simulated,
    /// Counting down; interruptible
    GracePeriod,
    /// Waiting on the backing store
    Committing,
    /// Rolling the visible record back
    Cancelling,
    /// Giving up the slot
    Releasing,
    /// Done
    Finished(TerminalState),
}

impl Phase {
    /// Whether the command is done
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished(_))
    }

    /// Terminal outcome, once finished
    #[inline]
    #[must_use]
    pub const fn terminal(self) -> Option<TerminalState> {
        match self {
            Self::Finished(state) => Some(state),
            _ => None,
        }
    }

    /// Whether the visible record may differ from the committed one
    #[inline]
    #[must_use]
    pub const fn is_mutating(self) -> bool {
        matches!(self, Self::Simulated | Self::GracePeriod | Self::Committing)
    }

    /// Whether the command owns its registry slot in this phase
    #[inline]
    #[must_use]
    pub const fn holds_slot(self) -> bool {
        matches!(
            self,
            Self::Simulated | Self::GracePeriod | Self::Committing | Self::Cancelling
        )
    }
}

/// Phases reachable from `from`
#[must_use]
pub fn allowed_transitions(from: Phase) -> Vec<Phase> {
    use Phase::*;
    use TerminalState::*;
    match from {
        AwaitingInput => vec![AcquiringSlot, Finished(Cancelled)],
        AcquiringSlot => vec![Simulated, Releasing],
        Simulated => vec![GracePeriod],
        GracePeriod => vec![Committing, Cancelling],
        Committing | Cancelling => vec![Releasing],
        Releasing => vec![Finished(Successful), Finished(Cancelled), Finished(Failed)],
        Finished(_) => vec![],
    }
}

/// Validates a phase transition.
///
/// Illegal transitions panic with the `strict-debug` feature; otherwise an
/// error is returned so callers can log it.
///
/// # Errors
/// Returns `PhaseError::IllegalTransition` if `to` is not reachable from `from`
pub fn validate_transition(from: Phase, to: Phase) -> Result<(), PhaseError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        #[cfg(feature = "strict-debug")]
        panic!("Illegal phase transition attempted: {from:?} -> {to:?}");

        Err(PhaseError::IllegalTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_phase() -> impl Strategy<Value = Phase> {
        prop_oneof![
            Just(Phase::AwaitingInput),
            Just(Phase::AcquiringSlot),
            Just(Phase::Simulated),
            Just(Phase::GracePeriod),
            Just(Phase::Committing),
            Just(Phase::Cancelling),
            Just(Phase::Releasing),
            Just(Phase::Finished(TerminalState::Successful)),
            Just(Phase::Finished(TerminalState::Cancelled)),
            Just(Phase::Finished(TerminalState::Failed)),
        ]
    }

    #[test]
    fn abandonment_skips_registry() {
        assert!(validate_transition(
            Phase::AwaitingInput,
            Phase::Finished(TerminalState::Cancelled)
        )
        .is_ok());
        assert!(validate_transition(
            Phase::AwaitingInput,
            Phase::Finished(TerminalState::Successful)
        )
        .is_err());
    }

    #[test]
    fn grace_period_leads_to_commit_or_cancel() {
        assert!(validate_transition(Phase::GracePeriod, Phase::Committing).is_ok());
        assert!(validate_transition(Phase::GracePeriod, Phase::Cancelling).is_ok());
        assert!(validate_transition(Phase::GracePeriod, Phase::Releasing).is_err());
    }

    #[test]
    fn finished_is_final() {
        assert!(allowed_transitions(Phase::Finished(TerminalState::Failed)).is_empty());
    }

    #[test]
    fn mutating_phases() {
        assert!(Phase::GracePeriod.is_mutating());
        assert!(!Phase::AcquiringSlot.is_mutating());
        assert!(Phase::Cancelling.holds_slot());
        assert!(!Phase::Releasing.holds_slot());
    }

    proptest! {
        #[test]
        fn prop_validation_matches_table(from in any_phase(), to in any_phase()) {
            let allowed = allowed_transitions(from);
            prop_assert_eq!(validate_transition(from, to).is_ok(), allowed.contains(&to));
        }

        #[test]
        fn prop_no_phase_reenters_itself(phase in any_phase()) {
            prop_assert!(!allowed_transitions(phase).contains(&phase));
        }
    }
}
