//! Error types for Tentative Core
//!
//! Provides error handling for:
//! - Backing-store rejections at commit time
//! - Interrupt signals that arrive too late or second
//! - Illegal phase transitions
//! - Configuration loading
//!
//! None of these are fatal: every command still ends in a terminal state and
//! releases its slot.

use crate::phase::Phase;
use tentative_record::{RecordId, RecordKey, StoreError};

/// Backing-store refusal of a committed operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// Field values failed validation
    #[error("validation failed: {0}")]
    Validation(String),

    /// Identity is already taken or was changed concurrently
    #[error("identity conflict on {0}")]
    Conflict(RecordId),

    /// Record does not exist in the backing store
    #[error("record {0} not found")]
    NotFound(RecordId),

    /// Backing store could not be reached
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
}

impl Rejection {
    /// Check if retrying the same operation may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Why an interrupt signal was not accepted
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalError {
    /// No command holds the identity
    #[error("no active command for {0}")]
    NoActiveCommand(RecordKey),

    /// The grace period already ended
    #[error("grace period already closed")]
    WindowClosed,

    /// Another signal was accepted first
    #[error("command already redirected")]
    AlreadyRedirected,
}

/// Phase machine errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PhaseError {
    /// Transition not in the phase table
    #[error("illegal phase transition: {from:?} -> {to:?}")]
    IllegalTransition {
        /// Current phase
        from: Phase,
        /// Requested phase
        to: Phase,
    },
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Could not read the configuration file
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed TOML
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Could not render TOML
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Value out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Signal not accepted
    #[error("signal rejected: {0}")]
    Signal(#[from] SignalError),

    /// Record store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Commit rejected by the backing store
    #[error("commit rejected: {0}")]
    Rejected(#[from] Rejection),

    /// Command task panicked or was aborted
    #[error("command task failed: {0}")]
    Join(String),
}

impl EngineError {
    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Rejected(rejection) => rejection.is_retryable(),
            Self::Signal(SignalError::NoActiveCommand(_)) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_display() {
        let err = Rejection::Conflict(RecordId::new(3));
        assert_eq!(err.to_string(), "identity conflict on #3");
    }

    #[test]
    fn rejection_is_retryable() {
        assert!(Rejection::Unavailable("timeout".into()).is_retryable());
        assert!(!Rejection::Validation("name".into()).is_retryable());
    }

    #[test]
    fn engine_error_from_signal() {
        let err: EngineError = SignalError::WindowClosed.into();
        assert!(err.to_string().contains("grace period already closed"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn engine_error_retryable_rejection() {
        let err = EngineError::from(Rejection::Unavailable("down".into()));
        assert!(err.is_retryable());
    }
}
