//! Tentative Core - Optimistic Change Commands
//!
//! Runs record changes optimistically: the change is shown at once, held for
//! a cancellable grace period, and only then committed to a slow backing
//! store. Commands on the same record never overlap.
//!
//! # Lifecycle
//!
//! 1. **Input**: capture the new field values (or abandon)
//! 2. **Slot**: wait for exclusive rights on the record
//! 3. **Simulate**: show the change on the visible view
//! 4. **Grace period**: count down; an edit, removal or cancel may interrupt
//! 5. **Commit or cancel**: write through, or roll the visible view back
//! 6. **Release**: free the slot, report, submit any follow-up
//!
//! # Example
//!
//! ```rust,ignore
//! use tentative_core::prelude::*;
//!
//! # async fn example() -> Result<(), EngineError> {
//! let engine = CommandEngine::builder()
//!     .with_config(EngineConfig::new().with_grace_period(5))
//!     .build()?;
//!
//! let ticket = engine.create(
//!     || Fields::new().with("city", "Oslo").into(),
//!     CommandOptions::new(),
//! );
//! ticket.handle().cancel()?;
//!
//! let report = ticket.outcome().await?;
//! assert_eq!(report.terminal, TerminalState::Cancelled);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod backing;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod grace;
pub mod kind;
pub mod phase;
pub mod report;
pub mod types;

// Re-exports for convenience
pub use backing::{BackingStore, CommitRequest, MemoryBackingStore};
pub use command::{Capture, CommandHandle, CommandRegistry};
pub use config::EngineConfig;
pub use engine::{CommandEngine, CommandTicket, EngineBuilder, EngineStats};
pub use error::{ConfigError, EngineError, PhaseError, Rejection, SignalError};
pub use gate::InterruptGate;
pub use grace::{GraceOutcome, GraceTimer};
pub use kind::FollowUp;
pub use phase::{allowed_transitions, validate_transition, Phase, TerminalState};
pub use report::{ChannelSink, CommandReport, FanoutSink, ResultSink, TracingSink};
pub use types::{Captured, CommandId, CommandKind, CommandOptions, Signal};

pub use tentative_record::{Fields, Record, RecordId, RecordKey, RecordStore, VisibleState};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving change commands
    pub use crate::{
        BackingStore, Captured, CommandEngine, CommandHandle, CommandKind, CommandOptions,
        CommandReport, EngineConfig, EngineError, Fields, Phase, RecordId, RecordKey,
        ResultSink, TerminalState,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
