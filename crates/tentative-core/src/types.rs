//! Core types for change commands
//!
//! Defines:
//! - Command identity and kind
//! - Captured input and interrupt signals
//! - Per-command options

use serde::{Deserialize, Serialize};
use tentative_record::Fields;
use ulid::Ulid;

/// Unique command identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommandId(pub Ulid);

impl CommandId {
    /// Generate new command ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a command does to its record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Add a new record
    Create,
    /// Replace the fields of an existing record
    Modify,
    /// Delete an existing record
    Remove,
}

impl CommandKind {
    /// Lower-case name
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Remove => "remove",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an input-capture callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Captured {
    /// Field values to apply
    Fields(Fields),
    /// The user declined to supply input
    Abandoned,
}

impl Captured {
    /// Captured field values, if any
    #[inline]
    #[must_use]
    pub fn into_fields(self) -> Option<Fields> {
        match self {
            Self::Fields(fields) => Some(fields),
            Self::Abandoned => None,
        }
    }
}

impl From<Fields> for Captured {
    fn from(fields: Fields) -> Self {
        Self::Fields(fields)
    }
}

impl From<Option<Fields>> for Captured {
    fn from(fields: Option<Fields>) -> Self {
        fields.map_or(Self::Abandoned, Self::Fields)
    }
}

/// Interrupt delivered to a command during its grace period
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Replace the pending change with new data
    Edit(Captured),
    /// Turn the pending change into a removal
    Remove,
    /// Undo the pending change
    Cancel,
}

impl Signal {
    /// Short name for logs
    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Edit(_) => "edit",
            Self::Remove => "remove",
            Self::Cancel => "cancel",
        }
    }
}

/// Per-command overrides of the engine configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandOptions {
    /// Grace period in seconds; engine default when `None`
    pub grace_period_secs: Option<u64>,
}

impl CommandOptions {
    /// Create default options
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With grace period override
    #[inline]
    #[must_use]
    pub fn with_grace_period(mut self, secs: u64) -> Self {
        self.grace_period_secs = Some(secs);
        self
    }
}
