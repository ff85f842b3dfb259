//! Tentative Pending-Change Registry
//!
//! Maps an identity to the single holder currently allowed to mutate it.
//!
//! # Overview
//!
//! - **PendingRegistry**: sharded slot table, one slot per identity
//! - **SlotGuard**: RAII ownership of a slot; dropping it hands the slot to
//!   the next waiter
//!
//! Identities never contend with each other: there is no global lock, only
//! the per-shard locks of the underlying map. A caller that finds a slot
//! occupied parks on a one-shot hand-off and is woken in arrival order.
//!
//! # Example
//!
//! ```rust
//! use tentative_registry::PendingRegistry;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let registry: PendingRegistry<u64, &'static str> = PendingRegistry::new();
//!
//! let guard = registry.acquire(42, "first").await;
//! assert_eq!(registry.active_command_for(&42), Some("first"));
//! assert!(registry.try_acquire(42, "second").is_err());
//!
//! drop(guard);
//! assert!(!registry.has_active(&42));
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod registry;

// Re-exports
pub use registry::{PendingRegistry, RegistryError, RegistryStats, SlotGuard, Ticket};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
