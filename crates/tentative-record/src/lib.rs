//! Tentative Record Model
//!
//! Records and the two parallel views kept for each of them.
//!
//! # Core Concepts
//!
//! - [`RecordId`]: Durable identity assigned once by the backing store
//! - [`RecordKey`]: Identity used for equality, durable or provisional
//! - [`Fields`]: Mutable field set of a record
//! - [`RecordStore`]: Holds the *committed* and the *visible* view of every record
//!
//! # Example
//!
//! ```rust
//! use tentative_record::{Fields, Record, RecordId, RecordStore, VisibleState};
//!
//! let store = RecordStore::with_records([Record::new(
//!     RecordId::new(42).into(),
//!     Fields::new().with("city", "Oslo"),
//! )]);
//!
//! let key = RecordId::new(42).into();
//! store.stage(key, Fields::new().with("city", "Bergen"));
//! assert_eq!(store.visible(&key).unwrap().state, VisibleState::Pending);
//!
//! store.rollback(&key);
//! assert!(store.is_consistent(&key));
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod fields;
mod id;
mod record;
mod store;

// Re-exports
pub use fields::Fields;
pub use id::{RecordId, RecordKey};
pub use record::{Record, VisibleRecord, VisibleState};
pub use store::{RecordStore, StoreError};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with records
    pub use crate::{
        Fields, Record, RecordId, RecordKey, RecordStore, StoreError, VisibleRecord,
        VisibleState,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
