//! # Trellis Testkit
//!
//! Test utilities for Trellis.
//!
//! This crate provides:
//! - Fault injection ([`CrashableBackend`]) for torn writes and failed syncs
//! - Store fixtures wiring a coordinator with one adapter of each kind
//! - A reference model of a store for property tests
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use trellis_testkit::prelude::*;
//!
//! let store = TestStore::memory();
//! store
//!     .execute_write(|txn| store.blob.set(txn, b"Hello World"))
//!     .unwrap();
//! let store = store.reopen().unwrap();
//! assert_eq!(store.blob.get_committed(), b"Hello World");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod model;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::model::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use model::*;
