//! # Progress Sync Testkit
//!
//! Test utilities for progress sync.
//!
//! This crate provides:
//! - Record fixtures with fixed timestamps
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use progress_sync_testkit::prelude::*;
//!
//! let record = progress("u1", "algebra", 40, 100);
//! assert_eq!(record.percentage(), 40);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
