//! # Progress Sync Protocol
//!
//! Data model and pure algorithms for progress synchronization.
//!
//! This crate provides:
//! - `ProgressRecord`, the unit of synchronizable state
//! - `ConflictDetector` for partitioning local and remote record sets
//! - `ConflictResolver` and `ConflictStrategy` for resolving conflicts
//! - `SyncCheckpoint` for the persisted per-user sync cursor
//!
//! This is a pure crate with no I/O operations. Everything here is safe
//! to share across concurrent sync cycles.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checkpoint;
mod conflict;
mod detector;
mod error;
mod record;
mod types;

pub use checkpoint::{RetryDirection, RetryEntry, SyncCheckpoint};
pub use conflict::{Conflict, ConflictResolver, ConflictStrategy, Resolution, Side};
pub use detector::{ConflictDetector, Detection};
pub use error::{ProtocolError, ProtocolResult};
pub use record::{ProgressRecord, MAX_PERCENTAGE};
pub use types::{RecordId, SubjectId, UserId};
