//! # Progress Sync Engine
//!
//! Offline-first synchronization of learning progress.
//!
//! This crate provides:
//! - The sync cycle orchestrator ([`SyncEngine`])
//! - Chunked, partially fault-tolerant pushing ([`BatchPusher`])
//! - Local storage and remote transport abstractions
//! - In-memory implementations of both for testing
//! - A keyed TTL cache for per-user payloads
//!
//! ## Sync cycle
//!
//! 1. Read the user's checkpoint (full pull when forced or never synced)
//! 2. Fetch the local and remote deltas concurrently
//! 3. Detect conflicts by subject ID
//! 4. Resolve conflicts with the cycle's strategy
//! 5. Push local winners in batches, save remote winners locally
//! 6. Write the new checkpoint and sync flags (best effort)
//!
//! ## Failure model
//!
//! - An unreachable remote, a fetch timeout or cancellation aborts the
//!   cycle; fetched local records are queued for retry first
//! - Failed push batches and failed local saves end up in the retry queue
//!   of an otherwise successful result
//! - Checkpoint and sync-flag writes never fail a cycle

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod cache;
mod config;
mod engine;
mod error;
mod store;
mod transport;

pub use batch::{BatchPusher, PushOutcome};
pub use cache::ProgressCache;
pub use config::{RetryConfig, SyncConfig, DEFAULT_MAX_BATCH_SIZE, MAX_JITTER};
pub use engine::{RetryOutcome, SyncCycleResult, SyncEngine, SyncMetadata};
pub use error::{SyncError, SyncResult};
pub use store::{LocalStore, MemoryLocalStore};
pub use transport::{MemoryRemote, RemoteTransport};

pub use progress_sync_protocol as protocol;
