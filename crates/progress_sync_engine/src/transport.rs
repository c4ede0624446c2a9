//! Remote transport abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use progress_sync_protocol::{ProgressRecord, SubjectId, UserId};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// A remote transport talks to the authoritative progress store.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, WebSocket, in-memory for testing, etc.).
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Fetches the user's records changed after `since`.
    ///
    /// `None` requests every record of the user.
    async fn fetch_since(
        &self,
        user_id: &UserId,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<ProgressRecord>>;

    /// Pushes a batch of records and returns the subset the remote accepted.
    async fn push_batch(&self, records: &[ProgressRecord]) -> SyncResult<Vec<ProgressRecord>>;
}

/// An in-memory remote store for testing.
///
/// Stores one record per (user, subject); pushes replace by subject, so
/// pushing the same record twice is harmless.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    records: RwLock<BTreeMap<(UserId, SubjectId), ProgressRecord>>,
    fail_fetch: AtomicBool,
    fetch_delay: Mutex<Option<Duration>>,
    failing_batches: Mutex<HashSet<usize>>,
    rejected_subjects: RwLock<HashSet<SubjectId>>,
    push_calls: AtomicUsize,
    batch_sizes: Mutex<Vec<usize>>,
    fetch_calls: AtomicUsize,
}

impl MemoryRemote {
    /// Creates a new empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a record.
    pub fn insert(&self, record: ProgressRecord) {
        let key = (record.user_id().clone(), record.subject_id().clone());
        self.records.write().insert(key, record);
    }

    /// Returns the user's record for a subject.
    pub fn record(&self, user_id: &UserId, subject_id: &SubjectId) -> Option<ProgressRecord> {
        self.records
            .read()
            .get(&(user_id.clone(), subject_id.clone()))
            .cloned()
    }

    /// Returns all records of a user, ordered by subject.
    pub fn records(&self, user_id: &UserId) -> Vec<ProgressRecord> {
        self.records
            .read()
            .values()
            .filter(|record| record.user_id() == user_id)
            .cloned()
            .collect()
    }

    /// Makes `fetch_since` fail with a network error.
    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    /// Delays every fetch by `delay`.
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        *self.fetch_delay.lock() = delay;
    }

    /// Makes the `index`-th push call (0-based) fail with a network error.
    pub fn fail_batch(&self, index: usize) {
        self.failing_batches.lock().insert(index);
    }

    /// Makes pushes silently leave records of `subject_id` out of the accepted set.
    pub fn reject_subject(&self, subject_id: SubjectId) {
        self.rejected_subjects.write().insert(subject_id);
    }

    /// Returns the number of push calls made so far.
    pub fn push_calls(&self) -> usize {
        self.push_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of fetch calls made so far.
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Returns the size of every batch received, including failed ones.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }
}

#[async_trait]
impl RemoteTransport for MemoryRemote {
    async fn fetch_since(
        &self,
        user_id: &UserId,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<ProgressRecord>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.fetch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(SyncError::network("remote unreachable"));
        }

        Ok(self
            .records(user_id)
            .into_iter()
            .filter(|record| since.map_or(true, |since| record.modified_at() > since))
            .collect())
    }

    async fn push_batch(&self, records: &[ProgressRecord]) -> SyncResult<Vec<ProgressRecord>> {
        let call = self.push_calls.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes.lock().push(records.len());

        if self.failing_batches.lock().contains(&call) {
            return Err(SyncError::network(format!("batch {call} dropped")));
        }

        let rejected = self.rejected_subjects.read().clone();
        let accepted: Vec<ProgressRecord> = records
            .iter()
            .filter(|record| !rejected.contains(record.subject_id()))
            .map(|record| record.mark_synced())
            .collect();

        for record in &accepted {
            self.insert(record.clone());
        }

        Ok(accepted)
    }
}
