//! Local storage abstraction.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use progress_sync_protocol::{ProgressRecord, RecordId, SubjectId, SyncCheckpoint, UserId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

/// Device-local persistence used by the sync engine.
///
/// Every method is a potential suspension point. Write failures are
/// returned to the engine, which decides whether they are fatal.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Returns the user's unsynced records modified after `since`.
    ///
    /// `None` means every unsynced record of the user.
    async fn unsynced_since(
        &self,
        user_id: &UserId,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<ProgressRecord>>;

    /// Saves records pulled from the remote store.
    async fn save_records(&self, records: &[ProgressRecord]) -> SyncResult<()>;

    /// Marks the given records as synced.
    async fn mark_synced(&self, ids: &[RecordId]) -> SyncResult<()>;

    /// Loads the user's checkpoint, or an empty one if none was saved.
    async fn get_checkpoint(&self, user_id: &UserId) -> SyncResult<SyncCheckpoint>;

    /// Replaces the checkpoint of `checkpoint.user_id`.
    async fn save_checkpoint(&self, checkpoint: &SyncCheckpoint) -> SyncResult<()>;
}

/// An in-memory local store for testing.
///
/// Keeps one record per (user, subject). Saving a record for a subject that
/// already exists replaces it, whatever its ID.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    records: RwLock<BTreeMap<(UserId, SubjectId), ProgressRecord>>,
    checkpoints: RwLock<HashMap<UserId, SyncCheckpoint>>,
    fail_fetch: AtomicBool,
    fail_saves: AtomicBool,
    fail_mark_synced: AtomicBool,
    fail_checkpoint_reads: AtomicBool,
    fail_checkpoint_writes: AtomicBool,
}

impl MemoryLocalStore {
    /// Creates a new empty store.
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

    /// Returns the stored checkpoint without the empty fallback.
    pub fn checkpoint(&self, user_id: &UserId) -> Option<SyncCheckpoint> {
        self.checkpoints.read().get(user_id).cloned()
    }

    /// Stores a checkpoint directly.
    pub fn set_checkpoint(&self, checkpoint: SyncCheckpoint) {
        self.checkpoints
            .write()
            .insert(checkpoint.user_id.clone(), checkpoint);
    }

    /// Makes `unsynced_since` fail.
    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    /// Makes `save_records` fail.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Makes `mark_synced` fail.
    pub fn set_fail_mark_synced(&self, fail: bool) {
        self.fail_mark_synced.store(fail, Ordering::SeqCst);
    }

    /// Makes `get_checkpoint` fail.
    pub fn set_fail_checkpoint_reads(&self, fail: bool) {
        self.fail_checkpoint_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes `save_checkpoint` fail.
    pub fn set_fail_checkpoint_writes(&self, fail: bool) {
        self.fail_checkpoint_writes.store(fail, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool, what: &str) -> SyncResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(SyncError::storage(format!("{what} failed")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn unsynced_since(
        &self,
        user_id: &UserId,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<ProgressRecord>> {
        Self::check(&self.fail_fetch, "unsynced_since")?;
        Ok(self
            .records(user_id)
            .into_iter()
            .filter(|record| !record.is_synced())
            .filter(|record| since.map_or(true, |since| record.modified_at() > since))
            .collect())
    }

    async fn save_records(&self, records: &[ProgressRecord]) -> SyncResult<()> {
        Self::check(&self.fail_saves, "save_records")?;
        for record in records {
            self.insert(record.clone());
        }
        Ok(())
    }

    async fn mark_synced(&self, ids: &[RecordId]) -> SyncResult<()> {
        Self::check(&self.fail_mark_synced, "mark_synced")?;
        let ids: HashSet<&RecordId> = ids.iter().collect();
        for record in self.records.write().values_mut() {
            if ids.contains(&record.id()) {
                *record = record.mark_synced();
            }
        }
        Ok(())
    }

    async fn get_checkpoint(&self, user_id: &UserId) -> SyncResult<SyncCheckpoint> {
        Self::check(&self.fail_checkpoint_reads, "get_checkpoint")?;
        Ok(self
            .checkpoint(user_id)
            .unwrap_or_else(|| SyncCheckpoint::empty(user_id.clone())))
    }

    async fn save_checkpoint(&self, checkpoint: &SyncCheckpoint) -> SyncResult<()> {
        Self::check(&self.fail_checkpoint_writes, "save_checkpoint")?;
        self.set_checkpoint(checkpoint.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn record(subject: &str, secs: i64) -> ProgressRecord {
        ProgressRecord::new("u1".into(), subject.into(), 30, at(secs)).unwrap()
    }

    #[tokio::test]
    async fn unsynced_since_filters_by_flag_and_time() {
        let store = MemoryLocalStore::new();
        store.insert(record("a", 10));
        store.insert(record("b", 20));
        store.insert(record("c", 30).mark_synced());

        let user = UserId::from("u1");
        assert_eq!(store.unsynced_since(&user, None).await.unwrap().len(), 2);

        let recent = store.unsynced_since(&user, Some(at(15))).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].subject_id().as_str(), "b");

        let other = store.unsynced_since(&"u2".into(), None).await.unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn save_replaces_by_subject() {
        let store = MemoryLocalStore::new();
        let user = UserId::from("u1");
        store.insert(record("a", 10));

        let pulled = record("a", 50).mark_synced();
        store.save_records(&[pulled.clone()]).await.unwrap();

        assert_eq!(store.records(&user), vec![pulled]);
    }

    #[tokio::test]
    async fn mark_synced_sets_flag() {
        let store = MemoryLocalStore::new();
        let a = record("a", 10);
        store.insert(a.clone());
        store.insert(record("b", 10));

        store.mark_synced(&[a.id()]).await.unwrap();

        let user = UserId::from("u1");
        let unsynced = store.unsynced_since(&user, None).await.unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].subject_id().as_str(), "b");
    }

    #[tokio::test]
    async fn checkpoint_defaults_to_empty() {
        let store = MemoryLocalStore::new();
        let user = UserId::from("u1");

        let checkpoint = store.get_checkpoint(&user).await.unwrap();
        assert!(checkpoint.is_first_sync());
        assert!(store.checkpoint(&user).is_none());

        store.save_checkpoint(&checkpoint).await.unwrap();
        assert!(store.checkpoint(&user).is_some());
    }

    #[tokio::test]
    async fn failure_toggles() {
        let store = MemoryLocalStore::new();
        store.set_fail_saves(true);
        store.set_fail_checkpoint_writes(true);

        assert!(matches!(
            store.save_records(&[record("a", 1)]).await,
            Err(SyncError::Storage(_))
        ));
        let checkpoint = SyncCheckpoint::empty("u1".into());
        assert!(store.save_checkpoint(&checkpoint).await.is_err());

        store.set_fail_saves(false);
        assert!(store.save_records(&[record("a", 1)]).await.is_ok());
    }
}
