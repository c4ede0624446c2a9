//! Persisted per-user sync cursor.

use crate::error::ProtocolResult;
use crate::record::ProgressRecord;
use crate::types::{RecordId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Direction a queued record still has to travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryDirection {
    /// Local record that failed to reach the remote store.
    Push,
    /// Remote record that failed to save locally.
    Pull,
}

/// A record waiting to be retried on the next cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryEntry {
    /// The record to retry.
    pub record: ProgressRecord,
    /// Where the record has to go.
    pub direction: RetryDirection,
}

impl RetryEntry {
    /// Creates a push retry entry.
    pub fn push(record: ProgressRecord) -> Self {
        Self {
            record,
            direction: RetryDirection::Push,
        }
    }

    /// Creates a pull retry entry.
    pub fn pull(record: ProgressRecord) -> Self {
        Self {
            record,
            direction: RetryDirection::Pull,
        }
    }
}

/// Where the last successful sync of a user left off.
///
/// A checkpoint is created on the first sync and replaced wholesale after
/// every cycle. `last_sync_at == None` means the user never synced and the
/// next cycle pulls everything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    /// Owner of the checkpoint.
    pub user_id: UserId,
    /// End time of the last successful cycle.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Records confirmed synced by the last cycle.
    pub synced_ids: BTreeSet<RecordId>,
    /// Records that failed to push or pull.
    pub retry_queue: Vec<RetryEntry>,
}

impl SyncCheckpoint {
    /// Creates the checkpoint of a user that never synced.
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            last_sync_at: None,
            synced_ids: BTreeSet::new(),
            retry_queue: Vec::new(),
        }
    }

    /// Returns true if the user has never completed a sync.
    pub fn is_first_sync(&self) -> bool {
        self.last_sync_at.is_none()
    }

    /// Returns the cursor to fetch from, or `None` for a full pull.
    pub fn since(&self, force_full_sync: bool) -> Option<DateTime<Utc>> {
        if force_full_sync {
            None
        } else {
            self.last_sync_at
        }
    }

    /// Returns the queued records that still have to be pushed.
    pub fn pending_pushes(&self) -> Vec<ProgressRecord> {
        self.pending(RetryDirection::Push)
    }

    /// Returns the queued records that still have to be saved locally.
    pub fn pending_pulls(&self) -> Vec<ProgressRecord> {
        self.pending(RetryDirection::Pull)
    }

    fn pending(&self, direction: RetryDirection) -> Vec<ProgressRecord> {
        self.retry_queue
            .iter()
            .filter(|entry| entry.direction == direction)
            .map(|entry| entry.record.clone())
            .collect()
    }

    /// Encodes the checkpoint as JSON.
    pub fn to_json(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a checkpoint from JSON.
    pub fn from_json(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use chrono::TimeZone;

    fn record(subject: &str) -> ProgressRecord {
        ProgressRecord::new(
            "u1".into(),
            subject.into(),
            25,
            Utc.timestamp_opt(50, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn empty_checkpoint_forces_full_pull() {
        let checkpoint = SyncCheckpoint::empty("u1".into());
        assert!(checkpoint.is_first_sync());
        assert_eq!(checkpoint.since(false), None);
        assert!(checkpoint.retry_queue.is_empty());
    }

    #[test]
    fn force_full_sync_ignores_cursor() {
        let mut checkpoint = SyncCheckpoint::empty("u1".into());
        let cursor = Utc.timestamp_opt(1_000, 0).unwrap();
        checkpoint.last_sync_at = Some(cursor);

        assert_eq!(checkpoint.since(false), Some(cursor));
        assert_eq!(checkpoint.since(true), None);
    }

    #[test]
    fn pending_entries_split_by_direction() {
        let mut checkpoint = SyncCheckpoint::empty("u1".into());
        checkpoint.retry_queue = vec![
            RetryEntry::push(record("a")),
            RetryEntry::pull(record("b")),
            RetryEntry::push(record("c")),
        ];

        let pushes = checkpoint.pending_pushes();
        assert_eq!(pushes.len(), 2);
        assert_eq!(pushes[1].subject_id().as_str(), "c");
        assert_eq!(checkpoint.pending_pulls().len(), 1);
    }

    #[test]
    fn json_roundtrip_preserves_queue() {
        let mut checkpoint = SyncCheckpoint::empty("u1".into());
        let queued = record("a");
        checkpoint.last_sync_at = Some(Utc.timestamp_opt(77, 0).unwrap());
        checkpoint.synced_ids.insert(queued.id());
        checkpoint.retry_queue.push(RetryEntry::pull(queued));

        let bytes = checkpoint.to_json().unwrap();
        assert_eq!(SyncCheckpoint::from_json(&bytes).unwrap(), checkpoint);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(SyncCheckpoint::from_json(b"not json").is_err());
    }

    #[test]
    fn out_of_range_percentage_is_rejected() {
        let mut checkpoint = SyncCheckpoint::empty("u1".into());
        checkpoint.retry_queue.push(RetryEntry::push(record("a")));
        let json = String::from_utf8(checkpoint.to_json().unwrap()).unwrap();
        assert!(json.contains("\"percentage\":25"));

        let tampered = json.replace("\"percentage\":25", "\"percentage\":250");
        let err = SyncCheckpoint::from_json(tampered.as_bytes()).unwrap_err();
        assert!(matches!(err, ProtocolError::Codec(_)));
    }
}
