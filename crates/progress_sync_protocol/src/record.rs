//! Progress records.

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{RecordId, SubjectId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Highest valid completion percentage.
pub const MAX_PERCENTAGE: u8 = 100;

/// A user's completion state for one subject.
///
/// `ProgressRecord` is an immutable value. Operations that change the
/// sync flag return a new record instead of mutating in place.
///
/// # Fields
///
/// - `id`: Row identifier on the side that produced the record
/// - `user_id`: Owner of the progress
/// - `subject_id`: Material the progress refers to (the matching key)
/// - `percentage`: Completion, 0 to 100
/// - `modified_at`: Last modification time
/// - `synced`: Whether both sides are known to agree on this record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawProgressRecord")]
pub struct ProgressRecord {
    id: RecordId,
    user_id: UserId,
    subject_id: SubjectId,
    percentage: u8,
    modified_at: DateTime<Utc>,
    synced: bool,
}

/// Wire form of a record, validated on the way in.
#[derive(Deserialize)]
struct RawProgressRecord {
    id: RecordId,
    user_id: UserId,
    subject_id: SubjectId,
    percentage: u8,
    modified_at: DateTime<Utc>,
    synced: bool,
}

impl TryFrom<RawProgressRecord> for ProgressRecord {
    type Error = ProtocolError;

    fn try_from(raw: RawProgressRecord) -> ProtocolResult<Self> {
        let record = Self::with_id(
            raw.id,
            raw.user_id,
            raw.subject_id,
            raw.percentage,
            raw.modified_at,
        )?;
        Ok(Self {
            synced: raw.synced,
            ..record
        })
    }
}

impl ProgressRecord {
    /// Creates a new unsynced record with a fresh ID.
    ///
    /// Fails with [`ProtocolError::InvalidPercentage`] if `percentage`
    /// exceeds [`MAX_PERCENTAGE`].
    pub fn new(
        user_id: UserId,
        subject_id: SubjectId,
        percentage: u8,
        modified_at: DateTime<Utc>,
    ) -> ProtocolResult<Self> {
        Self::with_id(RecordId::new(), user_id, subject_id, percentage, modified_at)
    }

    /// Creates a new unsynced record with an explicit ID.
    pub fn with_id(
        id: RecordId,
        user_id: UserId,
        subject_id: SubjectId,
        percentage: u8,
        modified_at: DateTime<Utc>,
    ) -> ProtocolResult<Self> {
        if percentage > MAX_PERCENTAGE {
            return Err(ProtocolError::InvalidPercentage(percentage));
        }
        Ok(Self {
            id,
            user_id,
            subject_id,
            percentage,
            modified_at,
            synced: false,
        })
    }

    /// Returns the record ID.
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Returns the owning user.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Returns the subject this record tracks.
    pub fn subject_id(&self) -> &SubjectId {
        &self.subject_id
    }

    /// Returns the completion percentage.
    pub fn percentage(&self) -> u8 {
        self.percentage
    }

    /// Returns the last modification time.
    pub fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }

    /// Returns true if the record is marked synced.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Returns a copy of this record with the synced flag set.
    #[must_use]
    pub fn mark_synced(&self) -> Self {
        Self {
            synced: true,
            ..self.clone()
        }
    }

    /// Returns true if both records carry the same progress payload.
    ///
    /// Only the completion percentage is compared; IDs, timestamps and
    /// sync flags do not participate.
    pub fn same_payload(&self, other: &ProgressRecord) -> bool {
        self.percentage == other.percentage
    }
}
