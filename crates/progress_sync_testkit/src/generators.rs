//! Property-based test generators using proptest.
//!
//! Provides strategies for generating progress records and record sets
//! that maintain required invariants.

use crate::fixtures::ts;
use progress_sync_protocol::{ProgressRecord, RecordId, SubjectId, UserId, MAX_PERCENTAGE};
use proptest::prelude::*;
use uuid::Uuid;

/// Strategy for generating valid completion percentages.
pub fn percentage_strategy() -> impl Strategy<Value = u8> {
    0..=MAX_PERCENTAGE
}

/// Strategy for generating subject IDs from a small alphabet.
///
/// The alphabet is small on purpose so that generated local and remote
/// sets overlap often.
pub fn subject_id_strategy() -> impl Strategy<Value = SubjectId> {
    prop::string::string_regex("s[a-h]")
        .expect("Invalid regex")
        .prop_map(SubjectId::new)
}

/// Strategy for generating record IDs.
pub fn record_id_strategy() -> impl Strategy<Value = RecordId> {
    any::<u128>().prop_map(|bits| RecordId::from_uuid(Uuid::from_u128(bits)))
}

/// Strategy for generating a record of `user`.
pub fn record_strategy(user: UserId) -> impl Strategy<Value = ProgressRecord> {
    (
        record_id_strategy(),
        subject_id_strategy(),
        percentage_strategy(),
        0i64..1_000_000,
    )
        .prop_map(move |(id, subject, percentage, secs)| {
            ProgressRecord::with_id(id, user.clone(), subject, percentage, ts(secs))
                .expect("Generated percentage is valid")
        })
}

/// Strategy for generating up to `max_len` records of `user`.
///
/// Subjects may repeat.
pub fn record_set_strategy(
    user: UserId,
    max_len: usize,
) -> impl Strategy<Value = Vec<ProgressRecord>> {
    prop::collection::vec(record_strategy(user), 0..=max_len)
}

/// Strategy for generating a local and a remote set with disjoint subjects.
///
/// Local subjects are prefixed `l-`, remote subjects `r-`, each unique
/// within its set.
pub fn disjoint_sets_strategy(
    user: UserId,
    max_len: usize,
) -> impl Strategy<Value = (Vec<ProgressRecord>, Vec<ProgressRecord>)> {
    let side = move |prefix: &'static str, user: UserId| {
        prop::collection::vec((percentage_strategy(), 0i64..1_000_000), 0..=max_len).prop_map(
            move |entries| {
                entries
                    .into_iter()
                    .enumerate()
                    .map(|(i, (percentage, secs))| {
                        ProgressRecord::new(
                            user.clone(),
                            SubjectId::new(format!("{prefix}-{i}")),
                            percentage,
                            ts(secs),
                        )
                        .expect("Generated percentage is valid")
                    })
                    .collect::<Vec<_>>()
            },
        )
    };
    (side("l", user.clone()), side("r", user))
}
