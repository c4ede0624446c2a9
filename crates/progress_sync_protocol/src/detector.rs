//! Conflict detection between local and remote record sets.

use crate::conflict::Conflict;
use crate::record::ProgressRecord;
use crate::types::SubjectId;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Partition of a local and a remote record set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Detection {
    /// Subjects present on both sides with different progress.
    pub conflicts: Vec<Conflict>,
    /// Subjects present on both sides with equal progress.
    ///
    /// Holds the local representative, already marked synced.
    pub matched: Vec<ProgressRecord>,
    /// Subjects only present locally (push candidates).
    pub local_only: Vec<ProgressRecord>,
    /// Subjects only present remotely (pull candidates).
    pub remote_only: Vec<ProgressRecord>,
}

impl Detection {
    /// Returns true if nothing was found on either side.
    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
            && self.matched.is_empty()
            && self.local_only.is_empty()
            && self.remote_only.is_empty()
    }
}

/// Detects conflicts by subject ID.
///
/// Inputs need not be sorted or deduplicated. When a side lists the same
/// subject more than once, only the first record for that subject is
/// considered. Output order follows first appearance in the inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictDetector;

impl ConflictDetector {
    /// Partitions `local` and `remote` into conflicts, matches and one-sided records.
    pub fn detect(
        local: &[ProgressRecord],
        remote: &[ProgressRecord],
        detected_at: DateTime<Utc>,
    ) -> Detection {
        let local_firsts = first_per_subject(local);
        let remote_firsts = first_per_subject(remote);

        let remote_by_subject: HashMap<&SubjectId, &ProgressRecord> = remote_firsts
            .iter()
            .map(|&record| (record.subject_id(), record))
            .collect();
        let local_subjects: HashSet<&SubjectId> =
            local_firsts.iter().map(|record| record.subject_id()).collect();

        let detection = local_firsts
            .iter()
            .fold(Detection::default(), |mut acc, local_record| {
                match remote_by_subject.get(local_record.subject_id()) {
                    Some(remote_record) if local_record.same_payload(remote_record) => {
                        acc.matched.push(local_record.mark_synced());
                    }
                    Some(remote_record) => acc.conflicts.push(Conflict::new(
                        (*local_record).clone(),
                        (*remote_record).clone(),
                        detected_at,
                    )),
                    None => acc.local_only.push((*local_record).clone()),
                }
                acc
            });

        let remote_only = remote_firsts
            .into_iter()
            .filter(|record| !local_subjects.contains(record.subject_id()))
            .cloned()
            .collect();

        Detection {
            remote_only,
            ..detection
        }
    }
}

/// Keeps the first record seen for each subject, preserving input order.
fn first_per_subject(records: &[ProgressRecord]) -> Vec<&ProgressRecord> {
    let (_, firsts) = records.iter().fold(
        (HashSet::new(), Vec::with_capacity(records.len())),
        |(mut seen, mut firsts), record| {
            if seen.insert(record.subject_id()) {
                firsts.push(record);
            }
            (seen, firsts)
        },
    );
    firsts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn record(subject: &str, percentage: u8) -> ProgressRecord {
        ProgressRecord::new("u1".into(), subject.into(), percentage, at(100)).unwrap()
    }

    #[test]
    fn empty_inputs() {
        let detection = ConflictDetector::detect(&[], &[], at(0));
        assert!(detection.is_empty());
    }

    #[test]
    fn disjoint_subjects_never_conflict() {
        let local = vec![record("a", 10), record("b", 20)];
        let remote = vec![record("c", 30)];

        let detection = ConflictDetector::detect(&local, &remote, at(0));
        assert!(detection.conflicts.is_empty());
        assert_eq!(detection.local_only, local);
        assert_eq!(detection.remote_only, remote);
    }

    #[test]
    fn equal_payload_is_matched_and_marked_synced() {
        let local = vec![record("a", 50)];
        let remote = vec![record("a", 50)];

        let detection = ConflictDetector::detect(&local, &remote, at(0));
        assert!(detection.conflicts.is_empty());
        assert!(detection.local_only.is_empty());
        assert!(detection.remote_only.is_empty());
        assert_eq!(detection.matched.len(), 1);
        assert!(detection.matched[0].is_synced());
        assert_eq!(detection.matched[0].id(), local[0].id());
    }

    #[test]
    fn different_payload_is_a_conflict() {
        let local = vec![record("a", 40)];
        let remote = vec![record("a", 70), record("b", 20)];

        let detection = ConflictDetector::detect(&local, &remote, at(5));
        assert_eq!(detection.conflicts.len(), 1);
        let conflict = &detection.conflicts[0];
        assert_eq!(conflict.local.percentage(), 40);
        assert_eq!(conflict.remote.percentage(), 70);
        assert_eq!(conflict.detected_at, at(5));
        assert_eq!(detection.remote_only.len(), 1);
        assert_eq!(detection.remote_only[0].subject_id().as_str(), "b");
    }

    #[test]
    fn duplicate_subjects_use_first_representative() {
        let local = vec![record("a", 40), record("a", 70)];
        let remote = vec![record("a", 40), record("a", 10)];

        let detection = ConflictDetector::detect(&local, &remote, at(0));
        assert!(detection.conflicts.is_empty());
        assert_eq!(detection.matched.len(), 1);
        assert_eq!(detection.matched[0].id(), local[0].id());
    }

    #[test]
    fn detection_is_pure() {
        let local = vec![record("a", 40), record("b", 1)];
        let remote = vec![record("a", 70), record("c", 2)];

        let first = ConflictDetector::detect(&local, &remote, at(0));
        let second = ConflictDetector::detect(&local, &remote, at(0));
        assert_eq!(first, second);
        assert!(!local[0].is_synced());
    }
}
