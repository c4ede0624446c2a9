//! Conflict representation and resolution.

use crate::error::ProtocolError;
use crate::record::ProgressRecord;
use crate::types::SubjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A disagreement between local and remote progress for one subject.
///
/// Conflicts live for a single sync cycle. They only leave the engine when
/// a resolution defers them to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Local representative for the subject.
    pub local: ProgressRecord,
    /// Remote representative for the subject.
    pub remote: ProgressRecord,
    /// When the conflict was detected.
    pub detected_at: DateTime<Utc>,
}

impl Conflict {
    /// Creates a new conflict.
    pub fn new(local: ProgressRecord, remote: ProgressRecord, detected_at: DateTime<Utc>) -> Self {
        Self {
            local,
            remote,
            detected_at,
        }
    }

    /// Returns the subject both records refer to.
    pub fn subject_id(&self) -> &SubjectId {
        self.local.subject_id()
    }
}

/// Which side of a sync a record originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// The device's local store.
    Local,
    /// The remote authoritative store.
    Remote,
}

/// Outcome of applying a strategy to a conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A winning record was chosen.
    Resolved {
        /// The winning record.
        record: ProgressRecord,
        /// The side the winner came from.
        side: Side,
        /// Human-readable explanation.
        reason: String,
    },
    /// The conflict must be decided by a person.
    RequiresManual,
}

impl Resolution {
    /// Returns true if a record was chosen.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved { .. })
    }

    /// Returns the winning record, if any.
    pub fn record(&self) -> Option<&ProgressRecord> {
        match self {
            Resolution::Resolved { record, .. } => Some(record),
            Resolution::RequiresManual => None,
        }
    }

    /// Returns the winning side, if any.
    pub fn side(&self) -> Option<Side> {
        match self {
            Resolution::Resolved { side, .. } => Some(*side),
            Resolution::RequiresManual => None,
        }
    }
}

/// Strategy used to resolve every conflict of a sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    /// The local record always wins.
    LocalWins,
    /// The remote record always wins.
    RemoteWins,
    /// The later modification wins; ties go to the local record.
    MostRecent,
    /// Every conflict is deferred to the caller.
    Manual,
}

impl ConflictStrategy {
    /// Returns true if this strategy picks a winner without human input.
    pub fn auto_resolves(&self) -> bool {
        !matches!(self, ConflictStrategy::Manual)
    }

    /// Returns the stable name of the strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::LocalWins => "local-wins",
            ConflictStrategy::RemoteWins => "remote-wins",
            ConflictStrategy::MostRecent => "most-recent",
            ConflictStrategy::Manual => "manual",
        }
    }
}

impl Default for ConflictStrategy {
    fn default() -> Self {
        ConflictStrategy::MostRecent
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local-wins" => Ok(ConflictStrategy::LocalWins),
            "remote-wins" => Ok(ConflictStrategy::RemoteWins),
            "most-recent" => Ok(ConflictStrategy::MostRecent),
            "manual" => Ok(ConflictStrategy::Manual),
            other => Err(ProtocolError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Stateless conflict resolver.
///
/// Resolution is a pure function of the conflict and the strategy, so the
/// resolver can be shared freely between concurrent cycles.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    /// Resolves a conflict with the given strategy.
    pub fn resolve(conflict: &Conflict, strategy: ConflictStrategy) -> Resolution {
        match strategy {
            ConflictStrategy::LocalWins => Self::pick(conflict, Side::Local, "local-wins strategy"),
            ConflictStrategy::RemoteWins => {
                Self::pick(conflict, Side::Remote, "remote-wins strategy")
            }
            ConflictStrategy::MostRecent => {
                let local_at = conflict.local.modified_at();
                let remote_at = conflict.remote.modified_at();
                if remote_at > local_at {
                    Self::pick(conflict, Side::Remote, "remote modified more recently")
                } else if local_at > remote_at {
                    Self::pick(conflict, Side::Local, "local modified more recently")
                } else {
                    Self::pick(conflict, Side::Local, "equal timestamps, local kept")
                }
            }
            ConflictStrategy::Manual => Resolution::RequiresManual,
        }
    }

    fn pick(conflict: &Conflict, side: Side, reason: &str) -> Resolution {
        let record = match side {
            Side::Local => conflict.local.clone(),
            Side::Remote => conflict.remote.clone(),
        };
        Resolution::Resolved {
            record,
            side,
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(percentage: u8, secs: i64) -> ProgressRecord {
        ProgressRecord::new(
            "u1".into(),
            "geometry".into(),
            percentage,
            Utc.timestamp_opt(secs, 0).unwrap(),
        )
        .unwrap()
    }

    fn conflict(local: ProgressRecord, remote: ProgressRecord) -> Conflict {
        Conflict::new(local, remote, Utc.timestamp_opt(1_000, 0).unwrap())
    }

    #[test]
    fn local_and_remote_wins_are_unconditional() {
        let c = conflict(record(10, 500), record(90, 100));

        let local = ConflictResolver::resolve(&c, ConflictStrategy::LocalWins);
        assert_eq!(local.side(), Some(Side::Local));
        assert_eq!(local.record().unwrap().percentage(), 10);

        let remote = ConflictResolver::resolve(&c, ConflictStrategy::RemoteWins);
        assert_eq!(remote.side(), Some(Side::Remote));
        assert_eq!(remote.record().unwrap().percentage(), 90);
    }

    #[test]
    fn most_recent_picks_later_timestamp() {
        let c = conflict(record(40, 100), record(70, 200));
        let resolution = ConflictResolver::resolve(&c, ConflictStrategy::MostRecent);
        assert_eq!(resolution.side(), Some(Side::Remote));
        assert_eq!(resolution.record().unwrap().percentage(), 70);

        let c = conflict(record(40, 300), record(70, 200));
        let resolution = ConflictResolver::resolve(&c, ConflictStrategy::MostRecent);
        assert_eq!(resolution.side(), Some(Side::Local));
    }

    #[test]
    fn most_recent_tie_goes_to_local() {
        let c = conflict(record(40, 100), record(70, 100));
        let first = ConflictResolver::resolve(&c, ConflictStrategy::MostRecent);
        let second = ConflictResolver::resolve(&c, ConflictStrategy::MostRecent);

        assert_eq!(first.side(), Some(Side::Local));
        assert_eq!(first, second);
    }

    #[test]
    fn manual_never_picks_a_record() {
        let c = conflict(record(40, 100), record(70, 200));
        let resolution = ConflictResolver::resolve(&c, ConflictStrategy::Manual);
        assert_eq!(resolution, Resolution::RequiresManual);
        assert!(resolution.record().is_none());
        assert!(!ConflictStrategy::Manual.auto_resolves());
    }

    #[test]
    fn strategy_names_roundtrip() {
        for strategy in [
            ConflictStrategy::LocalWins,
            ConflictStrategy::RemoteWins,
            ConflictStrategy::MostRecent,
            ConflictStrategy::Manual,
        ] {
            assert_eq!(strategy.as_str().parse::<ConflictStrategy>().unwrap(), strategy);
        }
        assert!("newest".parse::<ConflictStrategy>().is_err());
    }
}
