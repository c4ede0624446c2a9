//! Sync cycle orchestration.

use crate::batch::{BatchPusher, PushOutcome};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::store::LocalStore;
use crate::transport::RemoteTransport;
use chrono::{DateTime, Utc};
use progress_sync_protocol::{
    Conflict, ConflictDetector, ConflictResolver, ConflictStrategy, ProgressRecord, RecordId,
    Resolution, RetryEntry, Side, SubjectId, SyncCheckpoint, UserId,
};
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

/// Observational counters of a sync cycle.
///
/// Never consulted by the engine itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncMetadata {
    /// Records accepted by the remote.
    pub pushed_count: usize,
    /// Remote records saved locally.
    pub pulled_count: usize,
    /// Conflicts resolved without human input.
    pub auto_resolved_count: usize,
    /// Wall time of the cycle.
    pub duration: Duration,
    /// Whether the cycle fetched incrementally from a checkpoint.
    pub incremental: bool,
}

/// Result of a sync cycle.
#[derive(Debug, Clone)]
pub struct SyncCycleResult {
    /// Records confirmed synced: matched, pushed and pulled.
    pub synced: Vec<ProgressRecord>,
    /// Conflicts deferred to the caller.
    pub unresolved_conflicts: Vec<Conflict>,
    /// Strategy applied to the conflicts of this cycle.
    pub strategy: ConflictStrategy,
    /// When the cycle finished.
    pub completed_at: DateTime<Utc>,
    /// Records queued for the next cycle.
    pub retry_queue: Vec<RetryEntry>,
    /// Counters for telemetry.
    pub metadata: SyncMetadata,
}

impl SyncCycleResult {
    /// Returns true if some records still have to be retried.
    pub fn has_pending_retries(&self) -> bool {
        !self.retry_queue.is_empty()
    }

    /// Returns true if nothing is left to retry or decide.
    pub fn is_fully_synced(&self) -> bool {
        self.retry_queue.is_empty() && self.unresolved_conflicts.is_empty()
    }
}

/// Result of replaying a checkpoint's retry queue.
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    /// Queued local records the remote accepted.
    pub pushed: Vec<ProgressRecord>,
    /// Queued remote records saved locally.
    pub pulled: Vec<ProgressRecord>,
    /// Records that failed again.
    pub retry_queue: Vec<RetryEntry>,
    /// When the replay finished.
    pub completed_at: DateTime<Utc>,
}

/// Records fetched at the start of a cycle.
struct Fetched {
    local: Vec<ProgressRecord>,
    local_failed: bool,
    remote: SyncResult<Vec<ProgressRecord>>,
}

/// Conflict resolutions split by winning side.
#[derive(Default)]
struct Resolved {
    local_won: Vec<ProgressRecord>,
    remote_won: Vec<ProgressRecord>,
    unresolved: Vec<Conflict>,
}

/// The sync engine reconciles local progress with the remote store.
///
/// The engine keeps no per-user state between cycles: everything it needs
/// is read from the checkpoint and written back at the end of the cycle.
/// Cycles for the same user must be serialized by the caller; concurrent
/// cycles for different users are fine.
pub struct SyncEngine<L: LocalStore, R: RemoteTransport> {
    config: SyncConfig,
    local: L,
    remote: R,
    pusher: BatchPusher,
}

impl<L: LocalStore, R: RemoteTransport> SyncEngine<L, R> {
    /// Creates a new sync engine.
    ///
    /// Fails with [`SyncError::InvalidConfig`] if the configuration is invalid.
    pub fn new(config: SyncConfig, local: L, remote: R) -> SyncResult<Self> {
        config.validate()?;
        let pusher = BatchPusher::new(config.max_batch_size)?;
        Ok(Self {
            config,
            local,
            remote,
            pusher,
        })
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the local store.
    pub fn local(&self) -> &L {
        &self.local
    }

    /// Gets the remote transport.
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Runs one sync cycle for `user_id`.
    ///
    /// Only total failures are returned as errors: an unreachable remote,
    /// a fetch timeout or an unreadable checkpoint. Everything else is
    /// reported in the result.
    pub async fn sync(
        &self,
        user_id: &UserId,
        force_full_sync: bool,
        strategy: ConflictStrategy,
    ) -> SyncResult<SyncCycleResult> {
        self.sync_until(user_id, force_full_sync, strategy, std::future::pending())
            .await
    }

    /// Runs one sync cycle that is abandoned when `cancel` completes.
    ///
    /// Cancellation is only observed while fetching and is reported as
    /// [`SyncError::Cancelled`], after the fetched local records have been
    /// queued for retry.
    pub async fn sync_until<C>(
        &self,
        user_id: &UserId,
        force_full_sync: bool,
        strategy: ConflictStrategy,
        cancel: C,
    ) -> SyncResult<SyncCycleResult>
    where
        C: Future<Output = ()> + Send,
    {
        let span = info_span!("sync_cycle", user = %user_id, strategy = %strategy);
        self.run_cycle(user_id, force_full_sync, strategy, cancel)
            .instrument(span)
            .await
    }

    /// Runs a sync cycle, retrying retryable total failures.
    pub async fn sync_with_retry(
        &self,
        user_id: &UserId,
        force_full_sync: bool,
        strategy: ConflictStrategy,
    ) -> SyncResult<SyncCycleResult> {
        let retry_config = &self.config.retry;
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                let delay = retry_config.delay_for_attempt(attempt);
                debug!(user = %user_id, attempt, ?delay, "retrying sync");
                tokio::time::sleep(delay).await;
            }

            match self.sync(user_id, force_full_sync, strategy).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt + 1 < retry_config.max_attempts => {
                    warn!(user = %user_id, attempt, error = %e, "sync attempt failed");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Replays the checkpoint's retry queue without fetching anything.
    ///
    /// Fails with [`SyncError::NoItemsToSync`] when the queue is empty. The
    /// checkpoint cursor is kept; the queue is replaced by whatever failed
    /// again.
    pub async fn retry_pending(&self, user_id: &UserId) -> SyncResult<RetryOutcome> {
        let checkpoint = self.load_checkpoint(user_id).await?;
        if checkpoint.retry_queue.is_empty() {
            return Err(SyncError::NoItemsToSync);
        }

        let pushes = checkpoint.pending_pushes();
        let pulls: Vec<ProgressRecord> = checkpoint
            .pending_pulls()
            .iter()
            .map(ProgressRecord::mark_synced)
            .collect();
        info!(
            user = %user_id,
            pushes = pushes.len(),
            pulls = pulls.len(),
            "replaying retry queue"
        );

        let outcome = self.pusher.push(&self.remote, &pushes).await;
        let (pulled, pull_failures) = self.save_pulled(pulls).await;

        let retry_queue = retry_entries(&outcome, pull_failures);
        let synced_ids = outcome
            .pushed
            .iter()
            .chain(&pulled)
            .map(ProgressRecord::id)
            .collect();
        let next = SyncCheckpoint {
            user_id: user_id.clone(),
            last_sync_at: checkpoint.last_sync_at,
            synced_ids,
            retry_queue: retry_queue.clone(),
        };

        let pushed_ids: Vec<RecordId> = outcome.pushed.iter().map(ProgressRecord::id).collect();
        self.commit(&next, &pushed_ids).await;

        Ok(RetryOutcome {
            pushed: outcome.pushed,
            pulled,
            retry_queue,
            completed_at: Utc::now(),
        })
    }

    async fn run_cycle<C>(
        &self,
        user_id: &UserId,
        force_full_sync: bool,
        strategy: ConflictStrategy,
        cancel: C,
    ) -> SyncResult<SyncCycleResult>
    where
        C: Future<Output = ()> + Send,
    {
        let start = Instant::now();

        let checkpoint = self.load_checkpoint(user_id).await?;
        let since = checkpoint.since(force_full_sync);
        let incremental = since.is_some();
        info!(incremental, ?since, "sync started");

        let fetched = self.fetch_deltas(user_id, since, cancel).await;
        let local_failed = fetched.local_failed;

        // Fresh records come first so they win over queued copies.
        let local_set = first_per_subject(
            fetched
                .local
                .into_iter()
                .chain(checkpoint.pending_pushes())
                .collect(),
        );
        let remote_records = match fetched.remote {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, queued = local_set.len(), "remote fetch failed, sync aborted");
                self.preserve_local(&checkpoint, &local_set).await;
                return Err(e);
            }
        };
        let remote_set: Vec<ProgressRecord> = remote_records
            .into_iter()
            .chain(checkpoint.pending_pulls())
            .collect();

        let detection = ConflictDetector::detect(&local_set, &remote_set, Utc::now());
        debug!(
            conflicts = detection.conflicts.len(),
            matched = detection.matched.len(),
            local_only = detection.local_only.len(),
            remote_only = detection.remote_only.len(),
            "detection finished"
        );

        let resolved = resolve_all(detection.conflicts, strategy);
        let auto_resolved_count = resolved.local_won.len() + resolved.remote_won.len();

        let push_set: Vec<ProgressRecord> = detection
            .local_only
            .into_iter()
            .chain(resolved.local_won)
            .collect();
        let pull_set: Vec<ProgressRecord> = detection
            .remote_only
            .into_iter()
            .chain(resolved.remote_won)
            .map(|record| record.mark_synced())
            .collect();
        debug_assert!(disjoint_subjects(&push_set, &pull_set));

        let outcome = self.pusher.push(&self.remote, &push_set).await;
        let (pulled, pull_failures) = self.save_pulled(pull_set).await;

        let completed_at = Utc::now();
        let retry_queue = retry_entries(&outcome, pull_failures);
        let metadata = SyncMetadata {
            pushed_count: outcome.pushed.len(),
            pulled_count: pulled.len(),
            auto_resolved_count,
            duration: start.elapsed(),
            incremental,
        };

        let mark_ids: Vec<RecordId> = detection
            .matched
            .iter()
            .chain(&outcome.pushed)
            .map(ProgressRecord::id)
            .collect();
        let synced: Vec<ProgressRecord> = detection
            .matched
            .into_iter()
            .chain(outcome.pushed)
            .chain(pulled)
            .collect();

        let next = SyncCheckpoint {
            user_id: user_id.clone(),
            // Unfetched local rows must stay inside the next window.
            last_sync_at: if local_failed {
                checkpoint.last_sync_at
            } else {
                Some(completed_at)
            },
            synced_ids: synced.iter().map(ProgressRecord::id).collect::<BTreeSet<_>>(),
            retry_queue: retry_queue.clone(),
        };
        self.commit(&next, &mark_ids).await;

        info!(
            pushed = metadata.pushed_count,
            pulled = metadata.pulled_count,
            auto_resolved = metadata.auto_resolved_count,
            unresolved = resolved.unresolved.len(),
            retries = retry_queue.len(),
            duration_ms = metadata.duration.as_millis() as u64,
            "sync finished"
        );

        Ok(SyncCycleResult {
            synced,
            unresolved_conflicts: resolved.unresolved,
            strategy,
            completed_at,
            retry_queue,
            metadata,
        })
    }

    /// Loads and checks the user's checkpoint.
    async fn load_checkpoint(&self, user_id: &UserId) -> SyncResult<SyncCheckpoint> {
        let checkpoint = self
            .local
            .get_checkpoint(user_id)
            .await
            .map_err(|e| SyncError::InvalidSyncState(format!("checkpoint unreadable: {e}")))?;

        if &checkpoint.user_id != user_id {
            return Err(SyncError::InvalidSyncState(format!(
                "checkpoint belongs to {} instead of {}",
                checkpoint.user_id, user_id
            )));
        }

        Ok(checkpoint)
    }

    /// Fetches the local and remote deltas concurrently.
    ///
    /// The remote result carries the cycle's fate: a timeout or
    /// cancellation replaces it with the corresponding error. A failed
    /// local fetch degrades to an empty local delta.
    async fn fetch_deltas<C>(
        &self,
        user_id: &UserId,
        since: Option<DateTime<Utc>>,
        cancel: C,
    ) -> Fetched
    where
        C: Future<Output = ()> + Send,
    {
        let local = self.local.unsynced_since(user_id, since);
        let remote = self.remote.fetch_since(user_id, since);
        let deadline = tokio::time::sleep(self.config.fetch_timeout);
        tokio::pin!(local, remote, deadline, cancel);

        let mut local_result = None;
        let mut remote_result = None;

        let interrupted = loop {
            if local_result.is_some() && remote_result.is_some() {
                break None;
            }
            tokio::select! {
                result = &mut local, if local_result.is_none() => local_result = Some(result),
                result = &mut remote, if remote_result.is_none() => remote_result = Some(result),
                () = &mut deadline => break Some(SyncError::Timeout),
                () = &mut cancel => break Some(SyncError::Cancelled),
            }
        };

        let (local, local_failed) = match local_result {
            Some(Ok(records)) => (records, false),
            Some(Err(e)) => {
                warn!(error = %e, "local fetch failed, continuing without local changes");
                (Vec::new(), true)
            }
            None => (Vec::new(), false),
        };

        let remote = match (interrupted, remote_result) {
            (Some(e), _) => Err(e),
            (None, Some(result)) => result,
            (None, None) => Err(SyncError::Cancelled),
        };

        Fetched {
            local,
            local_failed,
            remote,
        }
    }

    /// Saves pulled records; on failure the whole set is returned as failed.
    async fn save_pulled(
        &self,
        pull_set: Vec<ProgressRecord>,
    ) -> (Vec<ProgressRecord>, Vec<ProgressRecord>) {
        if pull_set.is_empty() {
            return (Vec::new(), Vec::new());
        }
        match self.local.save_records(&pull_set).await {
            Ok(()) => (pull_set, Vec::new()),
            Err(e) => {
                warn!(error = %e, records = pull_set.len(), "saving pulled records failed");
                (Vec::new(), pull_set)
            }
        }
    }

    /// Queues the already-fetched local records after a total failure.
    ///
    /// The cursor is left untouched so the next cycle fetches the same
    /// window again.
    async fn preserve_local(&self, checkpoint: &SyncCheckpoint, local_set: &[ProgressRecord]) {
        let retry_queue = local_set
            .iter()
            .cloned()
            .map(RetryEntry::push)
            .chain(checkpoint.pending_pulls().into_iter().map(RetryEntry::pull))
            .collect();
        let snapshot = SyncCheckpoint {
            retry_queue,
            ..checkpoint.clone()
        };

        if let Err(e) = self.local.save_checkpoint(&snapshot).await {
            warn!(error = %e, "could not queue local records after failed sync");
        }
    }

    /// Persists the checkpoint and sync flags. Failures are logged only.
    async fn commit(&self, checkpoint: &SyncCheckpoint, synced_ids: &[RecordId]) {
        if let Err(e) = self.local.save_checkpoint(checkpoint).await {
            warn!(error = %e, "checkpoint write failed");
        }
        if synced_ids.is_empty() {
            return;
        }
        if let Err(e) = self.local.mark_synced(synced_ids).await {
            warn!(error = %e, records = synced_ids.len(), "marking records synced failed");
        }
    }
}

/// Resolves every conflict with one strategy.
fn resolve_all(conflicts: Vec<Conflict>, strategy: ConflictStrategy) -> Resolved {
    conflicts
        .into_iter()
        .fold(Resolved::default(), |mut acc, conflict| {
            match ConflictResolver::resolve(&conflict, strategy) {
                Resolution::Resolved {
                    record,
                    side,
                    reason,
                } => {
                    debug!(subject = %conflict.subject_id(), ?side, %reason, "conflict resolved");
                    match side {
                        Side::Local => acc.local_won.push(record),
                        Side::Remote => acc.remote_won.push(record),
                    }
                }
                Resolution::RequiresManual => acc.unresolved.push(conflict),
            }
            acc
        })
}

/// Builds the retry queue from push and pull failures.
fn retry_entries(outcome: &PushOutcome, pull_failures: Vec<ProgressRecord>) -> Vec<RetryEntry> {
    outcome
        .failed
        .iter()
        .cloned()
        .map(RetryEntry::push)
        .chain(pull_failures.into_iter().map(RetryEntry::pull))
        .collect()
}

/// Keeps the first record of each subject, preserving order.
fn first_per_subject(records: Vec<ProgressRecord>) -> Vec<ProgressRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| seen.insert(record.subject_id().clone()))
        .collect()
}

fn disjoint_subjects(push_set: &[ProgressRecord], pull_set: &[ProgressRecord]) -> bool {
    let pushed: HashSet<&SubjectId> = push_set.iter().map(ProgressRecord::subject_id).collect();
    pull_set
        .iter()
        .all(|record| !pushed.contains(record.subject_id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLocalStore;
    use crate::transport::MemoryRemote;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn record(subject: &str, percentage: u8, secs: i64) -> ProgressRecord {
        ProgressRecord::new("u1".into(), subject.into(), percentage, at(secs)).unwrap()
    }

    fn engine() -> SyncEngine<MemoryLocalStore, MemoryRemote> {
        SyncEngine::new(SyncConfig::default(), MemoryLocalStore::new(), MemoryRemote::new())
            .unwrap()
    }

    #[test]
    fn invalid_config_is_reported() {
        let result = SyncEngine::new(
            SyncConfig::new().with_max_batch_size(0),
            MemoryLocalStore::new(),
            MemoryRemote::new(),
        );
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn resolve_all_splits_by_side() {
        let conflicts = vec![
            Conflict::new(record("a", 10, 300), record("a", 20, 100), at(0)),
            Conflict::new(record("b", 10, 100), record("b", 20, 300), at(0)),
        ];

        let resolved = resolve_all(conflicts.clone(), ConflictStrategy::MostRecent);
        assert_eq!(resolved.local_won.len(), 1);
        assert_eq!(resolved.remote_won.len(), 1);
        assert!(resolved.unresolved.is_empty());

        let manual = resolve_all(conflicts, ConflictStrategy::Manual);
        assert_eq!(manual.unresolved.len(), 2);
        assert!(manual.local_won.is_empty() && manual.remote_won.is_empty());
    }

    #[test]
    fn first_per_subject_keeps_order() {
        let records = vec![record("b", 1, 0), record("a", 2, 0), record("b", 3, 0)];
        let kept = first_per_subject(records);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].percentage(), 1);
        assert_eq!(kept[1].subject_id().as_str(), "a");
    }

    #[tokio::test]
    async fn empty_cycle_succeeds() {
        let engine = engine();
        let user = UserId::from("u1");

        let result = engine
            .sync(&user, false, ConflictStrategy::MostRecent)
            .await
            .unwrap();

        assert!(result.synced.is_empty());
        assert!(result.is_fully_synced());
        assert!(!result.metadata.incremental);
        let checkpoint = engine.local().checkpoint(&user).unwrap();
        assert_eq!(checkpoint.last_sync_at, Some(result.completed_at));
    }

    #[tokio::test]
    async fn unreadable_checkpoint_is_invalid_state() {
        let store = MemoryLocalStore::new();
        store.set_fail_checkpoint_reads(true);
        let remote = MemoryRemote::new();
        let engine = SyncEngine::new(SyncConfig::default(), store, remote).unwrap();

        let result = engine
            .sync(&"u1".into(), false, ConflictStrategy::LocalWins)
            .await;

        assert!(matches!(result, Err(SyncError::InvalidSyncState(_))));
        assert_eq!(engine.remote().fetch_calls(), 0);
    }

    #[tokio::test]
    async fn retry_pending_with_empty_queue() {
        let engine = engine();
        let result = engine.retry_pending(&"u1".into()).await;
        assert!(matches!(result, Err(SyncError::NoItemsToSync)));
    }
}
