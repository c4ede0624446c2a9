//! Chunked pushing with per-chunk failure isolation.

use crate::config::DEFAULT_MAX_BATCH_SIZE;
use crate::error::{SyncError, SyncResult};
use crate::transport::RemoteTransport;
use progress_sync_protocol::{ProgressRecord, RecordId};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Result of pushing a record list in batches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOutcome {
    /// Records the remote accepted, as returned by the remote.
    pub pushed: Vec<ProgressRecord>,
    /// Records of failed batches and records the remote did not accept.
    pub failed: Vec<ProgressRecord>,
    /// Number of batches attempted.
    pub batches: usize,
    /// Number of batches that failed outright.
    pub failed_batches: usize,
}

impl PushOutcome {
    /// Returns true if every record was accepted.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Pushes records to the remote in contiguous chunks of bounded size.
///
/// A failing chunk never aborts the remaining ones: its records are
/// reported as failed and the next chunk is attempted. Chunks accepted
/// before a failure are final.
#[derive(Debug, Clone, Copy)]
pub struct BatchPusher {
    max_batch_size: usize,
}

impl BatchPusher {
    /// Creates a pusher. A zero batch size is rejected.
    pub fn new(max_batch_size: usize) -> SyncResult<Self> {
        if max_batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "max_batch_size must be at least 1".into(),
            ));
        }
        Ok(Self { max_batch_size })
    }

    /// Returns the maximum batch size.
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Returns how many batches `record_count` records are split into.
    pub fn batch_count(&self, record_count: usize) -> usize {
        record_count.div_ceil(self.max_batch_size)
    }

    /// Pushes `records` sequentially, one chunk at a time.
    pub async fn push<T>(&self, transport: &T, records: &[ProgressRecord]) -> PushOutcome
    where
        T: RemoteTransport + ?Sized,
    {
        let mut outcome = PushOutcome::default();

        for (index, chunk) in records.chunks(self.max_batch_size).enumerate() {
            outcome.batches += 1;
            match transport.push_batch(chunk).await {
                Ok(accepted) => {
                    let accepted_ids: HashSet<RecordId> =
                        accepted.iter().map(|record| record.id()).collect();
                    let rejected: Vec<ProgressRecord> = chunk
                        .iter()
                        .filter(|record| !accepted_ids.contains(&record.id()))
                        .cloned()
                        .collect();
                    if !rejected.is_empty() {
                        warn!(
                            batch = index,
                            rejected = rejected.len(),
                            "remote did not accept every record of the batch"
                        );
                    }
                    debug!(batch = index, accepted = accepted.len(), "batch pushed");
                    outcome.pushed.extend(accepted);
                    outcome.failed.extend(rejected);
                }
                Err(e) => {
                    warn!(batch = index, size = chunk.len(), error = %e, "batch push failed");
                    outcome.failed_batches += 1;
                    outcome.failed.extend_from_slice(chunk);
                }
            }
        }

        outcome
    }
}

impl Default for BatchPusher {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}
