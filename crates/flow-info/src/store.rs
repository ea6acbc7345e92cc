//! Key-value access to run logs inside the run-log snapshot.

use std::sync::Arc;

use crate::errors::SnapshotError;
use crate::snapshot::SnapshotCache;
use crate::types::{RunLog, RunLogMap};

/// Run logs keyed by run id, persisted in the run-log snapshot of a
/// [`SnapshotCache`].
///
/// Every write rewrites the whole snapshot and invalidates the cache. Writes
/// are serialized by the cache, so concurrent `put`s never lose entries.
#[derive(Clone)]
pub struct RunLogStore {
    cache: Arc<SnapshotCache>,
}

impl RunLogStore {
    pub fn new(cache: Arc<SnapshotCache>) -> Self {
        Self { cache }
    }

    /// The stored log for `run_id`. A run recorded as absent reads as `None`.
    pub fn get(&self, run_id: &str) -> Result<Option<RunLog>, SnapshotError> {
        Ok(self.cache.run_logs()?.get(run_id).cloned().flatten())
    }

    /// Whether a log (not an absent marker) is stored for `run_id`.
    pub fn has(&self, run_id: &str) -> Result<bool, SnapshotError> {
        Ok(matches!(self.cache.run_logs()?.get(run_id), Some(Some(_))))
    }

    /// Number of runs holding a log.
    pub fn len(&self) -> Result<usize, SnapshotError> {
        Ok(self.cache.run_logs()?.values().filter(|l| l.is_some()).count())
    }

    pub fn is_empty(&self) -> Result<bool, SnapshotError> {
        Ok(self.len()? == 0)
    }

    /// Store one log and persist immediately.
    pub fn put(&self, run_id: &str, log: RunLog) -> Result<(), SnapshotError> {
        self.cache.update_run_logs(|logs| {
            logs.insert(run_id.to_string(), Some(log));
        })
    }

    /// Merge a batch of results with one snapshot write.
    ///
    /// An absent marker never replaces a stored log.
    pub fn put_many(&self, batch: RunLogMap) -> Result<(), SnapshotError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.cache.update_run_logs(|logs| {
            for (run_id, log) in batch {
                match log {
                    Some(log) => {
                        logs.insert(run_id, Some(log));
                    }
                    None => {
                        logs.entry(run_id).or_insert(None);
                    }
                }
            }
        })
    }
}
