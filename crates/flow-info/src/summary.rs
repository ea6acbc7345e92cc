//! One-line overview of a profile's cache.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::CacheError;
use crate::snapshot::{SnapshotCache, SnapshotKind};
use crate::staleness::{compare, last_cached_run, Staleness};
use crate::traits::FlowsService;

/// Counts and file sizes of the snapshots, plus the staleness verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheSummary {
    pub name: String,
    /// Completion time of the service's most recent run.
    pub last_run: Option<DateTime<Utc>>,
    pub runs: usize,
    pub flows: usize,
    /// Snapshot sizes in bytes; 0 when the file does not exist.
    pub runs_size: u64,
    pub flows_size: u64,
    pub run_logs_size: u64,
    pub cache_up_to_date: bool,
}

pub async fn summarize(
    service: &dyn FlowsService,
    cache: &SnapshotCache,
) -> Result<CacheSummary, CacheError> {
    let remote = service.get_most_recent_run().await?;
    let runs = cache.runs()?;
    let flows = cache.flows()?;

    let staleness = compare(last_cached_run(&runs), remote.as_ref());
    if let Staleness::Behind { local, remote } = &staleness {
        tracing::debug!(%local, %remote, "cache is behind");
    }

    Ok(CacheSummary {
        name: cache.name().to_string(),
        last_run: remote.as_ref().and_then(|r| r.completed_at()),
        runs: runs.len(),
        flows: flows.len(),
        runs_size: cache.size_of(SnapshotKind::Runs),
        flows_size: cache.size_of(SnapshotKind::Flows),
        run_logs_size: cache.size_of(SnapshotKind::RunLogs),
        cache_up_to_date: staleness.is_up_to_date(),
    })
}
