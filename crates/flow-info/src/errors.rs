//! Error types for the cache, the remote service, backfill and metrics.

use thiserror::Error;

/// Errors from [`SnapshotCache`](super::snapshot::SnapshotCache) and
/// [`RunLogStore`](super::store::RunLogStore).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SnapshotError {
    #[error("invalid cache name: {message}")]
    InvalidName { message: String },
    #[error("snapshot io error: {message}")]
    Io { message: String },
    #[error("snapshot encode error: {message}")]
    Encode { message: String },
}

/// Errors from a [`FlowsService`](super::traits::FlowsService).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServiceError {
    /// Network failure, timeout, throttling or a 5xx response.
    #[error("transient service error: {message}")]
    Transient { message: String },
    /// The service rejected our credentials. Never retried.
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },
    /// Credentials are missing or malformed; raised before any request.
    #[error("invalid credentials: {message}")]
    Credentials { message: String },
    #[error("not found: {id}")]
    NotFound { id: String },
    #[error("request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("failed to decode service response: {message}")]
    Decode { message: String },
}

impl ServiceError {
    /// Whether the error must abort the current operation instead of being
    /// recorded against a single run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ServiceError::Unauthorized { .. } | ServiceError::Credentials { .. }
        )
    }
}

/// Errors from operations that read the local cache and query the service.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CacheError {
    #[error("service error: {0}")]
    Service(#[from] ServiceError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// Errors from the [`Backfiller`](super::backfill::Backfiller).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackfillError {
    /// The caller cancelled the backfill. Logs fetched before the
    /// interrupt have already been written to the snapshot.
    #[error("backfill interrupted after {fetched} of {total} run logs")]
    Interrupted { fetched: usize, total: usize },
    #[error("service error: {0}")]
    Service(#[from] ServiceError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// Errors from the metrics aggregator.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MetricsError {
    #[error("could not find flow {flow_id}")]
    FlowNotFound { flow_id: String },
    #[error("invalid timestamp for run {run_id}: {value:?}")]
    InvalidTimestamp { run_id: String, value: String },
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}
