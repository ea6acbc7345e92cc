//! flow-info: local telemetry cache and per-step metrics for workflow runs.
//!
//! This crate mirrors the runs, flow definitions and run event logs of a
//! remote flows service into monthly JSON snapshots, backfills missing run
//! logs with a bounded pool of concurrent fetches, and derives per-step
//! elapsed time, transfer counters and compute time from the logs.
//!
//! The remote service sits behind the [`FlowsService`] trait. Presentation
//! (tables, plots, progress bars) is left to the embedding application.

pub mod activity;
pub mod backfill;
pub mod config;
pub mod errors;
pub mod extract;
pub mod metrics;
pub mod service;
pub mod snapshot;
pub mod staleness;
pub mod store;
pub mod summary;
pub mod traits;
pub mod types;

// Re-export public types at the crate level.

// activity
pub use activity::{run_activity, RunActivity};

// backfill
pub use backfill::{interrupted, BackfillReport, Backfiller};

// config
pub use config::{BackfillConfig, CacheConfig, ProviderUrls, SnapshotPeriod};

// errors
pub use errors::{BackfillError, CacheError, MetricsError, ServiceError, SnapshotError};

// extract
pub use extract::{extract_step_events, StepEvents, StepFilter};

// metrics
pub use metrics::{
    AggregateOptions, FlowMetrics, MetricsRecord, MetricsTable, StepCategory, StepClassifier,
};

// service
pub use service::{HttpFlowsService, HttpServiceConfig, InMemoryFlowsService};

// snapshot / store
pub use snapshot::{SnapshotCache, SnapshotKind};
pub use store::RunLogStore;

// staleness
pub use staleness::{check_staleness, is_up_to_date, Staleness};

// summary
pub use summary::{summarize, CacheSummary};

// traits
pub use traits::{run_pages, FlowQuery, FlowsService, RunPage, RunQuery, SortOrder};

// types
pub use types::{
    FlowDefinition, FlowGraph, FlowState, LogCode, LogEntry, RunLog, RunLogMap, RunStatus,
    RunSummary, TransferCounters,
};
