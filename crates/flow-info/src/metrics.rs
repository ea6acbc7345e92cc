//! Per-run step metrics: step time, transfer counters and compute time.
//!
//! Steps are classified through the flow definition: each action state's
//! `ActionUrl` is matched against the known transfer and compute providers.
//! One [`MetricsRecord`] is produced per successful run with a cached log;
//! records are collected into a [`MetricsTable`] ordered by run start.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::ProviderUrls;
use crate::errors::MetricsError;
use crate::extract::{extract_step_events, StepFilter};
use crate::snapshot::SnapshotCache;
use crate::types::{FlowDefinition, LogCode, RunLog, RunSummary, TransferCounters};

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Which kind of action provider implements a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepCategory {
    Transfer,
    Compute,
    Other,
}

/// Step name to category for one flow.
#[derive(Debug, Clone, Default)]
pub struct StepClassifier {
    categories: BTreeMap<String, StepCategory>,
}

impl StepClassifier {
    pub fn new(flow: &FlowDefinition, urls: &ProviderUrls) -> Self {
        let categories = flow
            .step_types()
            .into_iter()
            .map(|(step, url)| {
                let category = if urls.is_transfer(url) {
                    StepCategory::Transfer
                } else if urls.is_compute(url) {
                    StepCategory::Compute
                } else {
                    StepCategory::Other
                };
                (step.to_string(), category)
            })
            .collect();
        Self { categories }
    }

    /// Steps unknown to the flow definition are [`StepCategory::Other`].
    pub fn category(&self, step: &str) -> StepCategory {
        self.categories
            .get(step)
            .copied()
            .unwrap_or(StepCategory::Other)
    }

    /// Step names of `category`, restricted to `subset` unless it is empty.
    pub fn steps_in(&self, category: StepCategory, subset: &BTreeSet<String>) -> BTreeSet<String> {
        self.categories
            .iter()
            .filter(|(_, c)| **c == category)
            .map(|(step, _)| step)
            .filter(|step| subset.is_empty() || subset.contains(*step))
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Metrics derived from one run.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsRecord {
    pub run_id: String,
    pub flow_id: String,
    pub start: DateTime<Utc>,
    /// Step names in first-seen order.
    pub steps: Vec<String>,
    /// Seconds per step, for steps with both a start and an end.
    pub step_times: BTreeMap<String, f64>,
    pub total_step_time: f64,
    pub transfers: BTreeMap<String, TransferCounters>,
    pub total_transfer: TransferCounters,
    pub compute_times: BTreeMap<String, f64>,
    pub total_compute_time: f64,
}

impl MetricsRecord {
    /// Flatten into `{step}_{metric}` columns plus the `total_*` columns.
    pub fn columns(&self) -> BTreeMap<String, f64> {
        let mut columns = BTreeMap::new();
        for (step, secs) in &self.step_times {
            columns.insert(format!("{step}_step_time"), *secs);
        }
        columns.insert("total_step_time".into(), self.total_step_time);
        for (step, counters) in &self.transfers {
            insert_counters(&mut columns, step, counters);
        }
        insert_counters(&mut columns, "total", &self.total_transfer);
        for (step, secs) in &self.compute_times {
            columns.insert(format!("{step}_compute_time"), *secs);
        }
        columns.insert("total_compute_time".into(), self.total_compute_time);
        columns
    }
}

fn insert_counters(columns: &mut BTreeMap<String, f64>, prefix: &str, c: &TransferCounters) {
    columns.insert(format!("{prefix}_bytes_transferred"), c.bytes_transferred as f64);
    columns.insert(format!("{prefix}_files_transferred"), c.files_transferred as f64);
    columns.insert(format!("{prefix}_files_skipped"), c.files_skipped as f64);
}

/// Records of all processed runs, ascending by start.
#[derive(Debug, Clone, Default)]
pub struct MetricsTable {
    pub rows: Vec<MetricsRecord>,
    /// Successful runs with no cached log.
    pub missing_run_logs: usize,
    /// Runs skipped because their flow or start time could not be resolved.
    pub skipped_runs: usize,
    /// Runs left out because they did not succeed.
    pub excluded_runs: usize,
    /// Logs present in the run-log snapshot when the table was built.
    pub cached_run_logs: usize,
}

impl MetricsTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// `(missing logs, cached logs)`.
    pub fn missing_run_logs(&self) -> (usize, usize) {
        (self.missing_run_logs, self.cached_run_logs)
    }
}

/// Options for [`FlowMetrics::load`].
#[derive(Debug, Clone)]
pub struct AggregateOptions {
    /// Only the first `limit` cached runs (newest first). Default: 20.
    pub limit: Option<usize>,
    /// Restrict step times to compute steps. Default: false.
    pub step_times_compute_only: bool,
    /// Further restricts classified steps. Empty means no restriction.
    pub step_subset: BTreeSet<String>,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            limit: Some(20),
            step_times_compute_only: false,
            step_subset: BTreeSet::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Step times in seconds for the steps allowed by `filter`, and their sum.
pub fn step_times(log: &RunLog, filter: &StepFilter) -> (Vec<String>, BTreeMap<String, f64>, f64) {
    let events = extract_step_events(log, filter);
    let mut times = BTreeMap::new();
    let mut total = 0.0;
    for (step, secs) in events.step_times() {
        times.insert(step.to_string(), secs);
        total += secs;
    }
    (events.steps().to_vec(), times, total)
}

/// Transfer counters from the completion entries of `transfer_steps`.
///
/// Entries without a state name, or whose output payload lacks counters, are
/// skipped with a warning.
pub fn transfer_metrics(
    log: &RunLog,
    transfer_steps: &BTreeSet<String>,
) -> (BTreeMap<String, TransferCounters>, TransferCounters) {
    let mut per_step: BTreeMap<String, TransferCounters> = BTreeMap::new();
    let mut total = TransferCounters::default();
    if transfer_steps.is_empty() {
        return (per_step, total);
    }

    for entry in &log.entries {
        if entry.log_code() != LogCode::ActionCompleted {
            continue;
        }
        let Some(step) = entry.state_name() else {
            tracing::warn!(
                filter = ?transfer_steps,
                time = %entry.time,
                "no state name found in log entry"
            );
            continue;
        };
        if !transfer_steps.contains(step) {
            continue;
        }
        let Some(counters) = entry.transfer_counters(step) else {
            tracing::warn!(step, time = %entry.time, "transfer completion has no counters");
            continue;
        };
        *per_step.entry(step.to_string()).or_default() += counters;
        total += counters;
    }
    (per_step, total)
}

/// Compute time per compute step, paired from start/completion entries.
pub fn compute_times(
    log: &RunLog,
    compute_steps: &BTreeSet<String>,
) -> (BTreeMap<String, f64>, f64) {
    if compute_steps.is_empty() {
        return (BTreeMap::new(), 0.0);
    }
    let (_, times, total) = step_times(log, &StepFilter::only(compute_steps.iter().cloned()));
    (times, total)
}

/// Build the record of one run from its log and its flow's classifier.
pub fn build_record(
    run: &RunSummary,
    log: &RunLog,
    classifier: &StepClassifier,
    options: &AggregateOptions,
) -> Result<MetricsRecord, MetricsError> {
    let start = run.started_at().ok_or_else(|| MetricsError::InvalidTimestamp {
        run_id: run.run_id.clone(),
        value: run.start_time.clone(),
    })?;

    let transfer_steps = classifier.steps_in(StepCategory::Transfer, &options.step_subset);
    let compute_steps = classifier.steps_in(StepCategory::Compute, &options.step_subset);

    let step_filter = if options.step_times_compute_only {
        StepFilter::only(compute_steps.iter().cloned())
    } else {
        StepFilter::all()
    };
    let no_steps = options.step_times_compute_only && compute_steps.is_empty();
    let (steps, step_times, total_step_time) = if no_steps {
        (Vec::new(), BTreeMap::new(), 0.0)
    } else {
        step_times(log, &step_filter)
    };
    let (transfers, total_transfer) = transfer_metrics(log, &transfer_steps);
    let (compute_times, total_compute_time) = compute_times(log, &compute_steps);

    Ok(MetricsRecord {
        run_id: run.run_id.clone(),
        flow_id: run.flow_id.clone(),
        start,
        steps,
        step_times,
        total_step_time,
        transfers,
        total_transfer,
        compute_times,
        total_compute_time,
    })
}

// ---------------------------------------------------------------------------
// FlowMetrics
// ---------------------------------------------------------------------------

/// Aggregates metrics over the runs of a [`SnapshotCache`].
pub struct FlowMetrics {
    cache: Arc<SnapshotCache>,
    urls: ProviderUrls,
}

impl FlowMetrics {
    pub fn new(cache: Arc<SnapshotCache>) -> Self {
        Self::with_provider_urls(cache, ProviderUrls::default())
    }

    pub fn with_provider_urls(cache: Arc<SnapshotCache>, urls: ProviderUrls) -> Self {
        Self { cache, urls }
    }

    /// Classifier for `flow_id`, from the cached flow definitions.
    pub fn classifier(&self, flow_id: &str) -> Result<StepClassifier, MetricsError> {
        let flow = self
            .cache
            .get_flow(flow_id)?
            .ok_or_else(|| MetricsError::FlowNotFound {
                flow_id: flow_id.to_string(),
            })?;
        Ok(StepClassifier::new(&flow, &self.urls))
    }

    /// Build the metrics table over the cached runs.
    pub fn load(&self, options: &AggregateOptions) -> Result<MetricsTable, MetricsError> {
        let runs = self.cache.runs()?;
        let logs = self.cache.run_logs()?;
        let runs: &[RunSummary] = match options.limit {
            Some(limit) => &runs[..limit.min(runs.len())],
            None => &runs,
        };
        tracing::debug!(runs = runs.len(), "extracting metrics");

        let mut table = MetricsTable {
            cached_run_logs: logs.values().filter(|l| l.is_some()).count(),
            ..MetricsTable::default()
        };
        let mut classifiers: BTreeMap<String, Option<StepClassifier>> = BTreeMap::new();

        for run in runs {
            if !run.status.is_success() {
                tracing::debug!(
                    run_id = %run.run_id,
                    status = %run.status,
                    "skipping run due to status"
                );
                table.excluded_runs += 1;
                continue;
            }
            let Some(Some(log)) = logs.get(&run.run_id) else {
                table.missing_run_logs += 1;
                continue;
            };

            let classifier = classifiers
                .entry(run.flow_id.clone())
                .or_insert_with(|| match self.classifier(&run.flow_id) {
                    Ok(c) => Some(c),
                    Err(e) => {
                        tracing::error!(
                            flow_id = %run.flow_id,
                            error = %e,
                            "cannot classify steps"
                        );
                        None
                    }
                });
            let Some(classifier) = classifier.as_ref() else {
                tracing::error!(
                    run_id = %run.run_id,
                    flow_id = %run.flow_id,
                    "skipping run with unknown flow"
                );
                table.skipped_runs += 1;
                continue;
            };

            match build_record(run, log, classifier, options) {
                Ok(record) => table.rows.push(record),
                Err(e) => {
                    tracing::warn!(run_id = %run.run_id, error = %e, "skipping run");
                    table.skipped_runs += 1;
                }
            }
        }

        table.rows.sort_by(|a, b| a.start.cmp(&b.start));
        tracing::debug!(
            rows = table.rows.len(),
            missing = table.missing_run_logs,
            skipped = table.skipped_runs,
            excluded = table.excluded_runs,
            "done"
        );
        Ok(table)
    }
}
