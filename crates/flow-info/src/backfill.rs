//! Refresh the run and flow snapshots and backfill missing run logs.
//!
//! Run logs are fetched by a fixed pool of workers pulling run ids from a
//! shared queue. Each worker sends `(run_id, result)` back over a channel to
//! the supervisor, which is the only owner of the result map and the only
//! writer of the run-log snapshot. The map is persisted once, when every
//! worker is done, when a fatal error stops the pool, or on cancellation.

use std::collections::{BTreeSet, VecDeque};
use std::future::Future;
use std::sync::Arc;

use futures::TryStreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::config::BackfillConfig;
use crate::errors::{BackfillError, ServiceError};
use crate::snapshot::SnapshotCache;
use crate::store::RunLogStore;
use crate::traits::{run_pages, FlowQuery, FlowsService, SortOrder};
use crate::types::{RunLog, RunLogMap};

type FetchResult = (String, Result<RunLog, ServiceError>);

/// Outcome of a completed [`Backfiller::backfill_run_logs`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Runs that had no log when the backfill started.
    pub total: usize,
    /// Logs fetched and stored.
    pub fetched: usize,
    /// Runs whose fetch failed; stored as absent and retried next time.
    pub failed: usize,
}

impl BackfillReport {
    pub fn completed(&self) -> usize {
        self.fetched + self.failed
    }
}

/// Keeps the snapshots of one [`SnapshotCache`] in step with a
/// [`FlowsService`].
pub struct Backfiller {
    service: Arc<dyn FlowsService>,
    cache: Arc<SnapshotCache>,
    config: BackfillConfig,
}

impl Backfiller {
    pub fn new(service: Arc<dyn FlowsService>, cache: Arc<SnapshotCache>) -> Self {
        Self::with_config(service, cache, BackfillConfig::default())
    }

    pub fn with_config(
        service: Arc<dyn FlowsService>,
        cache: Arc<SnapshotCache>,
        config: BackfillConfig,
    ) -> Self {
        Self {
            service,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &BackfillConfig {
        &self.config
    }

    pub fn store(&self) -> RunLogStore {
        RunLogStore::new(Arc::clone(&self.cache))
    }

    /// Replace the flow snapshot with the service's flow definitions,
    /// newest first.
    pub async fn refresh_flows(&self) -> Result<usize, BackfillError> {
        let flows = self
            .service
            .list_flows(&FlowQuery {
                order: SortOrder::CreatedAtDesc,
                limit: None,
            })
            .await?;
        self.cache.save_flows(&flows)?;
        tracing::info!(count = flows.len(), "fetched flows");
        Ok(flows.len())
    }

    /// Replace the run snapshot with the service's runs, newest completion
    /// first.
    ///
    /// `limit` is soft: paging stops after the first page that reaches it,
    /// and that whole page is kept. `on_page` receives the running count
    /// after every page. The snapshot is written once, after the last page.
    pub async fn refresh_runs<P>(
        &self,
        limit: Option<usize>,
        mut on_page: P,
    ) -> Result<usize, BackfillError>
    where
        P: FnMut(usize),
    {
        let mut pages = std::pin::pin!(run_pages(
            self.service.as_ref(),
            SortOrder::CompletionTimeDesc,
            self.config.page_size,
        ));
        let mut runs = Vec::new();
        while let Some(page) = pages.try_next().await? {
            runs.extend(page);
            on_page(runs.len());
            tracing::debug!(count = runs.len(), "fetched page of runs");
            if limit.is_some_and(|limit| runs.len() >= limit) {
                break;
            }
        }
        self.cache.save_runs(&runs)?;
        tracing::info!(count = runs.len(), "fetched runs");
        Ok(runs.len())
    }

    /// Run ids in the run snapshot with no stored log, first-seen order.
    ///
    /// Only presence is checked. A log fetched while its run was still
    /// active is never fetched again, even after the run has finished.
    pub fn missing_run_ids(&self) -> Result<Vec<String>, BackfillError> {
        let runs = self.cache.runs()?;
        let logs = self.cache.run_logs()?;
        let mut seen = BTreeSet::new();
        Ok(runs
            .iter()
            .filter(|r| !matches!(logs.get(&r.run_id), Some(Some(_))))
            .filter(|r| seen.insert(r.run_id.as_str()))
            .map(|r| r.run_id.clone())
            .collect())
    }

    /// Fetch the log of every cached run that has none.
    ///
    /// `progress(completed, total)` is called on every poll tick and once
    /// more as `(total, total)` on success. When `cancel` resolves, dispatch
    /// stops, in-flight fetches are aborted, results already delivered are
    /// persisted and [`BackfillError::Interrupted`] is returned. A fatal
    /// service error is handled the same way but returned as
    /// [`BackfillError::Service`].
    pub async fn backfill_run_logs<C, P>(
        &self,
        cancel: C,
        mut progress: P,
    ) -> Result<BackfillReport, BackfillError>
    where
        C: Future<Output = ()>,
        P: FnMut(usize, usize),
    {
        let missing = self.missing_run_ids()?;
        let total = missing.len();
        let mut report = BackfillReport {
            total,
            ..BackfillReport::default()
        };
        if total == 0 {
            tracing::debug!("no missing run logs");
            progress(0, 0);
            return Ok(report);
        }
        tracing::info!(
            missing = total,
            workers = self.config.concurrency,
            "fetching run logs"
        );

        let queue = Arc::new(Mutex::new(VecDeque::from(missing)));
        let (tx, mut rx) = mpsc::unbounded_channel::<FetchResult>();
        let mut workers = JoinSet::new();
        for worker in 0..self.config.concurrency.clamp(1, total) {
            workers.spawn(fetch_worker(
                worker,
                Arc::clone(&self.service),
                Arc::clone(&queue),
                tx.clone(),
                self.config.log_fetch_limit,
            ));
        }
        // The channel closes once every worker has exited.
        drop(tx);

        let mut results = RunLogMap::new();
        let mut fatal: Option<ServiceError> = None;
        let mut interrupted = false;
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        // Don't fire immediately on creation.
        ticker.tick().await;
        tokio::pin!(cancel);

        loop {
            tokio::select! {
                biased;

                _ = &mut cancel => {
                    interrupted = true;
                    break;
                }

                message = rx.recv() => match message {
                    Some((run_id, result)) => {
                        if let Some(e) = record(&mut results, &mut report, run_id, result) {
                            fatal = Some(e);
                            break;
                        }
                    }
                    None => break,
                },

                _ = ticker.tick() => {
                    tracing::debug!(completed = report.completed(), total, "backfill progress");
                    progress(report.completed(), total);
                }
            }
        }

        if interrupted || fatal.is_some() {
            queue.lock().clear();
            workers.abort_all();
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                if !e.is_cancelled() {
                    tracing::error!(error = %e, "run log worker failed");
                }
            }
        }
        // Keep what was delivered before the pool stopped.
        while let Ok((run_id, result)) = rx.try_recv() {
            if let Some(e) = record(&mut results, &mut report, run_id, result) {
                fatal.get_or_insert(e);
            }
        }

        let persisted = self.store().put_many(results);

        if interrupted {
            if let Err(e) = persisted {
                tracing::error!(error = %e, "failed to save run logs after interrupt");
            }
            tracing::warn!(fetched = report.fetched, total, "backfill interrupted");
            return Err(BackfillError::Interrupted {
                fetched: report.fetched,
                total,
            });
        }
        if let Some(e) = fatal {
            if let Err(save_err) = persisted {
                tracing::error!(error = %save_err, "failed to save run logs after fatal error");
            }
            tracing::error!(error = %e, fetched = report.fetched, "backfill aborted");
            return Err(e.into());
        }
        persisted?;

        progress(total, total);
        tracing::info!(
            fetched = report.fetched,
            failed = report.failed,
            total,
            "fetched run logs"
        );
        Ok(report)
    }
}

/// Fold one fetch result into the map. Returns the error if it is fatal.
fn record(
    results: &mut RunLogMap,
    report: &mut BackfillReport,
    run_id: String,
    result: Result<RunLog, ServiceError>,
) -> Option<ServiceError> {
    match result {
        Ok(log) => {
            report.fetched += 1;
            results.insert(run_id, Some(log));
            None
        }
        Err(e) if e.is_fatal() => Some(e),
        Err(e) => {
            tracing::warn!(run_id = %run_id, error = %e, "failed to fetch run log");
            report.failed += 1;
            results.insert(run_id, None);
            None
        }
    }
}

async fn fetch_worker(
    worker: usize,
    service: Arc<dyn FlowsService>,
    queue: Arc<Mutex<VecDeque<String>>>,
    tx: mpsc::UnboundedSender<FetchResult>,
    limit: usize,
) {
    loop {
        let next = queue.lock().pop_front();
        let Some(run_id) = next else {
            break;
        };
        tracing::debug!(worker, run_id = %run_id, "fetching run log");
        let result = service.get_run_log(&run_id, limit).await;
        if tx.send((run_id, result)).is_err() {
            break;
        }
    }
}

/// Resolves on Ctrl-C. Pass as the `cancel` future of
/// [`Backfiller::backfill_run_logs`].
pub async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl-C; backfill is not interruptible");
        std::future::pending::<()>().await;
    }
}
