//! In-memory flows service for tests and offline use.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::errors::ServiceError;
use crate::traits::{FlowQuery, FlowsService, RunPage, RunQuery, SortOrder};
use crate::types::{FlowDefinition, RunLog, RunSummary};

/// In-memory implementation of [`FlowsService`].
///
/// Runs are listed newest-completed first, like the real service. Pagination
/// markers are plain offsets. Individual runs can be made to fail so error
/// paths can be exercised, and every `get_run_log` call is counted.
pub struct InMemoryFlowsService {
    flows: RwLock<Vec<FlowDefinition>>,
    runs: RwLock<Vec<RunSummary>>,
    logs: RwLock<BTreeMap<String, RunLog>>,
    failing: RwLock<BTreeSet<String>>,
    denied: RwLock<BTreeSet<String>>,
    fetch_delay: RwLock<Option<Duration>>,
    log_fetches: AtomicUsize,
    run_list_calls: AtomicUsize,
}

impl InMemoryFlowsService {
    pub fn new() -> Self {
        Self {
            flows: RwLock::new(Vec::new()),
            runs: RwLock::new(Vec::new()),
            logs: RwLock::new(BTreeMap::new()),
            failing: RwLock::new(BTreeSet::new()),
            denied: RwLock::new(BTreeSet::new()),
            fetch_delay: RwLock::new(None),
            log_fetches: AtomicUsize::new(0),
            run_list_calls: AtomicUsize::new(0),
        }
    }

    pub fn add_flow(&self, flow: FlowDefinition) {
        self.flows.write().push(flow);
    }

    /// Register a run and, optionally, the log the service returns for it.
    pub fn add_run(&self, run: RunSummary, log: Option<RunLog>) {
        if let Some(log) = log {
            self.logs.write().insert(run.run_id.clone(), log);
        }
        self.runs.write().push(run);
    }

    /// Make `get_run_log` fail transiently for `run_id`.
    pub fn fail_run(&self, run_id: &str) {
        self.failing.write().insert(run_id.to_string());
    }

    /// Make `get_run_log` fail with an authorization error for `run_id`.
    pub fn deny_run(&self, run_id: &str) {
        self.denied.write().insert(run_id.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing.write().clear();
        self.denied.write().clear();
    }

    /// Delay every `get_run_log` call, to keep fetches in flight.
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        *self.fetch_delay.write() = delay;
    }

    /// Number of `get_run_log` calls served so far.
    pub fn log_fetches(&self) -> usize {
        self.log_fetches.load(Ordering::SeqCst)
    }

    /// Number of `list_runs` pages served so far.
    pub fn run_list_calls(&self) -> usize {
        self.run_list_calls.load(Ordering::SeqCst)
    }

    fn sorted_runs(&self, order: SortOrder) -> Vec<RunSummary> {
        let mut runs = self.runs.read().clone();
        match order {
            // Missing completion times sort last, like NULLs in a DESC order.
            SortOrder::CompletionTimeDesc => {
                runs.sort_by(|a, b| b.completed_at().cmp(&a.completed_at()))
            }
            SortOrder::CreatedAtDesc => {
                runs.sort_by(|a, b| b.started_at().cmp(&a.started_at()))
            }
        }
        runs
    }
}

impl Default for InMemoryFlowsService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FlowsService for InMemoryFlowsService {
    async fn list_flows(&self, query: &FlowQuery) -> Result<Vec<FlowDefinition>, ServiceError> {
        let flows = self.flows.read();
        let limit = query.limit.unwrap_or(flows.len());
        Ok(flows.iter().take(limit).cloned().collect())
    }

    async fn list_runs(&self, query: &RunQuery) -> Result<RunPage, ServiceError> {
        self.run_list_calls.fetch_add(1, Ordering::SeqCst);
        let runs = self.sorted_runs(query.order);
        let offset = match &query.marker {
            Some(marker) => marker.parse::<usize>().map_err(|e| ServiceError::Rejected {
                status: 400,
                message: format!("invalid marker {marker:?}: {e}"),
            })?,
            None => 0,
        };
        let limit = query.limit.unwrap_or(runs.len()).max(1);
        let page: Vec<RunSummary> = runs.iter().skip(offset).take(limit).cloned().collect();
        let next = offset + page.len();
        let has_next_page = next < runs.len();
        Ok(RunPage {
            runs: page,
            marker: has_next_page.then(|| next.to_string()),
            has_next_page,
        })
    }

    async fn get_run_log(&self, run_id: &str, limit: usize) -> Result<RunLog, ServiceError> {
        self.log_fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.fetch_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.denied.read().contains(run_id) {
            return Err(ServiceError::Unauthorized {
                message: format!("not allowed to read run {run_id}"),
            });
        }
        if self.failing.read().contains(run_id) {
            return Err(ServiceError::Transient {
                message: format!("connection reset while fetching {run_id}"),
            });
        }
        let mut log = self
            .logs
            .read()
            .get(run_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound {
                id: run_id.to_string(),
            })?;
        log.entries.truncate(limit);
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::run_pages;
    use crate::types::RunStatus;
    use futures::TryStreamExt;

    fn run(id: &str, completed: Option<&str>) -> RunSummary {
        RunSummary::new(
            id,
            "flow-1",
            RunStatus::Succeeded,
            "2024-01-01T00:00:00+00:00",
            completed.map(String::from),
        )
    }

    #[tokio::test]
    async fn test_runs_listed_newest_first() {
        let service = InMemoryFlowsService::new();
        service.add_run(run("old", Some("2024-01-01T01:00:00+00:00")), None);
        service.add_run(run("active", None), None);
        service.add_run(run("new", Some("2024-01-03T01:00:00+00:00")), None);

        let page = service.list_runs(&RunQuery::default()).await.unwrap();
        let ids: Vec<_> = page.runs.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old", "active"]);
        assert!(!page.has_next_page);

        let latest = service.get_most_recent_run().await.unwrap().unwrap();
        assert_eq!(latest.run_id, "new");
    }

    #[tokio::test]
    async fn test_pagination_follows_markers() {
        let service = InMemoryFlowsService::new();
        for i in 0..5 {
            let completed = format!("2024-01-0{}T00:00:00+00:00", i + 1);
            service.add_run(run(&format!("r{i}"), Some(&completed)), None);
        }
        let pages: Vec<Vec<RunSummary>> =
            run_pages(&service, SortOrder::CompletionTimeDesc, Some(2))
                .try_collect()
            .await
            .unwrap();
        assert_eq!(pages.len(), 3);
        assert_eq!(pages.iter().map(Vec::len).sum::<usize>(), 5);
        assert_eq!(pages[0][0].run_id, "r4");
        assert_eq!(service.run_list_calls(), 3);
    }

    #[tokio::test]
    async fn test_empty_service_has_no_recent_run() {
        let service = InMemoryFlowsService::new();
        assert!(service.get_most_recent_run().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failure_modes() {
        let service = InMemoryFlowsService::new();
        service.add_run(run("r1", None), Some(RunLog::default()));
        service.fail_run("r1");
        assert!(matches!(
            service.get_run_log("r1", 100).await,
            Err(ServiceError::Transient { .. })
        ));
        service.clear_failures();
        service.deny_run("r1");
        let err = service.get_run_log("r1", 100).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            service.get_run_log("missing", 100).await,
            Err(ServiceError::NotFound { .. })
        ));
        assert_eq!(service.log_fetches(), 3);
    }
}
