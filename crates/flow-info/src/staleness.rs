//! Decide whether the local run snapshot is behind the service.
//!
//! One cheap remote call (the most recently completed run) is compared with
//! the most recently completed run in the snapshot. Equal completion times
//! mean up to date; nothing else is compared.

use crate::errors::CacheError;
use crate::snapshot::SnapshotCache;
use crate::traits::FlowsService;
use crate::types::{parse_timestamp, RunSummary};

/// Outcome of a staleness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    /// Latest completion times match, or neither side has completed runs.
    UpToDate { completion_time: Option<String> },
    /// The service has a newer (or different) latest completion.
    Behind { local: String, remote: String },
    /// Nothing cached locally while the service has completed runs.
    LocalEmpty { remote: String },
    /// The service reports no completed runs but the snapshot has some.
    /// Treated as stale: the snapshot cannot be confirmed.
    RemoteEmpty { local: String },
}

impl Staleness {
    pub fn is_up_to_date(&self) -> bool {
        matches!(self, Staleness::UpToDate { .. })
    }
}

/// The cached run with the latest completion time.
///
/// Completion times are compared as instants; if none of them parses, the
/// raw strings are compared instead.
pub fn last_cached_run(runs: &[RunSummary]) -> Option<&RunSummary> {
    let completed = runs.iter().filter(|r| r.completion_time.is_some());
    let by_instant = completed
        .clone()
        .filter_map(|r| r.completed_at().map(|at| (at, r)))
        .max_by_key(|(at, _)| *at)
        .map(|(_, r)| r);
    by_instant.or_else(|| completed.max_by(|a, b| a.completion_time.cmp(&b.completion_time)))
}

/// Compare the latest local run with the latest remote run.
pub fn compare(local: Option<&RunSummary>, remote: Option<&RunSummary>) -> Staleness {
    let local = local.and_then(|r| r.completion_time.clone());
    let remote = remote.and_then(|r| r.completion_time.clone());
    match (local, remote) {
        (None, None) => Staleness::UpToDate {
            completion_time: None,
        },
        (None, Some(remote)) => Staleness::LocalEmpty { remote },
        (Some(local), None) => Staleness::RemoteEmpty { local },
        (Some(local), Some(remote)) if same_instant(&local, &remote) => Staleness::UpToDate {
            completion_time: Some(remote),
        },
        (Some(local), Some(remote)) => Staleness::Behind { local, remote },
    }
}

/// Query the service and compare with the run snapshot.
pub async fn check_staleness(
    service: &dyn FlowsService,
    cache: &SnapshotCache,
) -> Result<Staleness, CacheError> {
    let remote = service.get_most_recent_run().await?;
    let runs = cache.runs()?;
    let local = last_cached_run(&runs);
    let verdict = compare(local, remote.as_ref());
    tracing::debug!(
        local = ?local.and_then(|r| r.completion_time.as_deref()),
        remote = ?remote.as_ref().and_then(|r| r.completion_time.as_deref()),
        up_to_date = verdict.is_up_to_date(),
        "compared latest completion times"
    );
    Ok(verdict)
}

pub async fn is_up_to_date(
    service: &dyn FlowsService,
    cache: &SnapshotCache,
) -> Result<bool, CacheError> {
    Ok(check_staleness(service, cache).await?.is_up_to_date())
}

fn same_instant(a: &str, b: &str) -> bool {
    match (parse_timestamp(a), parse_timestamp(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, SnapshotPeriod};
    use crate::service::InMemoryFlowsService;
    use crate::types::RunStatus;

    fn run(id: &str, completed: Option<&str>) -> RunSummary {
        RunSummary::new(
            id,
            "flow-1",
            RunStatus::Succeeded,
            "2023-12-31T00:00:00",
            completed.map(String::from),
        )
    }

    fn cache(dir: &std::path::Path) -> SnapshotCache {
        SnapshotCache::open(CacheConfig::new("xpcs", dir).with_period(SnapshotPeriod::new(2024, 1)))
            .unwrap()
    }

    #[test]
    fn test_last_cached_run_uses_instants() {
        let runs = vec![
            run("a", Some("2024-01-01T10:00:00+00:00")),
            run("b", Some("2024-01-01T09:00:00-05:00")),
            run("c", None),
        ];
        assert_eq!(last_cached_run(&runs).unwrap().run_id, "b");
        assert!(last_cached_run(&[run("c", None)]).is_none());
        assert!(last_cached_run(&[]).is_none());
    }

    #[test]
    fn test_newer_remote_is_behind() {
        let local = run("a", Some("2024-01-01T00:00:00"));
        let remote = run("b", Some("2024-01-02T00:00:00"));
        let verdict = compare(Some(&local), Some(&remote));
        assert!(!verdict.is_up_to_date());
        assert_eq!(
            verdict,
            Staleness::Behind {
                local: "2024-01-01T00:00:00".into(),
                remote: "2024-01-02T00:00:00".into(),
            }
        );
    }

    #[test]
    fn test_equal_instants_in_different_notation_are_up_to_date() {
        let local = run("a", Some("2024-01-01T00:00:00+00:00"));
        let remote = run("a", Some("2024-01-01T01:00:00+01:00"));
        assert!(compare(Some(&local), Some(&remote)).is_up_to_date());
    }

    #[test]
    fn test_empty_sides() {
        let some = run("a", Some("2024-01-01T00:00:00"));
        assert!(compare(None, None).is_up_to_date());
        assert!(matches!(compare(None, Some(&some)), Staleness::LocalEmpty { .. }));
        assert!(matches!(compare(Some(&some), None), Staleness::RemoteEmpty { .. }));
    }

    #[tokio::test]
    async fn test_check_against_service() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let service = InMemoryFlowsService::new();

        // Both empty.
        assert!(is_up_to_date(&service, &cache).await.unwrap());

        service.add_run(run("r1", Some("2024-01-01T00:00:00")), None);
        assert!(!is_up_to_date(&service, &cache).await.unwrap());

        cache.save_runs(&[run("r1", Some("2024-01-01T00:00:00"))]).unwrap();
        assert!(is_up_to_date(&service, &cache).await.unwrap());

        service.add_run(run("r2", Some("2024-01-02T00:00:00")), None);
        let verdict = check_staleness(&service, &cache).await.unwrap();
        assert!(matches!(verdict, Staleness::Behind { .. }));
    }
}
