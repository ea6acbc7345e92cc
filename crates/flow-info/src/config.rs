//! Configuration for the cache, the backfill workers and step
//! classification.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Datelike;

/// The (year, month) a set of snapshots belongs to.
///
/// Snapshots are versioned by month so a long-lived cache directory does not
/// grow one unbounded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotPeriod {
    pub year: i32,
    pub month: u32,
}

impl SnapshotPeriod {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    /// The current month in local time.
    pub fn current() -> Self {
        let now = chrono::Local::now();
        Self {
            year: now.year(),
            month: now.month(),
        }
    }
}

/// Where and under which name the snapshots of one profile live.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Profile name, used as the snapshot file prefix.
    pub name: String,
    /// Directory holding the snapshot files. Created on demand.
    pub base_dir: PathBuf,
    /// Defaults to [`SnapshotPeriod::current`].
    pub period: SnapshotPeriod,
}

impl CacheConfig {
    pub fn new(name: impl Into<String>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            base_dir: base_dir.into(),
            period: SnapshotPeriod::current(),
        }
    }

    pub fn with_period(mut self, period: SnapshotPeriod) -> Self {
        self.period = period;
        self
    }
}

/// Configuration for the [`Backfiller`](crate::backfill::Backfiller).
///
/// All fields have sensible defaults via the [`Default`] impl.
#[derive(Debug, Clone)]
pub struct BackfillConfig {
    /// Number of concurrent run-log fetches. Default: 3.
    pub concurrency: usize,
    /// How often progress is reported while fetching. Default: 1s.
    pub poll_interval: Duration,
    /// Maximum entries requested per run log. Default: 100.
    pub log_fetch_limit: usize,
    /// Page size for run listing; `None` lets the service decide.
    pub page_size: Option<usize>,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            poll_interval: Duration::from_secs(1),
            log_fetch_limit: 100,
            page_size: None,
        }
    }
}

/// Known action-provider endpoints used to classify flow steps.
///
/// Several URLs may denote the same provider (legacy and current transfer
/// endpoints).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderUrls {
    pub transfer: Vec<String>,
    pub compute: Vec<String>,
}

impl Default for ProviderUrls {
    fn default() -> Self {
        Self {
            transfer: vec![
                // Legacy transfer provider, retired Feb 2025.
                "https://actions.automate.globus.org/transfer/transfer/".into(),
                "https://transfer.actions.globus.org/transfer/".into(),
            ],
            compute: vec!["https://compute.actions.globus.org".into()],
        }
    }
}

impl ProviderUrls {
    pub fn is_transfer(&self, url: &str) -> bool {
        contains_url(&self.transfer, url)
    }

    pub fn is_compute(&self, url: &str) -> bool {
        contains_url(&self.compute, url)
    }
}

/// Trailing slashes are not significant when matching provider URLs.
fn contains_url(list: &[String], url: &str) -> bool {
    let url = url.trim_end_matches('/');
    list.iter().any(|known| known.trim_end_matches('/') == url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backfill_defaults() {
        let config = BackfillConfig::default();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.log_fetch_limit, 100);
        assert!(config.page_size.is_none());
    }

    #[test]
    fn test_provider_urls_match_both_transfer_endpoints() {
        let urls = ProviderUrls::default();
        assert!(urls.is_transfer("https://actions.automate.globus.org/transfer/transfer/"));
        assert!(urls.is_transfer("https://transfer.actions.globus.org/transfer"));
        assert!(!urls.is_transfer("https://compute.actions.globus.org"));
        assert!(urls.is_compute("https://compute.actions.globus.org/"));
    }

    #[test]
    fn test_cache_config_period_override() {
        let config =
            CacheConfig::new("xpcs", "/tmp/cache").with_period(SnapshotPeriod::new(2024, 2));
        assert_eq!(config.period, SnapshotPeriod::new(2024, 2));
        assert_eq!(config.name, "xpcs");
    }
}
