//! Flat JSON snapshots of the remote service, with a read-through cache.
//!
//! Layout:
//! ```text
//! {base_dir}/{name}-flows-{year}-{month}.json     {"flows": [...]}
//! {base_dir}/{name}-runs-{year}-{month}.json      {"runs": [...]}
//! {base_dir}/{name}-run-logs-{year}-{month}.json  {"logs": {run_id: log | null}}
//! ```
//!
//! Each snapshot is rewritten as a whole on every save, via a
//! temp-file-then-rename. A missing, empty or unparseable file reads as an
//! empty collection.
//!
//! The in-memory copies are owned by the [`SnapshotCache`] value, not the
//! process: every save calls [`SnapshotCache::invalidate`] before returning,
//! so the file stays the single source of truth for the next read.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;
use crate::errors::SnapshotError;
use crate::types::{FlowDefinition, RunLogMap, RunSummary};

/// The three snapshot documents kept per profile and month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    Flows,
    Runs,
    RunLogs,
}

impl SnapshotKind {
    fn label(self) -> &'static str {
        match self {
            SnapshotKind::Flows => "flows",
            SnapshotKind::Runs => "runs",
            SnapshotKind::RunLogs => "run-logs",
        }
    }
}

#[derive(Default, Deserialize)]
struct FlowsDocument {
    #[serde(default)]
    flows: Vec<FlowDefinition>,
}

#[derive(Default, Deserialize)]
struct RunsDocument {
    #[serde(default)]
    runs: Vec<RunSummary>,
}

#[derive(Default, Deserialize)]
struct RunLogsDocument {
    #[serde(default)]
    logs: RunLogMap,
}

#[derive(Serialize)]
struct FlowsDocumentRef<'a> {
    flows: &'a [FlowDefinition],
}

#[derive(Serialize)]
struct RunsDocumentRef<'a> {
    runs: &'a [RunSummary],
}

#[derive(Serialize)]
struct RunLogsDocumentRef<'a> {
    logs: &'a RunLogMap,
}

type Slot<T> = RwLock<Option<Arc<T>>>;

/// Caller-owned read-through cache over the snapshot files of one profile.
pub struct SnapshotCache {
    config: CacheConfig,
    flows: Slot<Vec<FlowDefinition>>,
    runs: Slot<Vec<RunSummary>>,
    logs: Slot<RunLogMap>,
    /// Serializes snapshot writes, including read-modify-write of the
    /// run-log map.
    writer: Mutex<()>,
}

impl SnapshotCache {
    /// Open the cache described by `config`, creating `base_dir` if needed.
    pub fn open(config: CacheConfig) -> Result<Self, SnapshotError> {
        if config.name.trim().is_empty() {
            return Err(SnapshotError::InvalidName {
                message: "cache name must not be empty".into(),
            });
        }
        if config.name.contains(['/', '\\']) {
            return Err(SnapshotError::InvalidName {
                message: format!("cache name must not contain path separators: {}", config.name),
            });
        }
        std::fs::create_dir_all(&config.base_dir).map_err(|e| SnapshotError::Io {
            message: format!("failed to create cache directory: {e}"),
        })?;
        tracing::debug!(
            path = %config.base_dir.display(),
            name = %config.name,
            "opened snapshot cache"
        );
        Ok(Self {
            config,
            flows: RwLock::new(None),
            runs: RwLock::new(None),
            logs: RwLock::new(None),
            writer: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Path of the snapshot file for `kind`.
    pub fn path(&self, kind: SnapshotKind) -> PathBuf {
        let period = self.config.period;
        self.config.base_dir.join(format!(
            "{}-{}-{}-{}.json",
            self.config.name,
            kind.label(),
            period.year,
            period.month
        ))
    }

    /// Size in bytes of the snapshot file, 0 when it does not exist.
    pub fn size_of(&self, kind: SnapshotKind) -> u64 {
        std::fs::metadata(self.path(kind))
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Drop every in-memory copy; the next read goes back to disk.
    pub fn invalidate(&self) {
        self.flows.write().take();
        self.runs.write().take();
        self.logs.write().take();
    }

    pub fn flows(&self) -> Result<Arc<Vec<FlowDefinition>>, SnapshotError> {
        read_through(&self.flows, || {
            self.load::<FlowsDocument>(SnapshotKind::Flows)
                .map(|doc| doc.flows)
        })
    }

    pub fn runs(&self) -> Result<Arc<Vec<RunSummary>>, SnapshotError> {
        read_through(&self.runs, || {
            self.load::<RunsDocument>(SnapshotKind::Runs).map(|doc| doc.runs)
        })
    }

    pub fn run_logs(&self) -> Result<Arc<RunLogMap>, SnapshotError> {
        read_through(&self.logs, || {
            self.load::<RunLogsDocument>(SnapshotKind::RunLogs)
                .map(|doc| doc.logs)
        })
    }

    pub fn get_flow(&self, flow_id: &str) -> Result<Option<FlowDefinition>, SnapshotError> {
        tracing::debug!(flow_id, "looking up flow");
        Ok(self.flows()?.iter().find(|f| f.id == flow_id).cloned())
    }

    /// Replace the flow snapshot.
    pub fn save_flows(&self, flows: &[FlowDefinition]) -> Result<(), SnapshotError> {
        let _writer = self.writer.lock();
        self.write(SnapshotKind::Flows, &FlowsDocumentRef { flows })?;
        self.invalidate();
        Ok(())
    }

    /// Replace the run-list snapshot.
    pub fn save_runs(&self, runs: &[RunSummary]) -> Result<(), SnapshotError> {
        let _writer = self.writer.lock();
        self.write(SnapshotKind::Runs, &RunsDocumentRef { runs })?;
        self.invalidate();
        Ok(())
    }

    /// Read-modify-write of the run-log map as one unit.
    ///
    /// Concurrent callers are serialized, so two updates touching different
    /// runs never lose each other's entries.
    pub fn update_run_logs<F>(&self, update: F) -> Result<(), SnapshotError>
    where
        F: FnOnce(&mut RunLogMap),
    {
        let _writer = self.writer.lock();
        let current = self.run_logs()?;
        self.logs.write().take();
        let mut logs = Arc::try_unwrap(current).unwrap_or_else(|shared| (*shared).clone());
        update(&mut logs);
        self.write(SnapshotKind::RunLogs, &RunLogsDocumentRef { logs: &logs })?;
        self.invalidate();
        Ok(())
    }

    fn load<D>(&self, kind: SnapshotKind) -> Result<D, SnapshotError>
    where
        D: DeserializeOwned + Default,
    {
        let path = self.path(kind);
        tracing::debug!(path = %path.display(), "loading snapshot");
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(D::default()),
            Err(e) => {
                return Err(SnapshotError::Io {
                    message: format!("failed to read {}: {e}", path.display()),
                })
            }
        };
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(D::default());
        }
        match serde_json::from_slice::<Option<D>>(&data) {
            Ok(doc) => Ok(doc.unwrap_or_default()),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "unreadable snapshot, treating it as empty"
                );
                Ok(D::default())
            }
        }
    }

    fn write<T: Serialize>(&self, kind: SnapshotKind, doc: &T) -> Result<(), SnapshotError> {
        let path = self.path(kind);
        tracing::debug!(path = %path.display(), "saving snapshot");
        let data = serde_json::to_vec_pretty(doc).map_err(|e| SnapshotError::Encode {
            message: format!("failed to serialize {} snapshot: {e}", kind.label()),
        })?;
        atomic_write(&path, &data)
    }
}

fn read_through<T, F>(slot: &Slot<T>, load: F) -> Result<Arc<T>, SnapshotError>
where
    F: FnOnce() -> Result<T, SnapshotError>,
{
    if let Some(hit) = slot.read().as_ref() {
        return Ok(Arc::clone(hit));
    }
    let mut guard = slot.write();
    if let Some(hit) = guard.as_ref() {
        return Ok(Arc::clone(hit));
    }
    let value = Arc::new(load()?);
    *guard = Some(Arc::clone(&value));
    Ok(value)
}

/// Atomic write: serialize to temp file, then rename over the target.
fn atomic_write(path: &Path, data: &[u8]) -> Result<(), SnapshotError> {
    let temp_path = path.with_extension("json.tmp");
    std::fs::write(&temp_path, data).map_err(|e| SnapshotError::Io {
        message: format!("failed to write temp file: {e}"),
    })?;
    std::fs::rename(&temp_path, path).map_err(|e| SnapshotError::Io {
        message: format!("failed to rename temp file: {e}"),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SnapshotPeriod;
    use crate::types::{RunLog, RunStatus};

    fn open(dir: &Path) -> SnapshotCache {
        let config = CacheConfig::new("xpcs", dir).with_period(SnapshotPeriod::new(2024, 3));
        SnapshotCache::open(config).unwrap()
    }

    fn run(id: &str) -> RunSummary {
        RunSummary::new(
            id,
            "flow-1",
            RunStatus::Succeeded,
            "2024-03-01T00:00:00+00:00",
            Some("2024-03-01T00:10:00+00:00".into()),
        )
    }

    #[test]
    fn test_file_naming() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path());
        assert_eq!(
            cache.path(SnapshotKind::RunLogs),
            dir.path().join("xpcs-run-logs-2024-3.json")
        );
        assert_eq!(cache.path(SnapshotKind::Flows), dir.path().join("xpcs-flows-2024-3.json"));
        assert_eq!(cache.path(SnapshotKind::Runs), dir.path().join("xpcs-runs-2024-3.json"));
    }

    #[test]
    fn test_empty_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = SnapshotCache::open(CacheConfig::new("  ", dir.path()));
        assert!(matches!(result, Err(SnapshotError::InvalidName { .. })));
    }

    #[test]
    fn test_missing_files_read_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path());
        assert!(cache.flows().unwrap().is_empty());
        assert!(cache.runs().unwrap().is_empty());
        assert!(cache.run_logs().unwrap().is_empty());
        assert_eq!(cache.size_of(SnapshotKind::Runs), 0);
    }

    #[test]
    fn test_empty_null_and_corrupt_files_read_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path());
        std::fs::write(cache.path(SnapshotKind::Runs), "").unwrap();
        std::fs::write(cache.path(SnapshotKind::Flows), "null").unwrap();
        std::fs::write(cache.path(SnapshotKind::RunLogs), "{\"logs\": {\"r1\": ").unwrap();

        assert!(cache.runs().unwrap().is_empty());
        assert!(cache.flows().unwrap().is_empty());
        assert!(cache.run_logs().unwrap().is_empty());
    }

    #[test]
    fn test_save_invalidates_cached_copy() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path());
        assert!(cache.runs().unwrap().is_empty());

        cache.save_runs(&[run("r1"), run("r2")]).unwrap();
        let runs = cache.runs().unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, "r1");
        assert!(cache.size_of(SnapshotKind::Runs) > 0);
        assert!(!dir.path().join("xpcs-runs-2024-3.json.tmp").exists());
    }

    #[test]
    fn test_reads_are_cached_until_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path());
        cache.save_runs(&[run("r1")]).unwrap();
        assert_eq!(cache.runs().unwrap().len(), 1);

        // Another process replaces the file behind our back.
        let other = open(dir.path());
        other.save_runs(&[run("r1"), run("r2")]).unwrap();
        assert_eq!(cache.runs().unwrap().len(), 1);

        cache.invalidate();
        assert_eq!(cache.runs().unwrap().len(), 2);
    }

    #[test]
    fn test_run_log_document_shape() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path());
        cache
            .update_run_logs(|logs| {
                logs.insert("r1".into(), Some(RunLog::default()));
                logs.insert("r2".into(), None);
            })
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(cache.path(SnapshotKind::RunLogs)).unwrap())
                .unwrap();
        assert_eq!(raw["logs"]["r1"]["entries"], serde_json::json!([]));
        assert!(raw["logs"]["r2"].is_null());

        let logs = cache.run_logs().unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs["r2"].is_none());
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(open(dir.path()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    cache
                        .update_run_logs(|logs| {
                            logs.insert(format!("run-{i}"), Some(RunLog::default()));
                        })
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        cache.invalidate();
        assert_eq!(cache.run_logs().unwrap().len(), 8);
    }
}
