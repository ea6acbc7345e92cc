//! Reconstruct step boundaries from a run's event log.
//!
//! Steps are keyed by name, never by position: start and completion entries
//! of concurrent steps may interleave freely.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::types::{LogCode, RunLog};

/// Restricts extraction to a set of step names. Empty means every step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepFilter {
    names: BTreeSet<String>,
}

impl StepFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allows(&self, step: &str) -> bool {
        self.names.is_empty() || self.names.contains(step)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Step names in first-seen order plus their start and end instants.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepEvents {
    steps: Vec<String>,
    /// Keyed `{step}_start` / `{step}_end`.
    timestamps: HashMap<String, DateTime<Utc>>,
}

impl StepEvents {
    /// Step names in the order their first start was seen.
    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn timestamps(&self) -> &HashMap<String, DateTime<Utc>> {
        &self.timestamps
    }

    pub fn start(&self, step: &str) -> Option<DateTime<Utc>> {
        self.timestamps.get(&start_key(step)).copied()
    }

    pub fn end(&self, step: &str) -> Option<DateTime<Utc>> {
        self.timestamps.get(&end_key(step)).copied()
    }

    /// Seconds between start and end; `None` unless both were recorded.
    pub fn elapsed(&self, step: &str) -> Option<f64> {
        Some(seconds_between(self.start(step)?, self.end(step)?))
    }

    /// `(step, seconds)` for every step with both ends, in step order.
    /// Steps that never completed are left out.
    pub fn step_times(&self) -> Vec<(&str, f64)> {
        self.steps
            .iter()
            .filter_map(|step| Some((step.as_str(), self.elapsed(step)?)))
            .collect()
    }
}

/// Scan `log` in order and collect start/end instants per step.
///
/// Entries whose code is not an action code are ignored. A repeated start
/// resets the step: its previous end is discarded. Entries with no step name
/// or an unparseable time are skipped with a warning, but a start entry still
/// registers its step name.
pub fn extract_step_events(log: &RunLog, filter: &StepFilter) -> StepEvents {
    let mut events = StepEvents::default();
    let mut seen: BTreeSet<&str> = BTreeSet::new();

    for entry in &log.entries {
        let code = entry.log_code();
        if !matches!(code, LogCode::ActionStarted | LogCode::ActionCompleted) {
            continue;
        }
        let Some(step) = entry.state_name() else {
            tracing::warn!(
                code = %entry.code,
                time = %entry.time,
                "log entry has no state name, skipping"
            );
            continue;
        };
        if !filter.allows(step) {
            continue;
        }
        if code == LogCode::ActionStarted && seen.insert(step) {
            events.steps.push(step.to_string());
        }
        let Some(at) = entry.timestamp() else {
            tracing::warn!(step, time = %entry.time, "unparseable log entry time, skipping");
            continue;
        };

        match code {
            LogCode::ActionStarted => {
                events.timestamps.insert(start_key(step), at);
                events.timestamps.remove(&end_key(step));
            }
            LogCode::ActionCompleted => {
                events.timestamps.insert(end_key(step), at);
            }
            _ => {}
        }
    }

    tracing::debug!(
        steps = events.steps.len(),
        filtered = !filter.is_empty(),
        "extracted step events"
    );
    events
}

/// Elapsed seconds between two instants, with microsecond precision.
pub fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let delta = end - start;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}

fn start_key(step: &str) -> String {
    format!("{step}_start")
}

fn end_key(step: &str) -> String {
    format!("{step}_end")
}
