//! Data model mirrored from the remote flows service.
//!
//! Payloads coming from the service are schema-less beyond a handful of
//! well-known keys, so every type keeps the keys it does not model in an
//! open `extra` map and survives a load/save round trip unchanged.

mod flow;
mod log;
mod run;

pub use flow::{FlowDefinition, FlowGraph, FlowState};
pub use log::{LogCode, LogEntry, RunLog, TransferCounters};
pub use run::{RunStatus, RunSummary};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Run-log map as persisted in the run-log snapshot.
///
/// `None` marks a run whose log could not be fetched; it is distinct from a
/// run whose log is present but has no entries.
pub type RunLogMap = std::collections::BTreeMap<String, Option<RunLog>>;

/// Parse an ISO-8601 timestamp as delivered by the service.
///
/// Accepts RFC 3339 with an offset, a naive date-time (taken as UTC), and a
/// bare date (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
