use std::ops::AddAssign;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::parse_timestamp;

/// The event log of one run, in the order delivered by the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
    #[serde(default)]
    pub entries: Vec<LogEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RunLog {
    pub fn new(entries: Vec<LogEntry>) -> Self {
        Self {
            entries,
            extra: Map::new(),
        }
    }
}

/// Classification of a log entry `code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCode {
    ActionStarted,
    ActionCompleted,
    /// Any other action-related code (polled, failed, ...).
    OtherAction,
    /// Run-level codes such as `FlowStarted` or `FlowSucceeded`.
    NotAction,
}

impl LogCode {
    pub fn parse(code: &str) -> Self {
        match code {
            "ActionStarted" => LogCode::ActionStarted,
            "ActionCompleted" => LogCode::ActionCompleted,
            c if c.contains("Action") => LogCode::OtherAction,
            _ => LogCode::NotAction,
        }
    }

    pub fn is_action(self) -> bool {
        !matches!(self, LogCode::NotAction)
    }
}

/// One state transition of a run.
///
/// `details` is an open map; the accessors below return `None` when a key
/// is missing or has an unexpected shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub code: String,
    pub time: String,
    #[serde(default)]
    pub details: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LogEntry {
    pub fn new(
        code: impl Into<String>,
        time: impl Into<String>,
        details: Map<String, Value>,
    ) -> Self {
        Self {
            code: code.into(),
            time: time.into(),
            details,
            extra: Map::new(),
        }
    }

    pub fn log_code(&self) -> LogCode {
        LogCode::parse(&self.code)
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.time)
    }

    pub fn state_name(&self) -> Option<&str> {
        self.details.get("state_name")?.as_str()
    }

    /// Output payload written by the action provider for `step`.
    pub fn output_for(&self, step: &str) -> Option<&Value> {
        self.details.get("output")?.get(step)
    }

    /// Transfer counters reported under `output.{step}.details`.
    pub fn transfer_counters(&self, step: &str) -> Option<TransferCounters> {
        let details = self.output_for(step)?.get("details")?;
        Some(TransferCounters {
            bytes_transferred: details.get("bytes_transferred")?.as_u64()?,
            files_transferred: details.get("files_transferred")?.as_u64()?,
            files_skipped: details.get("files_skipped")?.as_u64()?,
        })
    }
}

/// Byte and file counters reported by a completed transfer step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCounters {
    pub bytes_transferred: u64,
    pub files_transferred: u64,
    pub files_skipped: u64,
}

/// Counters saturate at `u64::MAX` instead of overflowing.
impl AddAssign for TransferCounters {
    fn add_assign(&mut self, rhs: Self) {
        self.bytes_transferred = self.bytes_transferred.saturating_add(rhs.bytes_transferred);
        self.files_transferred = self.files_transferred.saturating_add(rhs.files_transferred);
        self.files_skipped = self.files_skipped.saturating_add(rhs.files_skipped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(value: Value) -> LogEntry {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_log_code_parse() {
        assert_eq!(LogCode::parse("ActionStarted"), LogCode::ActionStarted);
        assert_eq!(LogCode::parse("ActionCompleted"), LogCode::ActionCompleted);
        assert_eq!(LogCode::parse("ActionPolled"), LogCode::OtherAction);
        assert_eq!(LogCode::parse("FlowSucceeded"), LogCode::NotAction);
        assert!(!LogCode::NotAction.is_action());
    }

    #[test]
    fn test_transfer_counters() {
        let e = entry(json!({
            "code": "ActionCompleted",
            "time": "2024-01-01T00:00:10+00:00",
            "details": {
                "state_name": "Xfer1",
                "output": {
                    "Xfer1": {"details": {
                        "bytes_transferred": 500,
                        "files_transferred": 2,
                        "files_skipped": 0
                    }}
                }
            }
        }));
        assert_eq!(e.state_name(), Some("Xfer1"));
        assert_eq!(
            e.transfer_counters("Xfer1"),
            Some(TransferCounters {
                bytes_transferred: 500,
                files_transferred: 2,
                files_skipped: 0,
            })
        );
        assert!(e.transfer_counters("Other").is_none());
    }

    #[test]
    fn test_accessors_tolerate_missing_keys() {
        let e = entry(json!({"code": "ActionCompleted", "time": "2024-01-01T00:00:10+00:00"}));
        assert!(e.state_name().is_none());
        assert!(e.output_for("Xfer1").is_none());
        assert!(e.transfer_counters("Xfer1").is_none());

        let e = entry(json!({
            "code": "ActionCompleted",
            "time": "2024-01-01T00:00:10+00:00",
            "details": {"state_name": 7, "output": "not a map"}
        }));
        assert!(e.state_name().is_none());
        assert!(e.output_for("Xfer1").is_none());
    }

    #[test]
    fn test_counters_add() {
        let mut total = TransferCounters::default();
        total += TransferCounters {
            bytes_transferred: 10,
            files_transferred: 1,
            files_skipped: 2,
        };
        total += TransferCounters {
            bytes_transferred: 5,
            files_transferred: 1,
            files_skipped: 0,
        };
        assert_eq!(total.bytes_transferred, 15);
        assert_eq!(total.files_transferred, 2);
        assert_eq!(total.files_skipped, 2);
    }

    #[test]
    fn test_counters_saturate() {
        let huge = TransferCounters {
            bytes_transferred: u64::MAX,
            files_transferred: u64::MAX - 1,
            files_skipped: 1,
        };
        let mut total = huge;
        total += huge;
        assert_eq!(total.bytes_transferred, u64::MAX);
        assert_eq!(total.files_transferred, u64::MAX);
        assert_eq!(total.files_skipped, 2);
    }
}
