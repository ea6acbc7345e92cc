use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::parse_timestamp;

/// Lifecycle status of a run as reported by the service.
///
/// Unknown values are preserved verbatim so a snapshot written by a newer
/// service version round-trips.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RunStatus {
    Active,
    Inactive,
    Succeeded,
    Failed,
    Ended,
    Other(String),
}

impl RunStatus {
    /// The only status whose logs are aggregated into metrics.
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Succeeded)
    }

    /// Terminal runs never change again on the service side.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Ended
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Active => "ACTIVE",
            RunStatus::Inactive => "INACTIVE",
            RunStatus::Succeeded => "SUCCEEDED",
            RunStatus::Failed => "FAILED",
            RunStatus::Ended => "ENDED",
            RunStatus::Other(s) => s,
        }
    }
}

impl From<String> for RunStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "ACTIVE" => RunStatus::Active,
            "INACTIVE" => RunStatus::Inactive,
            "SUCCEEDED" => RunStatus::Succeeded,
            "FAILED" => RunStatus::Failed,
            "ENDED" => RunStatus::Ended,
            _ => RunStatus::Other(value),
        }
    }
}

impl From<RunStatus> for String {
    fn from(value: RunStatus) -> Self {
        match value {
            RunStatus::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution of a flow, as listed by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub flow_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub start_time: String,
    /// `None` while the run is still active.
    #[serde(default)]
    pub completion_time: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RunSummary {
    pub fn new(
        run_id: impl Into<String>,
        flow_id: impl Into<String>,
        status: RunStatus,
        start_time: impl Into<String>,
        completion_time: Option<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            flow_id: flow_id.into(),
            status,
            start_time: start_time.into(),
            completion_time,
            extra: Map::new(),
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.start_time)
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completion_time.as_deref().and_then(parse_timestamp)
    }
}
