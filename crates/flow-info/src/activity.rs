//! Run counts per calendar day and per hour of start time.

use std::collections::BTreeMap;

use chrono::{DateTime, DurationRound, NaiveDate, TimeDelta, Utc};

use crate::types::RunSummary;

/// How many runs started in each day and each hour, in UTC.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunActivity {
    pub per_day: BTreeMap<NaiveDate, usize>,
    /// Keyed by the start of the hour.
    pub per_hour: BTreeMap<DateTime<Utc>, usize>,
    /// Runs whose start time could not be parsed.
    pub skipped: usize,
}

impl RunActivity {
    pub fn runs_on(&self, day: NaiveDate) -> usize {
        self.per_day.get(&day).copied().unwrap_or(0)
    }

    /// The day with the most runs, earliest first on ties.
    pub fn busiest_day(&self) -> Option<(NaiveDate, usize)> {
        self.per_day
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(day, count)| (*day, *count))
    }
}

pub fn run_activity(runs: &[RunSummary]) -> RunActivity {
    let mut activity = RunActivity::default();
    for run in runs {
        let Some(start) = run.started_at() else {
            tracing::warn!(
                run_id = %run.run_id,
                start_time = %run.start_time,
                "unparseable start time"
            );
            activity.skipped += 1;
            continue;
        };
        *activity.per_day.entry(start.date_naive()).or_default() += 1;
        let hour = start.duration_trunc(TimeDelta::hours(1)).unwrap_or(start);
        *activity.per_hour.entry(hour).or_default() += 1;
    }
    activity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunStatus;

    fn run(id: &str, start: &str) -> RunSummary {
        RunSummary::new(id, "flow-1", RunStatus::Succeeded, start, None)
    }

    #[test]
    fn test_counts_per_day_and_hour() {
        let runs = vec![
            run("a", "2024-01-01T10:05:00+00:00"),
            run("b", "2024-01-01T10:55:00+00:00"),
            run("c", "2024-01-01T11:00:00+00:00"),
            run("d", "2024-01-02T23:59:59+00:00"),
            run("e", "yesterday"),
        ];
        let activity = run_activity(&runs);

        let jan1 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let jan2 = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(activity.runs_on(jan1), 3);
        assert_eq!(activity.runs_on(jan2), 1);
        assert_eq!(activity.skipped, 1);
        assert_eq!(activity.busiest_day(), Some((jan1, 3)));

        let ten: DateTime<Utc> = "2024-01-01T10:00:00Z".parse().unwrap();
        let eleven: DateTime<Utc> = "2024-01-01T11:00:00Z".parse().unwrap();
        assert_eq!(activity.per_hour[&ten], 2);
        assert_eq!(activity.per_hour[&eleven], 1);
        assert_eq!(activity.per_hour.len(), 3);
    }

    #[test]
    fn test_offsets_counted_in_utc() {
        let activity = run_activity(&[run("a", "2024-01-01T23:30:00-02:00")]);
        let jan2 = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(activity.runs_on(jan2), 1);
    }

    #[test]
    fn test_empty() {
        let activity = run_activity(&[]);
        assert!(activity.busiest_day().is_none());
        assert_eq!(activity, RunActivity::default());
    }
}
