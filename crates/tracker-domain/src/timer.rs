//! Per-issue work timers driven by confirmed status changes.
//!
//! The registry only does bookkeeping. Persisting the snapshot and submitting
//! time-log entries are left to the caller, which receives a
//! [`TimerTransition`] for every notification.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracker_core::{IssueId, ResumeGapPolicy, TrackerError, TrackerResult};

use crate::issue::IssueStatus;

const MS_PER_HOUR: f64 = 3_600_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerStatus {
    Running,
    Paused,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerRecord {
    pub issue_id: IssueId,
    pub status: TimerStatus,
    /// Start of the interval not yet folded into `total_elapsed_ms`. Set only while running.
    pub start_time: Option<DateTime<Utc>>,
    pub total_elapsed_ms: i64,
    #[serde(default)]
    pub estimate: Option<f64>,
}

impl TimerRecord {
    fn started(issue_id: IssueId, estimate: Option<f64>, now: DateTime<Utc>) -> Self {
        Self {
            issue_id,
            status: TimerStatus::Running,
            start_time: Some(now),
            total_elapsed_ms: 0,
            estimate,
        }
    }

    /// Move the open interval into the total and restart it at `now`.
    fn fold(&mut self, now: DateTime<Utc>) {
        if let Some(start) = self.start_time {
            let delta = (now - start).num_milliseconds().max(0);
            self.total_elapsed_ms += delta;
            self.start_time = Some(now);
        }
    }

    fn resume(&mut self, now: DateTime<Utc>) {
        self.status = TimerStatus::Running;
        self.start_time = Some(now);
    }

    /// Elapsed time including the interval still open at `now`.
    pub fn elapsed_ms_at(&self, now: DateTime<Utc>) -> i64 {
        let open = self
            .start_time
            .map(|start| (now - start).num_milliseconds().max(0))
            .unwrap_or(0);
        self.total_elapsed_ms + open
    }

    /// Share of the estimate used so far; `None` without a positive estimate.
    pub fn progress_at(&self, now: DateTime<Utc>) -> Option<f64> {
        let estimate = self.estimate.filter(|h| *h > 0.0)?;
        Some(self.elapsed_ms_at(now) as f64 / MS_PER_HOUR / estimate)
    }
}

/// Entry for the time-log endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeLogEntry {
    pub issue_id: IssueId,
    pub hours: f64,
    pub date: NaiveDate,
    pub description: String,
}

impl TimeLogEntry {
    pub fn for_session(issue_id: IssueId, elapsed_ms: i64, at: DateTime<Utc>) -> Self {
        Self {
            issue_id,
            hours: round_hours(elapsed_ms as f64 / MS_PER_HOUR),
            date: at.date_naive(),
            description: format!("Automatic timer: {}", format_duration(elapsed_ms)),
        }
    }
}

/// Hours as reported to the time log: three decimals.
pub fn round_hours(hours: f64) -> f64 {
    (hours * 1000.0).round() / 1000.0
}

/// `1h 02m 03s`
pub fn format_duration(ms: i64) -> String {
    let secs = ms.max(0) / 1000;
    format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// A finished session. `log` is absent when the session was below the logging threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedSession {
    pub issue_id: IssueId,
    pub elapsed_ms: i64,
    pub hours: f64,
    pub log: Option<TimeLogEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimerTransition {
    Started,
    Resumed,
    /// A completed timer was reset and started again.
    NewSession,
    Paused,
    Completed(CompletedSession),
    Unchanged,
}

impl TimerTransition {
    /// Whether the registry changed and should be persisted.
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }

    pub fn log_entry(&self) -> Option<&TimeLogEntry> {
        match self {
            Self::Completed(session) => session.log.as_ref(),
            _ => None,
        }
    }
}

/// Persisted form of the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    pub timers: Vec<TimerRecord>,
}

#[derive(Debug, Clone)]
pub struct TimerRegistry {
    records: HashMap<IssueId, TimerRecord>,
    min_log_hours: f64,
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new(0.001)
    }
}

impl TimerRegistry {
    pub fn new(min_log_hours: f64) -> Self {
        Self {
            records: HashMap::new(),
            min_log_hours,
        }
    }

    pub fn on_status_change(
        &mut self,
        issue_id: IssueId,
        status: IssueStatus,
        estimate: Option<f64>,
        now: DateTime<Utc>,
    ) -> TimerTransition {
        let transition = match status {
            IssueStatus::InProgress => self.start(issue_id, estimate, now),
            IssueStatus::Todo => self.pause(issue_id, now),
            IssueStatus::Done => {
                let active = self
                    .records
                    .get(&issue_id)
                    .is_some_and(|r| r.status != TimerStatus::Completed);
                if active {
                    self.finalize(issue_id, now)
                } else {
                    TimerTransition::Unchanged
                }
            }
            IssueStatus::CodeReview => TimerTransition::Unchanged,
        };
        if transition.is_change() {
            tracing::info!("Timer for issue {} -> {}: {:?}", issue_id, status, transition);
        }
        transition
    }

    fn start(
        &mut self,
        issue_id: IssueId,
        estimate: Option<f64>,
        now: DateTime<Utc>,
    ) -> TimerTransition {
        let Some(record) = self.records.get_mut(&issue_id) else {
            self.records
                .insert(issue_id, TimerRecord::started(issue_id, estimate, now));
            return TimerTransition::Started;
        };
        if estimate.is_some() {
            record.estimate = estimate;
        }
        match record.status {
            TimerStatus::Running => TimerTransition::Unchanged,
            TimerStatus::Paused => {
                record.resume(now);
                TimerTransition::Resumed
            }
            TimerStatus::Completed => {
                record.total_elapsed_ms = 0;
                record.resume(now);
                TimerTransition::NewSession
            }
        }
    }

    fn pause(&mut self, issue_id: IssueId, now: DateTime<Utc>) -> TimerTransition {
        match self.records.get_mut(&issue_id) {
            Some(record) if record.status == TimerStatus::Running => {
                record.fold(now);
                record.start_time = None;
                record.status = TimerStatus::Paused;
                TimerTransition::Paused
            }
            _ => TimerTransition::Unchanged,
        }
    }

    fn finalize(&mut self, issue_id: IssueId, now: DateTime<Utc>) -> TimerTransition {
        let min_log_hours = self.min_log_hours;
        let Some(record) = self.records.get_mut(&issue_id) else {
            return TimerTransition::Unchanged;
        };
        record.fold(now);
        let elapsed_ms = record.total_elapsed_ms;
        let hours = elapsed_ms as f64 / MS_PER_HOUR;

        record.total_elapsed_ms = 0;
        record.start_time = None;
        record.status = TimerStatus::Completed;

        let log = if hours >= min_log_hours {
            Some(TimeLogEntry::for_session(issue_id, elapsed_ms, now))
        } else {
            tracing::debug!(
                "Session for issue {} below threshold ({:.5}h), not logged",
                issue_id,
                hours
            );
            None
        };
        TimerTransition::Completed(CompletedSession {
            issue_id,
            elapsed_ms,
            hours,
            log,
        })
    }

    /// Stop a timer regardless of the issue's status, exactly as if it moved to done.
    pub fn force_stop(
        &mut self,
        issue_id: IssueId,
        now: DateTime<Utc>,
    ) -> TrackerResult<CompletedSession> {
        match self.finalize(issue_id, now) {
            TimerTransition::Completed(session) => {
                tracing::info!("Force-stopped timer for issue {}", issue_id);
                Ok(session)
            }
            _ => Err(TrackerError::NotFound(format!("timer for issue {}", issue_id))),
        }
    }

    /// Fold every running interval up to `now`. Returns how many timers were running.
    pub fn tick(&mut self, now: DateTime<Utc>) -> usize {
        let mut running = 0;
        for record in self.records.values_mut() {
            if record.status == TimerStatus::Running {
                record.fold(now);
                running += 1;
            }
        }
        running
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        let mut timers: Vec<TimerRecord> = self.records.values().cloned().collect();
        timers.sort_by_key(|r| r.issue_id);
        TimerSnapshot { timers }
    }

    /// Replace every record with a persisted snapshot.
    ///
    /// Running timers are credited with the time since their last fold
    /// according to `policy` and restarted at `now`.
    pub fn restore(&mut self, snapshot: TimerSnapshot, now: DateTime<Utc>, policy: ResumeGapPolicy) {
        self.records.clear();
        for mut record in snapshot.timers {
            if record.status == TimerStatus::Running {
                let gap_ms = record
                    .start_time
                    .map(|start| (now - start).num_milliseconds())
                    .unwrap_or(0);
                let credited = policy.credited_ms(gap_ms);
                record.total_elapsed_ms += credited;
                record.start_time = Some(now);
                tracing::debug!(
                    "Resumed timer for issue {}: gap {}ms, credited {}ms",
                    record.issue_id,
                    gap_ms,
                    credited
                );
            }
            self.records.insert(record.issue_id, record);
        }
    }

    pub fn get(&self, issue_id: IssueId) -> Option<&TimerRecord> {
        self.records.get(&issue_id)
    }

    pub fn records(&self) -> Vec<&TimerRecord> {
        let mut records: Vec<&TimerRecord> = self.records.values().collect();
        records.sort_by_key(|r| r.issue_id);
        records
    }

    pub fn running(&self) -> Vec<&TimerRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.status == TimerStatus::Running)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
