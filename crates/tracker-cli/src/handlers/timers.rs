use crate::cli::TimersAction;
use crate::context::CliContext;
use crate::output;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracker_core::TrackerError;
use tracker_domain::{
    format_duration, round_hours, CompletedSession, TimeLogEntry, TimerRecord, TimerStatus,
};

#[derive(Debug, Serialize)]
pub struct TimerView {
    pub issue_id: i64,
    pub status: TimerStatus,
    pub elapsed_ms: i64,
    pub elapsed: String,
    pub estimate: Option<f64>,
    pub progress: Option<f64>,
}

impl TimerView {
    fn new(record: &TimerRecord, now: DateTime<Utc>) -> Self {
        let elapsed_ms = record.elapsed_ms_at(now);
        Self {
            issue_id: record.issue_id,
            status: record.status,
            elapsed_ms,
            elapsed: format_duration(elapsed_ms),
            estimate: record.estimate,
            progress: record.progress_at(now),
        }
    }
}

/// What a force-stop finalized. The CLI cannot reach the time-log endpoint,
/// so `log_entry` is the entry a running session would have submitted.
#[derive(Debug, Serialize)]
pub struct ForceStopView {
    pub issue_id: i64,
    pub elapsed_ms: i64,
    pub hours: f64,
    pub log_entry: Option<TimeLogEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl From<CompletedSession> for ForceStopView {
    fn from(session: CompletedSession) -> Self {
        Self {
            issue_id: session.issue_id,
            elapsed_ms: session.elapsed_ms,
            hours: round_hours(session.hours),
            log_entry: session.log,
            log_file: None,
        }
    }
}

fn write_log_entry(path: &Path, entry: &TimeLogEntry) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(entry)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write time-log entry to {}", path.display()))
}

pub async fn handle(ctx: &CliContext, action: TimersAction) -> anyhow::Result<()> {
    let now = Utc::now();
    match action {
        TimersAction::List { running } => {
            let registry = ctx.registry(now).await?;
            let items: Vec<TimerView> = registry
                .records()
                .into_iter()
                .filter(|r| !running || r.status == TimerStatus::Running)
                .map(|r| TimerView::new(r, now))
                .collect();
            output::output_list(items)
        }
        TimersAction::Get { issue_id } => {
            let registry = ctx.registry(now).await?;
            match registry.get(issue_id) {
                Some(record) => output::output_success(TimerView::new(record, now)),
                None => output::output_error(&format!("Timer not found for issue {}", issue_id)),
            }
        }
        TimersAction::ForceStop { issue_id, out } => {
            let mut registry = ctx.registry(now).await?;
            match registry.force_stop(issue_id, now) {
                Ok(session) => {
                    let mut view = ForceStopView::from(session);
                    // Written before the reset is saved so a failed write loses nothing.
                    if let (Some(path), Some(entry)) = (out, &view.log_entry) {
                        write_log_entry(&path, entry)?;
                        view.log_file = Some(path);
                    }
                    ctx.save(&registry.snapshot()).await?;
                    tracing::info!("Force-stopped timer for issue {} from the CLI", issue_id);
                    output::output_success(view)
                }
                Err(TrackerError::NotFound(_)) => {
                    output::output_error(&format!("Timer not found for issue {}", issue_id))
                }
                Err(e) => Err(e.into()),
            }
        }
    }
}
