use async_trait::async_trait;
use tracker_core::{IssueId, TrackerResult};
use tracker_domain::{Issue, IssueUpdate, PositionUpdate, TimeLogEntry};

pub type ProjectId = i64;

/// Remote endpoints of the issue tracker.
///
/// Implementations map transport failures to `TrackerError::Network` and
/// rejected payloads to `TrackerError::Validation`; the board decides what
/// is retryable from that distinction.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackerApi: Send + Sync {
    /// Apply a partial update and return the canonical record.
    async fn update_issue(&self, issue_id: IssueId, update: IssueUpdate) -> TrackerResult<Issue>;

    /// Bulk position write for a whole board.
    async fn reposition(&self, batch: Vec<PositionUpdate>) -> TrackerResult<()>;

    async fn log_time(&self, entry: TimeLogEntry) -> TrackerResult<()>;

    async fn fetch_issues(&self, project_id: ProjectId) -> TrackerResult<Vec<Issue>>;
}
