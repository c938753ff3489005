//! Async driver for the board state machine.
//!
//! [`BoardSession::dispatch`] runs the transition synchronously under the
//! state lock, then hands the resulting effects to a spawned task. That task
//! performs the endpoint calls and feeds each outcome back into the machine,
//! so one user action and all of its follow-ups run to completion on the
//! returned handle. The lock is never held across an `.await`.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracker_core::{Clock, IssueId, TrackerResult};
use tracker_domain::{
    BoardEffect, BoardError, BoardEvent, BoardMachine, BoardPhase, ConflictRecord, Issue,
    IssueStatus, IssueUpdate, Resolution,
};

use crate::api::{ProjectId, TrackerApi};
use crate::timers::TimerService;

pub struct BoardSession {
    project_id: ProjectId,
    machine: Mutex<BoardMachine>,
    api: Arc<dyn TrackerApi>,
    clock: Arc<dyn Clock>,
    timers: Option<Arc<TimerService>>,
}

impl BoardSession {
    pub fn new(
        project_id: ProjectId,
        issues: Vec<Issue>,
        api: Arc<dyn TrackerApi>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        tracing::info!("Opened board for project {} with {} issues", project_id, issues.len());
        Self {
            project_id,
            machine: Mutex::new(BoardMachine::new(issues)),
            api,
            clock,
            timers: None,
        }
    }

    /// Forward confirmed status changes to `timers`.
    pub fn with_timers(mut self, timers: Arc<TimerService>) -> Self {
        self.timers = Some(timers);
        self
    }

    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    /// Apply `event` and run its effects in the background.
    ///
    /// A rejected event (unknown issue, update already in flight, invalid
    /// edit) returns the error and spawns nothing.
    pub fn dispatch(self: &Arc<Self>, event: BoardEvent) -> TrackerResult<JoinHandle<()>> {
        let effects = self.machine.lock().handle_at(event, self.clock.now())?;
        let session = Arc::clone(self);
        Ok(tokio::spawn(async move {
            session.run_effects(effects).await;
        }))
    }

    pub fn drag_start(self: &Arc<Self>, issue_id: IssueId) -> TrackerResult<JoinHandle<()>> {
        self.dispatch(BoardEvent::DragStart { issue_id })
    }

    pub fn drag_cancel(self: &Arc<Self>) -> TrackerResult<JoinHandle<()>> {
        self.dispatch(BoardEvent::DragCancel)
    }

    pub fn drop_on(
        self: &Arc<Self>,
        target_status: IssueStatus,
        target_index: usize,
    ) -> TrackerResult<JoinHandle<()>> {
        self.dispatch(BoardEvent::Drop {
            target_status,
            target_index,
        })
    }

    pub fn edit(
        self: &Arc<Self>,
        issue_id: IssueId,
        update: IssueUpdate,
    ) -> TrackerResult<JoinHandle<()>> {
        self.dispatch(BoardEvent::Edit { issue_id, update })
    }

    pub fn sync(self: &Arc<Self>) -> TrackerResult<JoinHandle<()>> {
        self.dispatch(BoardEvent::SyncRequested)
    }

    pub fn retry(self: &Arc<Self>) -> TrackerResult<JoinHandle<()>> {
        self.dispatch(BoardEvent::Retry)
    }

    pub fn dismiss_error(self: &Arc<Self>) -> TrackerResult<JoinHandle<()>> {
        self.dispatch(BoardEvent::DismissError)
    }

    pub fn resolve_conflict(
        self: &Arc<Self>,
        issue_id: IssueId,
        resolution: Resolution,
    ) -> TrackerResult<JoinHandle<()>> {
        self.dispatch(BoardEvent::ResolveConflict {
            issue_id,
            resolution,
        })
    }

    async fn run_effects(&self, effects: Vec<BoardEffect>) {
        let mut queue: VecDeque<BoardEffect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            let Some(event) = self.perform(effect).await else {
                continue;
            };
            let result = self.machine.lock().handle_at(event, self.clock.now());
            match result {
                Ok(more) => queue.extend(more),
                Err(e) => tracing::warn!("Board rejected follow-up event: {}", e),
            }
        }
    }

    /// Carry out one effect; returns the event describing its outcome, if any.
    async fn perform(&self, effect: BoardEffect) -> Option<BoardEvent> {
        match effect {
            BoardEffect::SendUpdate { issue_id, update } => {
                match self.api.update_issue(issue_id, update).await {
                    Ok(issue) => Some(BoardEvent::UpdateSucceeded { issue_id, issue }),
                    Err(e) => {
                        tracing::warn!("Update of issue {} failed: {}", issue_id, e);
                        Some(BoardEvent::UpdateFailed {
                            issue_id,
                            error: BoardError::for_issue(&e, issue_id),
                        })
                    }
                }
            }
            BoardEffect::SendReposition { batch } => {
                let size = batch.len();
                match self.api.reposition(batch).await {
                    Ok(()) => tracing::debug!("Repositioned {} issues", size),
                    Err(e) => tracing::warn!("Bulk reposition of {} issues failed: {}", size, e),
                }
                None
            }
            BoardEffect::FetchIssues => match self.api.fetch_issues(self.project_id).await {
                Ok(issues) => Some(BoardEvent::SyncCompleted { issues }),
                Err(e) => Some(BoardEvent::SyncFailed {
                    message: e.to_string(),
                }),
            },
            BoardEffect::StatusChanged {
                issue_id,
                status,
                estimate,
            } => {
                if let Some(timers) = &self.timers {
                    timers.on_status_change(issue_id, status, estimate).await;
                }
                None
            }
            BoardEffect::ConflictDetected { issue_id } => {
                tracing::info!("Issue {} awaits conflict resolution", issue_id);
                None
            }
            BoardEffect::ReportError(error) => {
                tracing::error!("Board error ({:?}): {}", error.kind, error.message);
                None
            }
        }
    }

    pub fn phase(&self) -> BoardPhase {
        self.machine.lock().phase()
    }

    pub fn issue(&self, issue_id: IssueId) -> Option<Issue> {
        self.machine.lock().issue(issue_id).cloned()
    }

    /// Issues of one status column in display order.
    pub fn column(&self, status: IssueStatus) -> Vec<Issue> {
        self.machine
            .lock()
            .bucket(status)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn is_pending(&self, issue_id: IssueId) -> bool {
        self.machine.lock().is_pending(issue_id)
    }

    pub fn pending_ids(&self) -> Vec<IssueId> {
        self.machine.lock().pending_ids()
    }

    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        self.machine
            .lock()
            .conflicts()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn last_error(&self) -> Option<BoardError> {
        self.machine.lock().last_error().cloned()
    }

    pub fn can_retry(&self) -> bool {
        self.machine.lock().can_retry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockTrackerApi;
    use chrono::{DateTime, Duration, Utc};
    use tracker_core::{ManualClock, TrackerError};

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn abc() -> Vec<Issue> {
        vec![
            Issue::new(1, "A", IssueStatus::Todo, 0, t0()),
            Issue::new(2, "B", IssueStatus::Todo, 1, t0()),
            Issue::new(3, "C", IssueStatus::Todo, 2, t0()),
        ]
    }

    fn session(api: MockTrackerApi) -> Arc<BoardSession> {
        Arc::new(BoardSession::new(
            42,
            abc(),
            Arc::new(api),
            Arc::new(ManualClock::new(t0())),
        ))
    }

    fn titles(session: &BoardSession, status: IssueStatus) -> Vec<String> {
        session.column(status).into_iter().map(|i| i.title).collect()
    }

    #[tokio::test]
    async fn successful_drop_confirms_and_repositions() {
        let mut api = MockTrackerApi::new();
        api.expect_update_issue()
            .withf(|id, update| *id == 3 && *update == IssueUpdate::placement(IssueStatus::Todo, 0))
            .times(1)
            .returning(|id, _| Ok(Issue::new(id, "C", IssueStatus::Todo, 0, t0() + Duration::seconds(1))));
        api.expect_reposition()
            .withf(|batch| batch.len() == 3)
            .times(1)
            .returning(|_| Ok(()));
        let board = session(api);

        board.drag_start(3).unwrap().await.unwrap();
        board.drop_on(IssueStatus::Todo, 0).unwrap().await.unwrap();

        assert_eq!(titles(&board, IssueStatus::Todo), vec!["C", "A", "B"]);
        assert_eq!(board.phase(), BoardPhase::Idle);
        assert!(board.pending_ids().is_empty());
    }

    #[tokio::test]
    async fn network_failure_rolls_back() {
        let mut api = MockTrackerApi::new();
        api.expect_update_issue()
            .times(1)
            .returning(|_, _| Err(TrackerError::Network("connection reset".into())));
        api.expect_reposition().times(0);
        let board = session(api);

        board.drag_start(1).unwrap().await.unwrap();
        board.drop_on(IssueStatus::Done, 0).unwrap().await.unwrap();

        assert_eq!(titles(&board, IssueStatus::Todo), vec!["A", "B", "C"]);
        assert_eq!(board.phase(), BoardPhase::Error);
        assert!(board.can_retry());
    }

    #[tokio::test]
    async fn reposition_failure_is_only_logged() {
        let mut api = MockTrackerApi::new();
        api.expect_update_issue()
            .returning(|id, _| Ok(Issue::new(id, "A", IssueStatus::Done, 0, t0())));
        api.expect_reposition()
            .returning(|_| Err(TrackerError::Network("503".into())));
        let board = session(api);

        board.drag_start(1).unwrap().await.unwrap();
        board.drop_on(IssueStatus::Done, 0).unwrap().await.unwrap();

        assert_eq!(board.issue(1).unwrap().status, IssueStatus::Done);
        assert_eq!(board.phase(), BoardPhase::Idle);
        assert!(board.last_error().is_none());
    }

    #[tokio::test]
    async fn sync_failure_keeps_local_state() {
        let mut api = MockTrackerApi::new();
        api.expect_fetch_issues()
            .withf(|project| *project == 42)
            .returning(|_| Err(TrackerError::Network("offline".into())));
        let board = session(api);

        board.sync().unwrap().await.unwrap();

        assert_eq!(titles(&board, IssueStatus::Todo), vec!["A", "B", "C"]);
        assert_eq!(board.phase(), BoardPhase::Idle);
    }

    #[tokio::test]
    async fn rejected_event_spawns_nothing() {
        let board = session(MockTrackerApi::new());
        let err = board.drag_start(99).unwrap_err();
        assert!(matches!(err, TrackerError::NotFound(_)));
    }
}
