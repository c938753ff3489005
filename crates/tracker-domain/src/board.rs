//! Board state machine.
//!
//! `BoardMachine::handle` is the transition function: it takes one event,
//! updates the in-memory board (snapshot store, ledger, conflicts, phase) and
//! returns the effects the caller must carry out. It never performs I/O, so
//! every transition can be exercised synchronously in tests.
//!
//! ```text
//!  idle ──drag_start──▶ dragging ──drop──▶ updating_issue ──ok/err──▶ idle | error
//!   │  ▲                   │                    │
//!   │  └────drag_cancel────┘                    │
//!   └──sync_requested──▶ syncing ──done/failed──┘ (back to the resting phase)
//! ```
//!
//! Mutations on different issues may overlap; while any ledger entry is open
//! the resting phase is `UpdatingIssue` and new drags and syncs are still
//! accepted. Completions are matched to their ledger entry by issue id and are
//! applied in every phase. A drag may also start while a sync is in flight.
//!
//! A sync never moves records an open mutation has placed: pending issues keep
//! their local copy, and neighbours shifted by a pending move take the server's
//! fields but keep their optimistic slot.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracker_core::{IssueId, TrackerError, TrackerResult};

use crate::conflict::{ConflictDetector, ConflictRecord, Resolution};
use crate::issue::{Issue, IssueStatus, IssueUpdate, PositionUpdate};
use crate::ledger::{Mutation, OptimisticLedger};
use crate::reorder::{normalize_positions, reorder};
use crate::store::IssueStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Network,
    Conflict,
    Persistence,
    Other,
}

impl From<&TrackerError> for ErrorKind {
    fn from(err: &TrackerError) -> Self {
        match err {
            TrackerError::Validation(_)
            | TrackerError::NotFound(_)
            | TrackerError::MutationInFlight { .. } => Self::Validation,
            TrackerError::Network(_) | TrackerError::Io(_) => Self::Network,
            TrackerError::Conflict { .. } => Self::Conflict,
            TrackerError::Persistence(_) => Self::Persistence,
            TrackerError::Serialization(_) | TrackerError::Internal(_) => Self::Other,
        }
    }
}

/// Error surfaced to the user by the board.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardError {
    pub kind: ErrorKind,
    pub message: String,
    pub issue_id: Option<IssueId>,
}

impl BoardError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            issue_id: None,
        }
    }

    pub fn for_issue(err: &TrackerError, issue_id: IssueId) -> Self {
        Self {
            kind: ErrorKind::from(err),
            message: err.to_string(),
            issue_id: Some(issue_id),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Network
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardPhase {
    Idle,
    Dragging { issue_id: IssueId },
    UpdatingIssue,
    Syncing,
    Error,
}

impl BoardPhase {
    /// Phases that accept a new drag, edit or sync.
    fn is_resting(&self) -> bool {
        matches!(self, Self::Idle | Self::UpdatingIssue | Self::Error)
    }

    fn accepts_drag(&self) -> bool {
        self.is_resting() || *self == Self::Syncing
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    DragStart {
        issue_id: IssueId,
    },
    DragCancel,
    Drop {
        target_status: IssueStatus,
        target_index: usize,
    },
    Edit {
        issue_id: IssueId,
        update: IssueUpdate,
    },
    UpdateSucceeded {
        issue_id: IssueId,
        issue: Issue,
    },
    UpdateFailed {
        issue_id: IssueId,
        error: BoardError,
    },
    SyncRequested,
    SyncCompleted {
        issues: Vec<Issue>,
    },
    SyncFailed {
        message: String,
    },
    Retry,
    DismissError,
    ResolveConflict {
        issue_id: IssueId,
        resolution: Resolution,
    },
}

impl BoardEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DragStart { .. } => "drag_start",
            Self::DragCancel => "drag_cancel",
            Self::Drop { .. } => "drop",
            Self::Edit { .. } => "edit",
            Self::UpdateSucceeded { .. } => "update_succeeded",
            Self::UpdateFailed { .. } => "update_failed",
            Self::SyncRequested => "sync_requested",
            Self::SyncCompleted { .. } => "sync_completed",
            Self::SyncFailed { .. } => "sync_failed",
            Self::Retry => "retry",
            Self::DismissError => "dismiss_error",
            Self::ResolveConflict { .. } => "resolve_conflict",
        }
    }
}

/// Work the caller performs on the machine's behalf.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardEffect {
    /// Call the update endpoint; answer with `UpdateSucceeded` or `UpdateFailed`.
    SendUpdate {
        issue_id: IssueId,
        update: IssueUpdate,
    },
    /// Fire-and-forget bulk reposition.
    SendReposition { batch: Vec<PositionUpdate> },
    /// Fetch the project's issues; answer with `SyncCompleted` or `SyncFailed`.
    FetchIssues,
    /// A confirmed status change, for the timer registry.
    StatusChanged {
        issue_id: IssueId,
        status: IssueStatus,
        estimate: Option<f64>,
    },
    ConflictDetected { issue_id: IssueId },
    ReportError(BoardError),
}

#[derive(Debug, Clone)]
pub struct BoardMachine {
    phase: BoardPhase,
    store: IssueStore,
    ledger: OptimisticLedger,
    conflicts: ConflictDetector,
    last_error: Option<BoardError>,
    failed: Option<Mutation>,
}

impl BoardMachine {
    pub fn new(issues: impl IntoIterator<Item = Issue>) -> Self {
        Self {
            phase: BoardPhase::Idle,
            store: IssueStore::from_issues(issues),
            ledger: OptimisticLedger::new(),
            conflicts: ConflictDetector::new(),
            last_error: None,
            failed: None,
        }
    }

    pub fn handle(&mut self, event: BoardEvent) -> TrackerResult<Vec<BoardEffect>> {
        self.handle_at(event, Utc::now())
    }

    pub fn handle_at(
        &mut self,
        event: BoardEvent,
        now: DateTime<Utc>,
    ) -> TrackerResult<Vec<BoardEffect>> {
        tracing::debug!("Board {:?} <- {}", self.phase, event.name());
        match event {
            BoardEvent::DragStart { issue_id } => self.drag_start(issue_id),
            BoardEvent::DragCancel => {
                if matches!(self.phase, BoardPhase::Dragging { .. }) {
                    self.settle();
                }
                Ok(Vec::new())
            }
            BoardEvent::Drop {
                target_status,
                target_index,
            } => self.drop_issue(target_status, target_index, now),
            BoardEvent::Edit { issue_id, update } => self.edit(issue_id, update, now),
            BoardEvent::UpdateSucceeded { issue_id, issue } => {
                Ok(self.update_succeeded(issue_id, issue))
            }
            BoardEvent::UpdateFailed { issue_id, error } => Ok(self.update_failed(issue_id, error)),
            BoardEvent::SyncRequested => {
                if !self.phase.is_resting() {
                    tracing::debug!("Sync skipped while {:?}", self.phase);
                    return Ok(Vec::new());
                }
                self.phase = BoardPhase::Syncing;
                Ok(vec![BoardEffect::FetchIssues])
            }
            BoardEvent::SyncCompleted { issues } => Ok(self.sync_completed(issues, now)),
            BoardEvent::SyncFailed { message } => {
                tracing::warn!("Sync failed, keeping local state: {}", message);
                if self.phase == BoardPhase::Syncing {
                    self.settle();
                }
                Ok(Vec::new())
            }
            BoardEvent::Retry => self.retry(now),
            BoardEvent::DismissError => {
                self.last_error = None;
                self.failed = None;
                if self.phase.is_resting() {
                    self.settle();
                }
                Ok(Vec::new())
            }
            BoardEvent::ResolveConflict {
                issue_id,
                resolution,
            } => {
                self.conflicts
                    .resolve(issue_id, resolution, &mut self.store, &mut self.ledger)?;
                if resolution == Resolution::Remote {
                    self.renumber();
                }
                Ok(Vec::new())
            }
        }
    }

    fn drag_start(&mut self, issue_id: IssueId) -> TrackerResult<Vec<BoardEffect>> {
        if !self.phase.accepts_drag() {
            tracing::debug!("Drag of issue {} ignored while {:?}", issue_id, self.phase);
            return Ok(Vec::new());
        }
        if !self.store.contains(issue_id) {
            return Err(TrackerError::NotFound(format!("issue {}", issue_id)));
        }
        if self.ledger.is_open(issue_id) {
            return Err(TrackerError::MutationInFlight { issue_id });
        }
        // A new gesture acknowledges the previous failure.
        self.last_error = None;
        self.failed = None;
        self.phase = BoardPhase::Dragging { issue_id };
        Ok(Vec::new())
    }

    fn drop_issue(
        &mut self,
        target_status: IssueStatus,
        target_index: usize,
        now: DateTime<Utc>,
    ) -> TrackerResult<Vec<BoardEffect>> {
        let BoardPhase::Dragging { issue_id } = self.phase else {
            tracing::debug!("Drop ignored while {:?}", self.phase);
            return Ok(Vec::new());
        };
        self.settle();

        if self.ledger.is_open(issue_id) {
            return Err(TrackerError::MutationInFlight { issue_id });
        }
        let outcome = reorder(&self.store.ordered(), issue_id, target_status, target_index)?;
        if !outcome.moved {
            tracing::debug!("Issue {} dropped onto itself", issue_id);
            return Ok(Vec::new());
        }
        let moved = outcome
            .get(issue_id)
            .ok_or_else(|| TrackerError::Internal(format!("issue {} lost in reorder", issue_id)))?;
        let update = IssueUpdate::placement(moved.status, moved.position);
        let mutation = self.mutation(issue_id, update, outcome.issues, outcome.batch);
        self.begin(mutation, now)
    }

    fn edit(
        &mut self,
        issue_id: IssueId,
        update: IssueUpdate,
        now: DateTime<Utc>,
    ) -> TrackerResult<Vec<BoardEffect>> {
        update.validate()?;
        let current = self
            .store
            .get(issue_id)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(format!("issue {}", issue_id)))?;
        if self.ledger.is_open(issue_id) {
            return Err(TrackerError::MutationInFlight { issue_id });
        }

        let mutation = if update.moves() {
            let status = update.status.unwrap_or(current.status);
            let original_index = self.store.index_in_bucket(issue_id).unwrap_or(0);
            let target_index = match update.position {
                // The engine counts slots with the issue still in place.
                Some(p) if status == current.status && p as usize > original_index => {
                    p as usize + 1
                }
                Some(p) => p as usize,
                None if status == current.status => original_index,
                None => self.store.bucket_len(status),
            };
            let outcome = reorder(&self.store.ordered(), issue_id, status, target_index)?;
            let mut issues = outcome.issues;
            let moved = issues
                .iter_mut()
                .find(|i| i.id == issue_id)
                .ok_or_else(|| {
                    TrackerError::Internal(format!("issue {} lost in reorder", issue_id))
                })?;
            update.apply_fields(moved);
            let mut sent = update.clone();
            sent.status = Some(moved.status);
            sent.position = Some(moved.position);
            let batch = if outcome.moved { outcome.batch } else { Vec::new() };
            self.mutation(issue_id, sent, issues, batch)
        } else {
            let mut edited = current.clone();
            update.apply_fields(&mut edited);
            self.mutation(issue_id, update, vec![edited], Vec::new())
        };

        if mutation.optimistic().is_none() {
            tracing::debug!("Edit of issue {} changes nothing", issue_id);
            return Ok(Vec::new());
        }
        self.begin(mutation, now)
    }

    /// Keep only the records that differ from the store.
    fn mutation(
        &self,
        issue_id: IssueId,
        update: IssueUpdate,
        issues: Vec<Issue>,
        batch: Vec<PositionUpdate>,
    ) -> Mutation {
        let changes = issues
            .into_iter()
            .filter(|issue| self.store.get(issue.id) != Some(issue))
            .collect();
        Mutation {
            issue_id,
            update,
            changes,
            batch,
        }
    }

    fn begin(&mut self, mutation: Mutation, now: DateTime<Utc>) -> TrackerResult<Vec<BoardEffect>> {
        let issue_id = mutation.issue_id;
        let update = mutation.update.clone();
        self.ledger.apply(&mut self.store, mutation, now)?;
        if self.phase.is_resting() {
            self.settle();
        }
        tracing::info!("Optimistically updated issue {}: {:?}", issue_id, update);
        Ok(vec![BoardEffect::SendUpdate { issue_id, update }])
    }

    fn update_succeeded(&mut self, issue_id: IssueId, issue: Issue) -> Vec<BoardEffect> {
        let Some(entry) = self.ledger.confirm(issue_id) else {
            tracing::warn!("Ignoring confirmation for issue {} with no open update", issue_id);
            return Vec::new();
        };
        self.conflicts.discard(issue_id);

        let mut effects = Vec::new();
        if !entry.mutation.batch.is_empty() {
            effects.push(BoardEffect::SendReposition {
                batch: entry.mutation.batch,
            });
        }
        if issue.status != entry.snapshot.status {
            effects.push(BoardEffect::StatusChanged {
                issue_id,
                status: issue.status,
                estimate: issue.estimate,
            });
        }
        tracing::info!(
            "Server confirmed issue {} (updated_at {})",
            issue_id,
            issue.updated_at
        );
        self.store.upsert(issue);
        self.renumber();

        if self.phase.is_resting() {
            self.settle();
        }
        effects
    }

    fn update_failed(&mut self, issue_id: IssueId, error: BoardError) -> Vec<BoardEffect> {
        let Some(entry) = self.ledger.rollback(&mut self.store, issue_id) else {
            tracing::warn!("Ignoring failure for issue {} with no open update", issue_id);
            return Vec::new();
        };
        self.conflicts.discard(issue_id);
        tracing::warn!("Update of issue {} failed, rolled back: {}", issue_id, error.message);

        self.failed = error.is_retryable().then_some(entry.mutation);
        self.last_error = Some(error.clone());
        if self.phase.is_resting() {
            self.settle();
        }
        vec![BoardEffect::ReportError(error)]
    }

    fn sync_completed(&mut self, issues: Vec<Issue>, now: DateTime<Utc>) -> Vec<BoardEffect> {
        let flagged = self.conflicts.scan(&self.ledger, &issues, now);

        let remote_ids: HashSet<IssueId> = issues.iter().map(|i| i.id).collect();
        let stale: Vec<IssueId> = self
            .store
            .ids()
            .filter(|id| !remote_ids.contains(id) && !self.ledger.is_open(*id))
            .collect();
        for id in stale {
            self.store.remove(id);
        }

        let mut replaced = 0usize;
        for issue in issues {
            if self.ledger.is_open(issue.id) {
                continue;
            }
            let merged = match self.store.get(issue.id) {
                Some(local) if self.ledger.displaces(issue.id) => {
                    let mut placed = issue.clone();
                    placed.status = local.status;
                    placed.position = local.position;
                    self.ledger.refresh_neighbour(&issue, &placed);
                    placed
                }
                _ => issue,
            };
            self.store.upsert(merged);
            replaced += 1;
        }
        // New or removed server issues can leave gaps or shared slots.
        self.renumber();
        tracing::debug!(
            "Sync merged {} issues, {} pending, {} new conflicts",
            replaced,
            self.ledger.len(),
            flagged.len()
        );

        if self.phase == BoardPhase::Syncing {
            self.settle();
        }
        flagged
            .into_iter()
            .map(|issue_id| BoardEffect::ConflictDetected { issue_id })
            .collect()
    }

    fn retry(&mut self, now: DateTime<Utc>) -> TrackerResult<Vec<BoardEffect>> {
        if self.phase != BoardPhase::Error {
            tracing::debug!("Retry ignored while {:?}", self.phase);
            return Ok(Vec::new());
        }
        let failed = self
            .failed
            .take()
            .ok_or_else(|| TrackerError::Validation("no failed update to retry".to_string()))?;
        let issue_id = failed.issue_id;
        if !self.store.contains(issue_id) {
            self.last_error = None;
            self.settle();
            return Err(TrackerError::NotFound(format!("issue {}", issue_id)));
        }

        let previous_error = self.last_error.take();
        let mutation = self.replay(&failed);
        if mutation.optimistic().is_none() {
            tracing::info!("Issue {} already matches the failed update", issue_id);
            self.settle();
            return Ok(Vec::new());
        }
        match self.begin(mutation, now) {
            Ok(effects) => {
                tracing::info!("Retrying update of issue {}", issue_id);
                Ok(effects)
            }
            Err(err) => {
                self.failed = Some(failed);
                self.last_error = previous_error;
                self.settle();
                Err(err)
            }
        }
    }

    /// Rebuild a failed mutation on top of the current records.
    ///
    /// The issue gets its edited fields and slot back; shifted neighbours only
    /// their slot, so anything the server changed on them since is kept.
    fn replay(&self, failed: &Mutation) -> Mutation {
        let slots: HashMap<IssueId, (IssueStatus, i32)> = failed
            .changes
            .iter()
            .map(|i| (i.id, (i.status, i.position)))
            .collect();
        let mut issues = self.store.ordered();
        for issue in issues.iter_mut() {
            if failed.update.moves() {
                if let Some(&(status, position)) = slots.get(&issue.id) {
                    issue.status = status;
                    issue.position = position;
                }
            }
            if issue.id == failed.issue_id {
                failed.update.apply_fields(issue);
            }
        }
        let issues = normalize_positions(&issues);

        let mut update = failed.update.clone();
        if update.moves() {
            if let Some(placed) = issues.iter().find(|i| i.id == failed.issue_id) {
                update.status = Some(placed.status);
                update.position = Some(placed.position);
            }
        }
        let batch = if failed.batch.is_empty() {
            Vec::new()
        } else {
            issues.iter().map(PositionUpdate::from).collect()
        };
        self.mutation(failed.issue_id, update, issues, batch)
    }

    /// Squeeze every bucket back to `0..n-1`, keeping the current order.
    fn renumber(&mut self) {
        for issue in normalize_positions(&self.store.ordered()) {
            if self.store.get(issue.id) != Some(&issue) {
                self.store.upsert(issue);
            }
        }
    }

    fn settle(&mut self) {
        self.phase = if self.last_error.is_some() {
            BoardPhase::Error
        } else if !self.ledger.is_empty() {
            BoardPhase::UpdatingIssue
        } else {
            BoardPhase::Idle
        };
    }

    pub fn phase(&self) -> BoardPhase {
        self.phase
    }

    pub fn store(&self) -> &IssueStore {
        &self.store
    }

    pub fn ledger(&self) -> &OptimisticLedger {
        &self.ledger
    }

    pub fn bucket(&self, status: IssueStatus) -> Vec<&Issue> {
        self.store.bucket(status)
    }

    pub fn issue(&self, issue_id: IssueId) -> Option<&Issue> {
        self.store.get(issue_id)
    }

    pub fn is_pending(&self, issue_id: IssueId) -> bool {
        self.ledger.is_open(issue_id)
    }

    pub fn pending_ids(&self) -> Vec<IssueId> {
        self.ledger.open_ids()
    }

    pub fn conflicts(&self) -> Vec<&ConflictRecord> {
        self.conflicts.pending()
    }

    pub fn last_error(&self) -> Option<&BoardError> {
        self.last_error.as_ref()
    }

    pub fn can_retry(&self) -> bool {
        self.phase == BoardPhase::Error && self.failed.is_some()
    }
}
