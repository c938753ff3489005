//! Optimistic-update ledger.
//!
//! Before a mutation touches the snapshot store, the ledger captures the
//! records it is about to overwrite. An entry is closed exactly once: by
//! `confirm` when the server accepts the change, or by `rollback`, which
//! writes the captured records back.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracker_core::{IssueId, TrackerError, TrackerResult};

use crate::issue::{Issue, IssueUpdate, PositionUpdate};
use crate::reorder::normalize_positions;
use crate::store::IssueStore;

/// A locally derived change to one issue, ready to be applied and sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub issue_id: IssueId,
    /// Fields sent to the update endpoint.
    pub update: IssueUpdate,
    /// New versions of every record the change touches, the mutated issue included.
    pub changes: Vec<Issue>,
    /// Positional batch for the bulk reposition call; empty for field-only edits.
    pub batch: Vec<PositionUpdate>,
}

impl Mutation {
    pub fn optimistic(&self) -> Option<&Issue> {
        self.changes.iter().find(|i| i.id == self.issue_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub issue_id: IssueId,
    /// The issue exactly as it was before the mutation.
    pub snapshot: Issue,
    /// Pre-mutation versions of other issues the same move shifted.
    pub displaced: Vec<Issue>,
    pub mutation: Mutation,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct OptimisticLedger {
    entries: HashMap<IssueId, LedgerEntry>,
}

impl OptimisticLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the affected records, then write the mutation into the store.
    ///
    /// Fails without touching the store when the issue already has an open
    /// entry or is not in the store.
    pub fn apply(
        &mut self,
        store: &mut IssueStore,
        mutation: Mutation,
        now: DateTime<Utc>,
    ) -> TrackerResult<()> {
        let issue_id = mutation.issue_id;
        if self.entries.contains_key(&issue_id) {
            return Err(TrackerError::MutationInFlight { issue_id });
        }
        let snapshot = store
            .get(issue_id)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(format!("issue {}", issue_id)))?;
        if mutation.optimistic().is_none() {
            return Err(TrackerError::Internal(format!(
                "mutation for issue {} carries no record for it",
                issue_id
            )));
        }

        let displaced: Vec<Issue> = mutation
            .changes
            .iter()
            .filter(|change| change.id != issue_id)
            .filter_map(|change| store.get(change.id).cloned())
            .collect();

        for change in &mutation.changes {
            store.upsert(change.clone());
        }

        tracing::debug!(
            "Opened ledger entry for issue {} ({} displaced)",
            issue_id,
            displaced.len()
        );

        self.entries.insert(
            issue_id,
            LedgerEntry {
                issue_id,
                snapshot,
                displaced,
                mutation,
                created_at: now,
            },
        );
        Ok(())
    }

    /// Close an entry after the server accepted the change.
    pub fn confirm(&mut self, issue_id: IssueId) -> Option<LedgerEntry> {
        let entry = self.entries.remove(&issue_id);
        if entry.is_some() {
            tracing::debug!("Confirmed ledger entry for issue {}", issue_id);
        }
        entry
    }

    /// Close an entry and restore the records it captured.
    ///
    /// Displaced neighbours that are under their own open entry keep their
    /// optimistic state; the bucket is renumbered afterwards only when that
    /// left a gap or duplicate.
    pub fn rollback(&mut self, store: &mut IssueStore, issue_id: IssueId) -> Option<LedgerEntry> {
        let entry = self.entries.remove(&issue_id)?;

        store.upsert(entry.snapshot.clone());
        let mut skipped = false;
        for previous in &entry.displaced {
            if self.entries.contains_key(&previous.id) || !store.contains(previous.id) {
                skipped = true;
                continue;
            }
            store.upsert(previous.clone());
        }

        if skipped {
            for issue in normalize_positions(&store.ordered()) {
                store.upsert(issue);
            }
        }

        tracing::debug!("Rolled back ledger entry for issue {}", issue_id);
        Some(entry)
    }

    /// Replace the baseline an open entry compares against and restores to.
    pub fn rebase(&mut self, issue_id: IssueId, snapshot: Issue) -> bool {
        match self.entries.get_mut(&issue_id) {
            Some(entry) => {
                entry.snapshot = snapshot;
                true
            }
            None => false,
        }
    }

    /// True when `issue_id` is a neighbour some other open entry has shifted.
    pub fn displaces(&self, issue_id: IssueId) -> bool {
        self.entries.values().any(|entry| {
            entry.issue_id != issue_id && entry.mutation.changes.iter().any(|c| c.id == issue_id)
        })
    }

    /// Take a newer server copy of a displaced neighbour into every entry that
    /// shifted it: `remote` becomes the record a rollback restores and `placed`
    /// the optimistic version a retry starts from.
    pub fn refresh_neighbour(&mut self, remote: &Issue, placed: &Issue) {
        for entry in self.entries.values_mut() {
            if entry.issue_id == remote.id {
                continue;
            }
            for previous in entry.displaced.iter_mut().filter(|d| d.id == remote.id) {
                *previous = remote.clone();
            }
            for change in entry.mutation.changes.iter_mut().filter(|c| c.id == remote.id) {
                *change = placed.clone();
            }
        }
    }

    pub fn get(&self, issue_id: IssueId) -> Option<&LedgerEntry> {
        self.entries.get(&issue_id)
    }

    pub fn is_open(&self, issue_id: IssueId) -> bool {
        self.entries.contains_key(&issue_id)
    }

    pub fn open_ids(&self) -> Vec<IssueId> {
        let mut ids: Vec<IssueId> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn entries(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
