//! Divergence between open optimistic mutations and the server.
//!
//! A sync only flags issues that still have an open ledger entry, and only
//! when the server's `updated_at` is strictly newer than the baseline the
//! ledger captured. Local state is never overwritten here; the user picks a
//! side through [`ConflictDetector::resolve`].

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracker_core::{IssueId, TrackerError, TrackerResult};

use crate::issue::Issue;
use crate::ledger::OptimisticLedger;
use crate::store::IssueStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Keep what the user did locally.
    Local,
    /// Take the server's record.
    Remote,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConflictRecord {
    pub issue_id: IssueId,
    /// The server's record as last fetched.
    pub remote: Issue,
    /// `updated_at` of the ledger snapshot the remote was compared against.
    pub baseline_updated_at: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
}

impl ConflictRecord {
    pub fn explain(&self) -> String {
        format!(
            "Issue {} changed on the server at {} after the local edit began (baseline {})",
            self.issue_id, self.remote.updated_at, self.baseline_updated_at
        )
    }
}

/// True when the server changed the record after `baseline` was captured.
pub fn diverged(baseline: &Issue, remote: &Issue) -> bool {
    remote.updated_at > baseline.updated_at
}

#[derive(Debug, Clone, Default)]
pub struct ConflictDetector {
    conflicts: HashMap<IssueId, ConflictRecord>,
}

impl ConflictDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare fetched records with every open ledger entry.
    ///
    /// Returns ids flagged for the first time by this scan. An already flagged
    /// issue has its remote copy refreshed.
    pub fn scan(
        &mut self,
        ledger: &OptimisticLedger,
        remote: &[Issue],
        now: DateTime<Utc>,
    ) -> Vec<IssueId> {
        let mut flagged = Vec::new();
        for server in remote {
            let Some(entry) = ledger.get(server.id) else {
                continue;
            };
            if !diverged(&entry.snapshot, server) {
                continue;
            }
            let record = ConflictRecord {
                issue_id: server.id,
                remote: server.clone(),
                baseline_updated_at: entry.snapshot.updated_at,
                detected_at: now,
            };
            if self.conflicts.insert(server.id, record).is_none() {
                tracing::warn!(
                    "Conflict on issue {}: server updated_at {} is newer than {}",
                    server.id,
                    server.updated_at,
                    entry.snapshot.updated_at
                );
                flagged.push(server.id);
            }
        }
        flagged
    }

    /// Settle a conflict by choosing a side.
    ///
    /// `Local` keeps the store untouched and moves the ledger baseline to the
    /// server's timestamp so the same divergence is not raised again.
    /// `Remote` writes the server record into the store and makes it the
    /// rollback baseline.
    pub fn resolve(
        &mut self,
        issue_id: IssueId,
        resolution: Resolution,
        store: &mut IssueStore,
        ledger: &mut OptimisticLedger,
    ) -> TrackerResult<ConflictRecord> {
        let record = self
            .conflicts
            .remove(&issue_id)
            .ok_or_else(|| TrackerError::NotFound(format!("conflict for issue {}", issue_id)))?;

        match resolution {
            Resolution::Local => {
                if let Some(entry) = ledger.get(issue_id) {
                    let mut baseline = entry.snapshot.clone();
                    baseline.updated_at = record.remote.updated_at;
                    ledger.rebase(issue_id, baseline);
                }
            }
            Resolution::Remote => {
                store.upsert(record.remote.clone());
                ledger.rebase(issue_id, record.remote.clone());
            }
        }

        tracing::info!("Resolved conflict on issue {} as {:?}", issue_id, resolution);
        Ok(record)
    }

    /// Drop a conflict whose ledger entry closed on its own.
    pub fn discard(&mut self, issue_id: IssueId) -> Option<ConflictRecord> {
        self.conflicts.remove(&issue_id)
    }

    pub fn get(&self, issue_id: IssueId) -> Option<&ConflictRecord> {
        self.conflicts.get(&issue_id)
    }

    pub fn pending(&self) -> Vec<&ConflictRecord> {
        let mut records: Vec<&ConflictRecord> = self.conflicts.values().collect();
        records.sort_by_key(|r| r.issue_id);
        records
    }

    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }
}
