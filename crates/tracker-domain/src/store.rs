//! Client-side cache of the server's issues.
//!
//! Holds at most one record per id. Board order is derived on read: bucket
//! order first, then position, then id as a tiebreak so transiently
//! duplicated positions still render deterministically.

use std::collections::HashMap;
use tracker_core::IssueId;

use crate::issue::{Issue, IssueStatus};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssueStore {
    issues: HashMap<IssueId, Issue>,
}

impl IssueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_issues(issues: impl IntoIterator<Item = Issue>) -> Self {
        let mut store = Self::new();
        for issue in issues {
            store.upsert(issue);
        }
        store
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn get(&self, id: IssueId) -> Option<&Issue> {
        self.issues.get(&id)
    }

    pub fn contains(&self, id: IssueId) -> bool {
        self.issues.contains_key(&id)
    }

    /// Insert or replace a record, returning the previous version.
    pub fn upsert(&mut self, issue: Issue) -> Option<Issue> {
        self.issues.insert(issue.id, issue)
    }

    pub fn remove(&mut self, id: IssueId) -> Option<Issue> {
        self.issues.remove(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = IssueId> + '_ {
        self.issues.keys().copied()
    }

    /// Every issue in board order.
    pub fn ordered(&self) -> Vec<Issue> {
        let mut issues: Vec<Issue> = self.issues.values().cloned().collect();
        issues.sort_by_key(|i| (i.status.bucket_index(), i.position, i.id));
        issues
    }

    /// Members of one status bucket in position order.
    pub fn bucket(&self, status: IssueStatus) -> Vec<&Issue> {
        let mut bucket: Vec<&Issue> = self
            .issues
            .values()
            .filter(|i| i.status == status)
            .collect();
        bucket.sort_by_key(|i| (i.position, i.id));
        bucket
    }

    pub fn bucket_len(&self, status: IssueStatus) -> usize {
        self.issues.values().filter(|i| i.status == status).count()
    }

    /// Index of an issue within its own bucket.
    pub fn index_in_bucket(&self, id: IssueId) -> Option<usize> {
        let issue = self.get(id)?;
        self.bucket(issue.status).iter().position(|i| i.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn issue(id: IssueId, status: IssueStatus, position: i32) -> Issue {
        Issue::new(id, format!("Issue {}", id), status, position, Utc::now())
    }

    #[test]
    fn ordered_follows_bucket_then_position() {
        let store = IssueStore::from_issues(vec![
            issue(1, IssueStatus::Done, 0),
            issue(2, IssueStatus::Todo, 1),
            issue(3, IssueStatus::InProgress, 0),
            issue(4, IssueStatus::Todo, 0),
        ]);

        let ids: Vec<IssueId> = store.ordered().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![4, 2, 3, 1]);
    }

    #[test]
    fn upsert_replaces_by_id() {
        let mut store = IssueStore::from_issues(vec![issue(1, IssueStatus::Todo, 0)]);
        let previous = store.upsert(issue(1, IssueStatus::Done, 3));

        assert_eq!(previous.unwrap().status, IssueStatus::Todo);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(1).unwrap().status, IssueStatus::Done);
    }

    #[test]
    fn bucket_and_index() {
        let store = IssueStore::from_issues(vec![
            issue(1, IssueStatus::Todo, 2),
            issue(2, IssueStatus::Todo, 0),
            issue(3, IssueStatus::Done, 0),
        ]);

        assert_eq!(store.bucket_len(IssueStatus::Todo), 2);
        assert_eq!(store.index_in_bucket(1), Some(1));
        assert_eq!(store.index_in_bucket(3), Some(0));
        assert_eq!(store.index_in_bucket(99), None);
        assert!(store.bucket(IssueStatus::CodeReview).is_empty());
    }
}
