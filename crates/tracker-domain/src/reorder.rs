//! Drag-and-drop reordering.
//!
//! Pure functions over the ordered issue list. Positions are 0-based and
//! contiguous within each status bucket; the engine re-derives every position
//! on each move so that gaps or duplicates coming in from the server are
//! squeezed out at the same time.

use tracker_core::{IssueId, TrackerError, TrackerResult};

use crate::issue::{Issue, IssueStatus, PositionUpdate};

#[derive(Debug, Clone, PartialEq)]
pub struct ReorderOutcome {
    /// Full list in board order with recomputed positions.
    pub issues: Vec<Issue>,
    /// `{id, position, status}` for every issue, not only the dragged one.
    pub batch: Vec<PositionUpdate>,
    /// False when the drop put the issue back where it was.
    pub moved: bool,
}

impl ReorderOutcome {
    pub fn get(&self, id: IssueId) -> Option<&Issue> {
        self.issues.iter().find(|i| i.id == id)
    }
}

/// Split into one sub-list per status, keeping the incoming relative order.
fn partition(issues: &[Issue]) -> [Vec<Issue>; 4] {
    let mut buckets: [Vec<Issue>; 4] = Default::default();
    for issue in issues {
        buckets[issue.status.bucket_index()].push(issue.clone());
    }
    buckets
}

fn flatten(buckets: [Vec<Issue>; 4]) -> Vec<Issue> {
    let mut out = Vec::with_capacity(buckets.iter().map(Vec::len).sum());
    for bucket in buckets {
        for (index, mut issue) in bucket.into_iter().enumerate() {
            issue.position = index as i32;
            out.push(issue);
        }
    }
    out
}

/// Move `dragged_id` to `target_index` inside the `target_status` bucket.
///
/// `target_index` is the slot the user dropped on, counted with the dragged
/// issue still in place; indices past the end append.
pub fn reorder(
    issues: &[Issue],
    dragged_id: IssueId,
    target_status: IssueStatus,
    target_index: usize,
) -> TrackerResult<ReorderOutcome> {
    let mut buckets = partition(issues);

    let source = issues
        .iter()
        .find(|i| i.id == dragged_id)
        .map(|i| i.status)
        .ok_or_else(|| {
            TrackerError::Validation(format!("issue {} is not on the board", dragged_id))
        })?;
    let source_bucket = &mut buckets[source.bucket_index()];
    let original_index = source_bucket
        .iter()
        .position(|i| i.id == dragged_id)
        .ok_or_else(|| TrackerError::Internal(format!("issue {} lost in partition", dragged_id)))?;
    let mut dragged = source_bucket.remove(original_index);

    let mut index = target_index;
    if source == target_status && original_index < index {
        // Removal shifted every later slot down by one.
        index -= 1;
    }
    let target_bucket = &mut buckets[target_status.bucket_index()];
    let index = index.min(target_bucket.len());
    let moved = source != target_status || index != original_index;

    dragged.status = target_status;
    target_bucket.insert(index, dragged);

    let issues = flatten(buckets);
    let batch = issues.iter().map(PositionUpdate::from).collect();

    tracing::debug!(
        "Reordered issue {} from {}[{}] to {}[{}]",
        dragged_id,
        source,
        original_index,
        target_status,
        index
    );

    Ok(ReorderOutcome {
        issues,
        batch,
        moved,
    })
}

/// Renumber every bucket to `0..n-1`, keeping the current order.
pub fn normalize_positions(issues: &[Issue]) -> Vec<Issue> {
    let mut ordered = issues.to_vec();
    ordered.sort_by_key(|i| (i.status.bucket_index(), i.position, i.id));
    flatten(partition(&ordered))
}
