use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracker_core::{IssueId, TrackerError, TrackerResult};

use crate::field_update::FieldUpdate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Todo,
    InProgress,
    CodeReview,
    Done,
}

impl IssueStatus {
    /// Buckets in board order.
    pub const ALL: [IssueStatus; 4] = [
        IssueStatus::Todo,
        IssueStatus::InProgress,
        IssueStatus::CodeReview,
        IssueStatus::Done,
    ];

    pub fn bucket_index(self) -> usize {
        match self {
            Self::Todo => 0,
            Self::InProgress => 1,
            Self::CodeReview => 2,
            Self::Done => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::CodeReview => "code_review",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IssueStatus {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(Self::Todo),
            "in_progress" => Ok(Self::InProgress),
            "code_review" => Ok(Self::CodeReview),
            "done" => Ok(Self::Done),
            other => Err(TrackerError::Validation(format!(
                "unknown issue status '{}'",
                other
            ))),
        }
    }
}

/// Local cache of the server's issue record, reduced to the fields the board needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    pub title: String,
    pub status: IssueStatus,
    pub position: i32,
    #[serde(default)]
    pub estimate: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl Issue {
    pub fn new(
        id: IssueId,
        title: impl Into<String>,
        status: IssueStatus,
        position: i32,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            status,
            position,
            estimate: None,
            updated_at,
        }
    }

    pub fn with_estimate(mut self, hours: f64) -> Self {
        self.estimate = Some(hours);
        self
    }
}

/// One row of the bulk reposition call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub id: IssueId,
    pub position: i32,
    pub status: IssueStatus,
}

impl From<&Issue> for PositionUpdate {
    fn from(issue: &Issue) -> Self {
        Self {
            id: issue.id,
            position: issue.position,
            status: issue.status,
        }
    }
}

/// Partial field set sent to the update endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssueUpdate {
    pub status: Option<IssueStatus>,
    pub position: Option<i32>,
    pub title: Option<String>,
    pub estimate: FieldUpdate<f64>,
}

impl IssueUpdate {
    pub fn placement(status: IssueStatus, position: i32) -> Self {
        Self {
            status: Some(status),
            position: Some(position),
            ..Self::default()
        }
    }

    pub fn status(status: IssueStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.position.is_none()
            && self.title.is_none()
            && !self.estimate.is_change()
    }

    pub fn moves(&self) -> bool {
        self.status.is_some() || self.position.is_some()
    }

    pub fn validate(&self) -> TrackerResult<()> {
        if self.is_empty() {
            return Err(TrackerError::Validation("update has no fields".to_string()));
        }
        if let Some(position) = self.position {
            if position < 0 {
                return Err(TrackerError::Validation(format!(
                    "position must be non-negative, got {}",
                    position
                )));
            }
        }
        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                return Err(TrackerError::Validation("title must not be empty".to_string()));
            }
        }
        if let Some(estimate) = self.estimate.value() {
            if !estimate.is_finite() || *estimate < 0.0 {
                return Err(TrackerError::Validation(format!(
                    "estimate must be a non-negative number of hours, got {}",
                    estimate
                )));
            }
        }
        Ok(())
    }

    /// Apply the non-placement fields. `updated_at` is left alone: only the server assigns it.
    pub fn apply_fields(&self, issue: &mut Issue) {
        if let Some(title) = &self.title {
            issue.title = title.clone();
        }
        self.estimate.apply_to(&mut issue.estimate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_wire_name() {
        for status in IssueStatus::ALL {
            assert_eq!(status.as_str().parse::<IssueStatus>().unwrap(), status);
        }
        assert!("blocked".parse::<IssueStatus>().is_err());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&IssueStatus::CodeReview).unwrap();
        assert_eq!(json, "\"code_review\"");
    }

    #[test]
    fn empty_update_is_invalid() {
        let err = IssueUpdate::default().validate().unwrap_err();
        assert!(matches!(err, TrackerError::Validation(_)));
    }

    #[test]
    fn negative_position_is_invalid() {
        let update = IssueUpdate::placement(IssueStatus::Todo, -1);
        assert!(update.validate().is_err());
    }

    #[test]
    fn negative_or_nan_estimate_is_invalid() {
        let update = IssueUpdate {
            estimate: FieldUpdate::Set(-2.0),
            ..IssueUpdate::default()
        };
        assert!(update.validate().is_err());

        let update = IssueUpdate {
            estimate: FieldUpdate::Set(f64::NAN),
            ..IssueUpdate::default()
        };
        assert!(update.validate().is_err());

        let update = IssueUpdate {
            estimate: FieldUpdate::Clear,
            ..IssueUpdate::default()
        };
        assert!(update.validate().is_ok());
    }

    #[test]
    fn apply_fields_keeps_server_timestamp() {
        let stamp = Utc::now();
        let mut issue = Issue::new(1, "Old", IssueStatus::Todo, 0, stamp).with_estimate(2.0);
        let update = IssueUpdate {
            title: Some("New".to_string()),
            estimate: FieldUpdate::Clear,
            ..IssueUpdate::default()
        };

        update.apply_fields(&mut issue);
        assert_eq!(issue.title, "New");
        assert_eq!(issue.estimate, None);
        assert_eq!(issue.updated_at, stamp);
    }
}
