use crate::IssueId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Conflict: issue {issue_id} was changed on the server while a local update was pending")]
    Conflict { issue_id: IssueId },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Issue {issue_id} already has an update in flight")]
    MutationInFlight { issue_id: IssueId },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TrackerError {
    /// Transient failures the user may replay through the board's retry transition.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Io(_))
    }
}
