pub mod clock;
pub mod config;
pub mod error;
pub mod result;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ResumeGapPolicy, SyncConfig};
pub use error::TrackerError;
pub use result::TrackerResult;

/// Server-assigned issue identifier.
pub type IssueId = i64;
