pub mod board;
pub mod conflict;
pub mod field_update;
pub mod issue;
pub mod ledger;
pub mod reorder;
pub mod store;
pub mod timer;

pub use board::{BoardEffect, BoardError, BoardEvent, BoardMachine, BoardPhase, ErrorKind};
pub use conflict::{ConflictDetector, ConflictRecord, Resolution};
pub use field_update::FieldUpdate;
pub use issue::{Issue, IssueStatus, IssueUpdate, PositionUpdate};
pub use ledger::{LedgerEntry, Mutation, OptimisticLedger};
pub use reorder::{normalize_positions, reorder, ReorderOutcome};
pub use store::IssueStore;
pub use timer::{
    format_duration, round_hours, CompletedSession, TimeLogEntry, TimerRecord, TimerRegistry,
    TimerSnapshot, TimerStatus, TimerTransition,
};
pub use tracker_core::IssueId;
