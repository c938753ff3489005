pub mod api;
pub mod board;
pub mod runtime;
pub mod scheduler;
pub mod timers;

pub use api::{ProjectId, TrackerApi};
pub use board::BoardSession;
pub use runtime::SyncRuntime;
pub use scheduler::BackgroundTasks;
pub use timers::TimerService;
