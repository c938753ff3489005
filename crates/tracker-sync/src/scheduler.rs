//! Periodic background activities: board sync, timer tick and timer autosave.
//!
//! Each loop holds only a weak reference to what it drives and exits once
//! that is gone. [`BackgroundTasks`] aborts every loop on `shutdown` or drop.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracker_core::SyncConfig;

use crate::board::BoardSession;
use crate::timers::TimerService;

#[derive(Default)]
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the sync, tick and autosave loops with the configured periods.
    pub fn start(board: &Arc<BoardSession>, timers: &Arc<TimerService>, config: &SyncConfig) -> Self {
        let mut tasks = Self::new();
        tasks.spawn_board_sync(board, config.sync_interval());
        tasks.spawn_timer_tick(timers, config.tick_interval());
        tasks.spawn_autosave(timers, config.autosave_interval());
        tasks
    }

    pub fn spawn_board_sync(&mut self, board: &Arc<BoardSession>, period: Duration) {
        let board = Arc::downgrade(board);
        self.handles.push(tokio::spawn(async move {
            let mut interval = skip_first_tick(period).await;
            loop {
                interval.tick().await;
                let Some(board) = Weak::upgrade(&board) else {
                    break;
                };
                match board.sync() {
                    Ok(handle) => {
                        if let Err(e) = handle.await {
                            tracing::warn!("Board sync task failed: {}", e);
                        }
                    }
                    Err(e) => tracing::debug!("Board sync not started: {}", e),
                }
            }
            tracing::debug!("Board sync loop stopped");
        }));
    }

    pub fn spawn_timer_tick(&mut self, timers: &Arc<TimerService>, period: Duration) {
        let timers = Arc::downgrade(timers);
        self.handles.push(tokio::spawn(async move {
            let mut interval = skip_first_tick(period).await;
            loop {
                interval.tick().await;
                let Some(timers) = Weak::upgrade(&timers) else {
                    break;
                };
                timers.tick().await;
            }
            tracing::debug!("Timer tick loop stopped");
        }));
    }

    pub fn spawn_autosave(&mut self, timers: &Arc<TimerService>, period: Duration) {
        let timers = Arc::downgrade(timers);
        self.handles.push(tokio::spawn(async move {
            let mut interval = skip_first_tick(period).await;
            loop {
                interval.tick().await;
                let Some(timers) = Weak::upgrade(&timers) else {
                    break;
                };
                if let Err(e) = timers.save().await {
                    tracing::warn!("Timer autosave failed: {}", e);
                }
            }
            tracing::debug!("Timer autosave loop stopped");
        }));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn shutdown(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        tracing::info!("Stopped background tasks");
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// `tokio::time::interval` fires immediately; loops here start one period in.
async fn skip_first_tick(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await;
    interval
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockTrackerApi;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracker_core::ManualClock;
    use tracker_domain::{Issue, IssueStatus};
    use tracker_persistence::{MemoryStore, TimerStore};

    fn counting_api(fetches: Arc<AtomicUsize>) -> MockTrackerApi {
        let mut api = MockTrackerApi::new();
        api.expect_fetch_issues().returning(move |_| {
            fetches.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Issue::new(1, "A", IssueStatus::Todo, 0, Utc::now())])
        });
        api
    }

    fn board(api: MockTrackerApi) -> Arc<BoardSession> {
        Arc::new(BoardSession::new(
            1,
            Vec::new(),
            Arc::new(api),
            Arc::new(ManualClock::new(Utc::now())),
        ))
    }

    #[tokio::test]
    async fn sync_loop_runs_until_shutdown() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let board = board(counting_api(fetches.clone()));
        let mut tasks = BackgroundTasks::new();
        tasks.spawn_board_sync(&board, Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(100)).await;
        tasks.shutdown();
        // A sync spawned just before the abort still completes.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_shutdown = fetches.load(Ordering::SeqCst);
        assert!(after_shutdown >= 2, "only {} syncs ran", after_shutdown);
        assert_eq!(board.column(IssueStatus::Todo).len(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fetches.load(Ordering::SeqCst), after_shutdown);
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn dropping_tasks_aborts_loops() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let board = board(counting_api(fetches.clone()));
        {
            let mut tasks = BackgroundTasks::new();
            tasks.spawn_board_sync(&board, Duration::from_millis(10));
            tokio::time::sleep(Duration::from_millis(35)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_drop = fetches.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fetches.load(Ordering::SeqCst), after_drop);
    }

    #[tokio::test]
    async fn start_wires_three_loops() {
        let board = board(counting_api(Arc::new(AtomicUsize::new(0))));
        let timers = TimerService::open(
            TimerStore::new(Arc::new(MemoryStore::new()), "issue_timers"),
            Arc::new(MockTrackerApi::new()),
            Arc::new(ManualClock::new(Utc::now())),
            &SyncConfig::default(),
        )
        .await;

        let mut tasks = BackgroundTasks::start(&board, &timers, &SyncConfig::default());
        assert_eq!(tasks.len(), 3);
        tasks.shutdown();
    }

    #[tokio::test]
    async fn autosave_writes_registry() {
        let storage = Arc::new(MemoryStore::new());
        let timers = TimerService::open(
            TimerStore::new(storage.clone(), "issue_timers"),
            Arc::new(MockTrackerApi::new()),
            Arc::new(ManualClock::new(Utc::now())),
            &SyncConfig::default(),
        )
        .await;
        let mut tasks = BackgroundTasks::new();
        tasks.spawn_autosave(&timers, Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(60)).await;
        tasks.shutdown();
        assert_eq!(storage.len(), 1);
    }
}
