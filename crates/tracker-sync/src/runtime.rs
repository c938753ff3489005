//! One running board: session, timers and their background loops.

use std::sync::Arc;
use tracker_core::{Clock, SyncConfig, TrackerResult};
use tracker_persistence::{KeyValueStore, TimerStore};

use crate::api::{ProjectId, TrackerApi};
use crate::board::BoardSession;
use crate::scheduler::BackgroundTasks;
use crate::timers::TimerService;

pub struct SyncRuntime {
    board: Arc<BoardSession>,
    timers: Arc<TimerService>,
    tasks: BackgroundTasks,
}

impl SyncRuntime {
    /// Restore timers, fetch the project's issues and start the periodic loops.
    ///
    /// Fails only when the initial fetch fails; a board cannot open without it.
    pub async fn start(
        project_id: ProjectId,
        api: Arc<dyn TrackerApi>,
        storage: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> TrackerResult<Self> {
        let store = TimerStore::new(storage, config.timer_storage_key.clone());
        let timers = TimerService::open(store, api.clone(), clock.clone(), &config).await;

        let issues = api.fetch_issues(project_id).await?;
        let board =
            Arc::new(BoardSession::new(project_id, issues, api, clock).with_timers(timers.clone()));
        let tasks = BackgroundTasks::start(&board, &timers, &config);

        tracing::info!("Sync runtime started for project {}", project_id);
        Ok(Self {
            board,
            timers,
            tasks,
        })
    }

    pub fn board(&self) -> &Arc<BoardSession> {
        &self.board
    }

    pub fn timers(&self) -> &Arc<TimerService> {
        &self.timers
    }

    /// Stop every loop and write the timers one last time.
    pub async fn shutdown(mut self) -> TrackerResult<()> {
        self.tasks.shutdown();
        self.timers.save().await?;
        tracing::info!(
            "Sync runtime for project {} shut down",
            self.board.project_id()
        );
        Ok(())
    }
}
