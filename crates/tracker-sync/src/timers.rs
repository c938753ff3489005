//! Timer registry wired to storage and the time-log endpoint.
//!
//! Every status-driven transition is persisted before its time-log entry is
//! submitted. Persistence and logging failures are reported through tracing
//! and never roll back the registry.
//!
//! Writes are serialized and each one snapshots the registry only once it
//! holds the write lock, so a slow write can never land after a newer one.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracker_core::{Clock, IssueId, SyncConfig, TrackerResult};
use tracker_domain::{
    CompletedSession, IssueStatus, TimeLogEntry, TimerRecord, TimerRegistry, TimerSnapshot,
    TimerTransition,
};
use tokio::sync::Mutex as AsyncMutex;
use tracker_persistence::TimerStore;

use crate::api::TrackerApi;

pub struct TimerService {
    registry: Mutex<TimerRegistry>,
    store: TimerStore,
    writes: AsyncMutex<()>,
    api: Arc<dyn TrackerApi>,
    clock: Arc<dyn Clock>,
    persist_every_ticks: u32,
    ticks: AtomicU32,
}

impl TimerService {
    /// Load persisted timers and resume the running ones.
    ///
    /// An unreadable snapshot is logged and the service starts empty.
    pub async fn open(
        store: TimerStore,
        api: Arc<dyn TrackerApi>,
        clock: Arc<dyn Clock>,
        config: &SyncConfig,
    ) -> Arc<Self> {
        let mut registry = TimerRegistry::new(config.min_log_hours);
        match store.load().await {
            Ok(Some(snapshot)) => {
                registry.restore(snapshot, clock.now(), config.resume_gap);
                tracing::info!(
                    "Restored {} timers ({} running)",
                    registry.len(),
                    registry.running().len()
                );
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Failed to load timers from '{}': {}", store.key(), e);
            }
        }

        Arc::new(Self {
            registry: Mutex::new(registry),
            store,
            writes: AsyncMutex::new(()),
            api,
            clock,
            persist_every_ticks: config.persist_every_ticks,
            ticks: AtomicU32::new(0),
        })
    }

    pub async fn on_status_change(
        &self,
        issue_id: IssueId,
        status: IssueStatus,
        estimate: Option<f64>,
    ) -> TimerTransition {
        let now = self.clock.now();
        let transition = self
            .registry
            .lock()
            .on_status_change(issue_id, status, estimate, now);

        if transition.is_change() {
            self.persist().await;
        }
        if let Some(entry) = transition.log_entry() {
            self.submit(entry.clone()).await;
        }
        transition
    }

    /// Stop a timer as if its issue moved to done.
    pub async fn force_stop(&self, issue_id: IssueId) -> TrackerResult<CompletedSession> {
        let now = self.clock.now();
        let session = self.registry.lock().force_stop(issue_id, now)?;

        self.persist().await;
        if let Some(entry) = &session.log {
            self.submit(entry.clone()).await;
        }
        Ok(session)
    }

    /// Fold running intervals; every Nth tick with a running timer also persists.
    pub async fn tick(&self) -> usize {
        let now = self.clock.now();
        let running = self.registry.lock().tick(now);

        let count = self.ticks.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if running > 0 && self.persist_every_ticks > 0 && count % self.persist_every_ticks == 0 {
            self.persist().await;
        }
        running
    }

    /// Write the current registry to storage.
    pub async fn save(&self) -> TrackerResult<()> {
        let _write = self.writes.lock().await;
        let snapshot = self.snapshot();
        self.store.save(&snapshot).await?;
        Ok(())
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        self.registry.lock().snapshot()
    }

    pub fn get(&self, issue_id: IssueId) -> Option<TimerRecord> {
        self.registry.lock().get(issue_id).cloned()
    }

    pub fn running(&self) -> Vec<TimerRecord> {
        self.registry
            .lock()
            .running()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Live elapsed time, including the interval not yet folded by a tick.
    pub fn elapsed_ms(&self, issue_id: IssueId) -> Option<i64> {
        let now = self.clock.now();
        self.registry
            .lock()
            .get(issue_id)
            .map(|r| r.elapsed_ms_at(now))
    }

    pub fn progress(&self, issue_id: IssueId) -> Option<f64> {
        let now = self.clock.now();
        self.registry
            .lock()
            .get(issue_id)
            .and_then(|r| r.progress_at(now))
    }

    async fn persist(&self) {
        if let Err(e) = self.save().await {
            tracing::warn!("Failed to persist timers: {}", e);
        }
    }

    async fn submit(&self, entry: TimeLogEntry) {
        let issue_id = entry.issue_id;
        let hours = entry.hours;
        match self.api.log_time(entry).await {
            Ok(()) => tracing::info!("Logged {}h for issue {}", hours, issue_id),
            Err(e) => tracing::warn!("Failed to log {}h for issue {}: {}", hours, issue_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockTrackerApi;
    use chrono::{DateTime, Utc};
    use tracker_core::{ManualClock, ResumeGapPolicy, TrackerError};
    use std::sync::atomic::AtomicBool;
    use tokio::sync::Notify;
    use tracker_domain::TimerStatus;
    use tracker_persistence::{KeyValueStore, MemoryStore, PersistenceMetadata};

    /// Parks the next write after `armed` is set until `release` fires.
    #[derive(Default)]
    struct HeldWrite {
        inner: MemoryStore,
        armed: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    #[async_trait::async_trait]
    impl KeyValueStore for HeldWrite {
        async fn get(&self, key: &str) -> TrackerResult<Option<Vec<u8>>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Vec<u8>) -> TrackerResult<PersistenceMetadata> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> TrackerResult<bool> {
            self.inner.remove(key).await
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn timer_store() -> TimerStore {
        TimerStore::new(Arc::new(MemoryStore::new()), "issue_timers")
    }

    async fn service(api: MockTrackerApi, store: TimerStore, clock: &ManualClock) -> Arc<TimerService> {
        TimerService::open(store, Arc::new(api), Arc::new(clock.clone()), &SyncConfig::default()).await
    }

    #[tokio::test]
    async fn done_submits_log_entry() {
        let clock = ManualClock::new(t0());
        let mut api = MockTrackerApi::new();
        api.expect_log_time()
            .withf(|entry| entry.issue_id == 5 && entry.hours == 0.003)
            .times(1)
            .returning(|_| Ok(()));
        let timers = service(api, timer_store(), &clock).await;

        timers.on_status_change(5, IssueStatus::InProgress, None).await;
        clock.advance_ms(10_000);
        let transition = timers.on_status_change(5, IssueStatus::Done, None).await;

        assert!(transition.log_entry().is_some());
        assert_eq!(timers.get(5).unwrap().status, TimerStatus::Completed);
    }

    #[tokio::test]
    async fn short_session_never_reaches_endpoint() {
        let clock = ManualClock::new(t0());
        let mut api = MockTrackerApi::new();
        api.expect_log_time().times(0);
        let timers = service(api, timer_store(), &clock).await;

        timers.on_status_change(1, IssueStatus::InProgress, None).await;
        clock.advance_ms(3_000);
        timers.on_status_change(1, IssueStatus::Done, None).await;
    }

    #[tokio::test]
    async fn log_failure_keeps_bookkeeping() {
        let clock = ManualClock::new(t0());
        let mut api = MockTrackerApi::new();
        api.expect_log_time()
            .times(1)
            .returning(|_| Err(TrackerError::Network("timeout".into())));
        let timers = service(api, timer_store(), &clock).await;

        timers.on_status_change(1, IssueStatus::InProgress, None).await;
        clock.advance_ms(60_000);
        timers.on_status_change(1, IssueStatus::Done, None).await;

        let record = timers.get(1).unwrap();
        assert_eq!(record.status, TimerStatus::Completed);
        assert_eq!(record.total_elapsed_ms, 0);
    }

    #[tokio::test]
    async fn transitions_are_persisted_and_restored() {
        let clock = ManualClock::new(t0());
        let store = timer_store();
        let timers = service(MockTrackerApi::new(), store.clone(), &clock).await;

        timers.on_status_change(8, IssueStatus::InProgress, Some(2.0)).await;
        clock.advance_ms(4_000);
        timers.on_status_change(8, IssueStatus::Todo, None).await;

        let persisted = store.load().await.unwrap().unwrap();
        assert_eq!(persisted.timers[0].total_elapsed_ms, 4_000);
        assert_eq!(persisted.timers[0].status, TimerStatus::Paused);

        let reopened = service(MockTrackerApi::new(), store, &clock).await;
        assert_eq!(reopened.get(8).unwrap().total_elapsed_ms, 4_000);
    }

    #[tokio::test]
    async fn restart_credits_gap_by_policy() {
        let clock = ManualClock::new(t0());
        let store = timer_store();
        let timers = service(MockTrackerApi::new(), store.clone(), &clock).await;
        timers.on_status_change(2, IssueStatus::InProgress, None).await;

        clock.advance_ms(120_000);
        let config = SyncConfig {
            resume_gap: ResumeGapPolicy::Cap { max_secs: 60 },
            ..SyncConfig::default()
        };
        let reopened = TimerService::open(
            store,
            Arc::new(MockTrackerApi::new()),
            Arc::new(clock.clone()),
            &config,
        )
        .await;

        let record = reopened.get(2).unwrap();
        assert_eq!(record.total_elapsed_ms, 60_000);
        assert_eq!(record.start_time, Some(clock.now()));
    }

    #[tokio::test]
    async fn ticks_persist_every_nth() {
        let clock = ManualClock::new(t0());
        let store = timer_store();
        let timers = service(MockTrackerApi::new(), store.clone(), &clock).await;
        timers.on_status_change(1, IssueStatus::InProgress, None).await;

        for _ in 0..4 {
            clock.advance_ms(1_000);
            assert_eq!(timers.tick().await, 1);
        }
        let persisted = store.load().await.unwrap().unwrap();
        assert_eq!(persisted.timers[0].total_elapsed_ms, 0);

        clock.advance_ms(1_000);
        timers.tick().await;
        let persisted = store.load().await.unwrap().unwrap();
        assert_eq!(persisted.timers[0].total_elapsed_ms, 5_000);
    }

    #[tokio::test]
    async fn force_stop_logs_like_done() {
        let clock = ManualClock::new(t0());
        let mut api = MockTrackerApi::new();
        api.expect_log_time()
            .withf(|entry| entry.issue_id == 3 && entry.hours == 0.5)
            .times(1)
            .returning(|_| Ok(()));
        let timers = service(api, timer_store(), &clock).await;

        timers.on_status_change(3, IssueStatus::InProgress, Some(1.0)).await;
        clock.advance_ms(1_800_000);
        assert_eq!(timers.progress(3), Some(0.5));

        let session = timers.force_stop(3).await.unwrap();
        assert_eq!(session.elapsed_ms, 1_800_000);
        assert!(timers.running().is_empty());
        assert!(timers.force_stop(99).await.is_err());
    }

    #[tokio::test]
    async fn live_elapsed_includes_open_interval() {
        let clock = ManualClock::new(t0());
        let timers = service(MockTrackerApi::new(), timer_store(), &clock).await;
        timers.on_status_change(1, IssueStatus::InProgress, None).await;
        clock.advance_ms(2_500);
        assert_eq!(timers.elapsed_ms(1), Some(2_500));
        assert_eq!(timers.elapsed_ms(2), None);
    }

    #[tokio::test]
    async fn slow_tick_write_cannot_overwrite_a_later_completion() {
        let clock = ManualClock::new(t0());
        let held = Arc::new(HeldWrite::default());
        let store = TimerStore::new(held.clone(), "issue_timers");
        let config = SyncConfig {
            persist_every_ticks: 1,
            ..SyncConfig::default()
        };
        let mut api = MockTrackerApi::new();
        api.expect_log_time().times(1).returning(|_| Ok(()));
        let timers =
            TimerService::open(store.clone(), Arc::new(api), Arc::new(clock.clone()), &config).await;
        timers.on_status_change(1, IssueStatus::InProgress, None).await;
        clock.advance_ms(30_000);

        held.armed.store(true, Ordering::SeqCst);
        let ticking = tokio::spawn({
            let timers = timers.clone();
            async move { timers.tick().await }
        });
        held.entered.notified().await;

        let finishing = tokio::spawn({
            let timers = timers.clone();
            async move { timers.on_status_change(1, IssueStatus::Done, None).await }
        });
        while timers.get(1).map(|r| r.status) != Some(TimerStatus::Completed) {
            tokio::task::yield_now().await;
        }
        held.release.notify_one();
        ticking.await.unwrap();
        finishing.await.unwrap();

        let persisted = store.load().await.unwrap().unwrap();
        assert_eq!(persisted.timers[0].status, TimerStatus::Completed);
        assert_eq!(persisted.timers[0].total_elapsed_ms, 0);
    }
}
