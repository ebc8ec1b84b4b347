//! Background refresh loop shared between the ticker and the HTTP layer.
//!
//! Every decide-then-fetch step runs under one mutex, so at most one fetch is
//! in flight. Readers never touch that lock: they see the latest published
//! [`RefreshState`] through a watch channel.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::dashboard::{build_snapshot, DashboardSnapshot, DashboardSource};
use crate::refresh::{DataProvider, RefreshOrchestrator, RefreshState, TickResult};

#[derive(Clone)]
pub struct RefreshService {
    orchestrator: Arc<Mutex<RefreshOrchestrator>>,
    updates: Arc<watch::Sender<RefreshState>>,
}

impl RefreshService {
    pub fn new(provider: Box<dyn DataProvider>) -> Self {
        Self::from_orchestrator(RefreshOrchestrator::new(provider, Utc::now()))
    }

    pub fn from_orchestrator(orchestrator: RefreshOrchestrator) -> Self {
        let (updates, _) = watch::channel(orchestrator.state().clone());
        Self {
            orchestrator: Arc::new(Mutex::new(orchestrator)),
            updates: Arc::new(updates),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<RefreshState> {
        self.updates.subscribe()
    }

    pub fn current_state(&self) -> RefreshState {
        self.updates.borrow().clone()
    }

    pub fn tick_at(&self, now: DateTime<Utc>) -> TickResult {
        let mut orchestrator = self.lock();
        let result = orchestrator.tick(now);
        self.publish(orchestrator.state());
        result
    }

    pub fn manual_refresh_at(&self, now: DateTime<Utc>) -> TickResult {
        let mut orchestrator = self.lock();
        let result = orchestrator.manual_refresh(now);
        self.publish(orchestrator.state());
        result
    }

    pub fn set_auto_refresh_at(&self, enabled: bool, now: DateTime<Utc>) {
        let mut orchestrator = self.lock();
        orchestrator.set_auto_refresh(enabled, now);
        self.publish(orchestrator.state());
    }

    /// Drives [`RefreshService::tick_at`] on a fixed cadence. The provider
    /// call blocks, so each tick runs on the blocking pool and the next one
    /// waits for it.
    pub fn spawn_ticker(&self, cadence: Duration) -> JoinHandle<()> {
        let service = self.clone();
        info!(
            component = "refresh_service",
            event = "refresh.ticker.start",
            cadence_ms = cadence.as_millis() as u64
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cadence);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let tick_service = service.clone();
                match tokio::task::spawn_blocking(move || tick_service.tick_at(Utc::now())).await {
                    Ok(result) if result.updated => debug!(
                        component = "refresh_service",
                        event = "refresh.ticker.updated"
                    ),
                    Ok(_) => {}
                    Err(err) => warn!(
                        component = "refresh_service",
                        event = "refresh.ticker.task_failed",
                        error = %err
                    ),
                }
            }
        })
    }

    // Recover the guard after a panicked tick.
    fn lock(&self) -> MutexGuard<'_, RefreshOrchestrator> {
        self.orchestrator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &RefreshState) {
        self.updates.send_if_modified(|current| {
            if *current == *state {
                false
            } else {
                *current = state.clone();
                true
            }
        });
    }
}

impl DashboardSource for RefreshService {
    fn snapshot(&self) -> DashboardSnapshot {
        build_snapshot(&self.current_state(), Utc::now())
    }

    fn manual_refresh(&self) -> DashboardSnapshot {
        let now = Utc::now();
        self.manual_refresh_at(now);
        build_snapshot(&self.current_state(), now)
    }

    fn set_auto_refresh(&self, enabled: bool) -> DashboardSnapshot {
        let now = Utc::now();
        self.set_auto_refresh_at(enabled, now);
        build_snapshot(&self.current_state(), now)
    }
}
