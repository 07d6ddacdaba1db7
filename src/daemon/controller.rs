use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::daemon::clock::Clock;
use crate::daemon::PidFile;
use crate::models::{DaemonConfig, LifecycleState, Phase, StopReason};
use crate::probe::{LivenessProbe, UsageFetcher};
use crate::storage::{CacheStore, WriteOutcome};

/// Loop cadences: a short tick, a liveness check every `liveness_interval`,
/// and a data refresh every `refresh_interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub tick: Duration,
    pub liveness_interval: Duration,
    pub refresh_interval: Duration,
}

impl From<&DaemonConfig> for Timing {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            tick: config.tick_interval(),
            liveness_interval: config.liveness_interval(),
            refresh_interval: config.refresh_interval(),
        }
    }
}

/// What a single tick did. At most one of liveness check or refresh runs per
/// tick, liveness first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    Idle,
    CheckedLiveness(u32),
    ParentExited,
    Refreshed(WriteOutcome),
}

/// Owns the daemon lifecycle: `Starting -> Running -> Stopping -> Stopped`.
///
/// Timers are plain fields read through the injected [`Clock`], so a fake
/// clock drives [`tick`](Self::tick) deterministically.
pub struct LifecycleController {
    pid_file: PidFile,
    fetcher: Arc<dyn UsageFetcher>,
    liveness: Arc<dyn LivenessProbe>,
    cache: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    timing: Timing,
    phase: Phase,
    state: Option<LifecycleState>,
    last_refresh: Option<DateTime<Utc>>,
    last_liveness_check: Option<DateTime<Utc>>,
}

impl LifecycleController {
    pub fn new(
        pid_file: PidFile,
        fetcher: Arc<dyn UsageFetcher>,
        liveness: Arc<dyn LivenessProbe>,
        cache: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        timing: Timing,
    ) -> Self {
        Self {
            pid_file,
            fetcher,
            liveness,
            cache,
            clock,
            timing,
            phase: Phase::Starting,
            state: None,
            last_refresh: None,
            last_liveness_check: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> Option<&LifecycleState> {
        self.state.as_ref()
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.last_refresh
    }

    pub fn last_liveness_check(&self) -> Option<DateTime<Utc>> {
        self.last_liveness_check
    }

    pub fn pid_file(&self) -> &PidFile {
        &self.pid_file
    }

    /// Acquire the PID marker and perform the initial refresh.
    ///
    /// Returns `Ok(false)` when another instance holds the marker. An error
    /// means the marker could not be written.
    pub async fn start(&mut self) -> Result<bool> {
        self.phase = Phase::Starting;

        if !self.pid_file.acquire()? {
            self.phase = Phase::Stopped;
            return Ok(false);
        }

        let state = LifecycleState::current(self.clock.now());
        tracing::info!("Daemon started (PID: {})", state.pid);
        self.state = Some(state);

        self.refresh().await;

        let now = self.clock.now();
        self.last_refresh = Some(now);
        self.last_liveness_check = Some(now);
        self.phase = Phase::Running;
        Ok(true)
    }

    /// Fetch a snapshot and hand it to the cache writer.
    pub async fn refresh(&self) -> WriteOutcome {
        tracing::info!("Updating usage cache...");
        let snapshot = self.fetcher.fetch().await;
        self.cache.write(&snapshot).await
    }

    fn is_due(last: Option<DateTime<Utc>>, interval: Duration, now: DateTime<Utc>) -> bool {
        let interval = chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::MAX);
        match last {
            Some(at) => now - at >= interval,
            None => true,
        }
    }

    /// Run one iteration of the loop body.
    pub async fn tick(&mut self) -> TickAction {
        let now = self.clock.now();

        if Self::is_due(self.last_liveness_check, self.timing.liveness_interval, now) {
            let count = self.liveness.count().await;
            tracing::info!("Parent application processes: {}", count);

            if count == 0 {
                tracing::info!("No parent application processes found. Shutting down...");
                self.phase = Phase::Stopping;
                return TickAction::ParentExited;
            }

            self.last_liveness_check = Some(now);
            return TickAction::CheckedLiveness(count);
        }

        if Self::is_due(self.last_refresh, self.timing.refresh_interval, now) {
            let outcome = self.refresh().await;
            self.last_refresh = Some(now);
            return TickAction::Refreshed(outcome);
        }

        TickAction::Idle
    }

    /// Release the marker (if this instance holds it) and move to `Stopped`.
    pub fn stop(&mut self, reason: StopReason) {
        self.phase = Phase::Stopping;
        if self.pid_file.is_held() {
            if let Err(e) = self.pid_file.release() {
                tracing::error!("Failed to release PID file: {:#}", e);
            }
        }
        tracing::info!("Daemon stopped ({})", reason);
        self.phase = Phase::Stopped;
    }

    /// Drive the full lifecycle until a stop condition.
    ///
    /// `shutdown` flips to `true` when a signal arrives; it is raced against
    /// both the tick body and the inter-tick sleep. The marker is released on
    /// every return path, errors included.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<StopReason> {
        let result = self.drive(&mut shutdown).await;
        match &result {
            Ok(StopReason::AlreadyRunning) => self.phase = Phase::Stopped,
            Ok(reason) => self.stop(*reason),
            Err(_) => {
                if self.pid_file.is_held() {
                    if let Err(e) = self.pid_file.release() {
                        tracing::error!("Failed to release PID file: {:#}", e);
                    }
                }
                self.phase = Phase::Stopped;
            }
        }
        result
    }

    async fn drive(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<StopReason> {
        let started = tokio::select! {
            biased;
            _ = wait_for_shutdown(shutdown) => {
                tracing::info!("Received shutdown signal");
                return Ok(StopReason::Signal);
            }
            started = self.start() => started?,
        };
        if !started {
            return Ok(StopReason::AlreadyRunning);
        }

        loop {
            let action = tokio::select! {
                biased;
                _ = wait_for_shutdown(shutdown) => None,
                action = self.tick() => Some(action),
            };
            match action {
                None => {
                    tracing::info!("Received shutdown signal");
                    return Ok(StopReason::Signal);
                }
                Some(TickAction::ParentExited) => return Ok(StopReason::ParentExited),
                Some(_) => {}
            }

            tokio::select! {
                biased;
                _ = wait_for_shutdown(shutdown) => {
                    tracing::info!("Received shutdown signal");
                    return Ok(StopReason::Signal);
                }
                _ = tokio::time::sleep(self.timing.tick) => {}
            }
        }
    }
}

/// Resolves once shutdown has been requested. Never resolves if the sender
/// is gone without having requested it.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|requested| *requested).await.is_err() {
        std::future::pending::<()>().await;
    }
}
