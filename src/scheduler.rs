use async_trait::async_trait;
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::Result,
    types::{SyncConfig, SyncOutcome},
};

/// Unit of work the scheduler runs
#[async_trait]
pub trait SyncJob: Send + Sync {
    /// Execute one sync run
    async fn run(&self) -> SyncOutcome;
}

/// Background job system driving periodic and on-demand sync runs
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Run the job every `interval`, replacing any previous periodic schedule
    ///
    /// # Errors
    ///
    /// Returns [`crate::HealthSyncError::Scheduler`] if the request is refused.
    async fn schedule_periodic(&self, interval: Duration) -> Result<()>;

    /// Run the job once after `delay`
    ///
    /// # Errors
    ///
    /// Returns [`crate::HealthSyncError::Scheduler`] if the request is refused.
    async fn schedule_one_off(&self, delay: Duration) -> Result<()>;

    /// Drop every pending and future run; a run already executing completes
    ///
    /// # Errors
    ///
    /// Returns [`crate::HealthSyncError::Scheduler`] if the request is refused.
    async fn cancel_all(&self) -> Result<()>;
}

/// Timing rules of [`TokioJobScheduler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulePolicy {
    /// A manual run never starts sooner than this after the previous run started
    pub min_run_spacing: Duration,
    /// First delay after a `Retry` outcome
    pub retry_backoff: Duration,
    /// Upper bound of the doubling retry delay
    pub max_retry_backoff: Duration,
}

impl From<&SyncConfig> for SchedulePolicy {
    fn from(config: &SyncConfig) -> Self {
        Self {
            min_run_spacing: Duration::from_millis(config.min_run_spacing_ms),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            max_retry_backoff: Duration::from_millis(config.max_retry_backoff_ms),
        }
    }
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OneOffKind {
    Manual,
    Retry,
}

struct SchedulerState {
    root: CancellationToken,
    periodic: Option<CancellationToken>,
    one_off_pending: bool,
    last_run_started: Option<Instant>,
    next_backoff: Duration,
}

struct SchedulerInner {
    job: Arc<dyn SyncJob>,
    policy: SchedulePolicy,
    state: Mutex<SchedulerState>,
}

/// In-process [`JobScheduler`] built on tokio tasks
///
/// - one pending one-off at most; further requests coalesce into it
/// - a `Retry` outcome queues a one-off after a doubling backoff, reset by `Success`
/// - `cancel_all` cancels sleeping tasks only, so an executing run finishes
/// - dropping the scheduler cancels everything it spawned, like `cancel_all`
///
/// Concurrent runs (a periodic tick during a manual run) both reach the
/// job; the job itself is expected to coalesce them, as [`crate::SyncService`] does.
pub struct TokioJobScheduler {
    inner: Arc<SchedulerInner>,
}

impl TokioJobScheduler {
    /// Create a scheduler driving `job`
    #[must_use]
    pub fn new(job: Arc<dyn SyncJob>, policy: SchedulePolicy) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                job,
                policy,
                state: Mutex::new(SchedulerState {
                    root: CancellationToken::new(),
                    periodic: None,
                    one_off_pending: false,
                    last_run_started: None,
                    next_backoff: policy.retry_backoff,
                }),
            }),
        }
    }

    /// Check whether a periodic schedule is armed
    #[must_use]
    pub fn is_periodic_scheduled(&self) -> bool {
        self.inner.lock_state().periodic.is_some()
    }

    /// Check whether a one-off run is waiting to start
    #[must_use]
    pub fn has_pending_one_off(&self) -> bool {
        self.inner.lock_state().one_off_pending
    }
}

impl SchedulerInner {
    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_one_off(self: &Arc<Self>, delay: Duration, kind: OneOffKind) {
        let mut state = self.lock_state();
        if state.one_off_pending {
            debug!("{:?} sync request absorbed by pending run", kind);
            return;
        }

        let mut start_at = Instant::now() + delay;
        if kind == OneOffKind::Manual {
            if let Some(last) = state.last_run_started {
                start_at = start_at.max(last + self.policy.min_run_spacing);
            }
        }

        state.one_off_pending = true;
        let token = state.root.child_token();
        drop(state);

        debug!(
            "{:?} sync scheduled in {:?}",
            kind,
            start_at.saturating_duration_since(Instant::now())
        );
        tokio::spawn(Arc::clone(self).run_one_off(start_at, token));
    }

    async fn run_one_off(self: Arc<Self>, start_at: Instant, token: CancellationToken) {
        tokio::select! {
            biased;
            () = token.cancelled() => {
                debug!("Pending sync cancelled before start");
                return;
            }
            () = sleep_until(start_at) => {}
        }

        let outcome = self.execute().await;

        {
            let mut state = self.lock_state();
            if token.is_cancelled() {
                return;
            }
            state.one_off_pending = false;
        }

        self.after_run(outcome);
    }

    async fn run_periodic(self: Arc<Self>, interval: Duration, token: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let outcome = self.execute().await;
            if token.is_cancelled() {
                break;
            }
            self.after_run(outcome);
        }

        debug!("Periodic sync loop stopped");
    }

    async fn execute(&self) -> SyncOutcome {
        self.lock_state().last_run_started = Some(Instant::now());
        let outcome = self.job.run().await;
        info!("Sync run finished: {}", outcome);
        outcome
    }

    fn after_run(self: &Arc<Self>, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::Success => {
                self.lock_state().next_backoff = self.policy.retry_backoff;
            }
            SyncOutcome::Retry => {
                let delay = {
                    let mut state = self.lock_state();
                    let delay = state.next_backoff;
                    state.next_backoff = delay
                        .saturating_mul(2)
                        .min(self.policy.max_retry_backoff);
                    delay
                };
                warn!("Sync will be retried in {:?}", delay);
                self.spawn_one_off(delay, OneOffKind::Retry);
            }
            SyncOutcome::Failure => {
                error!("Sync failed permanently; waiting for the next scheduled run");
            }
        }
    }
}

impl Drop for TokioJobScheduler {
    fn drop(&mut self) {
        self.inner.lock_state().root.cancel();
        debug!("Job scheduler dropped, background sync stopped");
    }
}

#[async_trait]
impl JobScheduler for TokioJobScheduler {
    async fn schedule_periodic(&self, interval: Duration) -> Result<()> {
        let token = {
            let mut state = self.inner.lock_state();
            if let Some(previous) = state.periodic.take() {
                previous.cancel();
            }
            let token = state.root.child_token();
            state.periodic = Some(token.clone());
            token
        };

        info!("Periodic health sync scheduled every {:?}", interval);
        tokio::spawn(Arc::clone(&self.inner).run_periodic(interval, token));
        Ok(())
    }

    async fn schedule_one_off(&self, delay: Duration) -> Result<()> {
        self.inner.spawn_one_off(delay, OneOffKind::Manual);
        Ok(())
    }

    async fn cancel_all(&self) -> Result<()> {
        let mut state = self.inner.lock_state();
        state.root.cancel();
        state.root = CancellationToken::new();
        state.periodic = None;
        state.one_off_pending = false;
        state.next_backoff = self.inner.policy.retry_backoff;
        drop(state);

        info!("All health sync work cancelled");
        Ok(())
    }
}
