use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use futures::{stream, StreamExt};
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::{sync::watch, time::timeout};
use tracing::{debug, error, info, warn};

use crate::{
    error::{HealthSyncError, Result},
    protocol::{extract_error_message, SignedUpload, IDEMPOTENCY_HEADER, SIGNATURE_HEADER},
    provider::HealthDataProvider,
    scheduler::SyncJob,
    storage::CredentialVault,
    transport::HttpTransport,
    types::{DailyMetrics, DateWindow, HealthDataWindow, Platform, SyncConfig, SyncOutcome},
    SYNC_PATH,
};

type OutcomeSlot = Mutex<Option<watch::Receiver<Option<SyncOutcome>>>>;

/// Collects, signs and uploads the trailing window of health metrics
///
/// Errors never escape a run. Each one is logged and folded into the
/// returned [`SyncOutcome`]:
///
/// | condition                                  | outcome   |
/// |--------------------------------------------|-----------|
/// | credential missing or unreadable           | `Failure` |
/// | no day could be collected in time          | `Success` |
/// | secret is not valid hex                    | `Failure` |
/// | backend answered 2xx                       | `Success` |
/// | backend answered otherwise, or no response | `Retry`   |
///
/// Each provider query is bounded by the request timeout of the
/// [`SyncConfig`]; a day that does not answer in time is skipped.
///
/// A run triggered while another is in flight does not start a second
/// upload; it waits for the running one and reports its outcome.
pub struct SyncService {
    transport: HttpTransport,
    vault: CredentialVault,
    provider: Arc<dyn HealthDataProvider>,
    platform: Platform,
    window_days: u32,
    query_timeout_ms: u64,
    inflight: OutcomeSlot,
}

/// Caller's role for one trigger
enum Gate<'a> {
    Leader(InflightGuard<'a>),
    Follower(watch::Receiver<Option<SyncOutcome>>),
}

/// Publishes the outcome of the running upload and frees the slot
struct InflightGuard<'a> {
    slot: &'a OutcomeSlot,
    sender: watch::Sender<Option<SyncOutcome>>,
}

impl InflightGuard<'_> {
    fn finish(self, outcome: SyncOutcome) {
        self.sender.send_replace(Some(outcome));
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl SyncService {
    /// Create an uploader
    #[must_use]
    pub fn new(
        transport: HttpTransport,
        vault: CredentialVault,
        provider: Arc<dyn HealthDataProvider>,
        platform: Platform,
        config: &SyncConfig,
    ) -> Self {
        Self {
            transport,
            vault,
            provider,
            platform,
            window_days: config.window_days,
            query_timeout_ms: config.request_timeout_ms,
            inflight: Mutex::new(None),
        }
    }

    /// Run one sync for the local calendar date
    pub async fn run_sync(&self) -> SyncOutcome {
        self.run_sync_for(Local::now().date_naive()).await
    }

    /// Run one sync treating `today` as the last day of the window
    pub async fn run_sync_for(&self, today: NaiveDate) -> SyncOutcome {
        match self.enter() {
            Gate::Leader(guard) => {
                let outcome = self.execute(today).await;
                guard.finish(outcome);
                outcome
            }
            Gate::Follower(mut receiver) => {
                debug!("Sync already running; waiting for its outcome");
                match receiver.wait_for(Option::is_some).await {
                    Ok(outcome) => (*outcome).unwrap_or(SyncOutcome::Retry),
                    // the running upload was dropped before it finished
                    Err(_) => SyncOutcome::Retry,
                }
            }
        }
    }

    fn lock_inflight(&self) -> MutexGuard<'_, Option<watch::Receiver<Option<SyncOutcome>>>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self) -> Gate<'_> {
        let mut inflight = self.lock_inflight();
        if let Some(receiver) = inflight.as_ref() {
            return Gate::Follower(receiver.clone());
        }

        let (sender, receiver) = watch::channel(None);
        *inflight = Some(receiver);
        Gate::Leader(InflightGuard {
            slot: &self.inflight,
            sender,
        })
    }

    async fn execute(&self, today: NaiveDate) -> SyncOutcome {
        let credential = match self.vault.load_credential() {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                warn!("No device credentials stored; register the device before syncing");
                return SyncOutcome::Failure;
            }
            Err(e) => {
                error!("Failed to read device credentials: {}", e);
                return SyncOutcome::Failure;
            }
        };

        let window = DateWindow::trailing(today, self.window_days);
        info!("Starting health sync for {} to {}", window.from, window.to);

        let data = self.collect(&window).await;
        if data.is_empty() {
            info!("No health data in window; nothing to upload");
            return SyncOutcome::Success;
        }

        let payload = HealthDataWindow {
            device_id: credential.device_id,
            platform: self.platform,
            window,
            data,
        };
        let upload = match SignedUpload::sign(&payload, &credential.hmac_secret) {
            Ok(upload) => upload,
            Err(e) => {
                error!("Failed to sign health data: {}", e);
                return SyncOutcome::Failure;
            }
        };

        debug!(
            "Uploading {} days with idempotency key {}",
            payload.data.len(),
            upload.idempotency_key
        );
        let headers = [
            (SIGNATURE_HEADER, upload.signature_header()),
            (IDEMPOTENCY_HEADER, upload.idempotency_key.to_string()),
        ];
        let response = self
            .transport
            .post_json(SYNC_PATH, &credential.auth_token, &headers, upload.body)
            .await;

        match response {
            Ok(response) if response.is_success() => {
                if let Err(e) = self.vault.record_sync(today) {
                    error!("Upload accepted but last sync date not saved: {}", e);
                }
                info!("Health data synced ({} days)", payload.data.len());
                SyncOutcome::Success
            }
            Ok(response) => {
                warn!(
                    "Health sync rejected with status {}: {}",
                    response.status,
                    extract_error_message(&response.body)
                );
                SyncOutcome::Retry
            }
            Err(e) => {
                warn!("Health sync request failed: {}", e);
                SyncOutcome::Retry
            }
        }
    }

    async fn collect(&self, window: &DateWindow) -> Vec<DailyMetrics> {
        stream::iter(window.dates())
            .then(move |date| async move { (date, self.query_day(date).await) })
            .filter_map(|(date, result)| async move {
                match result {
                    Ok(metrics) if metrics.is_valid() => Some(metrics),
                    Ok(_) => {
                        warn!("Skipping {}: invalid record", date);
                        None
                    }
                    Err(e) => {
                        warn!("Skipping {}: {}", date, e);
                        None
                    }
                }
            })
            .collect()
            .await
    }

    async fn query_day(&self, date: NaiveDate) -> Result<DailyMetrics> {
        let limit = Duration::from_millis(self.query_timeout_ms);
        timeout(limit, self.provider.daily_metrics(date))
            .await
            .map_err(|_| HealthSyncError::Timeout {
                timeout_ms: self.query_timeout_ms,
            })?
    }
}

#[async_trait]
impl SyncJob for SyncService {
    async fn run(&self) -> SyncOutcome {
        self.run_sync().await
    }
}
