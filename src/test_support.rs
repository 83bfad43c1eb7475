//! Fixtures shared by the unit tests

use async_trait::async_trait;
use chrono::NaiveDate;
use secrecy::SecretString;
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::net::TcpListener;

use crate::{
    error::{HealthSyncError, Result},
    provider::HealthDataProvider,
    scheduler::JobScheduler,
    storage::{CredentialVault, MemoryStore},
    types::{DailyMetrics, DeviceCredential},
};

pub const TEST_SECRET: &str = "aabbccddeeff00112233445566778899aabbccddeeff00112233445566778899";
pub const TEST_DEVICE_ID: &str = "0f8e2a4c-6b1d-4e3f-9a7b-5c2d1e0f3a4b";

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn metrics(date: NaiveDate, steps: u32) -> DailyMetrics {
    DailyMetrics {
        date,
        steps,
        heart_rate: 72,
        sleep_hours: 7.5,
        calories: 2200,
    }
}

pub fn memory_vault() -> CredentialVault {
    CredentialVault::new(Arc::new(MemoryStore::new()))
}

pub fn registered_vault(secret: &str) -> CredentialVault {
    let vault = memory_vault();
    vault
        .save_credential(&DeviceCredential {
            device_id: TEST_DEVICE_ID.to_string(),
            hmac_secret: SecretString::from(secret),
            auth_token: SecretString::from("tok1"),
            registered: true,
        })
        .unwrap();
    vault
}

/// Provider answering from a fixed table; dates missing from the table fail
pub struct FixtureProvider {
    days: HashMap<NaiveDate, DailyMetrics>,
    available: bool,
    grant: bool,
    delay: Duration,
    stalled: HashSet<NaiveDate>,
}

impl FixtureProvider {
    pub fn new(days: impl IntoIterator<Item = DailyMetrics>) -> Self {
        Self {
            days: days.into_iter().map(|day| (day.date, day)).collect(),
            available: true,
            grant: true,
            delay: Duration::ZERO,
            stalled: HashSet::new(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::<DailyMetrics>::new())
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn denying(mut self) -> Self {
        self.grant = false;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queries for `date` never complete
    pub fn stalling(mut self, date: NaiveDate) -> Self {
        self.stalled.insert(date);
        self
    }
}

#[async_trait]
impl HealthDataProvider for FixtureProvider {
    async fn is_available(&self) -> bool {
        self.available
    }

    async fn request_permissions(&self) -> Result<bool> {
        Ok(self.grant)
    }

    async fn daily_metrics(&self, date: NaiveDate) -> Result<DailyMetrics> {
        if self.stalled.contains(&date) {
            std::future::pending::<()>().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.days
            .get(&date)
            .cloned()
            .ok_or_else(|| HealthSyncError::Provider(format!("no record for {date}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledCall {
    Periodic(Duration),
    OneOff(Duration),
    CancelAll,
}

/// Scheduler that only records what it was asked to do
#[derive(Default)]
pub struct RecordingScheduler {
    calls: Mutex<Vec<ScheduledCall>>,
    fail: bool,
}

impl RecordingScheduler {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<ScheduledCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: ScheduledCall) -> Result<()> {
        if self.fail {
            return Err(HealthSyncError::Scheduler("scheduler offline".to_string()));
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl JobScheduler for RecordingScheduler {
    async fn schedule_periodic(&self, interval: Duration) -> Result<()> {
        self.record(ScheduledCall::Periodic(interval))
    }

    async fn schedule_one_off(&self, delay: Duration) -> Result<()> {
        self.record(ScheduledCall::OneOff(delay))
    }

    async fn cancel_all(&self) -> Result<()> {
        self.record(ScheduledCall::CancelAll)
    }
}

/// Base URL of a backend that accepts connections and never answers
pub async fn silent_backend() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{addr}")
}
