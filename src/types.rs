use chrono::{Days, NaiveDate};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// Mobile platform tag sent to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Android / Health Connect
    Android,
    /// iOS / `HealthKit`
    Ios,
}

impl Platform {
    /// Wire representation of the platform
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Android => "android",
            Self::Ios => "ios",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Description of the device sent along with a registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Platform tag
    pub platform: Platform,
    /// Human readable device model or name
    pub device_name: String,
    /// Version of the companion app
    pub app_version: String,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            platform: Platform::Android,
            device_name: default_device_name(),
            app_version: crate::VERSION.to_string(),
        }
    }
}

fn default_device_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .or_else(|_| std::fs::read_to_string("/etc/hostname").map(|s| s.trim().to_string()))
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown-device".to_string())
}

/// Metric categories the user agreed to share
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentSet {
    /// Daily step count
    pub steps: bool,
    /// Average heart rate
    pub heart_rate: bool,
    /// Sleep duration
    pub sleep: bool,
    /// Calories burned
    pub calories: bool,
}

impl ConsentSet {
    /// Consent to every metric category; partial consent is not modeled
    #[must_use]
    pub const fn all_granted() -> Self {
        Self {
            steps: true,
            heart_rate: true,
            sleep: true,
            calories: true,
        }
    }
}

/// Identity and signing material of a registered device
#[derive(Debug)]
pub struct DeviceCredential {
    /// Identifier generated on the device at registration time
    pub device_id: String,
    /// Hex encoded HMAC-SHA256 key issued by the backend
    pub hmac_secret: SecretString,
    /// Bearer credential used for authenticated calls
    pub auth_token: SecretString,
    /// True once the backend accepted the registration
    pub registered: bool,
}

/// Progress of the periodic upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncState {
    /// Date of the most recent successful upload
    pub last_sync_date: Option<NaiveDate>,
}

/// Health metrics for a single calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetrics {
    /// Calendar day the metrics belong to
    pub date: NaiveDate,
    /// Step count
    pub steps: u32,
    /// Average heart rate in beats per minute
    pub heart_rate: u32,
    /// Hours slept
    pub sleep_hours: f64,
    /// Calories burned
    pub calories: u32,
}

impl DailyMetrics {
    /// Check that every value is usable for upload
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.sleep_hours.is_finite() && self.sleep_hours >= 0.0
    }
}

/// Inclusive date range covered by an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    /// First day, inclusive
    pub from: NaiveDate,
    /// Last day, inclusive
    pub to: NaiveDate,
}

impl DateWindow {
    /// Window ending `today` and starting `days` days earlier
    #[must_use]
    pub fn trailing(today: NaiveDate, days: u32) -> Self {
        let from = today
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);
        Self { from, to: today }
    }

    /// Every date of the window in ascending order
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> {
        let to = self.to;
        self.from.iter_days().take_while(move |date| *date <= to)
    }
}

/// Payload unit of one sync run
///
/// Field order is the wire order. The signature covers the exact serialized
/// bytes, so fields must not be reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthDataWindow {
    /// Registered device identifier
    #[serde(rename = "deviceId")]
    pub device_id: String,
    /// Platform tag
    pub platform: Platform,
    /// Covered date range
    pub window: DateWindow,
    /// Collected days, ascending by date
    pub data: Vec<DailyMetrics>,
}

impl HealthDataWindow {
    /// Check whether any day was collected
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Result of one sync run, as reported to the job scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncOutcome {
    /// Data uploaded, or nothing to upload
    Success,
    /// Transient failure; try again later
    Retry,
    /// Permanent failure; waiting will not help
    Failure,
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "Success"),
            Self::Retry => write!(f, "Retry"),
            Self::Failure => write!(f, "Failure"),
        }
    }
}

/// Coarse state shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// Provider missing or permissions not granted
    NotConnected,
    /// Permissions granted but the device is not registered
    ConnectedUnregistered,
    /// Registered and ready to sync
    RegisteredReady,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "Health data not available or permissions missing"),
            Self::ConnectedUnregistered => write!(f, "Connected - device not registered"),
            Self::RegisteredReady => write!(f, "Device registered and ready to sync"),
        }
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL the endpoint paths are appended to
    pub base_url: String,
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Whole-request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Number of days before today included in each upload
    pub window_days: u32,
    /// Hours between periodic runs
    pub sync_interval_hours: u64,
    /// Delay before a manual sync runs, in milliseconds
    pub manual_sync_delay_ms: u64,
    /// Minimum spacing between the start of two runs, in milliseconds
    pub min_run_spacing_ms: u64,
    /// First delay after a `Retry` outcome, in milliseconds
    pub retry_backoff_ms: u64,
    /// Upper bound for the retry delay, in milliseconds
    pub max_retry_backoff_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: crate::DEFAULT_BASE_URL.to_string(),
            connect_timeout_ms: 30_000,
            request_timeout_ms: 30_000,
            window_days: 7,
            sync_interval_hours: 24,
            manual_sync_delay_ms: 0,
            min_run_spacing_ms: 15 * 60 * 1_000,
            retry_backoff_ms: 30_000,
            max_retry_backoff_ms: 60 * 60 * 1_000,
        }
    }
}

impl SyncConfig {
    /// Same configuration pointed at another backend
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Interval between periodic runs
    #[must_use]
    pub const fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_hours * 60 * 60)
    }

    /// Delay before a manual sync runs
    #[must_use]
    pub const fn manual_sync_delay(&self) -> Duration {
        Duration::from_millis(self.manual_sync_delay_ms)
    }
}
