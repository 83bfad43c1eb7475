use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{error::Result, types::DailyMetrics};

/// Source of daily health metrics on the device
///
/// Implementations wrap the platform health store (Health Connect, `HealthKit`).
/// The sync logic only relies on this trait, so a placeholder can be swapped
/// for a real store without touching collection or signing.
#[async_trait]
pub trait HealthDataProvider: Send + Sync {
    /// Check whether the platform health store is installed and usable
    async fn is_available(&self) -> bool;

    /// Ask the user for read access to steps, heart rate, sleep and calories
    ///
    /// Resolves to `true` if access was granted.
    ///
    /// # Errors
    ///
    /// Returns [`crate::HealthSyncError::Provider`] if the request could not be shown.
    async fn request_permissions(&self) -> Result<bool>;

    /// Metrics recorded on `date`
    ///
    /// # Errors
    ///
    /// Returns [`crate::HealthSyncError::Provider`] if the day cannot be read.
    async fn daily_metrics(&self, date: NaiveDate) -> Result<DailyMetrics>;
}

#[cfg(feature = "simulated")]
pub use simulated::SimulatedProvider;

#[cfg(feature = "simulated")]
mod simulated {
    use super::{async_trait, DailyMetrics, HealthDataProvider, NaiveDate, Result};
    use rand::Rng;

    /// Placeholder provider that makes up plausible metrics
    ///
    /// Stands in for the platform store on hosts that have none.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SimulatedProvider;

    impl SimulatedProvider {
        /// Create a simulated provider
        #[must_use]
        pub const fn new() -> Self {
            Self
        }

        fn generate(date: NaiveDate) -> DailyMetrics {
            let mut rng = rand::thread_rng();
            let sleep_tenths: u32 = rng.gen_range(60..=100);

            DailyMetrics {
                date,
                steps: rng.gen_range(5_000..15_000),
                heart_rate: rng.gen_range(60..100),
                sleep_hours: f64::from(sleep_tenths) / 10.0,
                calories: rng.gen_range(1_500..2_500),
            }
        }
    }

    #[async_trait]
    impl HealthDataProvider for SimulatedProvider {
        async fn is_available(&self) -> bool {
            true
        }

        async fn request_permissions(&self) -> Result<bool> {
            Ok(true)
        }

        async fn daily_metrics(&self, date: NaiveDate) -> Result<DailyMetrics> {
            Ok(Self::generate(date))
        }
    }

}
