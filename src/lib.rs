#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # healthsync
//!
//! Device registration and signed, idempotent health-metric upload for
//! mobile health companions.
//!
//! A companion app reads steps, heart rate, sleep and calories from the
//! phone's health store and ships them to a backend. This crate implements
//! the protocol between the two:
//!
//! - **Registration**: a one-time exchange, authorized by a bearer token from
//!   the app's login flow, that yields a device id and a per-device HMAC secret
//! - **Sync**: a recurring job that collects the trailing week of daily
//!   metrics, signs the exact payload bytes with HMAC-SHA256 and posts them
//!   under a fresh idempotency key
//! - **Scheduling**: a periodic run every 24 hours, manual runs on demand and
//!   backoff retries, behind the [`JobScheduler`] trait
//!
//! The health store and the secure storage are collaborators injected through
//! the [`HealthDataProvider`] and [`SecureStore`] traits.
//!
//! ## Wire Format
//!
//! ```text
//! POST {base}/health-sync
//! Authorization: Bearer <token>
//! X-Signature: sha256=<hex hmac of body>
//! X-Idempotency-Key: <uuid v4>
//!
//! {"deviceId":"…","platform":"android","window":{"from":"2024-01-01","to":"2024-01-08"},
//!  "data":[{"date":"2024-01-01","steps":8500,"heart_rate":72,"sleep_hours":7.5,"calories":2200}]}
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use healthsync::{FileStore, HealthCompanion, SimulatedProvider, SyncConfig, SyncOutcome};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let companion = HealthCompanion::new(
//!         SyncConfig::default().with_base_url("https://project.supabase.co/functions/v1"),
//!         Default::default(),
//!         Arc::new(FileStore::open_default()?),
//!         Arc::new(SimulatedProvider::new()),
//!     )?;
//!
//!     // Ask for health permissions and register with the backend
//!     companion.connect("user-access-token").await?;
//!
//!     // Upload the trailing week right away
//!     if companion.run_sync().await == SyncOutcome::Retry {
//!         companion.sync_now().await?;
//!     }
//!
//!     Ok(())
//! }
//! ```

/// Device-facing entry point
pub mod companion;
/// Error types and handling
pub mod error;
/// Wire bodies, canonical payload and HMAC signing
pub mod protocol;
/// Health data provider abstraction
pub mod provider;
/// Device registration client
pub mod registration;
/// Background job scheduling
pub mod scheduler;
/// Secure key-value storage for credentials and sync state
pub mod storage;
/// Health data upload
pub mod sync;
/// HTTP transport
pub mod transport;
/// Type definitions and data structures
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export the main types for convenient usage
pub use companion::HealthCompanion;
pub use error::{HealthSyncError, Result};
pub use protocol::{verify_signature, RegistrationStatus};
#[cfg(feature = "simulated")]
pub use provider::SimulatedProvider;
pub use provider::HealthDataProvider;
pub use registration::RegistrationClient;
pub use scheduler::{JobScheduler, SchedulePolicy, SyncJob, TokioJobScheduler};
pub use storage::{CredentialVault, FileStore, MemoryStore, SecureStore};
pub use sync::SyncService;
pub use types::{
    ConnectionStatus, DailyMetrics, DateWindow, DeviceCredential, DeviceProfile, HealthDataWindow,
    Platform, SyncConfig, SyncOutcome, SyncState,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Backend used when no base URL is configured
///
/// Points at a local Supabase functions server, which is where the
/// registration and sync functions run during development.
pub const DEFAULT_BASE_URL: &str = "http://localhost:54321/functions/v1";

/// Path of the device registration function
pub const REGISTER_PATH: &str = "/health-register-device";

/// Path of the health data upload function
pub const SYNC_PATH: &str = "/health-sync";
