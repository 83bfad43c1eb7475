use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    error::{HealthSyncError, Result},
    protocol::RegistrationStatus,
    provider::HealthDataProvider,
    registration::RegistrationClient,
    scheduler::{JobScheduler, SchedulePolicy, TokioJobScheduler},
    storage::{CredentialVault, SecureStore},
    sync::SyncService,
    transport::HttpTransport,
    types::{ConnectionStatus, DeviceCredential, DeviceProfile, SyncConfig, SyncOutcome},
};

/// Entry point for the companion app
///
/// Wires the provider, secure store, registration client, uploader and job
/// scheduler together and exposes the operations behind the companion screen.
pub struct HealthCompanion {
    config: SyncConfig,
    vault: CredentialVault,
    provider: Arc<dyn HealthDataProvider>,
    registration: RegistrationClient,
    sync: Arc<SyncService>,
    scheduler: Arc<dyn JobScheduler>,
}

impl HealthCompanion {
    /// Create a companion driven by an in-process [`TokioJobScheduler`]
    ///
    /// Must be called inside a tokio runtime for scheduled runs to execute.
    ///
    /// # Errors
    ///
    /// Returns [`HealthSyncError::Network`] if the HTTP client cannot be built.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use healthsync::{HealthCompanion, MemoryStore, SimulatedProvider, SyncConfig};
    /// use std::sync::Arc;
    ///
    /// #[tokio::main]
    /// async fn main() -> healthsync::Result<()> {
    ///     let companion = HealthCompanion::new(
    ///         SyncConfig::default().with_base_url("https://example.supabase.co/functions/v1"),
    ///         Default::default(),
    ///         Arc::new(MemoryStore::new()),
    ///         Arc::new(SimulatedProvider::new()),
    ///     )?;
    ///
    ///     companion.connect("user-access-token").await?;
    ///     println!("{}", companion.run_sync().await);
    ///     Ok(())
    /// }
    /// ```
    pub fn new(
        config: SyncConfig,
        profile: DeviceProfile,
        store: Arc<dyn SecureStore>,
        provider: Arc<dyn HealthDataProvider>,
    ) -> Result<Self> {
        let policy = SchedulePolicy::from(&config);
        Self::build(config, profile, store, provider, |sync| {
            let scheduler: Arc<dyn JobScheduler> = Arc::new(TokioJobScheduler::new(sync, policy));
            scheduler
        })
    }

    /// Create a companion driven by an external job system
    ///
    /// # Errors
    ///
    /// Returns [`HealthSyncError::Network`] if the HTTP client cannot be built.
    pub fn with_scheduler(
        config: SyncConfig,
        profile: DeviceProfile,
        store: Arc<dyn SecureStore>,
        provider: Arc<dyn HealthDataProvider>,
        scheduler: Arc<dyn JobScheduler>,
    ) -> Result<Self> {
        Self::build(config, profile, store, provider, |_| scheduler)
    }

    fn build(
        config: SyncConfig,
        profile: DeviceProfile,
        store: Arc<dyn SecureStore>,
        provider: Arc<dyn HealthDataProvider>,
        scheduler: impl FnOnce(Arc<SyncService>) -> Arc<dyn JobScheduler>,
    ) -> Result<Self> {
        let transport = HttpTransport::new(&config)?;
        let vault = CredentialVault::new(store);

        let sync = Arc::new(SyncService::new(
            transport.clone(),
            vault.clone(),
            Arc::clone(&provider),
            profile.platform,
            &config,
        ));
        let scheduler = scheduler(Arc::clone(&sync));
        let registration = RegistrationClient::new(
            transport,
            vault.clone(),
            Arc::clone(&scheduler),
            profile,
            config.sync_interval(),
        );

        Ok(Self {
            config,
            vault,
            provider,
            registration,
            sync,
            scheduler,
        })
    }

    /// Uploader used for scheduled and manual runs
    #[must_use]
    pub const fn sync_service(&self) -> &Arc<SyncService> {
        &self.sync
    }

    /// Current connection state
    ///
    /// # Errors
    ///
    /// Returns [`HealthSyncError::Storage`] if the secure store cannot be read.
    pub async fn status(&self) -> Result<ConnectionStatus> {
        if !self.provider.is_available().await || !self.vault.permissions_granted()? {
            return Ok(ConnectionStatus::NotConnected);
        }

        let registered = self
            .vault
            .load_credential()?
            .is_some_and(|credential| credential.registered);
        Ok(if registered {
            ConnectionStatus::RegisteredReady
        } else {
            ConnectionStatus::ConnectedUnregistered
        })
    }

    /// Obtain health permissions, then register the device
    ///
    /// # Errors
    ///
    /// Returns [`HealthSyncError::ProviderUnavailable`] or
    /// [`HealthSyncError::PermissionDenied`] before any request is made, or
    /// any error of [`RegistrationClient::register`].
    pub async fn connect(&self, auth_token: &str) -> Result<DeviceCredential> {
        if !self.provider.is_available().await {
            warn!("Health data provider is not available on this device");
            return Err(HealthSyncError::ProviderUnavailable);
        }

        let granted = self.provider.request_permissions().await?;
        self.vault.set_permissions_granted(granted)?;
        if !granted {
            warn!("Health permissions were not granted");
            return Err(HealthSyncError::PermissionDenied);
        }

        info!("Health permissions granted");
        self.register(auth_token).await
    }

    /// Register the device
    ///
    /// # Errors
    ///
    /// See [`RegistrationClient::register`].
    pub async fn register(&self, auth_token: &str) -> Result<DeviceCredential> {
        self.registration.register(auth_token).await
    }

    /// Run one sync now, on the calling task
    pub async fn run_sync(&self) -> SyncOutcome {
        self.sync.run_sync().await
    }

    /// Queue a manual sync on the job scheduler
    ///
    /// # Errors
    ///
    /// Returns [`HealthSyncError::NotRegistered`] for an unregistered device
    /// or the scheduler's error.
    pub async fn sync_now(&self) -> Result<()> {
        if !self.vault.is_registered()? {
            return Err(HealthSyncError::NotRegistered);
        }

        self.scheduler
            .schedule_one_off(self.config.manual_sync_delay())
            .await?;
        info!("Manual health sync queued");
        Ok(())
    }

    /// Stop all scheduled syncing
    ///
    /// # Errors
    ///
    /// Returns the scheduler's error.
    pub async fn disable_sync(&self) -> Result<()> {
        self.scheduler.cancel_all().await
    }

    /// Re-arm the periodic schedule of an already registered device
    ///
    /// Meant for process start. Resolves to `false` if the device is not registered.
    ///
    /// # Errors
    ///
    /// Returns [`HealthSyncError::Storage`] or the scheduler's error.
    pub async fn resume(&self) -> Result<bool> {
        if !self.vault.is_registered()? {
            return Ok(false);
        }

        self.scheduler
            .schedule_periodic(self.config.sync_interval())
            .await?;
        Ok(true)
    }

    /// Date of the last successful upload
    ///
    /// # Errors
    ///
    /// Returns [`HealthSyncError::Storage`] if the secure store cannot be read.
    pub fn last_sync_date(&self) -> Result<Option<NaiveDate>> {
        Ok(self.vault.load_sync_state()?.last_sync_date)
    }

    /// Backend view of this device
    ///
    /// # Errors
    ///
    /// See [`RegistrationClient::registration_status`].
    pub async fn registration_status(&self) -> Result<RegistrationStatus> {
        self.registration.registration_status().await
    }
}
