use healthsync::{
    ConnectionStatus, FileStore, HealthCompanion, Result, SimulatedProvider, SyncConfig,
    SyncOutcome,
};
use std::{env, sync::Arc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("💓 Health Sync Demo");

    let mut config = SyncConfig::default();
    if let Ok(base_url) = env::var("HEALTHSYNC_BASE_URL") {
        config = config.with_base_url(base_url);
    }
    info!("Backend: {}", config.base_url);

    let store = FileStore::open_default()?;
    info!("Credential store: {}", store.path().display());

    let companion = HealthCompanion::new(
        config,
        Default::default(),
        Arc::new(store),
        Arc::new(SimulatedProvider::new()),
    )?;

    let status = companion.status().await?;
    info!("📊 Status: {}", status);

    if status == ConnectionStatus::RegisteredReady {
        companion.resume().await?;
    } else {
        let Ok(token) = env::var("HEALTHSYNC_AUTH_TOKEN") else {
            warn!("Set HEALTHSYNC_AUTH_TOKEN to register this device");
            return Ok(());
        };

        info!("🔐 Registering device...");
        match companion.connect(&token).await {
            Ok(credential) => info!("✅ Registered as {}", credential.device_id),
            Err(e) => {
                error!("❌ Registration failed: {}", e);
                return Err(e);
            }
        }
    }

    info!("📤 Uploading health data...");
    match companion.run_sync().await {
        SyncOutcome::Success => info!("✅ Sync complete"),
        SyncOutcome::Retry => {
            warn!("⚠️ Sync will be retried");
            companion.sync_now().await?;
        }
        SyncOutcome::Failure => error!("❌ Sync failed"),
    }

    match companion.last_sync_date()? {
        Some(date) => info!("Last successful sync: {}", date),
        None => info!("No successful sync yet"),
    }

    match companion.registration_status().await {
        Ok(status) => info!("Backend registration: {:?}", status),
        Err(e) => warn!("Could not query registration status: {}", e),
    }

    info!("Waiting for scheduled syncs, press Ctrl+C to exit");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }
    companion.disable_sync().await?;

    info!("👋 Demo completed");
    Ok(())
}
