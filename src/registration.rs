use bytes::Bytes;
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    error::{HealthSyncError, Result},
    protocol::{
        extract_error_message, parse_registration_secret, RegistrationRequest, RegistrationStatus,
    },
    scheduler::JobScheduler,
    storage::CredentialVault,
    transport::{HttpResponse, HttpTransport},
    types::{DeviceCredential, DeviceProfile},
    REGISTER_PATH,
};

/// One-time device registration against the backend
///
/// Every successful [`RegistrationClient::register`] call issues a new device
/// id and a new signing secret, replacing whatever was stored before.
pub struct RegistrationClient {
    transport: HttpTransport,
    vault: CredentialVault,
    scheduler: Arc<dyn JobScheduler>,
    profile: DeviceProfile,
    sync_interval: Duration,
}

impl RegistrationClient {
    /// Create a registration client
    ///
    /// `sync_interval` is the periodic schedule armed after a successful registration.
    #[must_use]
    pub fn new(
        transport: HttpTransport,
        vault: CredentialVault,
        scheduler: Arc<dyn JobScheduler>,
        profile: DeviceProfile,
        sync_interval: Duration,
    ) -> Self {
        Self {
            transport,
            vault,
            scheduler,
            profile,
            sync_interval,
        }
    }

    /// Profile sent with each registration
    #[must_use]
    pub const fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// Register this device and persist the issued credential
    ///
    /// On success the periodic sync is scheduled. A scheduler failure at that
    /// point is logged and does not fail the registration.
    ///
    /// # Errors
    ///
    /// - [`HealthSyncError::MissingCredential`] for an empty token, before any request
    /// - [`HealthSyncError::Network`] or [`HealthSyncError::Timeout`] without a response
    /// - [`HealthSyncError::ServerRejected`] for a non-2xx status
    /// - [`HealthSyncError::MalformedResponse`] if no secret was returned
    /// - [`HealthSyncError::Storage`] if the credential cannot be persisted
    pub async fn register(&self, auth_token: &str) -> Result<DeviceCredential> {
        if auth_token.trim().is_empty() {
            warn!("Registration attempted without an auth token");
            return Err(HealthSyncError::MissingCredential);
        }

        let device_id = Uuid::new_v4().to_string();
        let request = RegistrationRequest::new(device_id.clone(), &self.profile);
        let body = Bytes::from(serde_json::to_vec(&request)?);
        let bearer = SecretString::from(auth_token);

        info!(
            "Registering device {} ({}, {})",
            device_id, self.profile.platform, self.profile.device_name
        );
        let response = self
            .transport
            .post_json(REGISTER_PATH, &bearer, &[], body)
            .await?;
        check_status(&response, "Registration")?;

        let hmac_secret = parse_registration_secret(&response.body)?;
        let credential = DeviceCredential {
            device_id,
            hmac_secret,
            auth_token: bearer,
            registered: true,
        };
        self.vault.save_credential(&credential)?;
        info!("Device {} registered", credential.device_id);

        if let Err(e) = self.scheduler.schedule_periodic(self.sync_interval).await {
            warn!("Device registered but periodic sync not scheduled: {}", e);
        }

        Ok(credential)
    }

    /// Ask the backend what it knows about the stored device
    ///
    /// # Errors
    ///
    /// Returns [`HealthSyncError::NotRegistered`] without a stored credential,
    /// [`HealthSyncError::ServerRejected`] for a non-2xx status and
    /// [`HealthSyncError::MalformedResponse`] for an undecodable body.
    pub async fn registration_status(&self) -> Result<RegistrationStatus> {
        let credential = self
            .vault
            .load_credential()?
            .ok_or(HealthSyncError::NotRegistered)?;

        let response = self
            .transport
            .get(
                REGISTER_PATH,
                &credential.auth_token,
                &[
                    ("deviceId", credential.device_id.as_str()),
                    ("platform", self.profile.platform.as_str()),
                ],
            )
            .await?;
        check_status(&response, "Registration status query")?;

        let status: RegistrationStatus = serde_json::from_slice(&response.body)
            .map_err(|e| HealthSyncError::MalformedResponse(e.to_string()))?;
        debug!("Backend registration status: {:?}", status);
        Ok(status)
    }
}

fn check_status(response: &HttpResponse, operation: &str) -> Result<()> {
    if response.is_success() {
        return Ok(());
    }

    let message = extract_error_message(&response.body);
    error!(
        "{} rejected with status {}: {}",
        operation, response.status, message
    );
    Err(HealthSyncError::ServerRejected {
        status: response.status,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        protocol::UNKNOWN_ERROR_MESSAGE,
        test_support::{
            memory_vault, registered_vault, silent_backend, RecordingScheduler, ScheduledCall,
            TEST_DEVICE_ID, TEST_SECRET,
        },
        types::{Platform, SyncConfig},
    };
    use mockito::{Matcher, Server, ServerGuard};
    use secrecy::ExposeSecret;
    use serde_json::json;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn client(
        server: &ServerGuard,
        vault: CredentialVault,
        scheduler: Arc<RecordingScheduler>,
    ) -> RegistrationClient {
        let config = SyncConfig::default().with_base_url(server.url());
        let profile = DeviceProfile {
            platform: Platform::Android,
            device_name: "Pixel 8".to_string(),
            app_version: "1.0.0".to_string(),
        };
        RegistrationClient::new(
            HttpTransport::new(&config).unwrap(),
            vault,
            scheduler,
            profile,
            config.sync_interval(),
        )
    }

    fn success_body() -> String {
        json!({
            "success": true,
            "deviceId": "42",
            "hmacSecret": TEST_SECRET,
            "message": "Device registered successfully",
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_register_persists_and_schedules() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", REGISTER_PATH)
            .match_header("authorization", "Bearer tok1")
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJson(json!({
                "platform": "android",
                "deviceName": "Pixel 8",
                "appVersion": "1.0.0",
                "consents": {"steps": true, "heart_rate": true, "sleep": true, "calories": true},
            })))
            .with_status(200)
            .with_body(success_body())
            .expect(1)
            .create_async()
            .await;

        let vault = memory_vault();
        let scheduler = Arc::new(RecordingScheduler::default());
        let client = client(&server, vault.clone(), scheduler.clone());

        let credential = client.register("tok1").await.unwrap();
        mock.assert_async().await;

        assert!(credential.registered);
        assert!(Uuid::parse_str(&credential.device_id).is_ok());
        assert_eq!(credential.hmac_secret.expose_secret(), TEST_SECRET);

        let stored = vault.load_credential().unwrap().unwrap();
        assert_eq!(stored.device_id, credential.device_id);
        assert_eq!(stored.hmac_secret.expose_secret(), TEST_SECRET);
        assert_eq!(stored.auth_token.expose_secret(), "tok1");
        assert!(vault.is_registered().unwrap());

        assert_eq!(scheduler.calls(), vec![ScheduledCall::Periodic(DAY)]);
    }

    #[tokio::test]
    async fn test_empty_token_makes_no_request() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", REGISTER_PATH)
            .expect(0)
            .create_async()
            .await;

        let vault = memory_vault();
        let scheduler = Arc::new(RecordingScheduler::default());
        let client = client(&server, vault.clone(), scheduler.clone());

        for token in ["", "   "] {
            let error = client.register(token).await.unwrap_err();
            assert!(matches!(error, HealthSyncError::MissingCredential));
            assert!(error.requires_registration());
        }

        mock.assert_async().await;
        assert!(vault.load_credential().unwrap().is_none());
        assert!(scheduler.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rejection_carries_server_message() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", REGISTER_PATH)
            .with_status(401)
            .with_body(r#"{"error":"Invalid authentication token"}"#)
            .create_async()
            .await;

        let vault = memory_vault();
        let scheduler = Arc::new(RecordingScheduler::default());
        let client = client(&server, vault.clone(), scheduler.clone());

        match client.register("expired").await {
            Err(HealthSyncError::ServerRejected { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "Invalid authentication token");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(vault.load_credential().unwrap().is_none());
        assert!(scheduler.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rejection_without_error_field() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", REGISTER_PATH)
            .with_status(500)
            .with_body("<html>Internal Server Error</html>")
            .create_async()
            .await;

        let client = client(&server, memory_vault(), Arc::new(RecordingScheduler::default()));

        match client.register("tok1").await {
            Err(HealthSyncError::ServerRejected { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, UNKNOWN_ERROR_MESSAGE);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_secret_is_malformed() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", REGISTER_PATH)
            .with_status(200)
            .with_body(r#"{"success":true,"deviceId":"42"}"#)
            .create_async()
            .await;

        let vault = memory_vault();
        let client = client(&server, vault.clone(), Arc::new(RecordingScheduler::default()));

        let error = client.register("tok1").await.unwrap_err();
        assert!(matches!(error, HealthSyncError::MalformedResponse(_)));
        assert!(vault.load_credential().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scheduler_failure_keeps_registration() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", REGISTER_PATH)
            .with_status(200)
            .with_body(success_body())
            .create_async()
            .await;

        let vault = memory_vault();
        let client = client(&server, vault.clone(), Arc::new(RecordingScheduler::failing()));

        let credential = client.register("tok1").await.unwrap();
        assert!(credential.registered);
        assert!(vault.is_registered().unwrap());
    }

    #[tokio::test]
    async fn test_reregistration_rotates_device_id() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", REGISTER_PATH)
            .with_status(200)
            .with_body(success_body())
            .expect(2)
            .create_async()
            .await;

        let vault = memory_vault();
        let client = client(&server, vault.clone(), Arc::new(RecordingScheduler::default()));

        let first = client.register("tok1").await.unwrap();
        let second = client.register("tok1").await.unwrap();

        assert_ne!(first.device_id, second.device_id);
        assert_eq!(
            vault.load_credential().unwrap().unwrap().device_id,
            second.device_id
        );
    }

    #[tokio::test]
    async fn test_status_requires_registration() {
        let server = Server::new_async().await;
        let client = client(&server, memory_vault(), Arc::new(RecordingScheduler::default()));

        let error = client.registration_status().await.unwrap_err();
        assert!(matches!(error, HealthSyncError::NotRegistered));
    }

    #[tokio::test]
    async fn test_status_query() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", REGISTER_PATH)
            .match_header("authorization", "Bearer tok1")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("deviceId".into(), TEST_DEVICE_ID.into()),
                Matcher::UrlEncoded("platform".into(), "android".into()),
            ]))
            .with_status(200)
            .with_body(
                json!({
                    "registered": true,
                    "device": {
                        "id": "42",
                        "deviceName": "Pixel 8",
                        "appVersion": "1.0.0",
                        "isActive": true,
                        "createdAt": "2024-01-01T00:00:00Z",
                        "lastUsedAt": null,
                    },
                    "consents": {"steps": true, "sleep": false},
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = client(
            &server,
            registered_vault(TEST_SECRET),
            Arc::new(RecordingScheduler::default()),
        );
        let status = client.registration_status().await.unwrap();
        mock.assert_async().await;

        assert!(status.registered);
        let device = status.device.unwrap();
        assert_eq!(device.id, "42");
        assert!(device.is_active);
        assert_eq!(device.last_used_at, None);
        assert_eq!(status.consents.get("sleep"), Some(&false));
    }

    #[tokio::test]
    async fn test_status_for_unknown_device() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", REGISTER_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"registered":false}"#)
            .create_async()
            .await;

        let client = client(
            &server,
            registered_vault(TEST_SECRET),
            Arc::new(RecordingScheduler::default()),
        );
        let status = client.registration_status().await.unwrap();

        assert!(!status.registered);
        assert!(status.device.is_none());
        assert!(status.consents.is_empty());
    }

    #[tokio::test]
    async fn test_registration_timeout_is_network_error() {
        let config = SyncConfig {
            request_timeout_ms: 200,
            ..SyncConfig::default().with_base_url(silent_backend().await)
        };
        let vault = memory_vault();
        let scheduler = Arc::new(RecordingScheduler::default());
        let client = RegistrationClient::new(
            HttpTransport::new(&config).unwrap(),
            vault.clone(),
            scheduler.clone(),
            DeviceProfile::default(),
            config.sync_interval(),
        );

        let error = client.register("tok1").await.unwrap_err();
        assert!(matches!(error, HealthSyncError::Timeout { .. }));
        assert!(error.is_network_error());
        assert!(vault.load_credential().unwrap().is_none());
        assert!(scheduler.calls().is_empty());
    }
}
