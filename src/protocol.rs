use crate::{
    error::{HealthSyncError, Result},
    types::{ConsentSet, DeviceProfile, HealthDataWindow, Platform},
};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the payload signature
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Header carrying the per-run idempotency key
pub const IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";

/// Prefix of the signature header value
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Message used when a rejection carries no `error` field
pub const UNKNOWN_ERROR_MESSAGE: &str = "unknown error";

/// Body of the device registration request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    /// Freshly generated device identifier
    pub device_id: String,
    /// Platform tag
    pub platform: Platform,
    /// Device model or name
    pub device_name: String,
    /// Companion app version
    pub app_version: String,
    /// Granted metric categories
    pub consents: ConsentSet,
}

impl RegistrationRequest {
    /// Build a request for `device_id` with every consent granted
    #[must_use]
    pub fn new(device_id: String, profile: &DeviceProfile) -> Self {
        Self {
            device_id,
            platform: profile.platform,
            device_name: profile.device_name.clone(),
            app_version: profile.app_version.clone(),
            consents: ConsentSet::all_granted(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationResponse {
    hmac_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Device details returned by the registration status query
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredDevice {
    /// Backend identifier of the device record
    pub id: String,
    /// Device name given at registration
    pub device_name: Option<String>,
    /// App version given at registration
    pub app_version: Option<String>,
    /// Whether the backend still accepts uploads from this device
    pub is_active: bool,
    /// Registration timestamp
    pub created_at: Option<String>,
    /// Last upload timestamp
    pub last_used_at: Option<String>,
}

/// Backend view of a device registration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegistrationStatus {
    /// Whether the backend knows the device
    pub registered: bool,
    /// Device record, present when registered
    #[serde(default)]
    pub device: Option<RegisteredDevice>,
    /// Consent flags keyed by metric category
    #[serde(default)]
    pub consents: HashMap<String, bool>,
}

/// Extract the signing secret from a successful registration response
///
/// # Errors
///
/// Returns [`HealthSyncError::MalformedResponse`] if the body is not JSON or
/// carries no usable `hmacSecret`.
pub fn parse_registration_secret(body: &[u8]) -> Result<SecretString> {
    let response: RegistrationResponse = serde_json::from_slice(body)
        .map_err(|e| HealthSyncError::MalformedResponse(format!("invalid JSON body: {e}")))?;

    match response.hmac_secret {
        Some(secret) if !secret.trim().is_empty() => Ok(SecretString::from(secret)),
        _ => Err(HealthSyncError::MalformedResponse(
            "response has no hmacSecret".to_string(),
        )),
    }
}

/// Pull a human readable message out of an error response
#[must_use]
pub fn extract_error_message(body: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|body| body.error)
        .unwrap_or_else(|| UNKNOWN_ERROR_MESSAGE.to_string())
}

/// Serialize a window to the exact bytes that are signed and sent
///
/// # Errors
///
/// Returns [`HealthSyncError::Serialization`] if the window cannot be encoded.
pub fn canonical_payload(window: &HealthDataWindow) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(window)?))
}

fn signing_key(secret: &SecretString) -> Result<Vec<u8>> {
    hex::decode(secret.expose_secret().trim())
        .map_err(|e| HealthSyncError::InvalidSecret(e.to_string()))
}

/// Compute the lowercase hex HMAC-SHA256 of `payload` keyed by the hex `secret`
///
/// # Errors
///
/// Returns [`HealthSyncError::InvalidSecret`] if the secret is not valid hex.
pub fn sign_payload(secret: &SecretString, payload: &[u8]) -> Result<String> {
    let key = signing_key(secret)?;
    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| HealthSyncError::InvalidSecret(e.to_string()))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check an `X-Signature` header value against `payload`
///
/// The comparison runs in constant time.
///
/// # Errors
///
/// Returns [`HealthSyncError::InvalidSecret`] if the secret is not valid hex.
pub fn verify_signature(secret: &SecretString, payload: &[u8], header: &str) -> Result<bool> {
    let Some(signature) = header
        .strip_prefix(SIGNATURE_PREFIX)
        .and_then(|hex_sig| hex::decode(hex_sig).ok())
    else {
        return Ok(false);
    };

    let key = signing_key(secret)?;
    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| HealthSyncError::InvalidSecret(e.to_string()))?;
    mac.update(payload);
    Ok(mac.verify_slice(&signature).is_ok())
}

/// A window ready for submission
#[derive(Debug, Clone)]
pub struct SignedUpload {
    /// Canonical payload bytes
    pub body: Bytes,
    /// Lowercase hex signature of `body`
    pub signature: String,
    /// Idempotency key for this run
    pub idempotency_key: Uuid,
}

impl SignedUpload {
    /// Serialize and sign a window under a fresh idempotency key
    ///
    /// # Errors
    ///
    /// Returns [`HealthSyncError::Serialization`] or
    /// [`HealthSyncError::InvalidSecret`].
    pub fn sign(window: &HealthDataWindow, secret: &SecretString) -> Result<Self> {
        let body = canonical_payload(window)?;
        let signature = sign_payload(secret, &body)?;

        Ok(Self {
            body,
            signature,
            idempotency_key: Uuid::new_v4(),
        })
    }

    /// Value of the `X-Signature` header
    #[must_use]
    pub fn signature_header(&self) -> String {
        format!("{SIGNATURE_PREFIX}{}", self.signature)
    }
}
