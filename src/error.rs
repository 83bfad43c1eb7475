use thiserror::Error;

/// Errors that can occur while registering a device or syncing health data
#[derive(Error, Debug)]
pub enum HealthSyncError {
    /// No bearer credential was supplied
    #[error("Missing authentication credential")]
    MissingCredential,

    /// The request never produced a response
    #[error("Network error: {0}")]
    Network(String),

    /// The request exceeded its deadline
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// The backend answered with a non-success status
    #[error("Server rejected request with status {status}: {message}")]
    ServerRejected {
        /// HTTP status code
        status: u16,
        /// Message taken from the response body
        message: String,
    },

    /// The backend answered with a body we could not use
    #[error("Malformed server response: {0}")]
    MalformedResponse(String),

    /// The stored signing secret is not valid hex
    #[error("Invalid signing secret: {0}")]
    InvalidSecret(String),

    /// The device has no stored registration
    #[error("Device is not registered")]
    NotRegistered,

    /// The health data provider is not present on this device
    #[error("Health data provider not available")]
    ProviderUnavailable,

    /// The user refused access to health data
    #[error("Health data permissions were not granted")]
    PermissionDenied,

    /// The health data provider failed to answer a query
    #[error("Health data provider error: {0}")]
    Provider(String),

    /// The secure store could not be read or written
    #[error("Secure storage error: {0}")]
    Storage(String),

    /// The job scheduler refused a request
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for health sync operations
pub type Result<T> = std::result::Result<T, HealthSyncError>;

impl HealthSyncError {
    /// Check if this error means no response was received
    #[must_use]
    pub const fn is_network_error(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout { .. })
    }

    /// Check if waiting and trying again could succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout { .. } | Self::ServerRejected { .. }
        )
    }

    /// Check if this error can only be fixed by registering the device
    #[must_use]
    pub const fn requires_registration(&self) -> bool {
        matches!(self, Self::MissingCredential | Self::NotRegistered)
    }
}
