use chrono::NaiveDate;
use directories::ProjectDirs;
use secrecy::{ExposeSecret, SecretString};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock},
};
use tracing::{debug, info, warn};

use crate::{
    error::{HealthSyncError, Result},
    types::{DeviceCredential, SyncState},
};

const APP_NAME: &str = "healthsync";
const STORE_FILENAME: &str = "credentials.json";

/// Key of the device identifier
pub const KEY_DEVICE_ID: &str = "device_id";
/// Key of the hex signing secret
pub const KEY_HMAC_SECRET: &str = "hmac_secret";
/// Key of the cached bearer credential
pub const KEY_AUTH_TOKEN: &str = "auth_token";
/// Key of the registration flag
pub const KEY_DEVICE_REGISTERED: &str = "device_registered";
/// Key of the last successful upload date
pub const KEY_LAST_SYNC: &str = "last_sync_date";
/// Key of the health permission grant flag
pub const KEY_PERMISSIONS_GRANTED: &str = "health_permissions_granted";

/// Secure key-value storage owned by the device
///
/// Implementations are expected to keep values encrypted at rest (platform
/// keystore, encrypted preferences). Writes passed to [`SecureStore::put_all`]
/// must become visible together.
pub trait SecureStore: Send + Sync {
    /// Read a value
    ///
    /// # Errors
    ///
    /// Returns [`HealthSyncError::Storage`] if the store cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Read several values from one consistent snapshot
    ///
    /// Values are returned in the order of `keys`. A concurrent
    /// [`SecureStore::put_all`] is seen either entirely or not at all.
    ///
    /// # Errors
    ///
    /// Returns [`HealthSyncError::Storage`] if the store cannot be read.
    fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>>;

    /// Write several values at once
    ///
    /// # Errors
    ///
    /// Returns [`HealthSyncError::Storage`] if the store cannot be written.
    fn put_all(&self, entries: &[(&str, String)]) -> Result<()>;
}

/// In-process store, lost when the process exits
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecureStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        Ok(keys.iter().map(|key| values.get(*key).cloned()).collect())
    }

    fn put_all(&self, entries: &[(&str, String)]) -> Result<()> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in entries {
            values.insert((*key).to_string(), value.clone());
        }
        Ok(())
    }
}

/// JSON file store under the user's configuration directory
///
/// The file is replaced atomically on every write and restricted to the
/// owner on unix.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl FileStore {
    /// Open the store at its default location
    ///
    /// # Errors
    ///
    /// Returns [`HealthSyncError::Storage`] if no configuration directory can be determined.
    pub fn open_default() -> Result<Self> {
        let project_dirs = ProjectDirs::from("", "", APP_NAME).ok_or_else(|| {
            HealthSyncError::Storage("Could not determine config directory".to_string())
        })?;

        Ok(Self::at(project_dirs.config_dir().join(STORE_FILENAME)))
    }

    /// Open a store backed by `path`
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    /// Location of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            debug!("No store file at {}", self.path.display());
            return Ok(BTreeMap::new());
        }

        let raw = fs::read_to_string(&self.path).map_err(|e| {
            HealthSyncError::Storage(format!("Failed to read {}: {e}", self.path.display()))
        })?;
        if raw.trim().is_empty() {
            warn!("Store file {} is empty", self.path.display());
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&raw).map_err(|e| {
            HealthSyncError::Storage(format!("Corrupt store file {}: {e}", self.path.display()))
        })
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<()> {
        self.replace_file(map).map_err(|e| {
            HealthSyncError::Storage(format!("Failed to write {}: {e}", self.path.display()))
        })
    }

    fn replace_file(&self, map: &BTreeMap<String, String>) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
                info!("Created config directory: {}", dir.display());
            }
        }

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, serde_json::to_vec_pretty(map)?)?;
        restrict_permissions(&tmp_path)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

impl SecureStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_map()?.remove(key))
    }

    fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
        let mut map = self.read_map()?;
        Ok(keys.iter().map(|key| map.remove(*key)).collect())
    }

    fn put_all(&self, entries: &[(&str, String)]) -> Result<()> {
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        let mut map = self.read_map()?;
        for (key, value) in entries {
            map.insert((*key).to_string(), value.clone());
        }
        self.write_map(&map)
    }
}

/// Typed access to the credential and sync state kept in a [`SecureStore`]
#[derive(Clone)]
pub struct CredentialVault {
    store: Arc<dyn SecureStore>,
}

impl CredentialVault {
    /// Wrap a store
    #[must_use]
    pub fn new(store: Arc<dyn SecureStore>) -> Self {
        Self { store }
    }

    fn get_flag(&self, key: &str) -> Result<bool> {
        Ok(is_true(self.store.get(key)?.as_deref()))
    }

    /// Load the stored credential
    ///
    /// Returns `None` unless the device id, secret and bearer token are all
    /// present. All fields come from the same store snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`HealthSyncError::Storage`] if the store cannot be read.
    pub fn load_credential(&self) -> Result<Option<DeviceCredential>> {
        let snapshot = self.store.get_many(&[
            KEY_DEVICE_ID,
            KEY_HMAC_SECRET,
            KEY_AUTH_TOKEN,
            KEY_DEVICE_REGISTERED,
        ])?;
        let [device_id, hmac_secret, auth_token, registered]: [Option<String>; 4] =
            snapshot.try_into().map_err(|values: Vec<_>| {
                HealthSyncError::Storage(format!("expected 4 values, store returned {}", values.len()))
            })?;

        let (Some(device_id), Some(hmac_secret), Some(auth_token)) = (
            non_empty(device_id),
            non_empty(hmac_secret),
            non_empty(auth_token),
        ) else {
            return Ok(None);
        };

        Ok(Some(DeviceCredential {
            device_id,
            hmac_secret: SecretString::from(hmac_secret),
            auth_token: SecretString::from(auth_token),
            registered: is_true(registered.as_deref()),
        }))
    }

    /// Replace the stored credential as a whole
    ///
    /// # Errors
    ///
    /// Returns [`HealthSyncError::Storage`] if the store cannot be written.
    pub fn save_credential(&self, credential: &DeviceCredential) -> Result<()> {
        self.store.put_all(&[
            (KEY_DEVICE_ID, credential.device_id.clone()),
            (
                KEY_HMAC_SECRET,
                credential.hmac_secret.expose_secret().to_string(),
            ),
            (
                KEY_AUTH_TOKEN,
                credential.auth_token.expose_secret().to_string(),
            ),
            (KEY_DEVICE_REGISTERED, credential.registered.to_string()),
        ])
    }

    /// Check the registration flag
    ///
    /// # Errors
    ///
    /// Returns [`HealthSyncError::Storage`] if the store cannot be read.
    pub fn is_registered(&self) -> Result<bool> {
        self.get_flag(KEY_DEVICE_REGISTERED)
    }

    /// Load the sync progress
    ///
    /// An unparsable stored date is treated as absent.
    ///
    /// # Errors
    ///
    /// Returns [`HealthSyncError::Storage`] if the store cannot be read.
    pub fn load_sync_state(&self) -> Result<SyncState> {
        let last_sync_date = self.store.get(KEY_LAST_SYNC)?.and_then(|raw| {
            raw.parse::<NaiveDate>()
                .map_err(|e| warn!("Ignoring unparsable last sync date {:?}: {}", raw, e))
                .ok()
        });

        Ok(SyncState { last_sync_date })
    }

    /// Record a successful upload
    ///
    /// # Errors
    ///
    /// Returns [`HealthSyncError::Storage`] if the store cannot be written.
    pub fn record_sync(&self, date: NaiveDate) -> Result<()> {
        self.store.put_all(&[(KEY_LAST_SYNC, date.to_string())])
    }

    /// Check whether health permissions were granted
    ///
    /// # Errors
    ///
    /// Returns [`HealthSyncError::Storage`] if the store cannot be read.
    pub fn permissions_granted(&self) -> Result<bool> {
        self.get_flag(KEY_PERMISSIONS_GRANTED)
    }

    /// Remember the outcome of a permission request
    ///
    /// # Errors
    ///
    /// Returns [`HealthSyncError::Storage`] if the store cannot be written.
    pub fn set_permissions_granted(&self, granted: bool) -> Result<()> {
        self.store
            .put_all(&[(KEY_PERMISSIONS_GRANTED, granted.to_string())])
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn is_true(value: Option<&str>) -> bool {
    value == Some("true")
}
