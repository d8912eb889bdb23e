//! Persisted settings: Google API client credentials and the OAuth credential.
//!
//! The record is versioned so a newer on-disk schema is rejected instead of
//! being silently misread.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

use drivemedia_common::StoreError;

use crate::auth::Credential;

/// Settings file name inside the config directory.
const SETTINGS_FILE: &str = "settings.json";

/// Settings schema version for migration support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsVersion(pub u32);

impl SettingsVersion {
    /// Current settings schema version.
    pub const CURRENT: Self = Self(1);

    /// Check if a record of this version can be read.
    ///
    /// Version 0 marks records written before versioning existed.
    pub fn is_compatible(&self) -> bool {
        self.0 <= Self::CURRENT.0
    }
}

impl Default for SettingsVersion {
    fn default() -> Self {
        Self(0)
    }
}

/// Everything drivemedia persists between runs.
#[derive(Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Schema version of this record.
    #[serde(default)]
    pub version: SettingsVersion,
    /// Google API OAuth client id.
    #[serde(default)]
    pub client_id: String,
    /// Google API OAuth client secret.
    #[serde(default)]
    pub client_secret: String,
    /// Stored credential, absent when not connected.
    #[serde(default)]
    pub credential: Option<Credential>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SettingsVersion::CURRENT,
            client_id: String::new(),
            client_secret: String::new(),
            credential: None,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("version", &self.version)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("credential", &self.credential)
            .finish()
    }
}

/// Read/write access to the persisted settings.
///
/// Implementations must survive process restarts; the in-memory store is
/// only meant for tests and embedding.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Load the current settings, or the empty default when nothing is stored.
    async fn load(&self) -> Result<Settings, StoreError>;

    /// Replace the stored settings.
    async fn save(&self, settings: &Settings) -> Result<(), StoreError>;

    /// Replace only the stored credential.
    async fn save_credential(&self, credential: Option<&Credential>) -> Result<(), StoreError> {
        let mut settings = self.load().await?;
        settings.credential = credential.cloned();
        self.save(&settings).await
    }

    /// Replace only the client id and secret.
    async fn save_client(&self, client_id: &str, client_secret: &str) -> Result<(), StoreError> {
        let mut settings = self.load().await?;
        settings.client_id = client_id.trim().to_string();
        settings.client_secret = client_secret.trim().to_string();
        self.save(&settings).await
    }
}

fn check_version(settings: Settings) -> Result<Settings, StoreError> {
    if !settings.version.is_compatible() {
        return Err(StoreError::IncompatibleVersion {
            found: settings.version.0,
            supported: SettingsVersion::CURRENT.0,
        });
    }
    Ok(settings)
}

/// Settings stored as a JSON file.
///
/// Writes go to a sibling temporary file that is renamed over the target, so
/// a crash mid-write never leaves a truncated record behind.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store backed by `path`. The file need not exist yet.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Default settings location under the user's config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("drivemedia").join(SETTINGS_FILE))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| SETTINGS_FILE.into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SettingsStore for JsonFileStore {
    async fn load(&self) -> Result<Settings, StoreError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings at {}, using defaults", self.path.display());
                return Ok(Settings::default());
            }
            Err(e) => return Err(e.into()),
        };

        check_version(serde_json::from_str(&content)?)
    }

    async fn save(&self, settings: &Settings) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut record = settings.clone();
        record.version = SettingsVersion::CURRENT;
        let json = serde_json::to_vec_pretty(&record)?;

        let staging = self.staging_path();
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(&staging).await?;

        // A staging file left over from an earlier run keeps its old mode.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600)).await?;
        }

        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&staging, &self.path).await?;
        debug!("Saved settings to {}", self.path.display());
        Ok(())
    }
}

/// In-memory settings store.
#[derive(Default)]
pub struct MemoryStore {
    settings: RwLock<Settings>,
    saves: AtomicUsize,
}

impl MemoryStore {
    /// Create a store holding `settings`.
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: RwLock::new(settings),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of successful `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Copy of the currently stored settings.
    pub async fn snapshot(&self) -> Settings {
        self.settings.read().await.clone()
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn load(&self) -> Result<Settings, StoreError> {
        check_version(self.settings.read().await.clone())
    }

    async fn save(&self, settings: &Settings) -> Result<(), StoreError> {
        *self.settings.write().await = settings.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
