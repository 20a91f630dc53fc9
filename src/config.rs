use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::{cache, sync, watcher};

/// Upper bound for the TTL, sync interval and cooldown: one day.
const MAX_PERIOD_SECS: u64 = 24 * 60 * 60;
const MAX_ROOT_RETRY_MILLIS: u64 = 60_000;

// ─── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ─── Persisted config ────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Stable identifier used as the key in the status store. Generated once.
    pub uuid: String,
    pub username: String,
    pub is_iron: bool,
    pub is_hardcore: bool,
    pub is_ultimate: bool,
    /// Free-text group mate list, e.g. "Frodo, Sam".
    pub group_names: String,
    /// Set once a hardcore character dies; locks the hardcore flag.
    pub has_died: bool,
    /// Publish own status and show status icons in chat.
    pub show_status_icons: bool,

    pub status_service_url: String,
    pub cache_ttl_secs: u64,
    pub sync_interval_secs: u64,
    pub manual_cooldown_secs: u64,
    pub root_retry_millis: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            uuid: String::new(),
            username: String::new(),
            is_iron: false,
            is_hardcore: false,
            is_ultimate: false,
            group_names: String::new(),
            has_died: false,
            show_status_icons: false,
            status_service_url: "http://127.0.0.1:8080".into(),
            cache_ttl_secs: cache::DEFAULT_TTL.as_secs(),
            sync_interval_secs: sync::DEFAULT_SYNC_INTERVAL.as_secs(),
            manual_cooldown_secs: sync::DEFAULT_MANUAL_COOLDOWN.as_secs(),
            root_retry_millis: watcher::DEFAULT_ROOT_RETRY.as_millis() as u64,
        }
    }
}

pub fn config_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}

impl AppConfig {
    pub fn load() -> Self {
        let path = config_dir().join("config.toml");
        match Self::load_from(&path) {
            Ok(mut config) => {
                info!("Loaded config from {}", path.display());
                if config.ensure_uuid() {
                    config.save();
                }
                config
            }
            Err(ConfigError::Read { .. }) => {
                info!("No config file found, creating default config");
                let mut config = Self::default();
                config.ensure_uuid();
                config.save();
                config
            }
            Err(e) => {
                warn!("{}, falling back to defaults", e);
                let mut config = Self::default();
                config.ensure_uuid();
                config
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save(&self) {
        let path = config_dir().join("config.toml");
        if let Err(e) = self.save_to(&path) {
            error!("Failed to save config: {}", e);
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Generate the stable identifier if missing. Returns true when one was created.
    pub fn ensure_uuid(&mut self) -> bool {
        if !self.uuid.trim().is_empty() {
            return false;
        }
        self.uuid = uuid::Uuid::new_v4().to_string();
        info!("Generated new player uuid {}", self.uuid);
        true
    }

    /// The ultimate, hardcore, group mates and update button settings are only
    /// shown while iron mode is on.
    pub fn iron_fields_visible(&self) -> bool {
        self.is_iron
    }

    /// Hardcore can no longer be toggled once the character has died.
    pub fn hardcore_locked(&self) -> bool {
        self.has_died
    }

    /// What gets published. Outside iron mode the player has nothing to
    /// declare, so this is the retracted record.
    pub fn identity(&self) -> Identity {
        let identity = Identity {
            uuid: self.uuid.clone(),
            username: self.username.clone(),
            is_iron: self.is_iron,
            is_hardcore: self.is_hardcore && !self.has_died,
            is_ultimate: self.is_ultimate,
            group_names: self.group_names.clone(),
        };
        if self.is_iron {
            identity
        } else {
            identity.retracted()
        }
    }

    // Hand-edited values are clamped so deadline arithmetic cannot overflow.

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs.min(MAX_PERIOD_SECS))
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.clamp(1, MAX_PERIOD_SECS))
    }

    pub fn manual_cooldown(&self) -> Duration {
        Duration::from_secs(self.manual_cooldown_secs.min(MAX_PERIOD_SECS))
    }

    pub fn root_retry(&self) -> Duration {
        Duration::from_millis(self.root_retry_millis.clamp(1, MAX_ROOT_RETRY_MILLIS))
    }
}

// ─── Identity ───────────────────────────────────────────────────────

/// Snapshot of the local player's declared status, as published.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Identity {
    pub uuid: String,
    pub username: String,
    pub is_iron: bool,
    pub is_hardcore: bool,
    pub is_ultimate: bool,
    pub group_names: String,
}

impl Identity {
    /// Same player with every iron flag off and no group; publishing this
    /// retracts the player's status.
    pub fn retracted(&self) -> Self {
        Self {
            uuid: self.uuid.clone(),
            username: self.username.clone(),
            ..Self::default()
        }
    }
}
