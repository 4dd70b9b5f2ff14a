use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::event::{DaemonEvent, DeviceId};
use crate::lifecycle::DEFAULT_POLL_RATE;

pub const KEY_LOG_LEVEL: &str = "logging.level";
pub const KEY_JOYSTICKS: &str = "monitor.joysticks";
pub const KEY_POLL_RATE: &str = "monitor.poll_rate";
pub const KEY_PROCESS_ENABLED: &str = "monitor.process.enabled";
pub const KEY_PROCESS_TITLE: &str = "monitor.process.title";
pub const KEY_PROCESS_DISPLAY_NAME: &str = "monitor.process.display_name";

pub const DEFAULT_LOG_LEVEL: &str = "INFO";
pub const DEFAULT_PROCESS_TITLE: &str = "Elite - Dangerous (CLIENT)";
pub const DEFAULT_PROCESS_DISPLAY_NAME: &str = "Elite Dangerous";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("poll rate must be a number in (0, 60), got {0}")]
    InvalidRate(String),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Hierarchical key-value settings persisted as a TOML document.
///
/// Keys are dotted paths (`monitor.process.title`).  Every [`set`](Self::set)
/// writes the whole document back to disk before returning.
pub struct ConfigStore {
    path: PathBuf,
    document: RwLock<toml::Table>,
}

impl ConfigStore {
    /// Loads the document at `path`.  A missing file yields an empty document;
    /// a file that exists but cannot be read or parsed is an error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let document = read_document(&path)?;
        Ok(Self {
            path,
            document: RwLock::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-reads the document from disk, replacing the in-memory copy.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let document = read_document(&self.path)?;
        *self.document.write().unwrap_or_else(PoisonError::into_inner) = document;
        Ok(())
    }

    /// Returns the raw value at `dotted_key`, if present.
    pub fn get_value(&self, dotted_key: &str) -> Option<toml::Value> {
        let document = self.document.read().unwrap_or_else(PoisonError::into_inner);
        lookup(&document, dotted_key).cloned()
    }

    /// Returns the value at `dotted_key` converted to `T`, or `default` when
    /// the key is missing or holds a value of another shape.
    pub fn get<T: DeserializeOwned>(&self, dotted_key: &str, default: T) -> T {
        match self.get_value(dotted_key) {
            Some(value) => value.try_into().unwrap_or_else(|e| {
                debug!(key = dotted_key, "Config value has unexpected type: {e}");
                default
            }),
            None => default,
        }
    }

    /// Stores `value` at `dotted_key`, creating (or replacing non-table)
    /// intermediate levels, then persists the document.
    pub fn set(&self, dotted_key: &str, value: impl Into<toml::Value>) -> Result<(), ConfigError> {
        let mut document = self.document.write().unwrap_or_else(PoisonError::into_inner);
        insert(&mut document, dotted_key, value.into());
        write_document(&self.path, &document)
    }

    /// Populates any missing keys with their defaults.  Existing values are
    /// left untouched; the file is only written when something was added.
    pub fn ensure_defaults(&self) -> Result<(), ConfigError> {
        let defaults: [(&str, toml::Value); 6] = [
            (KEY_LOG_LEVEL, DEFAULT_LOG_LEVEL.into()),
            (KEY_JOYSTICKS, toml::Value::Array(Vec::new())),
            (KEY_POLL_RATE, (DEFAULT_POLL_RATE as i64).into()),
            (KEY_PROCESS_ENABLED, false.into()),
            (KEY_PROCESS_TITLE, DEFAULT_PROCESS_TITLE.into()),
            (KEY_PROCESS_DISPLAY_NAME, DEFAULT_PROCESS_DISPLAY_NAME.into()),
        ];

        let mut document = self.document.write().unwrap_or_else(PoisonError::into_inner);
        let mut changed = false;
        for (key, value) in defaults {
            if lookup(&document, key).is_none() {
                insert(&mut document, key, value);
                changed = true;
            }
        }
        if changed {
            info!(path = %self.path.display(), "Wrote default settings");
            write_document(&self.path, &document)?;
        }
        Ok(())
    }

    /// Adds or removes `device` from `monitor.joysticks` and persists the
    /// result.  Returns the updated list.
    pub fn set_device_monitored(
        &self,
        device: DeviceId,
        monitored: bool,
    ) -> Result<Vec<DeviceId>, ConfigError> {
        let mut devices: BTreeSet<DeviceId> =
            self.get::<Vec<DeviceId>>(KEY_JOYSTICKS, Vec::new()).into_iter().collect();
        if monitored {
            devices.insert(device);
        } else {
            devices.remove(&device);
        }
        let devices: Vec<DeviceId> = devices.into_iter().collect();
        let stored: Vec<toml::Value> = devices
            .iter()
            .map(|id| toml::Value::Integer(*id as i64))
            .collect();
        self.set(KEY_JOYSTICKS, toml::Value::Array(stored))?;
        Ok(devices)
    }
}

/// Typed view over the keys the monitors consume.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub log_level: String,
    pub joysticks: Vec<DeviceId>,
    /// Kept untyped so a non-numeric entry can be reported as invalid rather
    /// than silently replaced by the default.
    pub poll_rate: toml::Value,
    pub process_enabled: bool,
    pub process_title: String,
    pub process_display_name: String,
}

impl Settings {
    pub fn from_store(store: &ConfigStore) -> Self {
        let process_title = store.get(KEY_PROCESS_TITLE, DEFAULT_PROCESS_TITLE.to_string());
        Self {
            log_level: store.get(KEY_LOG_LEVEL, DEFAULT_LOG_LEVEL.to_string()),
            joysticks: store.get(KEY_JOYSTICKS, Vec::new()),
            poll_rate: store
                .get_value(KEY_POLL_RATE)
                .unwrap_or(toml::Value::Float(DEFAULT_POLL_RATE)),
            process_enabled: store.get(KEY_PROCESS_ENABLED, false),
            process_display_name: store.get(KEY_PROCESS_DISPLAY_NAME, process_title.clone()),
            process_title,
        }
    }
}

fn read_document(path: &Path) -> Result<toml::Table, ConfigError> {
    if !path.exists() {
        warn!(path = %path.display(), "Config file not found; using default settings");
        return Ok(toml::Table::new());
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn write_document(path: &Path, document: &toml::Table) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(document)?;
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    std::fs::write(path, content).map_err(write_err)
}

fn lookup<'a>(document: &'a toml::Table, dotted_key: &str) -> Option<&'a toml::Value> {
    let mut parts = dotted_key.split('.');
    let mut value = document.get(parts.next()?)?;
    for part in parts {
        value = value.as_table()?.get(part)?;
    }
    Some(value)
}

fn insert(document: &mut toml::Table, dotted_key: &str, value: toml::Value) {
    let mut parts: Vec<&str> = dotted_key.split('.').collect();
    // split always yields at least one element
    let leaf = parts.pop().unwrap_or(dotted_key);
    let mut cursor = document;
    for part in parts {
        let entry = cursor
            .entry(part.to_string())
            .or_insert(toml::Value::Table(toml::Table::new()));
        cursor = ensure_table(entry);
    }
    cursor.insert(leaf.to_string(), value);
}

fn ensure_table(value: &mut toml::Value) -> &mut toml::Table {
    if !value.is_table() {
        *value = toml::Value::Table(toml::Table::new());
    }
    match value {
        toml::Value::Table(table) => table,
        _ => unreachable!("value was just replaced with a table"),
    }
}

/// Spawns a file watcher on the parent directory of the store's file.
/// Whenever the file is created or modified, reloads the store and sends a
/// `ConfigReloaded` event carrying the new [`Settings`].
pub async fn watch_config(store: Arc<ConfigStore>, tx: mpsc::Sender<DaemonEvent>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            error!("Failed to create config file watcher: {e}");
            return;
        }
    };

    // Watch the parent directory rather than the file directly so we catch
    // editor-style atomic saves (write-new + rename).
    let path = store.path().to_path_buf();
    let watch_dir = match path.parent() {
        Some(d) => d.to_path_buf(),
        None => {
            error!(path = %path.display(), "Config path has no parent directory");
            return;
        }
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        error!("Failed to watch config directory: {e}");
        return;
    }

    while let Some(event) = watch_rx.recv().await {
        let affects_config = event.paths.iter().any(|p| p == path.as_path());
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );

        if affects_config && is_write {
            match store.reload() {
                Ok(()) => {
                    let settings = Settings::from_store(&store);
                    if tx.send(DaemonEvent::ConfigReloaded(settings)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Failed to reload config: {e}"),
            }
        }
    }
}
