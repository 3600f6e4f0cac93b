//! Runtime settings, read from a TOML file.
//!
//! Lookup order: an explicit path (must exist), then
//! `<config_dir>/fusevars/config.toml`, then built-in defaults.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use directories_next::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fs_op::adapter::{AdapterOptions, FilesystemAdapter, DEFAULT_MAX_VARIABLE_SIZE};
use crate::vars::liveness::SignalProbe;
use crate::vars::persist::{LineCodec, DEFAULT_DELIMITER};
use crate::vars::record::DEFAULT_PERMISSIONS;
use crate::vars::registry::{VariableRegistry, DEFAULT_MAX_INHERITANCE_DEPTH};

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("config file `{}` does not exist", .0.display())]
    Missing(PathBuf),

    #[error("failed to read `{}`: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse `{}`: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("failed to render settings: {0}")]
    Render(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub store: StoreSettings,
    pub mount: MountSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSettings {
    /// Register unknown pids on their first `create`/`write`.
    pub auto_create_process_table: bool,
    pub max_inheritance_depth: usize,
    /// Field delimiter of saved tables.
    pub save_delimiter: char,
    pub default_file_mode: u32,
    /// Largest content one variable may hold, in bytes.
    pub max_variable_size: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            auto_create_process_table: true,
            max_inheritance_depth: DEFAULT_MAX_INHERITANCE_DEPTH,
            save_delimiter: DEFAULT_DELIMITER,
            default_file_mode: DEFAULT_PERMISSIONS,
            max_variable_size: DEFAULT_MAX_VARIABLE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MountSettings {
    pub allow_other: bool,
    /// Seconds between reaping passes over dead processes.
    pub reap_interval_secs: u64,
    pub fs_name: String,
}

impl Default for MountSettings {
    fn default() -> Self {
        MountSettings {
            allow_other: false,
            reap_interval_secs: 30,
            fs_name: "fusevars".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Also log to this file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Settings {
    pub fn from_toml(text: &str, origin: &Path) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(text).map_err(|source| SettingsError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_toml(&self) -> Result<String, SettingsError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.codec()?;
        if self.store.max_inheritance_depth == 0 {
            return Err(SettingsError::Invalid {
                key: "store.max_inheritance_depth",
                reason: "must be at least 1".into(),
            });
        }
        if self.store.default_file_mode & !0o7777 != 0 {
            return Err(SettingsError::Invalid {
                key: "store.default_file_mode",
                reason: format!("{:o} has bits outside 0o7777", self.store.default_file_mode),
            });
        }
        if self.store.max_variable_size == 0 {
            return Err(SettingsError::Invalid {
                key: "store.max_variable_size",
                reason: "must be at least 1".into(),
            });
        }
        if self.mount.reap_interval_secs == 0 {
            return Err(SettingsError::Invalid {
                key: "mount.reap_interval_secs",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn codec(&self) -> Result<LineCodec, SettingsError> {
        LineCodec::new(self.store.save_delimiter).map_err(|e| SettingsError::Invalid {
            key: "store.save_delimiter",
            reason: e.to_string(),
        })
    }

    pub fn adapter_options(&self) -> AdapterOptions {
        AdapterOptions {
            auto_create_process_table: self.store.auto_create_process_table,
            default_file_mode: self.store.default_file_mode,
            max_variable_size: self.store.max_variable_size,
            ..AdapterOptions::default()
        }
    }

    /// An empty store wired to the real process table.
    pub fn build_adapter(&self) -> FilesystemAdapter {
        let registry = VariableRegistry::new(Arc::new(SignalProbe), self.store.max_inheritance_depth);
        FilesystemAdapter::new(registry, self.adapter_options())
    }
}

/// Per-user configuration directory for this program.
pub fn project_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "fusevars").map(|dirs| dirs.config_dir().to_path_buf())
}

pub fn default_config_path() -> Option<PathBuf> {
    project_config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

/// Load settings and report which file they came from, if any.
pub fn load_settings(explicit: Option<&Path>) -> Result<(Settings, Option<PathBuf>), SettingsError> {
    let path = match explicit {
        Some(path) if !path.exists() => return Err(SettingsError::Missing(path.to_path_buf())),
        Some(path) => path.to_path_buf(),
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => path,
            None => return Ok((Settings::default(), None)),
        },
    };
    let text = fs::read_to_string(&path).map_err(|source| SettingsError::Read {
        path: path.clone(),
        source,
    })?;
    let settings = Settings::from_toml(&text, &path)?;
    Ok((settings, Some(path)))
}
