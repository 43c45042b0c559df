//! Configuration loading.
//!
//! The config file is re-read by the consumer loop once per message, so
//! edits take effect without a restart. A file that fails to parse or
//! validate never replaces the last good snapshot.

pub mod schema;

use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[allow(unused_imports)]
pub use schema::{
    AppConfig, Config, FeedConfig, Pacing, PlatformRules, TtsConfig, KNOWN_ENGLISH_ACCENTS,
};

/// File name looked up in the working directory and the user config dir.
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Reloadable configuration cell.
///
/// Readers always get an immutable `Arc<Config>` snapshot.
#[derive(Debug)]
pub struct ConfigHandle {
    path: Option<PathBuf>,
    current: RwLock<Arc<Config>>,
}

impl ConfigHandle {
    /// Resolve the config file and load it.
    ///
    /// Lookup order: `explicit` → `./config.toml` → `<user config dir>/config.toml`.
    /// When none exists the built-in defaults are used.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => discover_config_path(),
        };

        let config = match &path {
            Some(p) => {
                tracing::info!(path = %p.display(), "Loading config file");
                read_config_file(p)?
            }
            None => {
                tracing::warn!(
                    "No {CONFIG_FILE_NAME} found in the working directory or user config dir, using defaults"
                );
                let config = Config::default();
                config.validate()?;
                config
            }
        };

        Ok(Self {
            path,
            current: RwLock::new(Arc::new(config)),
        })
    }

    /// A handle that never touches the filesystem.
    pub fn fixed(config: Config) -> Self {
        Self {
            path: None,
            current: RwLock::new(Arc::new(config)),
        }
    }

    /// Latest successfully loaded configuration.
    pub fn snapshot(&self) -> Arc<Config> {
        Arc::clone(&self.current.read())
    }

    /// Re-read the config file and publish it if valid.
    ///
    /// On error the previous snapshot stays current.
    pub fn reload(&self) -> Result<Arc<Config>, ConfigError> {
        let Some(path) = &self.path else {
            return Ok(self.snapshot());
        };

        let config = Arc::new(read_config_file(path)?);
        *self.current.write() = Arc::clone(&config);
        Ok(config)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn discover_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.is_file() {
        return Some(local);
    }

    directories::ProjectDirs::from("", "", "chatvoice")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
        .filter(|p| p.is_file())
}

fn read_config_file(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: Config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}
