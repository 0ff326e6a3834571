use crate::CoreError;
use dockyard_remote::{RegistrySettings, ScmConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "DOCKYARD_CONFIG";

const DEFAULT_WORKERS: usize = 8;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

fn default_store_root() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".local/share/dockyard"),
        Err(_) => PathBuf::from("/tmp/dockyard"),
    }
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Width of the image resolution and import fetch pools.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Attempts per version when commits keep losing revision races.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        }
    }
}

/// Contents of `dockyard.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockyardConfig {
    #[serde(default = "default_store_root")]
    pub store_root: PathBuf,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub scm: ScmConfig,
    #[serde(default)]
    pub registries: RegistrySettings,
}

impl Default for DockyardConfig {
    fn default() -> Self {
        Self {
            store_root: default_store_root(),
            sync: SyncConfig::default(),
            scm: ScmConfig::default(),
            registries: RegistrySettings::default(),
        }
    }
}

impl DockyardConfig {
    pub fn parse(content: &str) -> Result<Self, CoreError> {
        let mut config: Self =
            toml::from_str(content).map_err(|e| CoreError::Config(format!("invalid config: {e}")))?;
        if config.sync.workers == 0 {
            config.sync.workers = 1;
        }
        if config.sync.retry_attempts == 0 {
            config.sync.retry_attempts = 1;
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    /// Load `path` if given, else the file named by [`CONFIG_ENV`], else
    /// `~/.config/dockyard/dockyard.toml`. A missing default file yields the
    /// defaults; an explicitly named file must exist.
    pub fn discover(path: Option<&Path>) -> Result<Self, CoreError> {
        if let Some(p) = path {
            return Self::load(p);
        }
        if let Ok(p) = std::env::var(CONFIG_ENV) {
            return Self::load(Path::new(&p));
        }
        match default_config_path() {
            Some(p) if p.exists() => Self::load(&p),
            _ => Ok(Self::default()),
        }
    }

    pub fn to_toml(&self) -> Result<String, CoreError> {
        toml::to_string_pretty(self).map_err(|e| CoreError::Config(e.to_string()))
    }
}

fn default_config_path() -> Option<PathBuf> {
    let home = std::env::var("HOME").ok()?;
    Some(PathBuf::from(home).join(".config/dockyard/dockyard.toml"))
}
