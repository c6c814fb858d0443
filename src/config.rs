//! Configuration, loaded from recipebox.yml
//!
//! Search order:
//! 1. Explicit path if provided
//! 2. recipebox.yml in the current directory
//! 3. ~/.config/recipebox/recipebox.yml
//! 4. Defaults

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::imaging::{CompressionPolicy, NormalizeOptions};
use crate::storage::BackendKind;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Fallback log filter when RUST_LOG is unset
    pub log_level: Option<String>,

    pub storage: StorageConfig,

    /// Compression applied to photos headed for the flat store
    pub images: CompressionPolicy,
}

/// Where and how recipes are persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StorageConfig {
    /// Root directory for both backends
    pub data_dir: PathBuf,

    /// Backend selected when auto-detection is off
    pub default_backend: BackendKind,

    /// SQLite file for the indexed backend, relative to `data_dir`
    pub sqlite_file: String,

    /// Directory for the flat backend, relative to `data_dir`
    pub flat_dir: String,

    /// Hard ceiling on the flat store
    pub flat_quota_kb: usize,

    /// Probe the indexed backend at startup and fall back to flat if it fails
    pub auto_detect: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("recipebox");

        Self {
            data_dir,
            default_backend: BackendKind::Indexed,
            sqlite_file: "recipes.db".to_string(),
            flat_dir: "flat".to_string(),
            flat_quota_kb: 5120,
            auto_detect: true,
        }
    }
}

impl StorageConfig {
    /// Storage rooted at `data_dir` with every other setting at its default
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join(&self.sqlite_file)
    }

    pub fn flat_path(&self) -> PathBuf {
        self.data_dir.join(&self.flat_dir)
    }

    pub fn flat_quota_bytes(&self) -> usize {
        self.flat_quota_kb.saturating_mul(1024)
    }
}

impl Config {
    /// Load configuration with fallback chain.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_config = PathBuf::from("recipebox.yml");
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => {
                    log::info!("Loaded config from recipebox.yml");
                    return Ok(config);
                }
                Err(e) => {
                    log::warn!("Failed to load recipebox.yml: {}", e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("recipebox").join("recipebox.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", user_config.display());
                        return Ok(config);
                    }
                    Err(e) => {
                        log::warn!("Failed to load {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.flat_quota_kb == 0 {
            eyre::bail!("storage.flat-quota-kb must be > 0");
        }
        if self.storage.sqlite_file.is_empty() {
            eyre::bail!("storage.sqlite-file must not be empty");
        }
        if self.images.threshold_kb <= 0.0 {
            eyre::bail!("images.threshold-kb must be > 0");
        }
        validate_pass("images.primary", &self.images.primary)?;
        validate_pass("images.fallback", &self.images.fallback)?;
        Ok(())
    }
}

fn validate_pass(name: &str, options: &NormalizeOptions) -> Result<()> {
    if options.max_width == 0 || options.max_height == 0 {
        eyre::bail!("{} dimensions must be > 0", name);
    }
    if !(options.quality > 0.0 && options.quality <= 1.0) {
        eyre::bail!("{}.quality must be in (0, 1], got {}", name, options.quality);
    }
    Ok(())
}
