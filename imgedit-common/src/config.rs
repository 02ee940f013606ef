//! Configuration loading and root folder resolution
//!
//! Root folder resolution follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`IMGEDIT_ROOT_FOLDER`)
//! 3. TOML config file (`root_folder`)
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing or unreadable TOML file never aborts startup: a warning is logged
//! and compiled defaults are used instead.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "IMGEDIT_ROOT_FOLDER";

/// Environment variable pointing at an explicit TOML file
pub const CONFIG_PATH_ENV: &str = "IMGEDIT_CONFIG";

/// File name of the TOML config inside the platform config directory
pub const CONFIG_FILE_NAME: &str = "imgedit.toml";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "imgedit.db";

/// Working copy directory name inside the root folder
pub const WORKING_DIR_NAME: &str = "working";

/// Upper bound for `max_image_bytes`; the schema enforces the same limit
pub const HARD_MAX_IMAGE_BYTES: u64 = 52_428_800;

/// Upper bound for `max_dimension`; the schema enforces the same limit
pub const HARD_MAX_DIMENSION: u32 = 32_767;

/// Top-level TOML configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding the database and working copies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub engine: EngineConfig,
}

/// Logging section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset (e.g. "info", "imgedit_engine=debug")
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Engine limits and tuning
///
/// Every field has a default, so a partial `[engine]` table is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Largest accepted source image in bytes
    pub max_image_bytes: u64,
    /// Largest accepted width or height in pixels
    pub max_dimension: u32,
    /// Longest side of the interactive working copy; 0 disables downsampling
    pub interactive_max_dimension: u32,
    /// Concurrent CPU-bound raster jobs
    pub max_raster_jobs: usize,
    /// TCP connect timeout for URL ingestion
    pub connect_timeout_ms: u64,
    /// Maximum wait for each chunk of a URL download
    pub read_timeout_ms: u64,
    /// Redirect hops followed during URL ingestion
    pub max_redirects: usize,
    /// Recently viewed entries kept per terminal session
    pub history_capacity: usize,
    /// Days a history entry survives without being viewed
    pub history_retention_days: i64,
    /// Age after which an image session is swept
    pub session_max_age_hours: i64,
    /// Total time spent retrying a locked database before giving up
    pub db_max_lock_wait_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: HARD_MAX_IMAGE_BYTES,
            max_dimension: HARD_MAX_DIMENSION,
            interactive_max_dimension: 4096,
            max_raster_jobs: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2),
            connect_timeout_ms: 5_000,
            read_timeout_ms: 10_000,
            max_redirects: 5,
            history_capacity: 20,
            history_retention_days: 7,
            session_max_age_hours: 24,
            db_max_lock_wait_ms: 5_000,
        }
    }
}

impl EngineConfig {
    /// Reject values the engine cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.max_image_bytes == 0 || self.max_image_bytes > HARD_MAX_IMAGE_BYTES {
            return Err(Error::Config(format!(
                "engine.max_image_bytes must be in 1..={}",
                HARD_MAX_IMAGE_BYTES
            )));
        }
        if self.max_dimension == 0 || self.max_dimension > HARD_MAX_DIMENSION {
            return Err(Error::Config(format!(
                "engine.max_dimension must be in 1..={}",
                HARD_MAX_DIMENSION
            )));
        }
        if self.max_raster_jobs == 0 {
            return Err(Error::Config("engine.max_raster_jobs must be > 0".to_string()));
        }
        if self.history_capacity == 0 {
            return Err(Error::Config("engine.history_capacity must be > 0".to_string()));
        }
        if self.history_retention_days <= 0 || self.session_max_age_hours <= 0 {
            return Err(Error::Config(
                "engine retention periods must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Interactive downsampling limit, None when disabled
    pub fn interactive_limit(&self) -> Option<u32> {
        match self.interactive_max_dimension {
            0 => None,
            n => Some(n),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Resolve the root folder (CLI → ENV → TOML → compiled default)
pub fn resolve_root_folder(cli_arg: Option<&Path>, toml_config: &TomlConfig) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(root) = &toml_config.root_folder {
        return root.clone();
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Locate the TOML file (CLI → ENV → platform config dir); None if nothing exists
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let user_config = dirs::config_dir().map(|d| d.join("imgedit").join(CONFIG_FILE_NAME))?;
    if user_config.exists() {
        Some(user_config)
    } else {
        None
    }
}

/// Load and validate a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML {} failed: {}", path.display(), e)))?;
    config.engine.validate()?;
    Ok(config)
}

/// Load the TOML config, falling back to defaults on any problem
pub fn load_or_default(path: Option<&Path>) -> TomlConfig {
    let Some(path) = path else {
        info!("No config file found, using compiled defaults");
        return TomlConfig::default();
    };

    match load_toml_config(path) {
        Ok(config) => {
            info!("Loaded configuration from {}", path.display());
            config
        }
        Err(e) => {
            warn!("{} - using compiled defaults", e);
            TomlConfig::default()
        }
    }
}

/// Write a TOML config atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/imgedit
        dirs::data_local_dir()
            .map(|d| d.join("imgedit"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/imgedit"))
    } else if cfg!(target_os = "macos") {
        // ~/Library/Application Support/imgedit
        dirs::data_dir()
            .map(|d| d.join("imgedit"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/imgedit"))
    } else if cfg!(target_os = "windows") {
        // %LOCALAPPDATA%\imgedit
        dirs::data_local_dir()
            .map(|d| d.join("imgedit"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\imgedit"))
    } else {
        PathBuf::from("./imgedit_data")
    }
}

/// Creates the root folder layout and hands out well-known paths
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    /// Create the root and working directories if missing
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        std::fs::create_dir_all(self.working_dir())?;
        Ok(())
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }

    pub fn working_dir(&self) -> PathBuf {
        self.root_folder.join(WORKING_DIR_NAME)
    }
}
