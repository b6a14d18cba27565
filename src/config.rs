//! Tool configuration.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults are
//! overridden by an optional `config.toml` in the content root. The site's
//! content itself is described in `site.yaml` (see [`crate::site`]); this file
//! only tunes how the build runs.
//!
//! ## Config File Location
//!
//! ```text
//! content/
//! ├── config.toml      # optional, overrides stock defaults
//! ├── site.yaml        # courses, lessons, posts
//! └── ...
//! ```
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! site_file = "site.yaml"     # Site description, relative to the content root
//!
//! [build]
//! render_timeout_secs = 30    # Per-page render limit, 0 disables
//! protect = ["CNAME"]         # Output files never swept or cleared
//!
//! [processing]
//! max_processes = 4           # Hashing threads (omit for auto = CPU cores)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_FILENAME: &str = "config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Tool configuration loaded from `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LecternConfig {
    /// Site description file, relative to the content root.
    pub site_file: String,
    pub build: BuildConfig,
    pub processing: ProcessingConfig,
}

impl Default for LecternConfig {
    fn default() -> Self {
        Self {
            site_file: "site.yaml".to_string(),
            build: BuildConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl LecternConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.site_file.trim().is_empty() {
            return Err(ConfigError::Validation("site_file must not be empty".into()));
        }
        if Path::new(&self.site_file).is_absolute() || self.site_file.contains("..") {
            return Err(ConfigError::Validation(
                "site_file must be relative to the content root".into(),
            ));
        }
        if self.processing.max_processes == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_processes must be at least 1".into(),
            ));
        }
        for path in &self.build.protect {
            if path.is_empty() || path.starts_with('/') || path.split('/').any(|p| p == "..") {
                return Err(ConfigError::Validation(format!(
                    "build.protect entry must be a relative output path: {path:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Build behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Upper bound for rendering one page, in seconds. `0` waits forever.
    pub render_timeout_secs: u64,
    /// Output-relative files that are never swept or cleared.
    pub protect: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            render_timeout_secs: 30,
            protect: vec!["CNAME".to_string()],
        }
    }
}

impl BuildConfig {
    pub fn render_timeout(&self) -> Option<Duration> {
        (self.render_timeout_secs > 0).then(|| Duration::from_secs(self.render_timeout_secs))
    }

    pub fn protected(&self) -> BTreeSet<String> {
        self.protect.iter().cloned().collect()
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of hashing threads.
    /// When absent or null, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_processes.map(|n| n.min(cores)).unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the base layer user overrides are merged onto.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(LecternConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load `config.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if the directory has no `config.toml`.
pub fn load_raw_config(dir: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto the stock defaults, then deserialize and
/// validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<LecternConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: LecternConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `config.toml` in the content root.
pub fn load_config(content_root: &Path) -> Result<LecternConfig, ConfigError> {
    resolve_config(load_raw_config(content_root)?)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Lectern Configuration
# =====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Place this file in the content root next to site.yaml.
# Unknown keys will cause an error.

# Site description (courses, lessons, posts), relative to the content root.
site_file = "site.yaml"

# ---------------------------------------------------------------------------
# Build
# ---------------------------------------------------------------------------
[build]
# Seconds a single page may take to render before it counts as failed.
# 0 disables the limit.
render_timeout_secs = 30

# Output files that are never deleted, by the orphan sweep or by
# `build --full`. Paths are relative to the output directory.
protect = ["CNAME"]

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum number of threads used to hash sources.
# Omit to use all CPU cores. Values above the core count are clamped.
# max_processes = 4
"##
}
