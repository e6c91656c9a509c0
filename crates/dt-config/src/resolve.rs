//! Configuration resolution and path discovery.
//!
//! Resolution order: CLI argument → environment variables → XDG paths → built-in preset.

use std::path::{Path, PathBuf};

use crate::analysis::AnalysisConfig;
use crate::preset::{get_preset, PresetName};
use crate::validate::{ValidationError, ValidationResult};

/// Where the configuration came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicitly provided via CLI argument.
    CliArgument,

    /// Set via environment variable.
    Environment,

    /// Found in XDG config directory.
    XdgConfig,

    /// Built-in preset (no file found).
    #[default]
    BuiltinDefault,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CliArgument => write!(f, "CLI argument"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::XdgConfig => write!(f, "XDG config"),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
        }
    }
}

/// Environment variable names.
pub const ENV_CONFIG_PATH: &str = "DT_CONFIG";
pub const ENV_CONFIG_DIR: &str = "DT_CONFIG_DIR";

/// Standard config file name.
pub const CONFIG_FILENAME: &str = "analysis.toml";

/// Application name for XDG directories.
pub const APP_NAME: &str = "device-tensor";

/// A loaded configuration and where it came from.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: AnalysisConfig,
    pub path: Option<PathBuf>,
    pub source: ConfigSource,
}

/// Find the configuration file path, if any.
///
/// Resolution order:
/// 1. Explicit CLI path (if provided)
/// 2. `DT_CONFIG` environment variable
/// 3. `DT_CONFIG_DIR` environment variable + `analysis.toml`
/// 4. XDG config directory (`~/.config/device-tensor/analysis.toml`)
/// 5. None (built-in preset)
///
/// Unlike the discovery steps, an explicit CLI path is returned even when it
/// does not exist so that loading reports the error.
pub fn resolve_config_path(cli_path: Option<&Path>) -> (Option<PathBuf>, ConfigSource) {
    if let Some(path) = cli_path {
        return (Some(path.to_path_buf()), ConfigSource::CliArgument);
    }

    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return (Some(path), ConfigSource::Environment);
        }
    }

    if let Ok(config_dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = PathBuf::from(config_dir).join(CONFIG_FILENAME);
        if path.exists() {
            return (Some(path), ConfigSource::Environment);
        }
    }

    if let Some(dir) = xdg_config_dir() {
        let path = dir.join(CONFIG_FILENAME);
        if path.exists() {
            return (Some(path), ConfigSource::XdgConfig);
        }
    }

    (None, ConfigSource::BuiltinDefault)
}

/// Resolve and load the configuration.
///
/// A preset without an explicit path skips file discovery. With an explicit
/// path, the preset replaces the file's decomposition section. With neither,
/// a discovered file is used, else the `final` preset.
pub fn resolve_config(
    cli_path: Option<&Path>,
    preset: Option<PresetName>,
) -> ValidationResult<ResolvedConfig> {
    if let Some(name) = preset {
        if cli_path.is_none() {
            return Ok(ResolvedConfig {
                config: get_preset(name),
                path: None,
                source: ConfigSource::BuiltinDefault,
            });
        }
    }

    let (path, source) = resolve_config_path(cli_path);
    match path {
        Some(path) => {
            if !path.exists() {
                return Err(ValidationError::IoError(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            let mut config = AnalysisConfig::from_file(&path)?;
            if let Some(name) = preset {
                let preset_cfg = get_preset(name);
                config.decomposition = preset_cfg.decomposition;
            }
            Ok(ResolvedConfig {
                config,
                path: Some(path),
                source,
            })
        }
        None => Ok(ResolvedConfig {
            config: get_preset(preset.unwrap_or(PresetName::Final)),
            path: None,
            source,
        }),
    }
}

/// Get the XDG config directory for device-tensor.
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Get the XDG data directory for device-tensor (default artifact store).
pub fn xdg_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join(APP_NAME))
}
