//! Device tensor analysis configuration loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for the analysis configuration (TOML or JSON)
//! - Built-in presets for rank scanning, final fits and smoke tests
//! - Config resolution (CLI → env → XDG → defaults)
//! - Semantic validation

pub mod analysis;
pub mod preset;
pub mod resolve;
pub mod validate;

pub use analysis::{
    AnalysisConfig, AssemblyParams, DecompositionParams, InitScheme, RankScanParams,
    StabilityParams,
};
pub use preset::{get_preset, list_presets, PresetInfo, PresetName};
pub use resolve::{resolve_config, ConfigSource, ResolvedConfig};
pub use validate::{validate_config, ValidationError, ValidationResult};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";
