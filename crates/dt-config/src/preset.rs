//! Built-in analysis presets.
//!
//! Provides pre-built configurations for:
//! - Scan: the shared, fixed budget used to compare reconstruction error across ranks
//! - Final: the larger budget used for accepted models and stability batches
//! - Quick: a small budget for smoke tests and CI

use crate::analysis::{AnalysisConfig, DecompositionParams, InitScheme};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Available configuration presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresetName {
    /// Rank-estimation budget: 100 iterations, tol 1e-7, single fit
    Scan,
    /// Accepted-model budget: 500 iterations, tol 1e-8, best of 5
    Final,
    /// Smoke-test budget: 50 iterations, tol 1e-6
    Quick,
}

impl PresetName {
    /// All available preset names.
    pub const ALL: &'static [PresetName] = &[PresetName::Scan, PresetName::Final, PresetName::Quick];

    /// Get preset name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PresetName::Scan => "scan",
            PresetName::Final => "final",
            PresetName::Quick => "quick",
        }
    }

    /// Parse preset name from string.
    pub fn parse(s: &str) -> Option<PresetName> {
        match s.to_lowercase().as_str() {
            "scan" | "rank" | "estimate" => Some(PresetName::Scan),
            "final" | "default" => Some(PresetName::Final),
            "quick" | "smoke" | "ci" => Some(PresetName::Quick),
            _ => None,
        }
    }

    /// Get a description of the preset.
    pub fn description(&self) -> &'static str {
        match self {
            PresetName::Scan => "Fixed budget shared by every rank in a rank scan",
            PresetName::Final => "Best-of-5 fits with a tight tolerance for accepted models",
            PresetName::Quick => "Small budget for smoke tests and CI",
        }
    }
}

impl fmt::Display for PresetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PresetName {
    type Err = PresetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PresetName::parse(s).ok_or_else(|| PresetError::UnknownPreset(s.to_string()))
    }
}

/// Errors related to preset operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresetError {
    /// Unknown preset name.
    UnknownPreset(String),
}

impl fmt::Display for PresetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresetError::UnknownPreset(name) => {
                write!(
                    f,
                    "Unknown preset '{}'. Available: {}",
                    name,
                    PresetName::ALL
                        .iter()
                        .map(|p| p.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            }
        }
    }
}

impl std::error::Error for PresetError {}

/// Get the configuration for a preset.
pub fn get_preset(name: PresetName) -> AnalysisConfig {
    match name {
        PresetName::Scan => AnalysisConfig {
            decomposition: DecompositionParams {
                init: InitScheme::Random,
                max_iterations: 100,
                tolerance: 1e-7,
                seed: 42,
                restarts: 1,
            },
            ..AnalysisConfig::default()
        },
        PresetName::Final => AnalysisConfig::default(),
        PresetName::Quick => {
            let mut cfg = AnalysisConfig::default();
            cfg.decomposition.max_iterations = 50;
            cfg.decomposition.tolerance = 1e-6;
            cfg.decomposition.restarts = 1;
            cfg.rank_scan.max_rank = 4;
            cfg.stability.runs = 3;
            cfg
        }
    }
}

/// Information about a preset for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetInfo {
    pub name: String,
    pub description: String,
    pub init: InitScheme,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub seed: u64,
    pub restarts: usize,
    pub stability_runs: usize,
}

impl PresetInfo {
    /// Create info from a preset.
    pub fn from_preset(name: PresetName) -> Self {
        let cfg = get_preset(name);
        Self {
            name: name.as_str().to_string(),
            description: name.description().to_string(),
            init: cfg.decomposition.init,
            max_iterations: cfg.decomposition.max_iterations,
            tolerance: cfg.decomposition.tolerance,
            seed: cfg.decomposition.seed,
            restarts: cfg.decomposition.restarts,
            stability_runs: cfg.stability.runs,
        }
    }
}

/// List all available presets with summary information.
pub fn list_presets() -> Vec<PresetInfo> {
    PresetName::ALL
        .iter()
        .map(|&name| PresetInfo::from_preset(name))
        .collect()
}
