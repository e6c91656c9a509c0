//! Analysis configuration types.
//!
//! A configuration file may be TOML or JSON; every section is optional and
//! missing fields fall back to the `final` preset values.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::validate::{ValidationError, ValidationResult};
use crate::CONFIG_SCHEMA_VERSION;

/// How factor matrices are initialized before the first ALS sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum InitScheme {
    /// Uniform [0, 1) entries from a seeded generator.
    #[default]
    Random,
    /// Absolute leading eigenvectors of each mode's unfolding Gram matrix.
    Svd,
}

impl InitScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            InitScheme::Random => "random",
            InitScheme::Svd => "svd",
        }
    }
}

impl fmt::Display for InitScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for InitScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "random" => Ok(InitScheme::Random),
            "svd" => Ok(InitScheme::Svd),
            other => Err(format!("unknown init scheme '{other}' (expected random or svd)")),
        }
    }
}

/// Optimization parameters for one CP decomposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DecompositionParams {
    pub init: InitScheme,
    /// Iteration cap for the ALS loop.
    pub max_iterations: usize,
    /// Stop once the relative error changes by less than this between sweeps.
    pub tolerance: f64,
    pub seed: u64,
    /// Independent fits for best-of-N; seeds are `seed, seed+1, ...`.
    pub restarts: usize,
}

impl Default for DecompositionParams {
    fn default() -> Self {
        Self {
            init: InitScheme::Random,
            max_iterations: 500,
            tolerance: 1e-8,
            seed: 42,
            restarts: 5,
        }
    }
}

/// Candidate rank range for the rank scan (inclusive).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RankScanParams {
    pub min_rank: usize,
    pub max_rank: usize,
}

impl Default for RankScanParams {
    fn default() -> Self {
        Self {
            min_rank: 2,
            max_rank: 8,
        }
    }
}

impl RankScanParams {
    pub fn ranks(&self) -> std::ops::RangeInclusive<usize> {
        self.min_rank..=self.max_rank
    }
}

/// Stability batch and comparison parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct StabilityParams {
    /// Number of independently seeded runs.
    pub runs: usize,
    /// Run `k` (1-based) uses seed `base_seed + k - 1`.
    pub base_seed: u64,
    /// Average matched cosine similarity a mode must exceed to be stable.
    pub similarity_threshold: f64,
    /// Error std/mean above which the batch is flagged as variable.
    pub variability_threshold: f64,
}

impl Default for StabilityParams {
    fn default() -> Self {
        Self {
            runs: 5,
            base_seed: 42,
            similarity_threshold: 0.8,
            variability_threshold: 0.1,
        }
    }
}

/// Expected input matrix shape. `None` means "take it from the first matrix".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AssemblyParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_devices: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_categories: Option<usize>,
}

/// Full analysis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AnalysisConfig {
    pub schema_version: String,
    /// Run per-rank and per-run batches on the rayon pool.
    pub parallel: bool,
    pub decomposition: DecompositionParams,
    pub rank_scan: RankScanParams,
    pub stability: StabilityParams,
    pub assembly: AssemblyParams,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION.to_string(),
            parallel: true,
            decomposition: DecompositionParams::default(),
            rank_scan: RankScanParams::default(),
            stability: StabilityParams::default(),
            assembly: AssemblyParams::default(),
        }
    }
}

impl AnalysisConfig {
    /// Load a configuration file, choosing the parser by extension.
    ///
    /// `.json` is parsed as JSON; anything else as TOML.
    pub fn from_file(path: &Path) -> ValidationResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ValidationError::IoError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }

    pub fn from_toml_str(content: &str) -> ValidationResult<Self> {
        toml::from_str(content)
            .map_err(|e| ValidationError::ParseError(format!("Invalid TOML: {}", e)))
    }

    pub fn from_json_str(content: &str) -> ValidationResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| ValidationError::ParseError(format!("Invalid JSON: {}", e)))
    }

    pub fn to_toml_string(&self) -> ValidationResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ValidationError::ParseError(format!("Cannot render TOML: {}", e)))
    }

    /// JSON Schema for the configuration file format.
    pub fn json_schema() -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(AnalysisConfig)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_final_budget() {
        let cfg = AnalysisConfig::default();
        assert_eq!(cfg.decomposition.max_iterations, 500);
        assert_eq!(cfg.decomposition.tolerance, 1e-8);
        assert_eq!(cfg.decomposition.seed, 42);
        assert_eq!(cfg.stability.similarity_threshold, 0.8);
        assert_eq!(cfg.rank_scan.ranks().collect::<Vec<_>>(), vec![2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg = AnalysisConfig::from_toml_str(
            r#"
            [decomposition]
            init = "svd"
            max_iterations = 50

            [stability]
            runs = 8
            "#,
        )
        .unwrap();
        assert_eq!(cfg.decomposition.init, InitScheme::Svd);
        assert_eq!(cfg.decomposition.max_iterations, 50);
        assert_eq!(cfg.decomposition.tolerance, 1e-8);
        assert_eq!(cfg.stability.runs, 8);
        assert_eq!(cfg.stability.base_seed, 42);
        assert!(cfg.parallel);
    }

    #[test]
    fn test_unknown_init_is_parse_error() {
        let err = AnalysisConfig::from_json_str(r#"{"decomposition":{"init":"nndsvd"}}"#)
            .unwrap_err();
        assert!(matches!(err, ValidationError::ParseError(_)));
    }

    #[test]
    fn test_toml_round_trip() {
        let mut cfg = AnalysisConfig::default();
        cfg.assembly.expected_devices = Some(12);
        let text = cfg.to_toml_string().unwrap();
        assert_eq!(AnalysisConfig::from_toml_str(&text).unwrap(), cfg);
    }

    #[test]
    fn test_init_scheme_from_str() {
        assert_eq!("SVD".parse::<InitScheme>(), Ok(InitScheme::Svd));
        assert!("nope".parse::<InitScheme>().is_err());
    }

    #[test]
    fn test_json_schema_lists_sections() {
        let schema = AnalysisConfig::json_schema();
        let props = &schema["properties"];
        for key in ["decomposition", "rank_scan", "stability", "assembly", "parallel"] {
            assert!(props.get(key).is_some(), "missing {key}");
        }
    }
}
