//! Configuration validation errors and semantic validation.

use crate::analysis::AnalysisConfig;
use crate::CONFIG_SCHEMA_VERSION;
use thiserror::Error;

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::IoError(_) | ValidationError::ParseError(_) => 10,
            ValidationError::InvalidValue { .. } | ValidationError::VersionMismatch { .. } => 11,
        }
    }

    fn invalid(field: &str, message: impl Into<String>) -> Self {
        ValidationError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Validate an analysis configuration semantically.
pub fn validate_config(cfg: &AnalysisConfig) -> ValidationResult<()> {
    // Only the major version has to agree.
    let major = |v: &str| v.split('.').next().map(str::to_string);
    if major(&cfg.schema_version) != major(CONFIG_SCHEMA_VERSION) {
        return Err(ValidationError::VersionMismatch {
            expected: CONFIG_SCHEMA_VERSION.to_string(),
            actual: cfg.schema_version.clone(),
        });
    }

    let d = &cfg.decomposition;
    if d.max_iterations == 0 {
        return Err(ValidationError::invalid(
            "decomposition.max_iterations",
            "must be at least 1",
        ));
    }
    if !d.tolerance.is_finite() || d.tolerance < 0.0 {
        return Err(ValidationError::invalid(
            "decomposition.tolerance",
            format!("must be finite and >= 0, got {}", d.tolerance),
        ));
    }
    if d.restarts == 0 {
        return Err(ValidationError::invalid(
            "decomposition.restarts",
            "must be at least 1",
        ));
    }

    let r = &cfg.rank_scan;
    if r.min_rank == 0 {
        return Err(ValidationError::invalid("rank_scan.min_rank", "must be at least 1"));
    }
    if r.max_rank < r.min_rank {
        return Err(ValidationError::invalid(
            "rank_scan.max_rank",
            format!("must be >= min_rank ({}), got {}", r.min_rank, r.max_rank),
        ));
    }

    let s = &cfg.stability;
    if s.runs == 0 {
        return Err(ValidationError::invalid("stability.runs", "must be at least 1"));
    }
    if u32::try_from(s.runs).is_err() {
        return Err(ValidationError::invalid(
            "stability.runs",
            format!("must be at most {}, got {}", u32::MAX, s.runs),
        ));
    }
    check_unit_interval("stability.similarity_threshold", s.similarity_threshold)?;
    check_unit_interval("stability.variability_threshold", s.variability_threshold)?;

    let a = &cfg.assembly;
    if a.expected_devices == Some(0) {
        return Err(ValidationError::invalid(
            "assembly.expected_devices",
            "must be at least 1 when set",
        ));
    }
    if a.expected_categories == Some(0) {
        return Err(ValidationError::invalid(
            "assembly.expected_categories",
            "must be at least 1 when set",
        ));
    }

    Ok(())
}

fn check_unit_interval(field: &str, value: f64) -> ValidationResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ValidationError::invalid(
            field,
            format!("must be in [0, 1], got {}", value),
        ));
    }
    Ok(())
}
