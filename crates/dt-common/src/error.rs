//! Error types for device tensor analysis.
//!
//! This module provides structured error handling with:
//! - Stable error codes for machine parsing
//! - Category classification for error grouping
//! - Recoverability hints for automation
//! - Remediation suggestions for humans
//!
//! # Human-Facing Output
//!
//! ```text
//! ✗ Input Shape Mismatch
//!   Reason: matrix shape mismatch: expected 12x5, got 11x5
//!   Fix: Check that every daily matrix uses the same device and category ordering.
//! ```
//!
//! # Agent-Facing Output
//!
//! ```json
//! {
//!   "code": 21,
//!   "category": "input",
//!   "message": "matrix shape mismatch: expected 12x5, got 11x5",
//!   "recoverable": true
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for analysis operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration file and preset errors.
    Config,
    /// Input validation errors (matrices, tensors, ranks).
    Input,
    /// Convergence and numerical errors.
    Numerical,
    /// Artifact store errors.
    Persistence,
    /// File I/O and serialization errors.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Input => write!(f, "input"),
            ErrorCategory::Numerical => write!(f, "numerical"),
            ErrorCategory::Persistence => write!(f, "persistence"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Unified error type for device tensor analysis.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown preset: {0}")]
    UnknownPreset(String),

    // Input validation errors (20-29)
    #[error("input validation failed: {0}")]
    InputValidation(String),

    #[error("matrix shape mismatch: expected {expected_rows}x{expected_cols}, got {actual_rows}x{actual_cols}")]
    ShapeMismatch {
        expected_rows: usize,
        expected_cols: usize,
        actual_rows: usize,
        actual_cols: usize,
    },

    #[error("no usable input: {0}")]
    NoUsableInput(String),

    #[error("rank {rank} out of bounds (must be between 1 and {bound})")]
    RankOutOfBounds { rank: usize, bound: usize },

    #[error("tensor has zero norm; relative error is undefined")]
    ZeroTensor,

    // Numerical errors (30-39)
    #[error("decomposition failed: {0}")]
    Decomposition(String),

    #[error("numerical failure: {0}")]
    Numerical(String),

    #[error("all {attempted} attempts failed")]
    AllAttemptsFailed { attempted: usize },

    // Persistence errors (40-49)
    #[error("artifact not found: {key}")]
    ArtifactNotFound { key: String },

    #[error("artifact corrupted: {0}")]
    ArtifactCorrupted(String),

    #[error("incompatible artifact schema: expected {expected}, got {actual}")]
    IncompatibleSchema { expected: String, actual: String },

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: Input validation errors
    /// - 30-39: Numerical errors
    /// - 40-49: Persistence errors
    /// - 60-69: I/O errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidConfig(_) => 11,
            Error::UnknownPreset(_) => 12,
            Error::InputValidation(_) => 20,
            Error::ShapeMismatch { .. } => 21,
            Error::NoUsableInput(_) => 22,
            Error::RankOutOfBounds { .. } => 23,
            Error::ZeroTensor => 24,
            Error::Decomposition(_) => 30,
            Error::Numerical(_) => 31,
            Error::AllAttemptsFailed { .. } => 32,
            Error::ArtifactNotFound { .. } => 40,
            Error::ArtifactCorrupted(_) => 41,
            Error::IncompatibleSchema { .. } => 42,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::InvalidConfig(_) | Error::UnknownPreset(_) => {
                ErrorCategory::Config
            }

            Error::InputValidation(_)
            | Error::ShapeMismatch { .. }
            | Error::NoUsableInput(_)
            | Error::RankOutOfBounds { .. }
            | Error::ZeroTensor => ErrorCategory::Input,

            Error::Decomposition(_) | Error::Numerical(_) | Error::AllAttemptsFailed { .. } => {
                ErrorCategory::Numerical
            }

            Error::ArtifactNotFound { .. }
            | Error::ArtifactCorrupted(_)
            | Error::IncompatibleSchema { .. } => ErrorCategory::Persistence,

            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
        }
    }

    /// Returns whether this error is potentially recoverable.
    ///
    /// Recoverable errors may be resolved by fixing input or configuration,
    /// or by retrying with a different seed or budget.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Config(_) | Error::InvalidConfig(_) | Error::UnknownPreset(_) => true,

            Error::InputValidation(_) => true,
            Error::ShapeMismatch { .. } => true,
            Error::NoUsableInput(_) => true,
            Error::RankOutOfBounds { .. } => true,
            Error::ZeroTensor => false, // Nothing to decompose

            Error::Decomposition(_) => true, // Different seed or init
            Error::Numerical(_) => true,
            Error::AllAttemptsFailed { .. } => true,

            Error::ArtifactNotFound { .. } => true, // Produce it first
            Error::ArtifactCorrupted(_) => false,
            Error::IncompatibleSchema { .. } => false,

            Error::Io(_) => true,
            Error::Json(_) => false,
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Config(_) => {
                "Run 'dt-core config validate' to check the configuration file."
            }
            Error::InvalidConfig(_) => {
                "Fix the reported field, or start from a preset with 'dt-core config show --preset final'."
            }
            Error::UnknownPreset(_) => "List available presets with 'dt-core config presets'.",

            Error::InputValidation(_) => {
                "Check the input matrices: values must be non-negative numbers with a header row."
            }
            Error::ShapeMismatch { .. } => {
                "Check that every daily matrix uses the same device and category ordering."
            }
            Error::NoUsableInput(_) => {
                "Point --input at a directory of YYYY-MM-DD.csv matrices of consistent shape."
            }
            Error::RankOutOfBounds { .. } => {
                "Choose a rank no larger than the product of the two smallest tensor dimensions."
            }
            Error::ZeroTensor => "The assembled tensor is all zeros. Check the input matrices.",

            Error::Decomposition(_) => {
                "Retry with a different --seed, a larger --max-iter, or '--init svd'."
            }
            Error::Numerical(_) => {
                "Retry with a different --seed or a lower rank. Degenerate components often mean the rank is too high."
            }
            Error::AllAttemptsFailed { .. } => {
                "Every attempt failed. Lower the rank or inspect the tensor with 'dt-core inspect'."
            }

            Error::ArtifactNotFound { .. } => {
                "Produce the artifact first (assemble, decompose, or stability), or check --store."
            }
            Error::ArtifactCorrupted(_) => {
                "The stored artifact cannot be read. Delete it and regenerate it."
            }
            Error::IncompatibleSchema { .. } => {
                "The artifact was written by an incompatible version. Regenerate it with this build."
            }

            Error::Io(_) => {
                "Check disk space, permissions, and that the store directory exists. Retry the operation."
            }
            Error::Json(_) => "Invalid JSON. Check the file syntax or regenerate the artifact.",
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Config(_) => "Configuration Error",
            Error::InvalidConfig(_) => "Invalid Configuration",
            Error::UnknownPreset(_) => "Unknown Preset",

            Error::InputValidation(_) => "Input Validation Failed",
            Error::ShapeMismatch { .. } => "Input Shape Mismatch",
            Error::NoUsableInput(_) => "No Usable Input",
            Error::RankOutOfBounds { .. } => "Rank Out of Bounds",
            Error::ZeroTensor => "Zero Tensor",

            Error::Decomposition(_) => "Decomposition Failed",
            Error::Numerical(_) => "Numerical Failure",
            Error::AllAttemptsFailed { .. } => "All Attempts Failed",

            Error::ArtifactNotFound { .. } => "Artifact Not Found",
            Error::ArtifactCorrupted(_) => "Artifact Corrupted",
            Error::IncompatibleSchema { .. } => "Incompatible Artifact Schema",

            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Parse Error",
        }
    }
}

/// Structured error response for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: u32,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Human-readable error message.
    pub message: String,

    /// Whether the error is potentially recoverable.
    pub recoverable: bool,

    /// Remediation hint.
    pub remediation: String,

    /// Additional structured context (e.g., artifact key, rank).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let mut context = HashMap::new();

        match err {
            Error::ShapeMismatch {
                expected_rows,
                expected_cols,
                actual_rows,
                actual_cols,
            } => {
                context.insert(
                    "expected".to_string(),
                    serde_json::json!([expected_rows, expected_cols]),
                );
                context.insert(
                    "actual".to_string(),
                    serde_json::json!([actual_rows, actual_cols]),
                );
            }
            Error::RankOutOfBounds { rank, bound } => {
                context.insert("rank".to_string(), serde_json::json!(rank));
                context.insert("bound".to_string(), serde_json::json!(bound));
            }
            Error::AllAttemptsFailed { attempted } => {
                context.insert("attempted".to_string(), serde_json::json!(attempted));
            }
            Error::ArtifactNotFound { key } => {
                context.insert("key".to_string(), serde_json::json!(key));
            }
            _ => {}
        }

        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            remediation: err.remediation().to_string(),
            context,
        }
    }
}

impl StructuredError {
    /// Add additional context to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code)
        })
    }
}

/// Format an error for human-readable stderr output.
///
/// Output format:
/// ```text
/// ✗ [Headline]
///   Reason: [Error message]
///   Fix: [Remediation hint]
/// ```
pub fn format_error_human(err: &Error, use_color: bool) -> String {
    let (red, cyan, reset) = if use_color {
        ("\x1b[31m", "\x1b[36m", "\x1b[0m")
    } else {
        ("", "", "")
    };

    format!(
        "{red}✗{reset} {headline}\n  Reason: {message}\n  {cyan}Fix:{reset} {remediation}",
        headline = err.headline(),
        message = err,
        remediation = err.remediation()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape_error() -> Error {
        Error::ShapeMismatch {
            expected_rows: 3,
            expected_cols: 2,
            actual_rows: 4,
            actual_cols: 2,
        }
    }

    #[test]
    fn test_error_code() {
        assert_eq!(Error::Config("test".into()).code(), 10);
        assert_eq!(shape_error().code(), 21);
        assert_eq!(Error::ZeroTensor.code(), 24);
        assert_eq!(Error::AllAttemptsFailed { attempted: 5 }.code(), 32);
        assert_eq!(Error::ArtifactNotFound { key: "x".into() }.code(), 40);
    }

    #[test]
    fn test_error_category() {
        assert_eq!(Error::UnknownPreset("x".into()).category(), ErrorCategory::Config);
        assert_eq!(shape_error().category(), ErrorCategory::Input);
        assert_eq!(Error::Numerical("nan".into()).category(), ErrorCategory::Numerical);
        assert_eq!(
            Error::ArtifactCorrupted("x".into()).category(),
            ErrorCategory::Persistence
        );
    }

    #[test]
    fn test_error_recoverable() {
        assert!(Error::Decomposition("x".into()).is_recoverable());
        assert!(!Error::ZeroTensor.is_recoverable());
        assert!(!Error::ArtifactCorrupted("x".into()).is_recoverable());
    }

    #[test]
    fn test_codes_fall_in_category_ranges() {
        let errors = vec![
            Error::Config("a".into()),
            Error::InvalidConfig("a".into()),
            Error::UnknownPreset("a".into()),
            Error::InputValidation("a".into()),
            shape_error(),
            Error::NoUsableInput("a".into()),
            Error::RankOutOfBounds { rank: 9, bound: 4 },
            Error::ZeroTensor,
            Error::Decomposition("a".into()),
            Error::Numerical("a".into()),
            Error::AllAttemptsFailed { attempted: 1 },
            Error::ArtifactNotFound { key: "a".into() },
            Error::ArtifactCorrupted("a".into()),
            Error::IncompatibleSchema {
                expected: "1".into(),
                actual: "2".into(),
            },
        ];
        for err in errors {
            let range = match err.category() {
                ErrorCategory::Config => 10..20,
                ErrorCategory::Input => 20..30,
                ErrorCategory::Numerical => 30..40,
                ErrorCategory::Persistence => 40..50,
                ErrorCategory::Io => 60..70,
            };
            assert!(range.contains(&err.code()), "{err:?}");
        }
    }

    #[test]
    fn test_structured_error_from_error() {
        let structured = StructuredError::from(&shape_error());
        assert_eq!(structured.code, 21);
        assert_eq!(structured.category, ErrorCategory::Input);
        assert!(structured.recoverable);
        assert_eq!(
            structured.context.get("actual"),
            Some(&serde_json::json!([4, 2]))
        );
    }

    #[test]
    fn test_structured_error_json() {
        let err = Error::RankOutOfBounds { rank: 9, bound: 4 };
        let json = StructuredError::from(&err).with_context("layer", "ipv4").to_json();
        assert!(json.contains(r#""code":23"#));
        assert!(json.contains(r#""category":"input""#));
        assert!(json.contains(r#""layer":"ipv4""#));
    }

    #[test]
    fn test_format_error_human() {
        let formatted = format_error_human(&shape_error(), false);
        assert!(formatted.contains("Input Shape Mismatch"));
        assert!(formatted.contains("expected 3x2, got 4x2"));
        assert!(formatted.contains("Fix:"));
    }

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::Numerical.to_string(), "numerical");
        assert_eq!(ErrorCategory::Persistence.to_string(), "persistence");
    }
}
