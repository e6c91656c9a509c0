//! Device tensor analysis common types, keys, and errors.
//!
//! This crate provides foundational types shared across dt-core modules:
//! - Artifact keys (layer names, model keys) and analysis IDs
//! - Schema versioning for persisted artifacts and JSON output
//! - The unified error type with stable codes
//! - Output formats

pub mod error;
pub mod id;
pub mod output;
pub mod schema;

pub use error::{Error, ErrorCategory, Result, StructuredError};
pub use id::{AnalysisId, LayerName, ModelKey};
pub use output::OutputFormat;
pub use schema::SCHEMA_VERSION;
