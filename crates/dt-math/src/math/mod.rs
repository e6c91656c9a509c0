//! Core math modules.

pub mod assignment;
pub mod linalg;
pub mod nnls;
pub mod similarity;
pub mod stats;
