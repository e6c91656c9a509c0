//! Device Tensor Core Library
//!
//! Non-negative CP analysis of device × category × time traffic tensors:
//! - Daily matrix reading and tensor assembly
//! - ALS decomposition with seeded restarts
//! - Rank scans and stability batches
//! - Cross-run component matching and community labels
//! - Artifact persistence, logging and exit codes
//!
//! The binary entry point is in `main.rs`.

pub mod community;
pub mod cp;
pub mod exit_codes;
pub mod logging;
pub mod output;
pub mod rank;
pub mod similarity;
pub mod source;
pub mod stability;
pub mod store;
pub mod tensor;

pub use cp::{decompose, decompose_best, CpFit, CpModel, DecomposeError, SolverStatus};
pub use rank::{scan_ranks, AlsDecomposer, Decomposer};
pub use stability::run_stability;
pub use store::{ArtifactStore, FsStore};
pub use tensor::{DeviceTensor, Mode};
