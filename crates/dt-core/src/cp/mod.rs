//! Non-negative CP (CANDECOMP/PARAFAC) models and their fitting.
//!
//! A rank-R model approximates a (N × M × T) tensor as
//!
//! ```text
//! X[i,j,t] ≈ Σ_r  w[r] · A[i,r] · B[j,r] · C[t,r]
//! ```
//!
//! with every entry of `w`, `A`, `B` and `C` non-negative. Fitted models keep
//! unit-norm factor columns; the scale of each component lives in `w`.
//! Column order is arbitrary and differs between runs, so components of two
//! runs only correspond through [`crate::similarity::match_factors`].

mod als;
mod init;

pub use als::{decompose, decompose_best, AlsSolver, BestFit, RestartFailure, SolverState};

use dt_config::InitScheme;
use dt_math::{LinalgError, NnlsError};
use ndarray::{Array1, Array2, Array3, ArrayView3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tensor::{frobenius_norm, Mode};

/// Why a decomposition attempt failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecomposeError {
    #[error("rank {rank} out of bounds (must be between 1 and {bound})")]
    InvalidRank { rank: usize, bound: usize },

    #[error("tensor has zero norm; relative error is undefined")]
    ZeroTensor,

    #[error("tensor has {count} negative or non-finite entries")]
    InvalidTensor { count: usize },

    #[error("NNLS failed updating factor {factor} row {row}: {source}")]
    Nnls {
        factor: &'static str,
        row: usize,
        #[source]
        source: NnlsError,
    },

    #[error("SVD initialization failed: {0}")]
    Init(#[from] LinalgError),

    #[error("reconstruction error became non-finite at iteration {iteration}")]
    NonFinite { iteration: usize },

    #[error("all {attempted} restarts failed; last error: {last}")]
    AllRestartsFailed {
        attempted: usize,
        last: Box<DecomposeError>,
    },
}

impl From<DecomposeError> for dt_common::Error {
    fn from(err: DecomposeError) -> Self {
        match err {
            DecomposeError::InvalidRank { rank, bound } => {
                dt_common::Error::RankOutOfBounds { rank, bound }
            }
            DecomposeError::ZeroTensor => dt_common::Error::ZeroTensor,
            DecomposeError::InvalidTensor { .. } => {
                dt_common::Error::InputValidation(err.to_string())
            }
            DecomposeError::AllRestartsFailed { attempted, .. } => {
                dt_common::Error::AllAttemptsFailed { attempted }
            }
            other => dt_common::Error::Decomposition(other.to_string()),
        }
    }
}

/// Largest rank accepted for a tensor of the given shape.
pub fn rank_bound((n, m, t): (usize, usize, usize)) -> usize {
    (n * m).min(n * t).min(m * t)
}

/// Reject rank 0 and ranks above [`rank_bound`].
pub fn check_rank(shape: (usize, usize, usize), rank: usize) -> Result<(), DecomposeError> {
    let bound = rank_bound(shape);
    if rank == 0 || rank > bound {
        return Err(DecomposeError::InvalidRank { rank, bound });
    }
    Ok(())
}

/// `1 - error`.
///
/// This treats the relative Frobenius error as a fraction of unexplained
/// signal. It is a convenient approximation, not a variance decomposition.
pub fn variance_explained(error: f64) -> f64 {
    1.0 - error
}

/// Fitted weights and factor matrices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpModel {
    /// Length R.
    pub weights: Array1<f64>,
    /// N × R device loadings.
    pub factor_a: Array2<f64>,
    /// M × R category loadings.
    pub factor_b: Array2<f64>,
    /// T × R temporal activity.
    pub factor_c: Array2<f64>,
}

impl CpModel {
    pub fn rank(&self) -> usize {
        self.weights.len()
    }

    /// (N, M, T) of the tensor this model approximates.
    pub fn shape(&self) -> (usize, usize, usize) {
        (
            self.factor_a.nrows(),
            self.factor_b.nrows(),
            self.factor_c.nrows(),
        )
    }

    pub fn factor(&self, mode: Mode) -> &Array2<f64> {
        match mode {
            Mode::Device => &self.factor_a,
            Mode::Category => &self.factor_b,
            Mode::Time => &self.factor_c,
        }
    }

    /// Check that every factor has R columns.
    pub fn check_consistent(&self) -> Result<(), String> {
        let r = self.rank();
        for mode in Mode::ALL {
            let cols = self.factor(mode).ncols();
            if cols != r {
                return Err(format!(
                    "factor {} has {} columns but there are {} weights",
                    mode.factor_name(),
                    cols,
                    r
                ));
            }
        }
        Ok(())
    }

    /// True when no entry is below zero.
    pub fn is_nonnegative(&self) -> bool {
        self.weights
            .iter()
            .chain(self.factor_a.iter())
            .chain(self.factor_b.iter())
            .chain(self.factor_c.iter())
            .all(|&v| v >= 0.0)
    }

    /// Weighted sum of the component outer products.
    pub fn reconstruct(&self) -> Array3<f64> {
        let (n, m, t) = self.shape();
        let mut out = Array3::<f64>::zeros((n, m, t));
        for r in 0..self.rank() {
            let w = self.weights[r];
            if w == 0.0 {
                continue;
            }
            for i in 0..n {
                let wa = w * self.factor_a[[i, r]];
                if wa == 0.0 {
                    continue;
                }
                for j in 0..m {
                    let wab = wa * self.factor_b[[j, r]];
                    if wab == 0.0 {
                        continue;
                    }
                    for k in 0..t {
                        out[[i, j, k]] += wab * self.factor_c[[k, r]];
                    }
                }
            }
        }
        out
    }

    /// `‖x − reconstruct()‖ / ‖x‖`; `None` when `x` has zero norm or the
    /// shapes disagree.
    pub fn relative_error(&self, x: &ArrayView3<f64>) -> Option<f64> {
        if x.dim() != self.shape() {
            return None;
        }
        let norm = frobenius_norm(x);
        if norm == 0.0 {
            return None;
        }
        let approx = self.reconstruct();
        let residual: f64 = x
            .iter()
            .zip(approx.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        Some(residual.sqrt() / norm)
    }
}

/// How the ALS loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverStatus {
    Converged,
    MaxIterationsReached,
}

impl std::fmt::Display for SolverStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolverStatus::Converged => write!(f, "converged"),
            SolverStatus::MaxIterationsReached => write!(f, "max_iterations_reached"),
        }
    }
}

/// A completed decomposition and how it got there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpFit {
    pub model: CpModel,
    /// Final relative reconstruction error.
    pub error: f64,
    pub iterations: usize,
    pub status: SolverStatus,
    pub seed: u64,
    pub init: InitScheme,
    /// Relative error after initialization and after every sweep.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<f64>,
}

impl CpFit {
    pub fn rank(&self) -> usize {
        self.model.rank()
    }

    pub fn variance_explained(&self) -> f64 {
        variance_explained(self.error)
    }
}
