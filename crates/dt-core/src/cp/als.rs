//! Alternating non-negative least squares.
//!
//! Each sweep updates A, then B, then C. Updating one factor with the other
//! two fixed is an independent NNLS problem per row, all sharing one R × R
//! Gram matrix (the Hadamard product of the fixed factors' Gram matrices)
//! and taking their right-hand sides from the matricized-tensor times
//! Khatri-Rao product (MTTKRP). After each update the factor's columns are
//! rescaled to unit norm and the norms become the component weights.
//!
//! The solver is an explicit state machine:
//!
//! ```text
//! Initializing ──▶ Iterating ──▶ Converged
//!                     │   ▲  └──▶ MaxIterationsReached
//!                     └───┘  └──▶ Failed
//! ```

use dt_config::DecompositionParams;
use dt_math::nnls_gram;
use ndarray::{Array1, Array2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::init::initial_factors;
use super::{check_rank, CpFit, CpModel, DecomposeError, SolverStatus};
use crate::logging::event_names;
use crate::tensor::{DeviceTensor, Mode};

/// Where the solver is.
#[derive(Debug, Clone, PartialEq)]
pub enum SolverState {
    Initializing,
    /// `iteration` sweeps done; `error` is the error after the last one.
    Iterating { iteration: usize, error: f64 },
    Converged { iterations: usize, error: f64 },
    MaxIterationsReached { iterations: usize, error: f64 },
    Failed(DecomposeError),
}

impl SolverState {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            SolverState::Initializing | SolverState::Iterating { .. }
        )
    }
}

/// ALS solver for one (tensor, rank, seed) attempt.
pub struct AlsSolver<'a> {
    x: ArrayView3<'a, f64>,
    rank: usize,
    params: DecompositionParams,
    weights: Array1<f64>,
    /// A, B, C with unit-norm columns once initialized.
    factors: [Array2<f64>; 3],
    trace: Vec<f64>,
    state: SolverState,
}

impl<'a> AlsSolver<'a> {
    /// Validate inputs and set up a solver in `Initializing`.
    pub fn new(
        tensor: &'a DeviceTensor,
        rank: usize,
        params: &DecompositionParams,
    ) -> Result<Self, DecomposeError> {
        check_rank(tensor.shape(), rank)?;
        let invalid = tensor
            .data
            .iter()
            .filter(|v| !v.is_finite() || **v < 0.0)
            .count();
        if invalid > 0 {
            return Err(DecomposeError::InvalidTensor { count: invalid });
        }
        if tensor.norm() == 0.0 {
            return Err(DecomposeError::ZeroTensor);
        }

        Ok(AlsSolver {
            x: tensor.data.view(),
            rank,
            params: params.clone(),
            weights: Array1::ones(rank),
            factors: [Array2::zeros((0, 0)), Array2::zeros((0, 0)), Array2::zeros((0, 0))],
            trace: Vec::new(),
            state: SolverState::Initializing,
        })
    }

    pub fn state(&self) -> &SolverState {
        &self.state
    }

    /// Advance by one transition. Terminal states are left unchanged.
    pub fn step(&mut self) -> &SolverState {
        let next = match self.state {
            SolverState::Initializing => self.initialize(),
            SolverState::Iterating { iteration, error } => self.sweep(iteration, error),
            _ => return &self.state,
        };
        self.state = next;
        &self.state
    }

    /// Run to a terminal state.
    pub fn run(mut self) -> Result<CpFit, DecomposeError> {
        while !self.state.is_terminal() {
            self.step();
        }
        let (iterations, error, status) = match self.state {
            SolverState::Converged { iterations, error } => {
                (iterations, error, SolverStatus::Converged)
            }
            SolverState::MaxIterationsReached { iterations, error } => {
                (iterations, error, SolverStatus::MaxIterationsReached)
            }
            SolverState::Failed(e) => return Err(e),
            SolverState::Initializing | SolverState::Iterating { .. } => {
                unreachable!("loop exits only on terminal states")
            }
        };
        let [factor_a, factor_b, factor_c] = self.factors;
        Ok(CpFit {
            model: CpModel {
                weights: self.weights,
                factor_a,
                factor_b,
                factor_c,
            },
            error,
            iterations,
            status,
            seed: self.params.seed,
            init: self.params.init,
            trace: self.trace,
        })
    }

    fn initialize(&mut self) -> SolverState {
        let factors = match initial_factors(&self.x, self.rank, self.params.init, self.params.seed)
        {
            Ok(f) => f,
            Err(e) => return SolverState::Failed(e),
        };
        self.factors = factors;
        self.weights = Array1::ones(self.rank);
        for idx in 0..3 {
            let norms = normalize_columns(&mut self.factors[idx]);
            self.weights *= &norms;
        }
        let error = self.current_error();
        if !error.is_finite() {
            return SolverState::Failed(DecomposeError::NonFinite { iteration: 0 });
        }
        self.trace.push(error);
        SolverState::Iterating {
            iteration: 0,
            error,
        }
    }

    fn sweep(&mut self, iteration: usize, previous: f64) -> SolverState {
        for mode in Mode::ALL {
            if let Err(e) = self.update(mode) {
                return SolverState::Failed(e);
            }
        }
        let iterations = iteration + 1;
        let error = self.current_error();
        if !error.is_finite() {
            return SolverState::Failed(DecomposeError::NonFinite {
                iteration: iterations,
            });
        }
        self.trace.push(error);
        trace!(
            target: event_names::DECOMPOSE_ITERATION,
            iteration = iterations as u64,
            error,
            "sweep done"
        );

        if (previous - error).abs() < self.params.tolerance {
            SolverState::Converged { iterations, error }
        } else if iterations >= self.params.max_iterations {
            SolverState::MaxIterationsReached { iterations, error }
        } else {
            SolverState::Iterating {
                iteration: iterations,
                error,
            }
        }
    }

    /// Solve for one factor with the other two fixed, then renormalize.
    fn update(&mut self, mode: Mode) -> Result<(), DecomposeError> {
        let (f1, f2) = match mode {
            Mode::Device => (&self.factors[1], &self.factors[2]),
            Mode::Category => (&self.factors[0], &self.factors[2]),
            Mode::Time => (&self.factors[0], &self.factors[1]),
        };
        let gram = f1.t().dot(f1) * &f2.t().dot(f2);
        let rhs = mttkrp(&self.x, mode, f1, f2);

        let mut updated = Array2::<f64>::zeros(rhs.dim());
        for (row, b) in rhs.outer_iter().enumerate() {
            let solution =
                nnls_gram(gram.view(), b).map_err(|source| DecomposeError::Nnls {
                    factor: mode.factor_name(),
                    row,
                    source,
                })?;
            updated.row_mut(row).assign(&solution);
        }

        self.weights = normalize_columns(&mut updated);
        self.factors[mode.axis()] = updated;
        Ok(())
    }

    fn current_error(&self) -> f64 {
        let model = CpModel {
            weights: self.weights.clone(),
            factor_a: self.factors[0].clone(),
            factor_b: self.factors[1].clone(),
            factor_c: self.factors[2].clone(),
        };
        model.relative_error(&self.x).unwrap_or(f64::NAN)
    }
}

/// Scale each column to unit L2 norm and return the old norms. All-zero
/// columns stay zero with norm 0.
fn normalize_columns(factor: &mut Array2<f64>) -> Array1<f64> {
    let mut norms = Array1::<f64>::zeros(factor.ncols());
    for (r, mut col) in factor.axis_iter_mut(Axis(1)).enumerate() {
        let norm = col.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            col /= norm;
            norms[r] = norm;
        }
    }
    norms
}

/// Matricized tensor times Khatri-Rao product for `mode`.
///
/// `f1` and `f2` are the factors of the remaining modes in axis order, so
/// `out[p, r] = Σ_q Σ_s X'[p, q, s] · f1[q, r] · f2[s, r]` where `X'` has
/// `mode` moved first.
fn mttkrp(x: &ArrayView3<f64>, mode: Mode, f1: &Array2<f64>, f2: &Array2<f64>) -> Array2<f64> {
    let permuted = x.view().permuted_axes(mode.leading_permutation());
    let rows = permuted.len_of(Axis(0));
    let mut out = Array2::<f64>::zeros((rows, f1.ncols()));
    for (p, slice) in permuted.outer_iter().enumerate() {
        let partial = slice.dot(f2) * f1;
        out.row_mut(p).assign(&partial.sum_axis(Axis(0)));
    }
    out
}

/// Fit one rank-`rank` model with `params.seed`.
pub fn decompose(
    tensor: &DeviceTensor,
    rank: usize,
    params: &DecompositionParams,
) -> Result<CpFit, DecomposeError> {
    debug!(
        target: event_names::DECOMPOSE_STARTED,
        rank = rank as u64,
        seed = params.seed,
        init = params.init.as_str(),
        "fitting"
    );
    let fit = AlsSolver::new(tensor, rank, params)?.run()?;
    debug!(
        target: event_names::DECOMPOSE_FINISHED,
        rank = rank as u64,
        seed = params.seed,
        iterations = fit.iterations as u64,
        error = fit.error,
        status = %fit.status,
        "fit finished"
    );
    Ok(fit)
}

/// A restart that did not produce a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartFailure {
    pub seed: u64,
    pub error: String,
}

/// Best of several seeded fits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestFit {
    pub fit: CpFit,
    pub attempted: usize,
    pub failures: Vec<RestartFailure>,
}

/// Run `params.restarts` fits with seeds `seed, seed+1, ...` and keep the one
/// with the lowest error (the earliest seed on ties).
///
/// Input errors (rank, zero tensor) are returned immediately since every
/// restart would hit them. Numerical failures are counted; the call fails
/// only when every restart fails.
pub fn decompose_best(
    tensor: &DeviceTensor,
    rank: usize,
    params: &DecompositionParams,
) -> Result<BestFit, DecomposeError> {
    let attempted = params.restarts.max(1);
    let mut best: Option<CpFit> = None;
    let mut failures = Vec::new();
    let mut last_error = None;

    for k in 0..attempted {
        let seeded = DecompositionParams {
            seed: params.seed.wrapping_add(k as u64),
            ..params.clone()
        };
        match decompose(tensor, rank, &seeded) {
            Ok(fit) => {
                if best.as_ref().map_or(true, |b| fit.error < b.error) {
                    best = Some(fit);
                }
            }
            Err(
                e @ (DecomposeError::InvalidRank { .. }
                | DecomposeError::ZeroTensor
                | DecomposeError::InvalidTensor { .. }),
            ) => return Err(e),
            Err(e) => {
                warn!(
                    target: event_names::DECOMPOSE_RESTART_FAILED,
                    seed = seeded.seed,
                    error = %e,
                    "restart failed"
                );
                failures.push(RestartFailure {
                    seed: seeded.seed,
                    error: e.to_string(),
                });
                last_error = Some(e);
            }
        }
    }

    match best {
        Some(fit) => Ok(BestFit {
            fit,
            attempted,
            failures,
        }),
        None => Err(DecomposeError::AllRestartsFailed {
            attempted,
            last: Box::new(last_error.unwrap_or(DecomposeError::ZeroTensor)),
        }),
    }
}
