//! Non-negative least squares in Gram (normal-equation) form.
//!
//! Solves
//! ```text
//! minimize  ½ xᵀ G x − bᵀ x   subject to  x ≥ 0
//! ```
//! which is the NNLS problem `min ‖A x − y‖²` with `G = AᵀA` and `b = Aᵀy`.
//! Working on the Gram form keeps every subproblem at rank × rank size,
//! which is what alternating least squares needs: the Gram matrix is shared
//! across all rows of the factor being updated.
//!
//! The algorithm is the Lawson–Hanson active-set method: variables enter the
//! passive set by largest positive gradient, the passive subproblem is solved
//! unconstrained, and an interpolation step restores feasibility whenever a
//! passive variable would go non-positive.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use thiserror::Error;

use super::linalg::{solve, LinalgError};

/// Errors from the NNLS solver.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NnlsError {
    #[error("gram matrix is {rows}x{cols} but right-hand side has length {rhs}")]
    DimensionMismatch { rows: usize, cols: usize, rhs: usize },

    #[error("non-finite value in NNLS input")]
    NonFinite,

    #[error("passive-set subproblem failed: {0}")]
    Subproblem(#[from] LinalgError),

    #[error("active-set iteration limit ({0}) exceeded")]
    MaxIterations(usize),
}

/// Solve the Gram-form NNLS problem.
///
/// Returns a vector with every entry `>= 0`. Fails if the inputs contain
/// non-finite values, if a passive-set subproblem is singular, or if the
/// active-set loop cycles past its iteration limit.
pub fn nnls_gram(gram: ArrayView2<f64>, rhs: ArrayView1<f64>) -> Result<Array1<f64>, NnlsError> {
    let (rows, cols) = gram.dim();
    let n = rhs.len();
    if rows != cols || rows != n {
        return Err(NnlsError::DimensionMismatch { rows, cols, rhs: n });
    }
    if gram.iter().chain(rhs.iter()).any(|v| !v.is_finite()) {
        return Err(NnlsError::NonFinite);
    }

    let scale = gram
        .diag()
        .iter()
        .chain(rhs.iter())
        .fold(1.0_f64, |acc, v| acc.max(v.abs()));
    let tol = 10.0 * f64::EPSILON * (n.max(1) as f64) * scale;
    let max_iter = 3 * n + 30;

    let mut x = Array1::<f64>::zeros(n);
    let mut passive = vec![false; n];
    let mut iterations = 0usize;

    loop {
        let w = &rhs - &gram.dot(&x);
        let mut entering = None;
        let mut best = tol;
        for j in 0..n {
            if !passive[j] && w[j] > best {
                best = w[j];
                entering = Some(j);
            }
        }
        let Some(j) = entering else {
            break;
        };
        passive[j] = true;

        loop {
            iterations += 1;
            if iterations > max_iter {
                return Err(NnlsError::MaxIterations(max_iter));
            }

            let s = solve_passive(gram, rhs, &passive)?;
            let feasible = (0..n).filter(|&i| passive[i]).all(|i| s[i] > 0.0);
            if feasible {
                x = s;
                break;
            }

            let mut alpha = f64::INFINITY;
            for i in 0..n {
                if passive[i] && s[i] <= 0.0 {
                    let denom = x[i] - s[i];
                    if denom > 0.0 {
                        alpha = alpha.min(x[i] / denom);
                    }
                }
            }
            if !alpha.is_finite() {
                alpha = 0.0;
            }

            for i in 0..n {
                x[i] += alpha * (s[i] - x[i]);
                if passive[i] && x[i] <= tol {
                    passive[i] = false;
                    x[i] = 0.0;
                }
            }
        }
    }

    x.mapv_inplace(|v| v.max(0.0));
    Ok(x)
}

/// Unconstrained solve restricted to the passive set; zeros elsewhere.
fn solve_passive(
    gram: ArrayView2<f64>,
    rhs: ArrayView1<f64>,
    passive: &[bool],
) -> Result<Array1<f64>, LinalgError> {
    let idx: Vec<usize> = (0..passive.len()).filter(|&i| passive[i]).collect();
    let mut out = Array1::<f64>::zeros(passive.len());
    if idx.is_empty() {
        return Ok(out);
    }

    let p = idx.len();
    let sub_gram = Array2::from_shape_fn((p, p), |(a, b)| gram[[idx[a], idx[b]]]);
    let sub_rhs = Array1::from_shape_fn(p, |a| rhs[idx[a]]);
    let sub = solve(sub_gram.view(), sub_rhs.view())?;
    for (a, &i) in idx.iter().enumerate() {
        out[i] = sub[a];
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn unconstrained_solution_already_feasible() {
        // G = I, b = [1, 2] -> x = [1, 2]
        let g = array![[1.0, 0.0], [0.0, 1.0]];
        let b = array![1.0, 2.0];
        let x = nnls_gram(g.view(), b.view()).unwrap();
        assert!(approx_eq(x[0], 1.0, 1e-12));
        assert!(approx_eq(x[1], 2.0, 1e-12));
    }

    #[test]
    fn negative_component_is_clamped_to_zero() {
        // G = I, b = [1, -2] -> x = [1, 0]
        let g = array![[1.0, 0.0], [0.0, 1.0]];
        let b = array![1.0, -2.0];
        let x = nnls_gram(g.view(), b.view()).unwrap();
        assert!(approx_eq(x[0], 1.0, 1e-12));
        assert_eq!(x[1], 0.0);
    }

    #[test]
    fn correlated_system_respects_bound() {
        // Unconstrained solution of [[2,1],[1,2]] x = [3, 0] is [2, -1];
        // the constrained optimum is x = [1.5, 0].
        let g = array![[2.0, 1.0], [1.0, 2.0]];
        let b = array![3.0, 0.0];
        let x = nnls_gram(g.view(), b.view()).unwrap();
        assert!(approx_eq(x[0], 1.5, 1e-12));
        assert_eq!(x[1], 0.0);
    }

    #[test]
    fn kkt_conditions_hold() {
        let g = array![[4.0, 1.0, 0.5], [1.0, 3.0, 0.2], [0.5, 0.2, 2.0]];
        let b = array![1.0, -0.5, 2.0];
        let x = nnls_gram(g.view(), b.view()).unwrap();
        let grad = &b - &g.dot(&x);
        for i in 0..3 {
            assert!(x[i] >= 0.0);
            if x[i] > 0.0 {
                assert!(grad[i].abs() < 1e-9, "stationarity violated at {i}");
            } else {
                assert!(grad[i] <= 1e-9, "dual feasibility violated at {i}");
            }
        }
    }

    #[test]
    fn all_negative_rhs_gives_zero() {
        let g = array![[1.0, 0.2], [0.2, 1.0]];
        let b = array![-1.0, -3.0];
        let x = nnls_gram(g.view(), b.view()).unwrap();
        assert_eq!(x, array![0.0, 0.0]);
    }

    #[test]
    fn zero_column_never_enters() {
        // Second variable has no signal at all.
        let g = array![[1.0, 0.0], [0.0, 0.0]];
        let b = array![2.0, 0.0];
        let x = nnls_gram(g.view(), b.view()).unwrap();
        assert!(approx_eq(x[0], 2.0, 1e-12));
        assert_eq!(x[1], 0.0);
    }

    #[test]
    fn dimension_mismatch_is_error() {
        let g = array![[1.0, 0.0], [0.0, 1.0]];
        let b = array![1.0, 2.0, 3.0];
        assert!(matches!(
            nnls_gram(g.view(), b.view()).unwrap_err(),
            NnlsError::DimensionMismatch { .. }
        ));
    }

    #[test]
    fn non_finite_input_is_error() {
        let g = array![[1.0, 0.0], [0.0, f64::INFINITY]];
        let b = array![1.0, 2.0];
        assert_eq!(nnls_gram(g.view(), b.view()).unwrap_err(), NnlsError::NonFinite);
    }

    #[test]
    fn duplicate_columns_resolve_with_one_passive_variable() {
        // Identical columns: once the first enters and solves exactly, the
        // second has zero gradient and never joins the passive set.
        let g = array![[1.0, 1.0], [1.0, 1.0]];
        let b = array![1.0, 1.0];
        let x = nnls_gram(g.view(), b.view()).unwrap();
        assert!(approx_eq(x[0] + x[1], 1.0, 1e-12));
    }
}
