//! Dense linear-algebra kernels backed by `nalgebra`.
//!
//! Inputs and outputs stay in `ndarray` form; the matrices are tiny (rank ×
//! rank Gram systems, or the Gram of one mode unfolding) so the copies into
//! `DMatrix` are negligible.

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use ndarray::{Array1, ArrayView1, ArrayView2};
use std::cmp::Ordering;
use thiserror::Error;

/// Pivots smaller than this fraction of the largest entry are treated as zero.
const PIVOT_RELATIVE_EPS: f64 = 1e-13;

/// Eigenvalues below this fraction of the trace count as zero.
const EIGEN_RELATIVE_FLOOR: f64 = 1e-12;

/// Errors from dense solves.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinalgError {
    #[error("matrix is not square: {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },

    #[error("dimension mismatch: matrix has {matrix} rows, right-hand side has {rhs}")]
    DimensionMismatch { matrix: usize, rhs: usize },

    #[error("matrix is singular (pivot {pivot:e} at column {column})")]
    Singular { column: usize, pivot: f64 },

    #[error("non-finite entry in input")]
    NonFinite,
}

fn to_dmatrix(a: ArrayView2<f64>) -> DMatrix<f64> {
    let (rows, cols) = a.dim();
    DMatrix::from_fn(rows, cols, |i, j| a[[i, j]])
}

fn check_square(a: ArrayView2<f64>) -> Result<usize, LinalgError> {
    let (rows, cols) = a.dim();
    if rows != cols {
        return Err(LinalgError::NotSquare { rows, cols });
    }
    Ok(rows)
}

/// Solve `a · x = b` through an LU factorization with partial pivoting.
///
/// A pivot below `PIVOT_RELATIVE_EPS` times the largest entry of `a` is
/// reported as [`LinalgError::Singular`].
pub fn solve(a: ArrayView2<f64>, b: ArrayView1<f64>) -> Result<Array1<f64>, LinalgError> {
    let n = check_square(a)?;
    if b.len() != n {
        return Err(LinalgError::DimensionMismatch {
            matrix: n,
            rhs: b.len(),
        });
    }
    if a.iter().chain(b.iter()).any(|v| !v.is_finite()) {
        return Err(LinalgError::NonFinite);
    }

    let scale = a
        .iter()
        .fold(0.0_f64, |acc, v| acc.max(v.abs()))
        .max(f64::MIN_POSITIVE);
    let lu = to_dmatrix(a).lu();
    let upper = lu.u();
    for column in 0..n {
        let pivot = upper[(column, column)].abs();
        if pivot <= PIVOT_RELATIVE_EPS * scale {
            return Err(LinalgError::Singular { column, pivot });
        }
    }

    let rhs = DVector::from_iterator(n, b.iter().copied());
    let x = lu.solve(&rhs).ok_or(LinalgError::Singular {
        column: n.saturating_sub(1),
        pivot: 0.0,
    })?;
    Ok(Array1::from_iter(x.iter().copied()))
}

/// Leading eigenpairs of a symmetric positive semi-definite matrix.
///
/// Returns at most `k` pairs in descending eigenvalue order. The numerically
/// zero tail of the spectrum is dropped, so fewer than `k` pairs may come
/// back.
pub fn top_eigenpairs(
    sym: ArrayView2<f64>,
    k: usize,
) -> Result<Vec<(f64, Array1<f64>)>, LinalgError> {
    let n = check_square(sym)?;
    if sym.iter().any(|v| !v.is_finite()) {
        return Err(LinalgError::NonFinite);
    }
    if n == 0 || k == 0 {
        return Ok(Vec::new());
    }

    let trace: f64 = (0..n).map(|i| sym[[i, i]].abs()).sum();
    let floor = trace.max(f64::MIN_POSITIVE) * EIGEN_RELATIVE_FLOOR;

    let eigen = SymmetricEigen::new(to_dmatrix(sym));
    let mut order: Vec<(usize, f64)> = eigen.eigenvalues.iter().copied().enumerate().collect();
    order.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then(a.0.cmp(&b.0)));

    Ok(order
        .into_iter()
        .take(k)
        .take_while(|&(_, value)| value > floor)
        .map(|(idx, value)| {
            let vector = Array1::from_iter(eigen.eigenvectors.column(idx).iter().copied());
            (value, vector)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn solve_identity() {
        let a = array![[1.0, 0.0], [0.0, 1.0]];
        let b = array![3.0, -2.0];
        let x = solve(a.view(), b.view()).unwrap();
        assert!(approx_eq(x[0], 3.0, 1e-12));
        assert!(approx_eq(x[1], -2.0, 1e-12));
    }

    #[test]
    fn solve_requires_pivoting() {
        let a = array![[0.0, 2.0], [3.0, 1.0]];
        let b = array![4.0, 5.0];
        let x = solve(a.view(), b.view()).unwrap();
        // 3x + y = 5, 2y = 4 -> y = 2, x = 1
        assert!(approx_eq(x[0], 1.0, 1e-12));
        assert!(approx_eq(x[1], 2.0, 1e-12));
    }

    #[test]
    fn solve_singular_is_error() {
        let a = array![[1.0, 2.0], [2.0, 4.0]];
        let b = array![1.0, 2.0];
        let err = solve(a.view(), b.view()).unwrap_err();
        assert!(matches!(err, LinalgError::Singular { .. }));
    }

    #[test]
    fn solve_rejects_nan() {
        let a = array![[1.0, f64::NAN], [0.0, 1.0]];
        let b = array![1.0, 2.0];
        assert_eq!(solve(a.view(), b.view()).unwrap_err(), LinalgError::NonFinite);
    }

    #[test]
    fn solve_rejects_shape_mismatch() {
        let a = array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let b = array![1.0, 2.0];
        assert!(matches!(
            solve(a.view(), b.view()).unwrap_err(),
            LinalgError::NotSquare { rows: 2, cols: 3 }
        ));
    }

    #[test]
    fn eigenpairs_of_diagonal() {
        let a = array![[1.0, 0.0, 0.0], [0.0, 5.0, 0.0], [0.0, 0.0, 3.0]];
        let pairs = top_eigenpairs(a.view(), 2).unwrap();
        assert_eq!(pairs.len(), 2);
        assert!(approx_eq(pairs[0].0, 5.0, 1e-8));
        assert!(approx_eq(pairs[1].0, 3.0, 1e-8));
        assert!(approx_eq(pairs[0].1[1].abs(), 1.0, 1e-6));
        assert!(approx_eq(pairs[1].1[2].abs(), 1.0, 1e-6));
    }

    #[test]
    fn eigenpairs_are_unit_and_orthogonal() {
        let a = array![[4.0, 1.0, 0.5], [1.0, 3.0, 0.2], [0.5, 0.2, 2.0]];
        let pairs = top_eigenpairs(a.view(), 3).unwrap();
        assert_eq!(pairs.len(), 3);
        assert!(pairs[0].0 >= pairs[1].0 && pairs[1].0 >= pairs[2].0);
        for (value, v) in &pairs {
            assert!(approx_eq(v.dot(v), 1.0, 1e-10));
            let av = a.dot(v);
            for i in 0..3 {
                assert!(approx_eq(av[i], value * v[i], 1e-9));
            }
        }
        assert!(approx_eq(pairs[0].1.dot(&pairs[1].1), 0.0, 1e-10));
    }

    #[test]
    fn solve_gram_system() {
        let a = array![[4.0, 2.0, 0.6], [2.0, 5.0, 1.0], [0.6, 1.0, 3.0]];
        let expected = array![1.0, -0.5, 2.0];
        let b = a.dot(&expected);
        let x = solve(a.view(), b.view()).unwrap();
        for i in 0..3 {
            assert!(approx_eq(x[i], expected[i], 1e-12));
        }
    }

    #[test]
    fn eigenpairs_stop_on_rank_deficiency() {
        // Rank-one matrix: only one non-zero eigenvalue.
        let a = array![[1.0, 1.0], [1.0, 1.0]];
        let pairs = top_eigenpairs(a.view(), 2).unwrap();
        assert_eq!(pairs.len(), 1);
        assert!(approx_eq(pairs[0].0, 2.0, 1e-8));
    }
}
