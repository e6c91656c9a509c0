//! Minimum-cost bipartite assignment (Hungarian method).
//!
//! Used to align the components of two factor matrices before comparing
//! them: CP components come back in arbitrary order, so columns must be
//! matched one-to-one before a similarity score means anything.
//!
//! Implementation is the O(n³) shortest-augmenting-path form with row and
//! column potentials.

use ndarray::ArrayView2;
use thiserror::Error;

/// Errors from the assignment solver.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AssignmentError {
    #[error("cost matrix must be square, got {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },

    #[error("non-finite cost at ({row}, {col})")]
    NonFinite { row: usize, col: usize },
}

/// Result of a minimum-cost assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    /// `columns[i]` is the column assigned to row `i`.
    pub columns: Vec<usize>,
    /// Sum of the selected costs.
    pub total_cost: f64,
}

/// Solve the square assignment problem, minimizing total cost.
pub fn min_cost_assignment(cost: ArrayView2<f64>) -> Result<Assignment, AssignmentError> {
    let (rows, cols) = cost.dim();
    if rows != cols {
        return Err(AssignmentError::NotSquare { rows, cols });
    }
    for ((row, col), v) in cost.indexed_iter() {
        if !v.is_finite() {
            return Err(AssignmentError::NonFinite { row, col });
        }
    }

    let n = rows;
    if n == 0 {
        return Ok(Assignment {
            columns: Vec::new(),
            total_cost: 0.0,
        });
    }

    // 1-indexed potentials; index 0 is the virtual source.
    let mut u = vec![0.0_f64; n + 1];
    let mut v = vec![0.0_f64; n + 1];
    // p[j]: row matched to column j (0 = unmatched).
    let mut p = vec![0usize; n + 1];
    let mut way = vec![0usize; n + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![f64::INFINITY; n + 1];
        let mut used = vec![false; n + 1];

        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0usize;
            for j in 1..=n {
                if used[j] {
                    continue;
                }
                let reduced = cost[[i0 - 1, j - 1]] - u[i0] - v[j];
                if reduced < minv[j] {
                    minv[j] = reduced;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }
            for j in 0..=n {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }

        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut columns = vec![0usize; n];
    for j in 1..=n {
        columns[p[j] - 1] = j - 1;
    }
    let total_cost = columns
        .iter()
        .enumerate()
        .map(|(row, &col)| cost[[row, col]])
        .sum();

    Ok(Assignment {
        columns,
        total_cost,
    })
}

/// True if `perm` contains each of `0..perm.len()` exactly once.
pub fn is_permutation(perm: &[usize]) -> bool {
    let mut seen = vec![false; perm.len()];
    for &idx in perm {
        if idx >= perm.len() || seen[idx] {
            return false;
        }
        seen[idx] = true;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn brute_force_min(cost: &Array2<f64>) -> f64 {
        fn recurse(cost: &Array2<f64>, row: usize, used: &mut [bool], acc: f64, best: &mut f64) {
            let n = cost.nrows();
            if row == n {
                if acc < *best {
                    *best = acc;
                }
                return;
            }
            for col in 0..n {
                if !used[col] {
                    used[col] = true;
                    recurse(cost, row + 1, used, acc + cost[[row, col]], best);
                    used[col] = false;
                }
            }
        }
        let mut best = f64::INFINITY;
        let mut used = vec![false; cost.nrows()];
        recurse(cost, 0, &mut used, 0.0, &mut best);
        best
    }

    #[test]
    fn identity_costs_pick_diagonal() {
        let cost = array![[0.0, 1.0, 1.0], [1.0, 0.0, 1.0], [1.0, 1.0, 0.0]];
        let a = min_cost_assignment(cost.view()).unwrap();
        assert_eq!(a.columns, vec![0, 1, 2]);
        assert_eq!(a.total_cost, 0.0);
    }

    #[test]
    fn swapped_columns_are_recovered() {
        let cost = array![[1.0, 0.0], [0.0, 1.0]];
        let a = min_cost_assignment(cost.view()).unwrap();
        assert_eq!(a.columns, vec![1, 0]);
        assert_eq!(a.total_cost, 0.0);
    }

    #[test]
    fn greedy_choice_is_not_optimal() {
        // Greedy would take (0,0)=1 then (1,1)=10 for 11; optimum is 2+3=5.
        let cost = array![[1.0, 2.0], [3.0, 10.0]];
        let a = min_cost_assignment(cost.view()).unwrap();
        assert_eq!(a.columns, vec![1, 0]);
        assert!((a.total_cost - 5.0).abs() < 1e-12);
    }

    #[test]
    fn matches_brute_force_on_fixed_matrix() {
        let cost = array![
            [0.9, 0.1, 0.5, 0.7],
            [0.3, 0.8, 0.2, 0.6],
            [0.4, 0.6, 0.9, 0.05],
            [0.2, 0.7, 0.3, 0.8],
        ];
        let a = min_cost_assignment(cost.view()).unwrap();
        assert!(is_permutation(&a.columns));
        assert!((a.total_cost - brute_force_min(&cost)).abs() < 1e-12);
    }

    #[test]
    fn negative_costs_are_supported() {
        let cost = array![[-1.0, 0.0], [0.0, -1.0]];
        let a = min_cost_assignment(cost.view()).unwrap();
        assert_eq!(a.columns, vec![0, 1]);
        assert!((a.total_cost + 2.0).abs() < 1e-12);
    }

    #[test]
    fn empty_matrix_is_trivial() {
        let cost = Array2::<f64>::zeros((0, 0));
        let a = min_cost_assignment(cost.view()).unwrap();
        assert!(a.columns.is_empty());
        assert_eq!(a.total_cost, 0.0);
    }

    #[test]
    fn rectangular_is_rejected() {
        let cost = Array2::<f64>::zeros((2, 3));
        assert_eq!(
            min_cost_assignment(cost.view()).unwrap_err(),
            AssignmentError::NotSquare { rows: 2, cols: 3 }
        );
    }

    #[test]
    fn nan_is_rejected() {
        let cost = array![[0.0, f64::NAN], [1.0, 0.0]];
        assert_eq!(
            min_cost_assignment(cost.view()).unwrap_err(),
            AssignmentError::NonFinite { row: 0, col: 1 }
        );
    }

    #[test]
    fn permutation_check() {
        assert!(is_permutation(&[]));
        assert!(is_permutation(&[2, 0, 1]));
        assert!(!is_permutation(&[0, 0, 1]));
        assert!(!is_permutation(&[0, 3, 1]));
    }
}
