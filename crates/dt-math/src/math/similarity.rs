//! Cosine similarity between vectors and between factor-matrix columns.

use ndarray::{Array2, ArrayView1, ArrayView2};

/// Cosine of the angle between `a` and `b`.
///
/// Returns 0.0 when either vector has zero norm or the lengths differ.
pub fn cosine(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let na = a.dot(&a).sqrt();
    let nb = b.dot(&b).sqrt();
    if na == 0.0 || nb == 0.0 || !na.is_finite() || !nb.is_finite() {
        return 0.0;
    }
    a.dot(&b) / (na * nb)
}

/// Pairwise cosine similarity of the columns of `a` against the columns of `b`.
///
/// Entry `(i, j)` is `cosine(a[:, i], b[:, j])`. Returns `None` when the two
/// matrices do not have the same shape.
pub fn column_cosine_matrix(a: ArrayView2<f64>, b: ArrayView2<f64>) -> Option<Array2<f64>> {
    if a.dim() != b.dim() {
        return None;
    }
    let r = a.ncols();
    Some(Array2::from_shape_fn((r, r), |(i, j)| {
        cosine(a.column(i), b.column(j))
    }))
}
