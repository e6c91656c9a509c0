//! Initial factor matrices.

use dt_config::InitScheme;
use dt_math::top_eigenpairs;
use ndarray::{Array2, ArrayView3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::DecomposeError;
use crate::tensor::{unfold, Mode};

/// Factors A, B, C (in mode order) before the first sweep.
pub(crate) fn initial_factors(
    x: &ArrayView3<f64>,
    rank: usize,
    scheme: InitScheme,
    seed: u64,
) -> Result<[Array2<f64>; 3], DecomposeError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let (n, m, t) = x.dim();
    match scheme {
        InitScheme::Random => Ok([
            random_factor(&mut rng, n, rank),
            random_factor(&mut rng, m, rank),
            random_factor(&mut rng, t, rank),
        ]),
        InitScheme::Svd => Ok([
            eigen_factor(x, Mode::Device, rank, &mut rng)?,
            eigen_factor(x, Mode::Category, rank, &mut rng)?,
            eigen_factor(x, Mode::Time, rank, &mut rng)?,
        ]),
    }
}

fn random_factor(rng: &mut StdRng, rows: usize, rank: usize) -> Array2<f64> {
    Array2::from_shape_simple_fn((rows, rank), || rng.random::<f64>())
}

/// Absolute leading eigenvectors of the unfolding's Gram matrix, i.e. the
/// absolute left singular vectors of the unfolding. Columns the spectrum
/// cannot supply (rank above the mode dimension, or a numerically zero tail)
/// are drawn from `rng`.
fn eigen_factor(
    x: &ArrayView3<f64>,
    mode: Mode,
    rank: usize,
    rng: &mut StdRng,
) -> Result<Array2<f64>, DecomposeError> {
    let unfolded = unfold(x, mode);
    let gram = unfolded.dot(&unfolded.t());
    let pairs = top_eigenpairs(gram.view(), rank)?;

    let mut factor = random_factor(rng, unfolded.nrows(), rank);
    for (col, (_, vector)) in pairs.iter().enumerate() {
        if vector.iter().any(|v| *v != 0.0) {
            factor.column_mut(col).assign(&vector.mapv(f64::abs));
        }
    }
    Ok(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn sample() -> Array3<f64> {
        Array3::from_shape_fn((4, 3, 5), |(i, j, k)| ((i + 1) * (j + 2) + k) as f64)
    }

    #[test]
    fn test_random_init_is_seeded() {
        let x = sample();
        let a = initial_factors(&x.view(), 3, InitScheme::Random, 7).unwrap();
        let b = initial_factors(&x.view(), 3, InitScheme::Random, 7).unwrap();
        let c = initial_factors(&x.view(), 3, InitScheme::Random, 8).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a[0].dim(), (4, 3));
        assert_eq!(a[1].dim(), (3, 3));
        assert_eq!(a[2].dim(), (5, 3));
        assert!(a.iter().all(|f| f.iter().all(|v| (0.0..1.0).contains(v))));
    }

    #[test]
    fn test_svd_init_is_nonnegative_and_fills_extra_columns() {
        let x = sample();
        // Rank 4 exceeds the category dimension (3).
        let f = initial_factors(&x.view(), 4, InitScheme::Svd, 1).unwrap();
        assert_eq!(f[1].dim(), (3, 4));
        for factor in &f {
            assert!(factor.iter().all(|v| *v >= 0.0 && v.is_finite()));
            for col in factor.columns() {
                assert!(col.iter().any(|v| *v > 0.0));
            }
        }
    }

    #[test]
    fn test_svd_leading_column_is_unit_norm() {
        let x = sample();
        let f = initial_factors(&x.view(), 2, InitScheme::Svd, 1).unwrap();
        let norm = f[0].column(0).iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }
}
