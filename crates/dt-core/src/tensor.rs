//! Device × category × time tensors and their assembly from daily matrices.

use ndarray::{Array2, Array3, ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

use crate::logging::event_names;
use crate::source::{
    read_matrix_file, scan_matrix_dir, AggregationMatrix, SkipReason, SkippedInput, SourceError,
};

/// Tensor modes, in axis order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Axis 0, factor A.
    Device,
    /// Axis 1, factor B.
    Category,
    /// Axis 2, factor C.
    Time,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Device, Mode::Category, Mode::Time];

    pub fn axis(self) -> usize {
        match self {
            Mode::Device => 0,
            Mode::Category => 1,
            Mode::Time => 2,
        }
    }

    /// Conventional factor letter.
    pub fn factor_name(self) -> &'static str {
        match self {
            Mode::Device => "A",
            Mode::Category => "B",
            Mode::Time => "C",
        }
    }

    /// Axis permutation that moves this mode first and keeps the others in order.
    pub(crate) fn leading_permutation(self) -> [usize; 3] {
        match self {
            Mode::Device => [0, 1, 2],
            Mode::Category => [1, 0, 2],
            Mode::Time => [2, 0, 1],
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Mode::Device => "device",
            Mode::Category => "category",
            Mode::Time => "time",
        };
        f.write_str(s)
    }
}

/// A labelled non-negative (devices × categories × time) tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceTensor {
    pub devices: Vec<String>,
    pub categories: Vec<String>,
    /// One label per time step (dates for assembled layers).
    pub times: Vec<String>,
    pub data: Array3<f64>,
}

impl DeviceTensor {
    /// Wrap raw data with generated labels (`d0..`, `c0..`, `t0..`).
    pub fn from_array(data: Array3<f64>) -> Self {
        let (n, m, t) = data.dim();
        DeviceTensor {
            devices: (0..n).map(|i| format!("d{i}")).collect(),
            categories: (0..m).map(|j| format!("c{j}")).collect(),
            times: (0..t).map(|k| format!("t{k}")).collect(),
            data,
        }
    }

    /// (N, M, T).
    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn dim(&self, mode: Mode) -> usize {
        self.data.len_of(Axis(mode.axis()))
    }

    /// Frobenius norm.
    pub fn norm(&self) -> f64 {
        frobenius_norm(&self.data.view())
    }

    /// Summary used by `inspect`.
    pub fn report(&self) -> TensorReport {
        let (n, m, t) = self.shape();
        let mut negative = 0;
        let mut non_finite = 0;
        let mut nonzero = 0;
        let mut total = 0.0;
        for &v in self.data.iter() {
            if !v.is_finite() {
                non_finite += 1;
                continue;
            }
            if v < 0.0 {
                negative += 1;
            }
            if v != 0.0 {
                nonzero += 1;
            }
            total += v;
        }
        TensorReport {
            shape: [n, m, t],
            total,
            nonzero,
            negative,
            non_finite,
            frobenius_norm: self.norm(),
            device_category_totals: self.data.sum_axis(Axis(2)),
            first_slice: (t > 0).then(|| self.data.index_axis(Axis(2), 0).to_owned()),
            first_time: self.times.first().cloned(),
        }
    }
}

/// Sanity-check summary of a tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorReport {
    pub shape: [usize; 3],
    /// Sum of all finite entries.
    pub total: f64,
    pub nonzero: usize,
    pub negative: usize,
    pub non_finite: usize,
    pub frobenius_norm: f64,
    /// Per (device, category) totals summed over time.
    pub device_category_totals: Array2<f64>,
    /// The first time slice, for spot checks against the source file.
    pub first_slice: Option<Array2<f64>>,
    pub first_time: Option<String>,
}

pub fn frobenius_norm(x: &ArrayView3<f64>) -> f64 {
    x.iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// Mode-`mode` unfolding: rows are indices along `mode`, columns run over
/// the remaining two axes in order.
pub fn unfold(x: &ArrayView3<f64>, mode: Mode) -> Array2<f64> {
    let permuted = x.view().permuted_axes(mode.leading_permutation());
    let (rows, q, s) = permuted.dim();
    Array2::from_shape_fn((rows, q * s), |(p, col)| permuted[[p, col / s, col % s]])
}

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("no usable matrices ({skipped} skipped)")]
    NoUsableInput { skipped: usize },

    #[error(transparent)]
    Source(#[from] SourceError),
}

impl From<AssemblyError> for dt_common::Error {
    fn from(err: AssemblyError) -> Self {
        match err {
            AssemblyError::NoUsableInput { .. } => dt_common::Error::NoUsableInput(err.to_string()),
            AssemblyError::Source(e) => e.into(),
        }
    }
}

/// Assembled tensor plus an account of everything left out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyReport {
    pub tensor: DeviceTensor,
    pub accepted: usize,
    pub skipped: Vec<SkippedInput>,
    /// Non-numeric cells read as 0 across accepted matrices.
    pub coerced_cells: usize,
}

/// Stack ordered `(time label, matrix)` pairs along a new trailing axis.
///
/// The expected (devices, categories) shape comes from `expected` when
/// given, else from the first matrix. Matrices of any other shape are
/// skipped and reported. Device and category labels come from the first
/// accepted matrix.
pub fn assemble(
    matrices: Vec<(String, AggregationMatrix)>,
    expected: Option<(usize, usize)>,
) -> Result<AssemblyReport, AssemblyError> {
    assemble_with_skips(matrices, expected, Vec::new())
}

fn assemble_with_skips(
    matrices: Vec<(String, AggregationMatrix)>,
    expected: Option<(usize, usize)>,
    mut skipped: Vec<SkippedInput>,
) -> Result<AssemblyReport, AssemblyError> {
    let expected = expected.or_else(|| matrices.first().map(|(_, m)| m.shape()));
    let mut accepted: Vec<(String, AggregationMatrix)> = Vec::with_capacity(matrices.len());

    for (label, matrix) in matrices {
        let actual = matrix.shape();
        match expected {
            Some(shape) if shape != actual => {
                warn!(
                    target: event_names::ASSEMBLE_SKIPPED,
                    input = %label,
                    expected = ?shape,
                    actual = ?actual,
                    "skipping matrix with mismatched shape"
                );
                skipped.push(SkippedInput {
                    name: label,
                    reason: SkipReason::ShapeMismatch {
                        expected: shape,
                        actual,
                    },
                });
            }
            _ => accepted.push((label, matrix)),
        }
    }

    let Some((n, m)) = expected.filter(|_| !accepted.is_empty()) else {
        return Err(AssemblyError::NoUsableInput {
            skipped: skipped.len(),
        });
    };

    let t = accepted.len();
    let mut data = Array3::<f64>::zeros((n, m, t));
    let mut times = Vec::with_capacity(t);
    let mut coerced_cells = 0;
    for (k, (label, matrix)) in accepted.iter().enumerate() {
        data.index_axis_mut(Axis(2), k).assign(&matrix.values);
        times.push(label.clone());
        coerced_cells += matrix.coerced_cells;
    }
    let (devices, categories) = accepted
        .into_iter()
        .next()
        .map(|(_, first)| (first.devices, first.categories))
        .unwrap_or_default();

    if coerced_cells > 0 {
        warn!(
            target: event_names::ASSEMBLE_COERCED,
            cells = coerced_cells as u64,
            "non-numeric cells were read as 0"
        );
    }
    info!(
        target: event_names::ASSEMBLE_FINISHED,
        devices = n as u64,
        categories = m as u64,
        steps = t as u64,
        skipped = skipped.len() as u64,
        "tensor assembled"
    );

    Ok(AssemblyReport {
        tensor: DeviceTensor {
            devices,
            categories,
            times,
            data,
        },
        accepted: t,
        skipped,
        coerced_cells,
    })
}

/// Assemble a layer directory of `YYYY-MM-DD.csv` files.
///
/// Unrecognized names and unreadable files are skipped and reported; only a
/// missing directory or an empty result is an error.
pub fn assemble_dir(
    dir: &Path,
    expected: Option<(usize, usize)>,
) -> Result<AssemblyReport, AssemblyError> {
    let scan = scan_matrix_dir(dir)?;
    let mut skipped = scan.skipped;
    for s in &skipped {
        warn!(target: event_names::ASSEMBLE_SKIPPED, input = %s.name, "skipping file: {}", s.reason);
    }

    let mut matrices = Vec::with_capacity(scan.files.len());
    for file in scan.files {
        let label = file.date.format("%Y-%m-%d").to_string();
        match read_matrix_file(&file.path) {
            Ok(matrix) => matrices.push((label, matrix)),
            Err(e) => {
                warn!(target: event_names::ASSEMBLE_SKIPPED, input = %label, error = %e, "skipping unreadable matrix");
                skipped.push(SkippedInput {
                    name: label,
                    reason: SkipReason::Unreadable {
                        message: e.to_string(),
                    },
                });
            }
        }
    }
    assemble_with_skips(matrices, expected, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn matrix(n: usize, m: usize, fill: f64) -> AggregationMatrix {
        AggregationMatrix::from_values(Array2::from_elem((n, m), fill))
    }

    #[test]
    fn test_mismatched_matrix_is_skipped() {
        let inputs = vec![
            ("2024-01-01".to_string(), matrix(3, 2, 1.0)),
            ("2024-01-02".to_string(), matrix(3, 2, 2.0)),
            ("2024-01-03".to_string(), matrix(4, 2, 9.0)),
            ("2024-01-04".to_string(), matrix(3, 2, 3.0)),
        ];
        let report = assemble(inputs, None).unwrap();
        assert_eq!(report.tensor.shape(), (3, 2, 3));
        assert_eq!(report.accepted, 3);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].name, "2024-01-03");
        assert_eq!(
            report.skipped[0].reason,
            SkipReason::ShapeMismatch {
                expected: (3, 2),
                actual: (4, 2)
            }
        );
        assert_eq!(report.tensor.times, vec!["2024-01-01", "2024-01-02", "2024-01-04"]);
        assert_eq!(report.tensor.data[[0, 0, 2]], 3.0);
    }

    #[test]
    fn test_expected_shape_overrides_first_matrix() {
        let inputs = vec![
            ("a".to_string(), matrix(4, 2, 1.0)),
            ("b".to_string(), matrix(3, 2, 1.0)),
        ];
        let report = assemble(inputs, Some((3, 2))).unwrap();
        assert_eq!(report.tensor.shape(), (3, 2, 1));
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].name, "a");
    }

    #[test]
    fn test_nothing_usable_is_error() {
        let err = assemble(Vec::new(), None).unwrap_err();
        assert!(matches!(err, AssemblyError::NoUsableInput { skipped: 0 }));

        let inputs = vec![("a".to_string(), matrix(4, 2, 1.0))];
        let err = assemble(inputs, Some((3, 2))).unwrap_err();
        assert!(matches!(err, AssemblyError::NoUsableInput { skipped: 1 }));
        assert_eq!(dt_common::Error::from(err).code(), 22);
    }

    #[test]
    fn test_time_order_is_input_order() {
        let inputs = vec![
            ("x".to_string(), AggregationMatrix::from_values(array![[1.0]])),
            ("y".to_string(), AggregationMatrix::from_values(array![[2.0]])),
        ];
        let report = assemble(inputs, None).unwrap();
        assert_eq!(report.tensor.data[[0, 0, 0]], 1.0);
        assert_eq!(report.tensor.data[[0, 0, 1]], 2.0);
    }

    #[test]
    fn test_unfold_shapes_and_entries() {
        let data = Array3::from_shape_fn((2, 3, 4), |(i, j, k)| (100 * i + 10 * j + k) as f64);
        let x = data.view();

        let a = unfold(&x, Mode::Device);
        assert_eq!(a.dim(), (2, 12));
        assert_eq!(a[[1, 4 + 3]], 113.0);

        let b = unfold(&x, Mode::Category);
        assert_eq!(b.dim(), (3, 8));
        assert_eq!(b[[2, 4 + 1]], 121.0);

        let c = unfold(&x, Mode::Time);
        assert_eq!(c.dim(), (4, 6));
        assert_eq!(c[[3, 3 + 2]], 123.0);
    }

    #[test]
    fn test_report_counts() {
        let mut data = Array3::<f64>::zeros((2, 2, 2));
        data[[0, 0, 0]] = 3.0;
        data[[1, 1, 1]] = 4.0;
        let tensor = DeviceTensor::from_array(data);
        let report = tensor.report();
        assert_eq!(report.shape, [2, 2, 2]);
        assert_eq!(report.total, 7.0);
        assert_eq!(report.nonzero, 2);
        assert_eq!(report.negative, 0);
        assert!((report.frobenius_norm - 5.0).abs() < 1e-12);
        assert_eq!(report.device_category_totals[[1, 1]], 4.0);
        assert_eq!(report.first_slice.unwrap()[[0, 0]], 3.0);
        assert_eq!(report.first_time.as_deref(), Some("t0"));
    }

    #[test]
    fn test_assemble_dir_reports_every_skip() {
        let dir = tempfile::TempDir::new().unwrap();
        let ok = "id,a,b\nd0,1,2\nd1,3,4\n";
        std::fs::write(dir.path().join("2024-05-01.csv"), ok).unwrap();
        std::fs::write(dir.path().join("2024-05-02.csv"), "id,a,b\nd0,1\n").unwrap();
        std::fs::write(dir.path().join("2024-05-03.csv"), "id,a\nd0,1\n").unwrap();
        std::fs::write(dir.path().join("2024-05-04.csv"), ok).unwrap();
        std::fs::write(dir.path().join("latest.csv"), ok).unwrap();

        let report = assemble_dir(dir.path(), None).unwrap();
        assert_eq!(report.tensor.shape(), (2, 2, 2));
        assert_eq!(report.tensor.times, vec!["2024-05-01", "2024-05-04"]);
        assert_eq!(report.tensor.devices, vec!["d0", "d1"]);
        assert_eq!(report.skipped.len(), 3);
        let kinds: Vec<&SkipReason> = report.skipped.iter().map(|s| &s.reason).collect();
        assert!(kinds.contains(&&SkipReason::UnrecognizedName));
        assert!(kinds.iter().any(|r| matches!(r, SkipReason::Unreadable { .. })));
        assert!(kinds.iter().any(|r| matches!(r, SkipReason::ShapeMismatch { .. })));
    }
}
