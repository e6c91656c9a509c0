//! Daily aggregation matrices on disk.
//!
//! A layer directory holds one CSV per day, named `YYYY-MM-DD.csv`:
//!
//! ```text
//! device,gateway,external,local,broadcast,multicast
//! aa:bb:cc:00:00:01,120,4031,0,12,3
//! aa:bb:cc:00:00:02,0,88,7,0,0
//! ```
//!
//! The first column is the device identifier; the header names the
//! destination categories. Every file in a layer shares the same row and
//! column ordering.

use chrono::NaiveDate;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reading a single matrix file or listing a layer directory.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("matrix has no header row")]
    MissingHeader,

    #[error("header has no category columns")]
    NoCategories,

    #[error("line {line}: expected {expected} cells, found {actual}")]
    RaggedRow {
        line: usize,
        expected: usize,
        actual: usize,
    },

    #[error("line {line}, column '{column}': negative value {value}")]
    NegativeValue {
        line: usize,
        column: String,
        value: f64,
    },

    #[error("matrix has no device rows")]
    NoRows,
}

impl From<SourceError> for dt_common::Error {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Io { path, source } => dt_common::Error::Io(std::io::Error::new(
                source.kind(),
                format!("{}: {}", path.display(), source),
            )),
            other => dt_common::Error::InputValidation(other.to_string()),
        }
    }
}

/// One day's device × category matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationMatrix {
    pub devices: Vec<String>,
    pub categories: Vec<String>,
    pub values: Array2<f64>,
    /// Cells that were not numeric and were read as 0.
    pub coerced_cells: usize,
}

impl AggregationMatrix {
    /// Build from raw values with generated labels (`d0..`, `c0..`).
    pub fn from_values(values: Array2<f64>) -> Self {
        let (n, m) = values.dim();
        AggregationMatrix {
            devices: (0..n).map(|i| format!("d{i}")).collect(),
            categories: (0..m).map(|j| format!("c{j}")).collect(),
            values,
            coerced_cells: 0,
        }
    }

    /// (devices, categories).
    pub fn shape(&self) -> (usize, usize) {
        self.values.dim()
    }
}

/// Why an input file did not make it into the tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// Name is not `YYYY-MM-DD.csv` with a real calendar date.
    UnrecognizedName,
    /// Could not be read or parsed.
    Unreadable { message: String },
    /// Parsed, but the shape disagrees with the layer's shape.
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::UnrecognizedName => write!(f, "name is not YYYY-MM-DD.csv"),
            SkipReason::Unreadable { message } => write!(f, "unreadable: {message}"),
            SkipReason::ShapeMismatch { expected, actual } => write!(
                f,
                "shape {}x{} does not match expected {}x{}",
                actual.0, actual.1, expected.0, expected.1
            ),
        }
    }
}

/// A skipped input, by file name or caller-supplied label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedInput {
    pub name: String,
    pub reason: SkipReason,
}

/// A recognized daily matrix file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixFile {
    pub date: NaiveDate,
    pub path: PathBuf,
}

/// Result of listing a layer directory.
#[derive(Debug, Clone, Default)]
pub struct DirScan {
    /// Recognized files, ascending by date.
    pub files: Vec<MatrixFile>,
    /// CSV files whose names were not recognized.
    pub skipped: Vec<SkippedInput>,
}

/// Parse `YYYY-MM-DD.csv` into its date.
pub fn parse_matrix_file_name(name: &str) -> Option<NaiveDate> {
    let stem = name.strip_suffix(".csv")?;
    let well_formed = stem.len() == 10
        && stem.char_indices().all(|(i, c)| match i {
            4 | 7 => c == '-',
            _ => c.is_ascii_digit(),
        });
    if !well_formed {
        return None;
    }
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}

/// List the `*.csv` files of a layer directory in date order.
///
/// Files with other extensions are ignored; CSV files with unrecognized
/// names are reported in `skipped`.
pub fn scan_matrix_dir(dir: &Path) -> Result<DirScan, SourceError> {
    let io_err = |source| SourceError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut scan = DirScan::default();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".csv") {
            continue;
        }
        match parse_matrix_file_name(&name) {
            Some(date) => scan.files.push(MatrixFile { date, path }),
            None => scan.skipped.push(SkippedInput {
                name,
                reason: SkipReason::UnrecognizedName,
            }),
        }
    }
    scan.files.sort_by(|a, b| a.date.cmp(&b.date));
    scan.skipped.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(scan)
}

/// Read and parse one matrix file.
pub fn read_matrix_file(path: &Path) -> Result<AggregationMatrix, SourceError> {
    let content = fs::read_to_string(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_matrix_csv(&content)
}

fn split_cells(line: &str) -> Vec<&str> {
    line.split(',')
        .map(|cell| {
            let cell = cell.trim();
            cell.strip_prefix('"')
                .and_then(|c| c.strip_suffix('"'))
                .unwrap_or(cell)
        })
        .collect()
}

/// Parse matrix CSV content.
///
/// Non-numeric cells (including empty ones, NaN and infinities) count as 0
/// and are tallied in `coerced_cells`. Negative numbers are rejected.
pub fn parse_matrix_csv(content: &str) -> Result<AggregationMatrix, SourceError> {
    let mut lines = content
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim_end_matches('\r')))
        .filter(|(_, l)| !l.trim().is_empty());

    let (_, header) = lines.next().ok_or(SourceError::MissingHeader)?;
    let header = split_cells(header);
    let categories: Vec<String> = header.iter().skip(1).map(|c| c.to_string()).collect();
    if categories.is_empty() {
        return Err(SourceError::NoCategories);
    }
    let width = header.len();

    let mut devices = Vec::new();
    let mut flat = Vec::new();
    let mut coerced_cells = 0;
    for (line_no, line) in lines {
        let cells = split_cells(line);
        if cells.len() != width {
            return Err(SourceError::RaggedRow {
                line: line_no,
                expected: width,
                actual: cells.len(),
            });
        }
        devices.push(cells[0].to_string());
        for (j, cell) in cells[1..].iter().enumerate() {
            match cell.parse::<f64>() {
                Ok(v) if v.is_finite() && v >= 0.0 => flat.push(v),
                Ok(v) if v < 0.0 => {
                    return Err(SourceError::NegativeValue {
                        line: line_no,
                        column: categories[j].clone(),
                        value: v,
                    })
                }
                _ => {
                    coerced_cells += 1;
                    flat.push(0.0);
                }
            }
        }
    }
    if devices.is_empty() {
        return Err(SourceError::NoRows);
    }

    let values = Array2::from_shape_vec((devices.len(), categories.len()), flat)
        .map_err(|_| SourceError::NoRows)?;
    Ok(AggregationMatrix {
        devices,
        categories,
        values,
        coerced_cells,
    })
}
