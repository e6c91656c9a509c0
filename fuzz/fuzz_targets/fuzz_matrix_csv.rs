//! Fuzz target for daily matrix CSV parsing.
//!
//! Any input must yield a matrix or an error, and an accepted matrix must
//! be non-negative with one label per row and column.

#![no_main]

use dt_core::source::parse_matrix_csv;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(matrix) = parse_matrix_csv(text) {
        let (rows, cols) = matrix.shape();
        assert_eq!(rows, matrix.devices.len());
        assert_eq!(cols, matrix.categories.len());
        assert!(matrix.values.iter().all(|v| v.is_finite() && *v >= 0.0));
    }
});
