//! Device tensor math utilities.

pub mod math;

pub use math::assignment::{is_permutation, min_cost_assignment, Assignment, AssignmentError};
pub use math::linalg::{solve, top_eigenpairs, LinalgError};
pub use math::nnls::{nnls_gram, NnlsError};
pub use math::similarity::{column_cosine_matrix, cosine};
pub use math::stats::{summarize, SummaryStats};
