//! Matching components across runs.
//!
//! CP components come back in arbitrary order, so two runs are compared by
//! first finding the one-to-one column correspondence that maximizes total
//! cosine similarity (minimum-cost assignment on `1 - cos`), then averaging
//! the matched similarities.

use dt_math::{column_cosine_matrix, min_cost_assignment};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::cp::CpModel;
use crate::logging::event_names;
use crate::tensor::Mode;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompareError {
    #[error("need at least two runs to compare, found {found}")]
    TooFewRuns { found: usize },
}

impl From<CompareError> for dt_common::Error {
    fn from(err: CompareError) -> Self {
        dt_common::Error::InputValidation(err.to_string())
    }
}

/// Column matching between two factor matrices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// `permutation[i]` is the column of the second matrix matched to
    /// column `i` of the first. Empty on shape mismatch.
    pub permutation: Vec<usize>,
    /// Cosine similarity of each matched pair, indexed like `permutation`.
    pub similarities: Vec<f64>,
    pub average: f64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub shape_mismatch: bool,
}

impl MatchResult {
    fn mismatch() -> Self {
        MatchResult {
            permutation: Vec::new(),
            similarities: Vec::new(),
            average: 0.0,
            shape_mismatch: true,
        }
    }
}

/// Optimally match the columns of `b` to the columns of `a`.
///
/// Matrices of different shape are reported as zero similarity with an empty
/// matching and a warning.
pub fn match_factors(a: ArrayView2<f64>, b: ArrayView2<f64>) -> MatchResult {
    let Some(sim) = column_cosine_matrix(a, b) else {
        warn!(
            target: event_names::COMPARE_SHAPE_MISMATCH,
            left = ?a.dim(),
            right = ?b.dim(),
            "factor shapes differ; reporting zero similarity"
        );
        return MatchResult::mismatch();
    };
    let r = sim.nrows();
    if r == 0 {
        return MatchResult {
            permutation: Vec::new(),
            similarities: Vec::new(),
            average: 0.0,
            shape_mismatch: false,
        };
    }

    let cost = sim.mapv(|s| 1.0 - s);
    let assignment = match min_cost_assignment(cost.view()) {
        Ok(a) => a,
        // Only reachable with non-finite entries in a factor.
        Err(e) => {
            warn!(
                target: event_names::COMPARE_SHAPE_MISMATCH,
                reason = %e,
                "assignment failed; reporting zero similarity"
            );
            return MatchResult::mismatch();
        }
    };

    let similarities: Vec<f64> = assignment
        .columns
        .iter()
        .enumerate()
        .map(|(i, &j)| sim[[i, j]])
        .collect();
    let average = similarities.iter().sum::<f64>() / r as f64;
    MatchResult {
        permutation: assignment.columns,
        similarities,
        average,
        shape_mismatch: false,
    }
}

/// Matches for the three factor modes of one pair of runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairComparison {
    pub run_a: u32,
    pub run_b: u32,
    pub device: MatchResult,
    pub category: MatchResult,
    pub time: MatchResult,
}

impl PairComparison {
    pub fn get(&self, mode: Mode) -> &MatchResult {
        match mode {
            Mode::Device => &self.device,
            Mode::Category => &self.category,
            Mode::Time => &self.time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeVerdict {
    pub mode: Mode,
    pub factor: String,
    /// Mean of the pair averages.
    pub average: f64,
    pub stable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub runs: Vec<u32>,
    pub threshold: f64,
    pub pairs: Vec<PairComparison>,
    pub modes: Vec<ModeVerdict>,
    /// Every mode's average is strictly above `threshold`.
    pub stable: bool,
}

/// Compare every unordered pair of runs in every mode.
pub fn compare_runs(
    runs: &[(u32, CpModel)],
    threshold: f64,
) -> Result<ComparisonReport, CompareError> {
    if runs.len() < 2 {
        return Err(CompareError::TooFewRuns { found: runs.len() });
    }

    let mut pairs = Vec::with_capacity(runs.len() * (runs.len() - 1) / 2);
    for (i, (run_a, a)) in runs.iter().enumerate() {
        for (run_b, b) in &runs[i + 1..] {
            let matched = |mode: Mode| match_factors(a.factor(mode).view(), b.factor(mode).view());
            pairs.push(PairComparison {
                run_a: *run_a,
                run_b: *run_b,
                device: matched(Mode::Device),
                category: matched(Mode::Category),
                time: matched(Mode::Time),
            });
        }
    }

    let modes: Vec<ModeVerdict> = Mode::ALL
        .iter()
        .map(|&mode| {
            let average =
                pairs.iter().map(|p| p.get(mode).average).sum::<f64>() / pairs.len() as f64;
            ModeVerdict {
                mode,
                factor: mode.factor_name().to_string(),
                average,
                stable: average > threshold,
            }
        })
        .collect();
    let stable = modes.iter().all(|m| m.stable);

    info!(
        target: event_names::COMPARE_VERDICT,
        runs = runs.len() as u64,
        pairs = pairs.len() as u64,
        stable,
        "comparison finished"
    );

    Ok(ComparisonReport {
        runs: runs.iter().map(|(run, _)| *run).collect(),
        threshold,
        pairs,
        modes,
        stable,
    })
}
