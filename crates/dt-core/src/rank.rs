//! Rank selection diagnostics.
//!
//! Fits one model per candidate rank with a shared seed and budget and
//! reports the error curve. Choosing the rank (the elbow) is left to the
//! analyst.

use dt_config::DecompositionParams;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use tracing::{info, warn};

use crate::cp::{self, CpFit, DecomposeError, SolverStatus};
use crate::logging::event_names;
use crate::tensor::DeviceTensor;

/// Error increases between consecutive ranks up to this size are treated as
/// optimizer noise.
pub const NON_MONOTONIC_TOLERANCE: f64 = 1e-6;

/// Something that fits one CP model. Batches go through this so a single
/// attempt can be swapped out.
pub trait Decomposer: Sync {
    fn decompose(
        &self,
        tensor: &DeviceTensor,
        rank: usize,
        params: &DecompositionParams,
    ) -> Result<CpFit, DecomposeError>;
}

/// One ALS fit per call, seeded from `params.seed`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlsDecomposer;

impl Decomposer for AlsDecomposer {
    fn decompose(
        &self,
        tensor: &DeviceTensor,
        rank: usize,
        params: &DecompositionParams,
    ) -> Result<CpFit, DecomposeError> {
        cp::decompose(tensor, rank, params)
    }
}

/// Outcome for one candidate rank. A failed rank keeps its slot with no
/// error value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankScanEntry {
    pub rank: usize,
    pub error: Option<f64>,
    pub variance_explained: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SolverStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl RankScanEntry {
    fn from_result(rank: usize, result: Result<CpFit, DecomposeError>) -> Self {
        match result {
            Ok(fit) => RankScanEntry {
                rank,
                error: Some(fit.error),
                variance_explained: Some(fit.variance_explained()),
                iterations: Some(fit.iterations),
                status: Some(fit.status),
                failure: None,
            },
            Err(e) => RankScanEntry {
                rank,
                error: None,
                variance_explained: None,
                iterations: None,
                status: None,
                failure: Some(e.to_string()),
            },
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_none()
    }
}

/// Error went up from one successful rank to the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonMonotonicStep {
    pub from_rank: usize,
    pub to_rank: usize,
    pub increase: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankScanReport {
    pub seed: u64,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub entries: Vec<RankScanEntry>,
    pub failed: usize,
    pub non_monotonic: Vec<NonMonotonicStep>,
}

impl RankScanReport {
    pub fn succeeded(&self) -> usize {
        self.entries.len() - self.failed
    }

    /// Successful entry with the lowest error.
    pub fn best(&self) -> Option<&RankScanEntry> {
        self.entries
            .iter()
            .filter(|e| e.error.is_some())
            .min_by(|a, b| a.error.partial_cmp(&b.error).unwrap_or(std::cmp::Ordering::Equal))
    }
}

/// Fit every rank in `ranks` and collect the error curve.
///
/// Failures are recorded per rank and never stop the scan. Entries are in
/// rank order regardless of `parallel`. A lower end outside the tensor's
/// rank bound rejects the whole scan; upper ranks past the bound are
/// recorded as failed entries.
pub fn scan_ranks<D: Decomposer + ?Sized>(
    decomposer: &D,
    tensor: &DeviceTensor,
    ranks: RangeInclusive<usize>,
    params: &DecompositionParams,
    parallel: bool,
) -> Result<RankScanReport, DecomposeError> {
    if !ranks.is_empty() {
        cp::check_rank(tensor.shape(), *ranks.start())?;
    }

    let fit_one = |rank: usize| {
        let entry = RankScanEntry::from_result(rank, decomposer.decompose(tensor, rank, params));
        match (&entry.error, &entry.failure) {
            (Some(error), _) => info!(
                target: event_names::RANK_SCAN_RANK_DONE,
                rank = rank as u64,
                error = *error,
                "rank fitted"
            ),
            (None, failure) => warn!(
                target: event_names::RANK_SCAN_RANK_FAILED,
                rank = rank as u64,
                reason = failure.as_deref().unwrap_or("unknown"),
                "rank failed"
            ),
        }
        entry
    };

    let entries: Vec<RankScanEntry> = if parallel {
        ranks.into_par_iter().map(fit_one).collect()
    } else {
        ranks.map(fit_one).collect()
    };

    let non_monotonic = monotonicity_violations(&entries);
    for step in &non_monotonic {
        warn!(
            target: event_names::RANK_SCAN_NON_MONOTONIC,
            from_rank = step.from_rank as u64,
            to_rank = step.to_rank as u64,
            increase = step.increase,
            "error increased with rank"
        );
    }

    Ok(RankScanReport {
        seed: params.seed,
        max_iterations: params.max_iterations,
        tolerance: params.tolerance,
        failed: entries.iter().filter(|e| e.is_failed()).count(),
        entries,
        non_monotonic,
    })
}

/// Steps between consecutive successful ranks where the error rose by more
/// than [`NON_MONOTONIC_TOLERANCE`]. Failed ranks are skipped over.
pub fn monotonicity_violations(entries: &[RankScanEntry]) -> Vec<NonMonotonicStep> {
    let fitted: Vec<(usize, f64)> = entries
        .iter()
        .filter_map(|e| e.error.map(|err| (e.rank, err)))
        .collect();
    fitted
        .windows(2)
        .filter_map(|w| {
            let (from_rank, before) = w[0];
            let (to_rank, after) = w[1];
            (after - before > NON_MONOTONIC_TOLERANCE).then_some(NonMonotonicStep {
                from_rank,
                to_rank,
                increase: after - before,
            })
        })
        .collect()
}
