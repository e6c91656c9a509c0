//! Stability batches: K seeded fits at one rank.
//!
//! Run `k` (1-based) uses seed `base_seed + k - 1`. A run that fails is
//! counted and logged; the summary statistics cover successful runs only.
//! Persisting a batch replaces the previous batch's run models, and the
//! stored report is the index of which runs belong to it.

use dt_common::{LayerName, ModelKey};
use dt_config::{DecompositionParams, StabilityParams};
use dt_math::{summarize, SummaryStats};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::cp::{check_rank, CpFit, CpModel, DecomposeError, SolverStatus};
use crate::logging::event_names;
use crate::rank::Decomposer;
use crate::store::{ArtifactStore, StoreError};
use crate::tensor::DeviceTensor;

/// Batch-level failures. Individual run failures are recorded in the
/// report instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StabilityError {
    #[error(transparent)]
    Rank(#[from] DecomposeError),

    #[error("{runs} runs requested; run indices must fit in 32 bits")]
    TooManyRuns { runs: usize },
}

impl From<StabilityError> for dt_common::Error {
    fn from(err: StabilityError) -> Self {
        match err {
            StabilityError::Rank(e) => e.into(),
            StabilityError::TooManyRuns { .. } => {
                dt_common::Error::InputValidation(err.to_string())
            }
        }
    }
}

/// Seed for 1-based run `run`.
pub fn run_seed(base_seed: u64, run: u32) -> u64 {
    base_seed.wrapping_add(u64::from(run).saturating_sub(1))
}

/// Accounting for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run: u32,
    pub seed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SolverStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityReport {
    pub rank: usize,
    pub base_seed: u64,
    pub runs_requested: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub runs: Vec<RunRecord>,
    /// Error statistics over successful runs.
    pub summary: Option<SummaryStats>,
    pub coefficient_of_variation: Option<f64>,
    pub variability_threshold: f64,
    /// Standard deviation above `variability_threshold` × mean.
    pub high_variability: bool,
    /// Successful run with the lowest error (earliest on ties).
    pub best_run: Option<u32>,
}

/// Report plus the fitted models of the successful runs, in run order.
#[derive(Debug, Clone)]
pub struct StabilityBatch {
    pub report: StabilityReport,
    pub fits: Vec<(u32, CpFit)>,
}

impl StabilityBatch {
    pub fn best_fit(&self) -> Option<&CpFit> {
        let best = self.report.best_run?;
        self.fits.iter().find(|(run, _)| *run == best).map(|(_, fit)| fit)
    }

    /// Replace the stored runs for (layer, rank) with this batch: earlier
    /// run models are removed, every successful run and the report are
    /// written, and optionally the best run becomes the accepted model.
    pub fn persist<S: ArtifactStore + ?Sized>(
        &self,
        store: &S,
        layer: &LayerName,
        promote: bool,
    ) -> Result<Option<ModelKey>, StoreError> {
        let rank = self.report.rank;
        store.clear_runs(layer, rank)?;
        for (run, fit) in &self.fits {
            store.save_model(&ModelKey::run(layer.clone(), rank, *run), fit)?;
        }
        store.save_stability(layer, rank, &self.report)?;

        if !promote {
            return Ok(None);
        }
        match self.best_fit() {
            Some(fit) => {
                let key = ModelKey::accepted(layer.clone(), rank);
                store.save_model(&key, fit)?;
                Ok(Some(key))
            }
            None => Ok(None),
        }
    }
}

/// Models of the successful runs of the last persisted batch, in run order.
///
/// The run set comes from the stored report, not from the directory.
pub fn load_batch_models<S: ArtifactStore + ?Sized>(
    store: &S,
    layer: &LayerName,
    rank: usize,
) -> Result<Vec<(u32, CpModel)>, StoreError> {
    let report = store.load_stability(layer, rank)?;
    report
        .runs
        .iter()
        .filter(|record| record.failure.is_none())
        .map(|record| {
            let key = ModelKey::run(layer.clone(), rank, record.run);
            Ok((record.run, store.load_model(&key)?.fit.model))
        })
        .collect()
}

/// Run `stability.runs` fits at `rank`.
///
/// `params` supplies the iteration budget and init scheme; its seed is
/// replaced per run. An out-of-bounds rank fails the whole batch before any
/// run starts.
pub fn run_stability<D: Decomposer + ?Sized>(
    decomposer: &D,
    tensor: &DeviceTensor,
    rank: usize,
    params: &DecompositionParams,
    stability: &StabilityParams,
    parallel: bool,
) -> Result<StabilityBatch, StabilityError> {
    check_rank(tensor.shape(), rank)?;
    let last_run = u32::try_from(stability.runs).map_err(|_| StabilityError::TooManyRuns {
        runs: stability.runs,
    })?;

    let fit_run = |run: u32| -> (RunRecord, Option<CpFit>) {
        let seed = run_seed(stability.base_seed, run);
        let seeded = DecompositionParams {
            seed,
            ..params.clone()
        };
        let result = decomposer.decompose(tensor, rank, &seeded);
        log_run(run, seed, &result);
        record(run, seed, result)
    };

    let run_ids = 1..=last_run;
    let outcomes: Vec<(RunRecord, Option<CpFit>)> = if parallel {
        run_ids.into_par_iter().map(fit_run).collect()
    } else {
        run_ids.map(fit_run).collect()
    };

    let mut runs = Vec::with_capacity(outcomes.len());
    let mut fits = Vec::new();
    for (record, fit) in outcomes {
        if let Some(fit) = fit {
            fits.push((record.run, fit));
        }
        runs.push(record);
    }

    let errors: Vec<f64> = fits.iter().map(|(_, fit)| fit.error).collect();
    let summary = summarize(&errors);
    let coefficient_of_variation = summary.and_then(|s| s.coefficient_of_variation());
    let high_variability =
        coefficient_of_variation.is_some_and(|cv| cv > stability.variability_threshold);
    if high_variability {
        warn!(
            target: event_names::STABILITY_HIGH_VARIABILITY,
            rank = rank as u64,
            cv = coefficient_of_variation.unwrap_or_default(),
            threshold = stability.variability_threshold,
            "error varies strongly across runs"
        );
    }

    let best_run = fits
        .iter()
        .fold(None::<(u32, f64)>, |best, (run, fit)| match best {
            Some((_, err)) if err <= fit.error => best,
            _ => Some((*run, fit.error)),
        })
        .map(|(run, _)| run);

    Ok(StabilityBatch {
        report: StabilityReport {
            rank,
            base_seed: stability.base_seed,
            runs_requested: stability.runs,
            succeeded: fits.len(),
            failed: runs.len() - fits.len(),
            runs,
            summary,
            coefficient_of_variation,
            variability_threshold: stability.variability_threshold,
            high_variability,
            best_run,
        },
        fits,
    })
}

fn record(
    run: u32,
    seed: u64,
    result: Result<CpFit, DecomposeError>,
) -> (RunRecord, Option<CpFit>) {
    match result {
        Ok(fit) => (
            RunRecord {
                run,
                seed,
                error: Some(fit.error),
                iterations: Some(fit.iterations),
                status: Some(fit.status),
                failure: None,
            },
            Some(fit),
        ),
        Err(e) => (
            RunRecord {
                run,
                seed,
                error: None,
                iterations: None,
                status: None,
                failure: Some(e.to_string()),
            },
            None,
        ),
    }
}

fn log_run(run: u32, seed: u64, result: &Result<CpFit, DecomposeError>) {
    match result {
        Ok(fit) => info!(
            target: event_names::STABILITY_RUN_DONE,
            run,
            seed,
            error = fit.error,
            iterations = fit.iterations as u64,
            "run finished"
        ),
        Err(e) => warn!(
            target: event_names::STABILITY_RUN_FAILED,
            run,
            seed,
            reason = %e,
            "run failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rank::AlsDecomposer;
    use crate::store::FsStore;
    use dt_config::InitScheme;
    use ndarray::{Array1, Array2, Array3};
    use tempfile::tempdir;

    /// Error `0.1 * seed`, failing for the listed seeds.
    struct BySeed {
        fail_seeds: Vec<u64>,
    }

    impl Decomposer for BySeed {
        fn decompose(
            &self,
            tensor: &DeviceTensor,
            rank: usize,
            params: &DecompositionParams,
        ) -> Result<CpFit, DecomposeError> {
            if self.fail_seeds.contains(&params.seed) {
                return Err(DecomposeError::NonFinite { iteration: 1 });
            }
            let (n, m, t) = tensor.shape();
            Ok(CpFit {
                model: CpModel {
                    weights: Array1::ones(rank),
                    factor_a: Array2::ones((n, rank)),
                    factor_b: Array2::ones((m, rank)),
                    factor_c: Array2::ones((t, rank)),
                },
                error: 0.1 * params.seed as f64,
                iterations: 3,
                status: SolverStatus::Converged,
                seed: params.seed,
                init: params.init,
                trace: Vec::new(),
            })
        }
    }

    fn tensor() -> DeviceTensor {
        DeviceTensor::from_array(Array3::from_shape_fn((3, 2, 4), |(i, j, k)| {
            (i + j + k + 1) as f64
        }))
    }

    fn stability(runs: usize, base_seed: u64) -> StabilityParams {
        StabilityParams {
            runs,
            base_seed,
            similarity_threshold: 0.8,
            variability_threshold: 0.1,
        }
    }

    #[test]
    fn test_run_seeds() {
        assert_eq!(run_seed(10, 1), 10);
        assert_eq!(run_seed(10, 5), 14);
    }

    #[test]
    fn test_summary_excludes_failed_run() {
        // Seeds 1..=5; run 3 has seed 3.
        let d = BySeed {
            fail_seeds: vec![3],
        };
        let batch = run_stability(
            &d,
            &tensor(),
            2,
            &DecompositionParams::default(),
            &stability(5, 1),
            false,
        )
        .unwrap();
        let report = &batch.report;
        assert_eq!(report.succeeded, 4);
        assert_eq!(report.failed, 1);
        assert_eq!(report.runs.len(), 5);
        assert!(report.runs[2].failure.is_some());

        let s = report.summary.unwrap();
        assert_eq!(s.count, 4);
        // Errors 0.1, 0.2, 0.4, 0.5.
        assert!((s.mean - 0.3).abs() < 1e-12);
        assert!((s.min - 0.1).abs() < 1e-12);
        assert!((s.std_dev - 0.025f64.sqrt()).abs() < 1e-12);
        assert!(report.high_variability);
        assert_eq!(report.best_run, Some(1));
        assert_eq!(batch.fits.iter().map(|(r, _)| *r).collect::<Vec<_>>(), vec![1, 2, 4, 5]);
    }

    #[test]
    fn test_all_runs_failing_gives_empty_summary() {
        let d = BySeed {
            fail_seeds: vec![7, 8],
        };
        let batch = run_stability(
            &d,
            &tensor(),
            1,
            &DecompositionParams::default(),
            &stability(2, 7),
            true,
        )
        .unwrap();
        assert_eq!(batch.report.failed, 2);
        assert!(batch.report.summary.is_none());
        assert!(!batch.report.high_variability);
        assert_eq!(batch.report.best_run, None);
        assert!(batch.best_fit().is_none());
    }

    #[test]
    fn test_parallel_matches_serial() {
        let params = DecompositionParams {
            init: InitScheme::Random,
            max_iterations: 30,
            tolerance: 1e-8,
            seed: 0,
            restarts: 1,
        };
        let serial =
            run_stability(&AlsDecomposer, &tensor(), 2, &params, &stability(3, 5), false).unwrap();
        let parallel =
            run_stability(&AlsDecomposer, &tensor(), 2, &params, &stability(3, 5), true).unwrap();
        assert_eq!(serial.report, parallel.report);
        let seeds: Vec<u64> = serial.report.runs.iter().map(|r| r.seed).collect();
        assert_eq!(seeds, vec![5, 6, 7]);
    }

    #[test]
    fn test_persist_and_promote() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let layer = LayerName::parse("arp").unwrap();
        let d = BySeed {
            fail_seeds: vec![2],
        };
        let batch = run_stability(
            &d,
            &tensor(),
            2,
            &DecompositionParams::default(),
            &stability(3, 1),
            false,
        )
        .unwrap();

        let promoted = batch.persist(&store, &layer, true).unwrap();
        assert_eq!(promoted, Some(ModelKey::accepted(layer.clone(), 2)));
        assert_eq!(store.list_runs(&layer, 2).unwrap(), vec![1, 3]);
        assert_eq!(store.load_stability(&layer, 2).unwrap(), batch.report);
        let accepted = store.load_model(&ModelKey::accepted(layer.clone(), 2)).unwrap();
        assert_eq!(accepted.fit.seed, 1);
    }

    #[test]
    fn test_out_of_bounds_rank_fails_before_any_run() {
        let small = DeviceTensor::from_array(Array3::ones((2, 2, 1)));
        for rank in [0, 3] {
            let err = run_stability(
                &AlsDecomposer,
                &small,
                rank,
                &DecompositionParams::default(),
                &stability(3, 1),
                false,
            )
            .unwrap_err();
            assert_eq!(err, StabilityError::Rank(DecomposeError::InvalidRank { rank, bound: 2 }));
            assert_eq!(dt_common::Error::from(err).code(), 23);
        }
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_run_count_beyond_u32_is_rejected() {
        let runs = u32::MAX as usize + 1;
        let err = run_stability(
            &BySeed { fail_seeds: vec![] },
            &tensor(),
            2,
            &DecompositionParams::default(),
            &stability(runs, 1),
            false,
        )
        .unwrap_err();
        assert_eq!(err, StabilityError::TooManyRuns { runs });
    }

    #[test]
    fn test_second_batch_replaces_earlier_runs() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let layer = LayerName::parse("tcp").unwrap();
        let never = BySeed { fail_seeds: vec![] };
        let first = run_stability(
            &never,
            &tensor(),
            2,
            &DecompositionParams::default(),
            &stability(5, 100),
            false,
        )
        .unwrap();
        first.persist(&store, &layer, false).unwrap();
        assert_eq!(store.list_runs(&layer, 2).unwrap(), vec![1, 2, 3, 4, 5]);

        // Run 2 of the second batch has seed 201.
        let flaky = BySeed {
            fail_seeds: vec![201],
        };
        let second = run_stability(
            &flaky,
            &tensor(),
            2,
            &DecompositionParams::default(),
            &stability(3, 200),
            false,
        )
        .unwrap();
        second.persist(&store, &layer, false).unwrap();

        assert_eq!(store.list_runs(&layer, 2).unwrap(), vec![1, 3]);
        let seeds: Vec<u64> = store
            .list_runs(&layer, 2)
            .unwrap()
            .into_iter()
            .map(|run| store.load_model(&ModelKey::run(layer.clone(), 2, run)).unwrap().fit.seed)
            .collect();
        assert_eq!(seeds, vec![200, 202]);

        let models = load_batch_models(&store, &layer, 2).unwrap();
        assert_eq!(models.iter().map(|(run, _)| *run).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(models.len(), second.report.succeeded);
    }

    #[test]
    fn test_batch_models_require_a_report() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let layer = LayerName::parse("tcp").unwrap();
        let run = ModelKey::run(layer.clone(), 2, 1);
        let fit = BySeed { fail_seeds: vec![] }
            .decompose(&tensor(), 2, &DecompositionParams::default())
            .unwrap();
        store.save_model(&run, &fit).unwrap();
        assert!(matches!(
            load_batch_models(&store, &layer, 2),
            Err(StoreError::NotFound { .. })
        ));
    }
}
