//! Per-device, per-time dominant components.
//!
//! Device `i` at time `t` is labelled with the component `r` maximizing
//! `w[r] · A[i,r] · C[t,r]`. Factor B does not take part. Exact ties go to
//! the lowest component index.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cp::CpModel;
use crate::logging::event_names;

/// (N × T) label matrix.
pub fn assign_communities(model: &CpModel) -> Array2<usize> {
    let (n, _, t) = model.shape();
    let rank = model.rank();
    Array2::from_shape_fn((n, t), |(i, k)| {
        let mut best = 0;
        let mut best_value = f64::NEG_INFINITY;
        for r in 0..rank {
            let value = model.weights[r] * model.factor_a[[i, r]] * model.factor_c[[k, r]];
            if value > best_value {
                best = r;
                best_value = value;
            }
        }
        best
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunitySummary {
    /// Per device, how often its label changes between consecutive steps.
    pub label_changes: Vec<usize>,
    /// Per component, the number of (device, time) cells labelled with it.
    pub occupancy: Vec<usize>,
}

impl CommunitySummary {
    pub fn from_labels(labels: &Array2<usize>, rank: usize) -> Self {
        let label_changes = labels
            .rows()
            .into_iter()
            .map(|row| row.windows(2).into_iter().filter(|w| w[0] != w[1]).count())
            .collect();
        let mut occupancy = vec![0; rank];
        for &label in labels.iter() {
            if let Some(slot) = occupancy.get_mut(label) {
                *slot += 1;
            }
        }
        CommunitySummary {
            label_changes,
            occupancy,
        }
    }
}

/// Labels with their row/column names and summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityAssignment {
    pub rank: usize,
    pub devices: Vec<String>,
    /// Dates, or `0..T` as strings when usable labels were not supplied.
    pub times: Vec<String>,
    pub labels: Array2<usize>,
    pub summary: CommunitySummary,
}

impl CommunityAssignment {
    /// Label series of one device.
    pub fn series(&self, device: usize) -> Option<Vec<usize>> {
        (device < self.labels.nrows()).then(|| self.labels.row(device).to_vec())
    }
}

/// Derive the assignment and attach labels.
///
/// Device labels are used when their count matches N, time labels when it
/// matches T; otherwise indices are substituted (with a warning for times).
pub fn derive_communities(
    model: &CpModel,
    devices: Option<&[String]>,
    times: Option<&[String]>,
) -> CommunityAssignment {
    let labels = assign_communities(model);
    let (n, t) = labels.dim();

    let devices = match devices {
        Some(d) if d.len() == n => d.to_vec(),
        _ => (0..n).map(|i| i.to_string()).collect(),
    };
    let times = match times {
        Some(ts) if ts.len() == t => ts.to_vec(),
        Some(ts) => {
            warn!(
                target: event_names::COMMUNITY_TIME_LABELS_DROPPED,
                supplied = ts.len() as u64,
                expected = t as u64,
                "time label count does not match; using indices"
            );
            (0..t).map(|k| k.to_string()).collect()
        }
        None => (0..t).map(|k| k.to_string()).collect(),
    };

    let summary = CommunitySummary::from_labels(&labels, model.rank());
    CommunityAssignment {
        rank: model.rank(),
        devices,
        times,
        labels,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn diagonal_model() -> CpModel {
        CpModel {
            weights: array![1.0, 1.0],
            factor_a: array![[1.0, 0.0], [0.0, 1.0]],
            factor_b: array![[1.0, 1.0]],
            factor_c: array![[1.0, 0.0], [0.0, 1.0]],
        }
    }

    #[test]
    fn test_argmax_with_zero_ties_picks_lowest() {
        let labels = assign_communities(&diagonal_model());
        assert_eq!(labels, array![[0, 0], [0, 1]]);
    }

    #[test]
    fn test_weights_shift_the_winner() {
        let mut model = diagonal_model();
        model.factor_a = array![[1.0, 1.0], [1.0, 1.0]];
        model.factor_c = array![[1.0, 1.0], [1.0, 1.0]];
        model.weights = array![1.0, 2.0];
        assert!(assign_communities(&model).iter().all(|&l| l == 1));
        model.weights = array![2.0, 2.0];
        assert!(assign_communities(&model).iter().all(|&l| l == 0));
    }

    #[test]
    fn test_summary_counts() {
        let labels = array![[0, 1, 1, 0], [2, 2, 2, 2]];
        let s = CommunitySummary::from_labels(&labels, 3);
        assert_eq!(s.label_changes, vec![2, 0]);
        assert_eq!(s.occupancy, vec![2, 2, 4]);
    }

    #[test]
    fn test_time_labels_used_only_when_counts_match() {
        let model = diagonal_model();
        let dates = vec!["2024-01-01".to_string(), "2024-01-02".to_string()];
        let a = derive_communities(&model, None, Some(&dates));
        assert_eq!(a.times, dates);
        assert_eq!(a.devices, vec!["0", "1"]);

        let short = vec!["2024-01-01".to_string()];
        let b = derive_communities(&model, None, Some(&short));
        assert_eq!(b.times, vec!["0", "1"]);
        assert_eq!(b.series(1), Some(vec![0, 1]));
        assert_eq!(b.series(2), None);
    }
}
