//! Command output: JSON envelopes, markdown and one-line summaries.

use chrono::Utc;
use dt_common::{AnalysisId, OutputFormat, SCHEMA_VERSION};
use serde::Serialize;
use std::fmt::Write as _;

use crate::community::CommunityAssignment;
use crate::cp::CpFit;
use crate::rank::RankScanReport;
use crate::similarity::ComparisonReport;
use crate::stability::StabilityReport;
use crate::tensor::TensorReport;

/// Wrapper for every JSON payload on stdout.
#[derive(Debug, Serialize)]
pub struct OutputEnvelope<'a, T: Serialize> {
    pub schema_version: &'static str,
    pub command: &'a str,
    pub generated_at: String,
    pub analysis_id: &'a AnalysisId,
    pub payload: &'a T,
}

impl<'a, T: Serialize> OutputEnvelope<'a, T> {
    pub fn new(command: &'a str, analysis_id: &'a AnalysisId, payload: &'a T) -> Self {
        OutputEnvelope {
            schema_version: SCHEMA_VERSION,
            command,
            generated_at: Utc::now().to_rfc3339(),
            analysis_id,
            payload,
        }
    }
}

/// Text renderings of a payload.
pub trait Render {
    fn markdown(&self) -> String;
    fn summary(&self) -> String;
}

/// Render `payload` in `format`. `Exitcode` renders nothing.
pub fn render<T: Serialize + Render>(
    format: OutputFormat,
    command: &str,
    analysis_id: &AnalysisId,
    payload: &T,
) -> Result<Option<String>, serde_json::Error> {
    Ok(match format {
        OutputFormat::Json => Some(serde_json::to_string_pretty(&OutputEnvelope::new(
            command,
            analysis_id,
            payload,
        ))?),
        OutputFormat::Md => Some(payload.markdown()),
        OutputFormat::Summary => Some(format!("[{}] {}: {}", analysis_id, command, payload.summary())),
        OutputFormat::Exitcode => None,
    })
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.6}")).unwrap_or_else(|| "-".to_string())
}

/// Result of `assemble`.
#[derive(Debug, Clone, Serialize)]
pub struct AssembleOutput {
    pub layer: String,
    pub shape: [usize; 3],
    pub accepted: Vec<String>,
    pub skipped: Vec<crate::source::SkippedInput>,
    pub coerced_cells: usize,
    pub stored_at: String,
}

impl Render for AssembleOutput {
    fn markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Tensor `{}`", self.layer);
        let _ = writeln!(out);
        let [n, m, t] = self.shape;
        let _ = writeln!(out, "Shape: {n} devices × {m} categories × {t} days");
        let _ = writeln!(out, "Stored at: {}", self.stored_at);
        if self.coerced_cells > 0 {
            let _ = writeln!(out, "Coerced cells: {}", self.coerced_cells);
        }
        if !self.skipped.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "## Skipped ({})", self.skipped.len());
            for s in &self.skipped {
                let _ = writeln!(out, "- {}: {}", s.name, s.reason);
            }
        }
        out
    }

    fn summary(&self) -> String {
        let [n, m, t] = self.shape;
        format!(
            "{} {}x{}x{} accepted={} skipped={}",
            self.layer,
            n,
            m,
            t,
            self.accepted.len(),
            self.skipped.len()
        )
    }
}

impl Render for TensorReport {
    fn markdown(&self) -> String {
        let mut out = String::new();
        let [n, m, t] = self.shape;
        let _ = writeln!(out, "# Tensor report");
        let _ = writeln!(out);
        let _ = writeln!(out, "| field | value |");
        let _ = writeln!(out, "|---|---|");
        let _ = writeln!(out, "| shape | {n} × {m} × {t} |");
        let _ = writeln!(out, "| total | {} |", self.total);
        let _ = writeln!(out, "| nonzero | {} |", self.nonzero);
        let _ = writeln!(out, "| negative | {} |", self.negative);
        let _ = writeln!(out, "| non-finite | {} |", self.non_finite);
        let _ = writeln!(out, "| frobenius norm | {:.6} |", self.frobenius_norm);
        if let Some(first) = &self.first_time {
            let _ = writeln!(out, "| first time step | {first} |");
        }
        out
    }

    fn summary(&self) -> String {
        let [n, m, t] = self.shape;
        format!(
            "{n}x{m}x{t} total={} negative={} non_finite={}",
            self.total, self.negative, self.non_finite
        )
    }
}

/// Result of `decompose`.
#[derive(Debug, Clone, Serialize)]
pub struct DecomposeOutput {
    pub key: String,
    pub fit: CpFit,
    pub variance_explained: f64,
    pub attempted: usize,
    pub failures: Vec<crate::cp::RestartFailure>,
}

impl Render for DecomposeOutput {
    fn markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Model `{}`", self.key);
        let _ = writeln!(out);
        let _ = writeln!(out, "- Relative error: {:.6}", self.fit.error);
        let _ = writeln!(out, "- Variance explained (1 - error): {:.6}", self.variance_explained);
        let _ = writeln!(out, "- Iterations: {} ({})", self.fit.iterations, self.fit.status);
        let _ = writeln!(out, "- Seed: {} ({} init)", self.fit.seed, self.fit.init);
        let _ = writeln!(
            out,
            "- Restarts: {} attempted, {} failed",
            self.attempted,
            self.failures.len()
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "| component | weight |");
        let _ = writeln!(out, "|---|---|");
        for (r, w) in self.fit.model.weights.iter().enumerate() {
            let _ = writeln!(out, "| {r} | {w:.6} |");
        }
        out
    }

    fn summary(&self) -> String {
        format!(
            "{} error={:.6} iterations={} status={}",
            self.key, self.fit.error, self.fit.iterations, self.fit.status
        )
    }
}

impl Render for RankScanReport {
    fn markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Rank scan");
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Seed {}, {} iterations, tolerance {:e}",
            self.seed, self.max_iterations, self.tolerance
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "| rank | error | variance explained | note |");
        let _ = writeln!(out, "|---|---|---|---|");
        for e in &self.entries {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} |",
                e.rank,
                fmt_opt(e.error),
                fmt_opt(e.variance_explained),
                e.failure.as_deref().unwrap_or("")
            );
        }
        for step in &self.non_monotonic {
            let _ = writeln!(
                out,
                "\nWarning: error rose by {:.6} from rank {} to rank {}",
                step.increase, step.from_rank, step.to_rank
            );
        }
        out
    }

    fn summary(&self) -> String {
        let curve: Vec<String> = self
            .entries
            .iter()
            .map(|e| format!("R{}={}", e.rank, fmt_opt(e.error)))
            .collect();
        format!("{} failed={}", curve.join(" "), self.failed)
    }
}

impl Render for StabilityReport {
    fn markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Stability at rank {}", self.rank);
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{} of {} runs succeeded ({} failed)",
            self.succeeded, self.runs_requested, self.failed
        );
        if let Some(s) = &self.summary {
            let _ = writeln!(
                out,
                "Error mean {:.6}, std {:.6}, min {:.6}",
                s.mean, s.std_dev, s.min
            );
        }
        if self.high_variability {
            let _ = writeln!(
                out,
                "Warning: std exceeds {:.0}% of the mean",
                self.variability_threshold * 100.0
            );
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "| run | seed | error | note |");
        let _ = writeln!(out, "|---|---|---|---|");
        for r in &self.runs {
            let note = match (&r.failure, self.best_run == Some(r.run)) {
                (Some(f), _) => f.clone(),
                (None, true) => "best".to_string(),
                (None, false) => String::new(),
            };
            let _ = writeln!(out, "| {} | {} | {} | {} |", r.run, r.seed, fmt_opt(r.error), note);
        }
        out
    }

    fn summary(&self) -> String {
        let stats = self
            .summary
            .map(|s| format!("mean={:.6} std={:.6} min={:.6}", s.mean, s.std_dev, s.min))
            .unwrap_or_else(|| "no successful runs".to_string());
        format!(
            "R{} ok={} failed={} {}{}",
            self.rank,
            self.succeeded,
            self.failed,
            stats,
            if self.high_variability { " HIGH-VARIABILITY" } else { "" }
        )
    }
}

impl Render for ComparisonReport {
    fn markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Run comparison");
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{} runs, {} pairs, threshold {}",
            self.runs.len(),
            self.pairs.len(),
            self.threshold
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "| factor | mode | average similarity | stable |");
        let _ = writeln!(out, "|---|---|---|---|");
        for m in &self.modes {
            let _ = writeln!(
                out,
                "| {} | {} | {:.6} | {} |",
                m.factor,
                m.mode,
                m.average,
                if m.stable { "yes" } else { "no" }
            );
        }
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Verdict: {}",
            if self.stable { "stable" } else { "unstable" }
        );
        out
    }

    fn summary(&self) -> String {
        let modes: Vec<String> = self
            .modes
            .iter()
            .map(|m| format!("{}={:.4}", m.factor, m.average))
            .collect();
        format!(
            "{} {}",
            modes.join(" "),
            if self.stable { "stable" } else { "unstable" }
        )
    }
}

impl Render for CommunityAssignment {
    fn markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Communities (rank {})", self.rank);
        let _ = writeln!(out);
        let _ = write!(out, "| device |");
        for t in &self.times {
            let _ = write!(out, " {t} |");
        }
        let _ = writeln!(out, " changes |");
        let _ = writeln!(out, "|---|{}---|", "---|".repeat(self.times.len()));
        for (i, device) in self.devices.iter().enumerate() {
            let _ = write!(out, "| {device} |");
            for label in self.labels.row(i) {
                let _ = write!(out, " {label} |");
            }
            let changes = self.summary.label_changes.get(i).copied().unwrap_or(0);
            let _ = writeln!(out, " {changes} |");
        }
        out
    }

    fn summary(&self) -> String {
        let occupancy: Vec<String> = self
            .summary
            .occupancy
            .iter()
            .enumerate()
            .map(|(r, c)| format!("{r}:{c}"))
            .collect();
        format!(
            "{} devices x {} steps occupancy {}",
            self.devices.len(),
            self.times.len(),
            occupancy.join(",")
        )
    }
}
